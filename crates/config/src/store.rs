//! Reloadable configuration store
//!
//! Holds the current configuration behind an `Arc` and swaps it wholesale on
//! reload, so readers always see either the old or the new value.

use crate::config::{Config, ConfigError};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Owner of the active configuration and the file it came from
#[derive(Debug)]
pub struct ConfigStore {
    path: PathBuf,
    current: Arc<Config>,
}

impl ConfigStore {
    /// Load the file at `path`, writing defaults first if it is missing
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref().to_path_buf();
        let config = Config::load_or_create(&path)?;
        Ok(Self {
            path,
            current: Arc::new(config),
        })
    }

    /// Wrap an already loaded configuration
    pub fn from_config<P: AsRef<Path>>(path: P, config: Config) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            current: Arc::new(config),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Snapshot of the current configuration
    pub fn current(&self) -> Arc<Config> {
        Arc::clone(&self.current)
    }

    /// Re-read the whole file and replace the current configuration
    ///
    /// On error the previous configuration stays in place.
    pub fn reload(&mut self) -> Result<Arc<Config>, ConfigError> {
        let config = Config::load_or_create(&self.path)?;
        self.current = Arc::new(config);
        Ok(self.current())
    }
}
