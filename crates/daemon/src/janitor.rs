//! Cache maintenance
//!
//! Bounds the transcode cache by age and total size. Eviction is oldest
//! mtime first; cache hits touch their entry, so this behaves as LRU.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use steam_animation_config::Config;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// What a sweep removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JanitorReport {
    pub expired_files: usize,
    pub evicted_files: usize,
    pub removed_bytes: u64,
    pub failed_deletions: usize,
    pub remaining_bytes: u64,
}

impl JanitorReport {
    pub fn removed_files(&self) -> usize {
        self.expired_files + self.evicted_files
    }
}

#[derive(Debug, Clone)]
struct CacheFile {
    path: PathBuf,
    size: u64,
    modified: SystemTime,
}

fn list_cache_files(dir: &Path) -> Vec<CacheFile> {
    WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| {
            let metadata = e.metadata().ok()?;
            Some(CacheFile {
                size: metadata.len(),
                modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
                path: e.into_path(),
            })
        })
        .collect()
}

/// Evicts cache entries that are too old or push the cache over its cap.
#[derive(Debug, Clone)]
pub struct CacheJanitor {
    cache_dir: PathBuf,
    max_bytes: u64,
    max_age: Duration,
}

impl CacheJanitor {
    pub fn new(cache_dir: PathBuf, max_bytes: u64, max_age: Duration) -> Self {
        Self {
            cache_dir,
            max_bytes,
            max_age,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.paths.cache_dir.clone(),
            config.max_cache_bytes(),
            config.cache_max_age(),
        )
    }

    /// Total size of the files currently in the cache.
    pub fn cache_size(&self) -> u64 {
        list_cache_files(&self.cache_dir).iter().map(|f| f.size).sum()
    }

    pub fn sweep(&self) -> JanitorReport {
        self.sweep_at(SystemTime::now())
    }

    /// Run both passes as if the current time were `now`.
    pub fn sweep_at(&self, now: SystemTime) -> JanitorReport {
        let mut report = JanitorReport::default();
        let mut failed: HashSet<PathBuf> = HashSet::new();

        for file in list_cache_files(&self.cache_dir) {
            let age = now.duration_since(file.modified).unwrap_or_default();
            if age <= self.max_age {
                continue;
            }
            match fs::remove_file(&file.path) {
                Ok(()) => {
                    debug!("Expired cache entry {}", file.path.display());
                    report.expired_files += 1;
                    report.removed_bytes += file.size;
                }
                Err(e) => {
                    warn!("Failed to delete {}: {}", file.path.display(), e);
                    report.failed_deletions += 1;
                    failed.insert(file.path);
                }
            }
        }

        loop {
            let files = list_cache_files(&self.cache_dir);
            let total: u64 = files.iter().map(|f| f.size).sum();
            report.remaining_bytes = total;
            if total <= self.max_bytes {
                break;
            }

            let Some(oldest) = files
                .into_iter()
                .filter(|f| !failed.contains(&f.path))
                .min_by(|a, b| a.modified.cmp(&b.modified).then_with(|| a.path.cmp(&b.path)))
            else {
                break;
            };

            match fs::remove_file(&oldest.path) {
                Ok(()) => {
                    debug!(
                        "Evicted cache entry {} ({} bytes)",
                        oldest.path.display(),
                        oldest.size
                    );
                    report.evicted_files += 1;
                    report.removed_bytes += oldest.size;
                }
                Err(e) => {
                    warn!("Failed to delete {}: {}", oldest.path.display(), e);
                    report.failed_deletions += 1;
                    failed.insert(oldest.path);
                }
            }
        }

        report
    }
}
