//! Configuration module for the Steam animation daemon
//!
//! Handles loading configuration from TOML files, environment variable overrides,
//! and the reloadable configuration store.

pub mod config;
pub mod store;

pub use config::*;
pub use store::ConfigStore;

/// Serializes tests that read or write process environment variables
#[cfg(test)]
pub(crate) static TEST_ENV_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());
