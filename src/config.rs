//! Configuration for bucketkv
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;

use crate::error::{Result, StoreError};

/// Smallest page size accepted by `Config::validate`
pub const MIN_PAGE_SIZE: usize = 512;

/// Largest page size accepted by `Config::validate`
pub const MAX_PAGE_SIZE: usize = 64 * 1024;

/// Main configuration for a bucketkv store
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Path of the single backing file (created if absent)
    pub path: PathBuf,

    /// Page size for newly created files. Existing files keep the page size
    /// recorded in their meta page.
    pub page_size: usize,

    // -------------------------------------------------------------------------
    // Durability Configuration
    // -------------------------------------------------------------------------
    /// Sync strategy: whether commits fsync before returning
    pub sync_strategy: SyncStrategy,

    // -------------------------------------------------------------------------
    // Access Configuration
    // -------------------------------------------------------------------------
    /// Open with a shared lock and reject write transactions
    pub read_only: bool,
}

/// Commit sync strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStrategy {
    /// fsync data pages, then fsync the meta page (safest)
    EveryCommit,

    /// Never fsync; a crash may lose recent commits (tests, bulk loads)
    Never,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./bucketkv.db"),
            page_size: 4096,
            sync_strategy: SyncStrategy::EveryCommit,
            read_only: false,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Check that the configured values are usable
    pub fn validate(&self) -> Result<()> {
        if !self.page_size.is_power_of_two()
            || self.page_size < MIN_PAGE_SIZE
            || self.page_size > MAX_PAGE_SIZE
        {
            return Err(StoreError::Config(format!(
                "page size must be a power of two between {} and {}, got {}",
                MIN_PAGE_SIZE, MAX_PAGE_SIZE, self.page_size
            )));
        }
        if self.path.as_os_str().is_empty() {
            return Err(StoreError::Config("store path is empty".to_string()));
        }
        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the backing file path
    pub fn path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.path = path.into();
        self
    }

    /// Set the page size used when creating a new file
    pub fn page_size(mut self, size: usize) -> Self {
        self.config.page_size = size;
        self
    }

    /// Set the commit sync strategy
    pub fn sync_strategy(mut self, strategy: SyncStrategy) -> Self {
        self.config.sync_strategy = strategy;
        self
    }

    /// Open the store read-only
    pub fn read_only(mut self, read_only: bool) -> Self {
        self.config.read_only = read_only;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
