//! Store configuration
//!
//! Controls what a bundle store keeps and how the durable backend is sized.
//! Retention flags only take effect when a store is first created; after
//! that the values persisted in the store win.

use gink_core::Error;

/// Default LMDB map size (1 GiB).
pub const DEFAULT_MAP_SIZE: usize = 1 << 30;

/// Smallest map size accepted by [`StoreConfig::validate`].
pub const MIN_MAP_SIZE: usize = 1 << 20;

/// Store configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Keep every signed bundle so peers can be caught up
    pub retain_bundles: bool,
    /// Keep superseded entries so reads "as of" the past work
    pub retain_entries: bool,
    /// Apply the changes of incoming bundles (off = journal only)
    pub apply_changes: bool,
    /// Maximum size of the LMDB map
    pub map_size: usize,
    /// Wipe every table on open
    pub reset: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            retain_bundles: true,
            retain_entries: true,
            apply_changes: true,
            map_size: DEFAULT_MAP_SIZE,
            reset: false,
        }
    }
}

impl StoreConfig {
    /// Keep neither bundles nor history; only current state is queryable.
    pub fn current_only() -> Self {
        StoreConfig {
            retain_bundles: false,
            retain_entries: false,
            ..Default::default()
        }
    }

    /// Small map, suitable for tests.
    pub fn for_testing() -> Self {
        StoreConfig {
            map_size: 1 << 26,
            ..Default::default()
        }
    }

    /// Set bundle retention
    pub fn with_retain_bundles(mut self, retain: bool) -> Self {
        self.retain_bundles = retain;
        self
    }

    /// Set entry retention
    pub fn with_retain_entries(mut self, retain: bool) -> Self {
        self.retain_entries = retain;
        self
    }

    /// Set whether incoming changes are applied
    pub fn with_apply_changes(mut self, apply: bool) -> Self {
        self.apply_changes = apply;
        self
    }

    /// Set the LMDB map size
    pub fn with_map_size(mut self, map_size: usize) -> Self {
        self.map_size = map_size;
        self
    }

    /// Wipe the store on open
    pub fn with_reset(mut self, reset: bool) -> Self {
        self.reset = reset;
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.map_size < MIN_MAP_SIZE {
            return Err(ConfigError::MapSizeTooSmall(self.map_size));
        }
        Ok(())
    }
}

/// Configuration validation errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Map size below [`MIN_MAP_SIZE`]
    #[error("Map size too small: {0} bytes")]
    MapSizeTooSmall(usize),
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Error::ConfigError(e.to_string())
    }
}
