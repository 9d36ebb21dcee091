//! Database builder for fluent configuration
//!
//! ```text
//! // 1. Durable, settings from <path>/gink.toml
//! let db = Database::open("/data/mydb")?;
//!
//! // 2. Builder for explicit settings
//! let db = Database::builder()
//!     .path("/data/mydb")
//!     .identity("alice@laptop")
//!     .open()?;
//!
//! // 3. Ephemeral (no files, testing)
//! let db = Database::in_memory()?;
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use tracing::debug;

use gink_core::Result;
use gink_storage::{BundleStore, LmdbStore, MemoryStore};
use gink_sync::{Relay, RelayOptions};

use super::Database;
use crate::config::{GinkConfig, CONFIG_FILE_NAME};

/// Builder for [`Database`].
///
/// Without a path the database lives in memory. With a path, settings come
/// from `gink.toml` in that directory unless given with [`Self::config`].
#[derive(Default)]
pub struct DatabaseBuilder {
    path: Option<PathBuf>,
    config: Option<GinkConfig>,
    identity: Option<String>,
    relay_options: Option<RelayOptions>,
    symmetric_key: Option<Vec<u8>>,
}

impl std::fmt::Debug for DatabaseBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseBuilder")
            .field("path", &self.path)
            .field("config", &self.config)
            .field("identity", &self.identity)
            .field("relay_options", &self.relay_options.is_some())
            .field("symmetric_key", &self.symmetric_key.is_some())
            .finish()
    }
}

impl DatabaseBuilder {
    /// Builder for an in-memory database with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep the database in directory `path`.
    pub fn path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Use `config` instead of reading `gink.toml`.
    pub fn config(mut self, config: GinkConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Identity recorded by chains this database starts.
    pub fn identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = Some(identity.into());
        self
    }

    /// Peer admission policy.
    pub fn relay_options(mut self, options: RelayOptions) -> Self {
        self.relay_options = Some(options);
        self
    }

    /// Encrypt committed bundles with `key`.
    pub fn symmetric_key(mut self, key: impl Into<Vec<u8>>) -> Self {
        self.symmetric_key = Some(key.into());
        self
    }

    /// Open the database.
    ///
    /// # Errors
    ///
    /// Fails when the directory or config file can't be created or read, or
    /// when the store or a configured listener can't be opened.
    pub fn open(self) -> Result<Database> {
        let (store, mut config): (Arc<dyn BundleStore>, GinkConfig) = match &self.path {
            Some(path) => {
                std::fs::create_dir_all(path)?;
                let config = match self.config {
                    Some(config) => {
                        config.validate()?;
                        config
                    }
                    None => {
                        let file = path.join(CONFIG_FILE_NAME);
                        GinkConfig::write_default_if_missing(&file)?;
                        GinkConfig::from_file(&file)?
                    }
                };
                debug!(path = %path.display(), "opening durable store");
                (Arc::new(LmdbStore::open(path, config.store_config())?), config)
            }
            None => {
                let config = self.config.unwrap_or_default();
                config.validate()?;
                (Arc::new(MemoryStore::in_memory_with(config.store_config())?), config)
            }
        };
        if let Some(identity) = self.identity {
            config.identity = identity;
        }
        let relay = Relay::with_options(store.clone(), self.relay_options.unwrap_or_default())?;
        Database::assemble(store, relay, config, self.path, self.symmetric_key)
    }
}
