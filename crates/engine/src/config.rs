//! Database configuration via `gink.toml`
//!
//! A durable database keeps its settings in a config file next to its
//! store. On first open a default `gink.toml` is created; edit it and
//! reopen to change settings. In-memory databases use [`GinkConfig`]
//! values directly.

use std::path::Path;

use serde::{Deserialize, Serialize};

use gink_core::Error;
use gink_storage::config::DEFAULT_MAP_SIZE;
use gink_storage::StoreConfig;
use gink_sync::DEFAULT_PORT;

/// Config file name placed in the database directory.
pub const CONFIG_FILE_NAME: &str = "gink.toml";

/// Problems reading or writing `gink.toml`.
#[derive(Debug, thiserror::Error)]
pub enum GinkConfigError {
    /// The file could not be read or written
    #[error("config file '{path}': {source}")]
    Io {
        /// File involved
        path: String,
        /// Underlying failure
        source: std::io::Error,
    },
    /// The file is not valid TOML for [`GinkConfig`]
    #[error("failed to parse config file '{path}': {message}")]
    Parse {
        /// File involved
        path: String,
        /// Parser message
        message: String,
    },
    /// The config could not be serialized
    #[error("failed to serialize config: {0}")]
    Serialize(String),
    /// A value is out of range
    #[error("invalid config: {0}")]
    Invalid(String),
}

impl From<GinkConfigError> for Error {
    fn from(e: GinkConfigError) -> Self {
        Error::ConfigError(e.to_string())
    }
}

/// What the store keeps. Mirrors [`StoreConfig`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSection {
    /// Keep signed bundles so peers can be caught up
    pub retain_bundles: bool,
    /// Keep superseded entries for reads in the past
    pub retain_entries: bool,
    /// Maximum LMDB map size in bytes
    pub map_size: usize,
}

impl Default for StoreSection {
    fn default() -> Self {
        StoreSection {
            retain_bundles: true,
            retain_entries: true,
            map_size: DEFAULT_MAP_SIZE,
        }
    }
}

/// Peer connectivity set up when the database opens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSection {
    /// Accept peers on open
    pub listen: bool,
    /// Address to listen on; empty means every interface
    pub address: String,
    /// Port to listen on
    pub port: u16,
    /// Targets to connect to on open (`host[:port][/path]`)
    pub peers: Vec<String>,
}

impl Default for SyncSection {
    fn default() -> Self {
        SyncSection {
            listen: false,
            address: String::new(),
            port: DEFAULT_PORT,
            peers: Vec::new(),
        }
    }
}

/// Database configuration loaded from `gink.toml`.
///
/// # Example
///
/// ```toml
/// identity = "alice@laptop"
/// log_level = "info"
///
/// [store]
/// retain_bundles = true
/// retain_entries = true
///
/// [sync]
/// listen = true
/// port = 8080
/// peers = ["db.example.com:8080"]
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GinkConfig {
    /// Recorded by every chain this database starts; `user@host` when empty
    pub identity: String,
    /// Default filter for [`crate::logging::init_logging`]
    pub log_level: Option<String>,
    /// Store retention
    pub store: StoreSection,
    /// Peers
    pub sync: SyncSection,
}

impl GinkConfig {
    /// Store settings derived from this config.
    pub fn store_config(&self) -> StoreConfig {
        StoreConfig::default()
            .with_retain_bundles(self.store.retain_bundles)
            .with_retain_entries(self.store.retain_entries)
            .with_map_size(self.store.map_size)
    }

    /// Check values that can't be checked by parsing.
    pub fn validate(&self) -> Result<(), GinkConfigError> {
        self.store_config()
            .validate()
            .map_err(|e| GinkConfigError::Invalid(e.to_string()))?;
        if self.sync.listen && self.sync.port == 0 && !self.sync.peers.is_empty() {
            return Err(GinkConfigError::Invalid(
                "peers can't reach a listener on an ephemeral port".to_string(),
            ));
        }
        Ok(())
    }

    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# Gink database configuration
#
# Identity recorded when this database starts a chain.
# Leave empty to use user@host.
identity = ""

# Log filter used when no GINK_LOG_LEVEL is set, e.g. "debug" or "gink_sync=trace"
# log_level = "info"

[store]
# Keep every signed bundle so that peers can be caught up.
retain_bundles = true
# Keep superseded entries so that reads in the past and resets work.
retain_entries = true
# Maximum size of the store in bytes.
map_size = 1073741824

[sync]
# Accept peer connections when the database opens.
listen = false
address = ""
port = 8080
# Peers to connect to when the database opens, e.g. ["example.com:8080"]
peers = []
"#
    }

    /// Read and parse config from a file path.
    pub fn from_file(path: &Path) -> Result<Self, GinkConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| GinkConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config: GinkConfig =
            toml::from_str(&content).map_err(|e| GinkConfigError::Parse {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Write the default config file if it does not already exist.
    pub fn write_default_if_missing(path: &Path) -> Result<(), GinkConfigError> {
        if !path.exists() {
            std::fs::write(path, Self::default_toml()).map_err(|source| GinkConfigError::Io {
                path: path.display().to_string(),
                source,
            })?;
        }
        Ok(())
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> Result<(), GinkConfigError> {
        let content =
            toml::to_string_pretty(self).map_err(|e| GinkConfigError::Serialize(e.to_string()))?;
        std::fs::write(path, content).map_err(|source| GinkConfigError::Io {
            path: path.display().to_string(),
            source,
        })
    }
}
