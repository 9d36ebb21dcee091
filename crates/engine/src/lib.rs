//! Database engine for Gink
//!
//! This crate ties the lower layers together:
//! - Database: chain claiming and reuse, signing keys, sealing and committing
//!   bundles, timestamp resolution, resets, attribution and the bundle log
//! - containers: typed facades (Directory, Sequence, ...) that turn calls
//!   into entry, movement and clearance changes and decode store reads
//! - config: `gink.toml` settings for durable databases
//! - logging: tracing subscriber setup driven by `GINK_LOG_LEVEL`
//!
//! The engine is the only component that knows about:
//! - Which chain this process appends to
//! - Process metadata recorded in a chain's personal directory
//! - How loose timestamps ("-1", "0.5 seconds from now") map to microseconds

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod attribution;
pub mod clock;
pub mod config;
pub mod containers;
pub mod database;
pub mod logging;

pub use attribution::Attribution;
pub use clock::{Clock, GenericTimestamp, EPOCH, NOW};
pub use config::{GinkConfig, GinkConfigError, StoreSection, SyncSection, CONFIG_FILE_NAME};
pub use containers::{
    Accumulator, BoxContainer, Container, Contents, Directory, Edge, EdgeType, Group, KeySet,
    PairMap, PairSet, Property, Sequence, Vertex,
};
pub use database::{Database, DatabaseBuilder, STARTING_CHAIN};
pub use logging::{init_logging, init_logging_with};
