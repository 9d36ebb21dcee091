//! Gink - replicated, history-retaining key/value and collection database
//!
//! Every change is written into a signed bundle on a per-process chain.
//! Peers exchange bundles and converge on the same state; every container
//! can be read as of any past moment and reset back to it.
//!
//! # Quick Start
//!
//! ```ignore
//! use gink::{Database, Directory, NOW};
//!
//! let db = Database::in_memory()?;
//! let root = Directory::arche(&db);
//! root.set("user:123", "Alice", None)?;
//! assert_eq!(root.get("user:123", NOW)?, Some("Alice".into()));
//! ```
//!
//! # Architecture
//!
//! - [`core`]: muids, values, the wire schema and bundle sealing
//! - [`storage`]: memory and LMDB bundle stores
//! - [`sync`]: the peer relay and its protocol
//! - the engine: [`Database`] and the container facades, re-exported here

pub use gink_core as core;
pub use gink_storage as storage;
pub use gink_sync as sync;

pub use gink_core::{Behavior, Error, Muid, Result, UserKey, Value};
pub use gink_engine::*;
