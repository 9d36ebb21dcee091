//! Storage layer for Gink
//!
//! This crate implements the bundle store:
//! - kv: ordered byte tables and the transaction traits backends implement
//! - MemoryBackend: BTreeMap tables behind a RwLock with undo-log rollback
//! - LmdbBackend: durable tables in an LMDB environment (heed)
//! - Store: the `BundleStore` contract over either backend, covering bundle
//!   journaling, chain heads, entry placement indexes, historical reads,
//!   reset generation, chain claims and the outbox
//!
//! # Retention
//!
//! A store may keep signed bundles (needed to catch peers up) and entry
//! history (needed for reads in the past and for resets). Both flags are
//! persisted when the store is created; see [`StoreConfig`].

#![warn(missing_docs)]
#![warn(clippy::all)]

mod apply;
mod claims;
pub mod config;
pub mod kv;
pub mod lmdb;
pub mod memory;
mod reads;
mod reset;
pub mod store;

pub use config::{ConfigError, StoreConfig};
pub use kv::{Backend, Direction, ReadTxn, Table, WriteTxn};
pub use lmdb::LmdbBackend;
pub use memory::MemoryBackend;
pub use store::{
    BundleCallback, BundleSink, BundleStore, LmdbStore, MemoryStore, Retentions, Store,
};
