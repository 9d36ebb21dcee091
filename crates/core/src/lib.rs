//! Core types for Gink
//!
//! This crate defines the foundational types used throughout the system:
//! - Muid / Chain / Behavior: addressing and container type tags
//! - UserKey / Value: the user-visible key and value model
//! - proto: wire messages (entries, changes, bundles, sync messages)
//! - codec: binary layouts of index keys (placements, locations, removals)
//! - BundleInfo / HasMap: chain tracking for sync
//! - BundleWrapper / Bundler: parsing and sealing signed bundles
//! - Error: Error type hierarchy

#![warn(missing_docs)]
#![warn(clippy::all)]

// Module declarations
pub mod bundle;
pub mod bundle_info;
pub mod codec;
pub mod crypto;
pub mod error;
pub mod has_map;
pub mod proto;
pub mod types;
pub mod value;

// Re-export commonly used types
pub use bundle::{BundleWrapper, Bundler, Sealing};
pub use bundle_info::BundleInfo;
pub use codec::{
    decode_muts, encode_muts, EntryKey, FoundContainer, FoundEntry, LocationKey, Occupant,
    Placement, PositionedEntry, RemovalKey,
};
pub use error::{Error, Result};
pub use has_map::HasMap;
pub use types::{
    Behavior, Chain, Medallion, MuTimestamp, Muid, MuidContext, INT_INF, MEDALLION_MOD,
    OFFSET_MOD, TIMESTAMP_MOD,
};
pub use value::{UserKey, Value, KEY_MAX};
