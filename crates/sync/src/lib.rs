//! Peer synchronization for Gink
//!
//! This crate moves bundles between instances:
//! - frame: length- and checksum-delimited messages on a byte stream
//! - connection: one peer, its greeting/bundle/ack exchange and permissions
//! - listener: accepting peers, optionally over TLS (feature `tls`)
//! - looping: the single-threaded readiness loop everything runs on
//! - relay: fan-out of applied bundles to peers and callbacks

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod connection;
pub mod frame;
pub mod listener;
pub mod looping;
pub mod permissions;
pub mod relay;
#[cfg(feature = "tls")]
pub mod tls;
pub mod transport;

pub use connection::{
    allow_all, AuthFunc, Connection, ConnectionState, ConnectionStats, SyncFunc,
};
pub use frame::{encode_frame, FrameError, FrameReader, MAX_FRAME_LEN};
pub use listener::{Listener, DEFAULT_PORT};
pub use looping::{Announced, EventLoop, FileNo, Finished, Selectable, TICK};
pub use permissions::Permissions;
pub use relay::{ConnectionId, OnBundle, Relay, RelayOptions, Target};
pub use transport::Transport;
