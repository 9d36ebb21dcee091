//! Error types for Gink
//!
//! This module defines the error type shared by every layer of the system.
//! We use `thiserror` for automatic `Display` and `Error` trait implementations.
//!
//! Rejections of remote input (a bundle that does not verify, a bundle that
//! does not extend its chain) are ordinary variants here; connection-level
//! failures are reported as [`Error::ProtocolError`].

use std::io;
use thiserror::Error;

/// Result type alias for Gink operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the Gink database
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (file operations, network, etc.)
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Bundle is malformed or its signature does not verify
    #[error("Invalid bundle: {0}")]
    InvalidBundle(String),

    /// Bundle does not extend the chain it claims to belong to
    #[error("Bad extension: {0}")]
    BadExtension(String),

    /// A chain start disagrees with the identity already recorded for the chain
    #[error("Identity conflict: {0}")]
    IdentityConflict(String),

    /// Chain is not known to this store
    #[error("Unknown chain: {0}")]
    UnknownChain(String),

    /// Operation targets an entry that expired before it took effect
    #[error("Expired: {0}")]
    Expired(String),

    /// Operation requires a retention setting the store was not created with
    #[error("Retention configuration: {0}")]
    RetentionConfig(String),

    /// Peer violated the sync protocol
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    /// Storage backend error
    #[error("Storage error: {0}")]
    StorageError(String),

    /// User key is out of range or of an unsupported type
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// User value cannot be encoded or decoded
    #[error("Invalid value: {0}")]
    InvalidValue(String),

    /// Muid bytes or text are malformed
    #[error("Invalid muid: {0}")]
    InvalidMuid(String),

    /// Signing, verification, or symmetric cipher failure
    #[error("Crypto error: {0}")]
    CryptoError(String),

    /// Configuration is invalid
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Requested object does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid operation or state
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
}

impl Error {
    /// True when the error describes remote input that should be rejected
    /// without tearing down the local process.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Error::InvalidBundle(_) | Error::BadExtension(_) | Error::IdentityConflict(_)
        )
    }
}

impl From<prost::DecodeError> for Error {
    fn from(e: prost::DecodeError) -> Self {
        Error::SerializationError(e.to_string())
    }
}

impl From<prost::EncodeError> for Error {
    fn from(e: prost::EncodeError) -> Self {
        Error::SerializationError(e.to_string())
    }
}
