//! Bundle metadata used for syncing and chain tracking

use crate::error::{Error, Result};
use crate::proto::{sync_message, Ack, BundleBuilder, SyncMessage};
use crate::types::{Chain, Medallion, MuTimestamp, MuidContext};
use byteorder::{BigEndian, ByteOrder};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Metadata about a bundle relevant for syncing.
///
/// The byte form is `>QQQQ(timestamp, medallion, chain_start, previous) ∥
/// hash(32) ∥ utf8(comment)` and sorts by `(timestamp, medallion, ...)`.
/// Equality and ordering only look at `(timestamp, medallion, chain_start)`.
#[derive(Debug, Clone, Default)]
pub struct BundleInfo {
    /// Timestamp of the bundle
    pub timestamp: MuTimestamp,
    /// Medallion of the chain
    pub medallion: Medallion,
    /// Start of the chain
    pub chain_start: MuTimestamp,
    /// Timestamp of the preceding bundle in the chain (0 for a chain start)
    pub previous: MuTimestamp,
    /// blake2b-256 of the signed bundle bytes, when known
    pub hash: Option<[u8; 32]>,
    /// Free-form comment
    pub comment: String,
}

impl BundleInfo {
    /// Metadata of a parsed bundle body.
    pub fn from_builder(builder: &BundleBuilder, hash: [u8; 32]) -> Self {
        Self {
            timestamp: builder.timestamp,
            medallion: builder.medallion,
            chain_start: builder.chain_start,
            previous: builder.previous,
            hash: Some(hash),
            comment: builder.comment.clone(),
        }
    }

    /// The chain this bundle belongs to.
    pub fn chain(&self) -> Chain {
        Chain::new(self.medallion, self.chain_start)
    }

    /// Whether this bundle starts its chain.
    pub fn is_chain_start(&self) -> bool {
        self.timestamp == self.chain_start
    }

    /// Hex form of the hash.
    pub fn hex_hash(&self) -> Option<String> {
        self.hash.map(hex::encode)
    }

    /// Serialize; a missing hash is written as zeros.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = vec![0u8; 64];
        BigEndian::write_i64(&mut out[0..8], self.timestamp);
        BigEndian::write_i64(&mut out[8..16], self.medallion);
        BigEndian::write_i64(&mut out[16..24], self.chain_start);
        BigEndian::write_i64(&mut out[24..32], self.previous);
        out[32..64].copy_from_slice(&self.hash.unwrap_or([0u8; 32]));
        out.extend_from_slice(self.comment.as_bytes());
        out
    }

    /// Inverse of [`BundleInfo::to_bytes`]; accepts the bare 32-byte header too.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < 32 {
            return Err(Error::SerializationError(format!(
                "bundle info needs at least 32 bytes, got {}",
                data.len()
            )));
        }
        let hash = match data.get(32..64) {
            Some(h) => {
                let mut out = [0u8; 32];
                out.copy_from_slice(h);
                Some(out)
            }
            None => None,
        };
        let comment = match data.get(64..) {
            Some(c) => String::from_utf8(c.to_vec())
                .map_err(|e| Error::SerializationError(e.to_string()))?,
            None => String::new(),
        };
        Ok(Self {
            timestamp: BigEndian::read_i64(&data[0..8]),
            medallion: BigEndian::read_i64(&data[8..16]),
            chain_start: BigEndian::read_i64(&data[16..24]),
            previous: BigEndian::read_i64(&data[24..32]),
            hash,
            comment,
        })
    }

    /// Acknowledgement message telling the sender we now have this bundle.
    pub fn as_ack(&self) -> SyncMessage {
        SyncMessage {
            contents: Some(sync_message::Contents::Ack(Ack {
                medallion: self.medallion,
                chain_start: self.chain_start,
                timestamp: self.timestamp,
                previous: self.previous,
            })),
        }
    }

    /// Inverse of [`BundleInfo::as_ack`].
    pub fn from_ack(ack: &Ack) -> Self {
        Self {
            timestamp: ack.timestamp,
            medallion: ack.medallion,
            chain_start: ack.chain_start,
            previous: ack.previous,
            hash: None,
            comment: String::new(),
        }
    }

    fn essential(&self) -> (MuTimestamp, Medallion, MuTimestamp) {
        (self.timestamp, self.medallion, self.chain_start)
    }
}

impl PartialEq for BundleInfo {
    fn eq(&self, other: &Self) -> bool {
        self.essential() == other.essential()
    }
}

impl Eq for BundleInfo {}

impl Hash for BundleInfo {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.essential().hash(state)
    }
}

impl Ord for BundleInfo {
    fn cmp(&self, other: &Self) -> Ordering {
        self.essential().cmp(&other.essential())
    }
}

impl PartialOrd for BundleInfo {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for BundleInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "BundleInfo(timestamp={}, medallion={}, chain_start={}",
            self.timestamp, self.medallion, self.chain_start
        )?;
        if self.previous != 0 {
            write!(f, ", previous={}", self.previous)?;
        }
        if !self.comment.is_empty() {
            write!(f, ", comment={:?}", self.comment)?;
        }
        write!(f, ")")
    }
}

impl MuidContext for BundleInfo {
    fn context_timestamp(&self) -> MuTimestamp {
        self.timestamp
    }

    fn context_medallion(&self) -> Medallion {
        self.medallion
    }
}
