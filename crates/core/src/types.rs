//! Core identifier types for Gink
//!
//! This module defines the foundational addressing types:
//! - Muid: 128-bit global address of a change (timestamp, medallion, offset)
//! - Chain: (medallion, chain_start) identity of a single-writer bundle chain
//! - Behavior: Container type discriminator
//!
//! Binary forms defined here are part of the on-disk and wire formats and
//! MUST NOT change.

use crate::error::{Error, Result};
use crate::proto::MuidBuilder;
use byteorder::{BigEndian, ByteOrder};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Microseconds since the unix epoch.
pub type MuTimestamp = i64;

/// Random 52-bit identifier of a chain's originating instance.
pub type Medallion = i64;

/// Timestamps fit in 56 bits.
pub const TIMESTAMP_MOD: i64 = 1 << 56;
/// Medallions fit in 52 bits.
pub const MEDALLION_MOD: i64 = 1 << 52;
/// Offsets fit in 20 bits.
pub const OFFSET_MOD: i64 = 1 << 20;

/// Stands for "the end of time" in timestamp-valued fields.
pub const INT_INF: MuTimestamp = i64::MAX;

const TIMESTAMP_HEX_DIGITS: usize = 14;
const MEDALLION_HEX_DIGITS: usize = 13;
const OFFSET_HEX_DIGITS: usize = 5;

// =============================================================================
// Muid
// =============================================================================

/// Global address of a change, container, or entry.
///
/// A muid is `(timestamp, medallion, offset)` packed big-endian into 16 bytes
/// as 56 + 52 + 20 bits. Timestamp and medallion may be `-1` (arche and
/// instance containers); offset is signed. Ordering is the ordering of the
/// 16-byte form, so sorting muids and sorting their bytes agree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Muid {
    /// Microsecond timestamp of the bundle that created this muid
    pub timestamp: MuTimestamp,
    /// Medallion of the chain that created this muid
    pub medallion: Medallion,
    /// Position of the change within its bundle (1-based)
    pub offset: i32,
}

impl Muid {
    /// Create a muid from its three fields.
    pub const fn new(timestamp: MuTimestamp, medallion: Medallion, offset: i32) -> Self {
        Self {
            timestamp,
            medallion,
            offset,
        }
    }

    /// The arche (global) container of the given behavior.
    pub const fn arche(behavior: Behavior) -> Self {
        Self::new(-1, -1, behavior as i32)
    }

    /// The container every chain writes its process metadata into.
    ///
    /// The zero medallion is resolved against the writing bundle, so each
    /// chain ends up with its own instance directory.
    pub const fn personal_directory() -> Self {
        Self::new(-1, 0, Behavior::Directory as i32)
    }

    /// Seek key that sorts after every muid created strictly before `as_of`.
    ///
    /// `-1` and [`INT_INF`] both mean "no upper bound".
    pub fn as_of_bound(as_of: MuTimestamp) -> Self {
        if as_of < 0 || as_of >= TIMESTAMP_MOD - 1 {
            Self::new(-1, 0, 0)
        } else {
            Self::new(as_of, 0, 0)
        }
    }

    /// Resolve a (possibly relative) builder against its context.
    ///
    /// Zero timestamp or medallion fields fall back to the context's. A
    /// negative offset is taken relative to the context muid's offset.
    pub fn create(context: &impl MuidContext, builder: Option<&MuidBuilder>) -> Self {
        let (timestamp, medallion, offset) = match builder {
            Some(b) => (b.timestamp, b.medallion, b.offset),
            None => (0, 0, 0),
        };
        let timestamp = if timestamp == 0 {
            context.context_timestamp()
        } else {
            timestamp
        };
        let medallion = if medallion == 0 {
            context.context_medallion()
        } else {
            medallion
        };
        let offset = if offset < 0 {
            context.context_offset().unwrap_or(0) + offset
        } else {
            offset
        };
        Self::new(timestamp, medallion, offset)
    }

    /// Muid of the change at `offset` within the bundle described by `context`.
    pub fn at_offset(context: &impl MuidContext, offset: i32) -> Self {
        Self::new(context.context_timestamp(), context.context_medallion(), offset)
    }

    /// True for arche and instance containers.
    pub fn is_instance_container(&self) -> bool {
        self.timestamp == -1
    }

    /// Behavior encoded in an arche/instance container muid.
    pub fn instance_behavior(&self) -> Option<Behavior> {
        if self.timestamp == -1 {
            Behavior::from_i32(self.offset)
        } else {
            None
        }
    }

    /// Convert to the 16-byte big-endian packed form.
    pub fn to_bytes(&self) -> [u8; 16] {
        let ts = self.timestamp.rem_euclid(TIMESTAMP_MOD) as u128;
        let md = self.medallion.rem_euclid(MEDALLION_MOD) as u128;
        let of = (self.offset as i64).rem_euclid(OFFSET_MOD) as u128;
        ((ts << 72) | (md << 20) | of).to_be_bytes()
    }

    /// Parse the 16-byte packed form.
    ///
    /// # Errors
    /// Returns `InvalidMuid` unless `data` is exactly 16 bytes.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() != 16 {
            return Err(Error::InvalidMuid(format!(
                "expected 16 bytes, got {}",
                data.len()
            )));
        }
        let packed = BigEndian::read_u128(data);
        let ts = (packed >> 72) as i64;
        let md = ((packed >> 20) as i64) & (MEDALLION_MOD - 1);
        let of = (packed as i64) & (OFFSET_MOD - 1);
        Ok(Self::from_raw(ts, md, of))
    }

    fn from_raw(ts: i64, md: i64, of: i64) -> Self {
        let timestamp = if ts == TIMESTAMP_MOD - 1 { -1 } else { ts };
        let medallion = if md == MEDALLION_MOD - 1 { -1 } else { md };
        let offset = if of >= OFFSET_MOD >> 1 {
            of - OFFSET_MOD
        } else {
            of
        };
        Self::new(timestamp, medallion, offset as i32)
    }

    /// Convert to a wire builder.
    pub fn to_builder(&self) -> MuidBuilder {
        MuidBuilder {
            timestamp: self.timestamp,
            medallion: self.medallion,
            offset: self.offset,
        }
    }
}

impl Ord for Muid {
    fn cmp(&self, other: &Self) -> Ordering {
        self.to_bytes().cmp(&other.to_bytes())
    }
}

impl PartialOrd for Muid {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Muid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:0tw$X}-{:0mw$X}-{:0ow$X}",
            self.timestamp.rem_euclid(TIMESTAMP_MOD),
            self.medallion.rem_euclid(MEDALLION_MOD),
            (self.offset as i64).rem_euclid(OFFSET_MOD),
            tw = TIMESTAMP_HEX_DIGITS,
            mw = MEDALLION_HEX_DIGITS,
            ow = OFFSET_HEX_DIGITS,
        )
    }
}

impl FromStr for Muid {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split('-').collect();
        let widths = [TIMESTAMP_HEX_DIGITS, MEDALLION_HEX_DIGITS, OFFSET_HEX_DIGITS];
        if parts.len() != 3 || parts.iter().zip(widths).any(|(p, w)| p.len() != w) {
            return Err(Error::InvalidMuid(format!("doesn't look like a muid: {s:?}")));
        }
        let field = |p: &str| {
            i64::from_str_radix(p, 16).map_err(|e| Error::InvalidMuid(format!("{s:?}: {e}")))
        };
        Ok(Self::from_raw(
            field(parts[0])?,
            field(parts[1])?,
            field(parts[2])?,
        ))
    }
}

/// Something relative muids can be resolved against.
///
/// Bundle infos supply timestamp and medallion; muids additionally supply an
/// offset for negative (relative) offsets.
pub trait MuidContext {
    /// Timestamp used when a builder leaves it zero
    fn context_timestamp(&self) -> MuTimestamp;
    /// Medallion used when a builder leaves it zero
    fn context_medallion(&self) -> Medallion;
    /// Base for negative offsets, if this context has one
    fn context_offset(&self) -> Option<i32> {
        None
    }
}

impl MuidContext for Muid {
    fn context_timestamp(&self) -> MuTimestamp {
        self.timestamp
    }
    fn context_medallion(&self) -> Medallion {
        self.medallion
    }
    fn context_offset(&self) -> Option<i32> {
        Some(self.offset)
    }
}

// =============================================================================
// Chain
// =============================================================================

/// Identity of a single-writer bundle chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Chain {
    /// Medallion of the writing instance
    pub medallion: Medallion,
    /// Timestamp of the chain's first bundle
    pub chain_start: MuTimestamp,
}

impl Chain {
    /// Create a chain identifier.
    pub const fn new(medallion: Medallion, chain_start: MuTimestamp) -> Self {
        Self {
            medallion,
            chain_start,
        }
    }

    /// 16-byte `>QQ(medallion, chain_start)` form.
    pub fn to_bytes(&self) -> [u8; 16] {
        let mut out = [0u8; 16];
        BigEndian::write_i64(&mut out[0..8], self.medallion);
        BigEndian::write_i64(&mut out[8..16], self.chain_start);
        out
    }

    /// Inverse of [`Chain::to_bytes`].
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() != 16 {
            return Err(Error::SerializationError(format!(
                "chain key must be 16 bytes, got {}",
                data.len()
            )));
        }
        Ok(Self::new(
            BigEndian::read_i64(&data[0..8]),
            BigEndian::read_i64(&data[8..16]),
        ))
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Chain({}, {})", self.medallion, self.chain_start)
    }
}

// =============================================================================
// Behavior
// =============================================================================

/// Container type discriminator.
///
/// These values are part of the wire format and MUST NOT change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum Behavior {
    /// Not set; entries with this behavior are rejected
    Unspecified = 0,
    /// Holds a single value
    Box = 1,
    /// Ordered list of entries
    Sequence = 2,
    /// Set of user keys
    KeySet = 3,
    /// Map from user keys to values
    Directory = 4,
    /// Set of (muid, muid) pairs
    PairSet = 5,
    /// Map from (muid, muid) pairs to values
    PairMap = 6,
    /// Graph node that can be deleted and revived
    Vertex = 7,
    /// Collection of edges between vertices
    EdgeType = 8,
    /// Map from described muid to value
    Property = 9,
    /// Set of member muids
    Group = 10,
    /// Running integer total
    Accumulator = 11,
    /// Map from chain to sync limit
    Braid = 12,
}

impl Behavior {
    /// Every behavior, in tag order.
    pub const ALL: [Behavior; 13] = [
        Behavior::Unspecified,
        Behavior::Box,
        Behavior::Sequence,
        Behavior::KeySet,
        Behavior::Directory,
        Behavior::PairSet,
        Behavior::PairMap,
        Behavior::Vertex,
        Behavior::EdgeType,
        Behavior::Property,
        Behavior::Group,
        Behavior::Accumulator,
        Behavior::Braid,
    ];

    /// Convert to byte representation
    pub fn as_byte(&self) -> u8 {
        *self as u8
    }

    /// Try to create from byte
    pub fn from_byte(byte: u8) -> Option<Self> {
        Self::ALL.get(byte as usize).copied()
    }

    /// Try to create from the wire `int32` field
    pub fn from_i32(value: i32) -> Option<Self> {
        u8::try_from(value).ok().and_then(Self::from_byte)
    }

    /// Whether a new entry hides the previous entry under the same key.
    pub fn new_entries_replace(&self) -> bool {
        !matches!(
            self,
            Behavior::Sequence | Behavior::EdgeType | Behavior::Accumulator | Behavior::Unspecified
        )
    }

    /// Whether placements are ordered by an effective time rather than a key.
    pub fn is_ordered(&self) -> bool {
        matches!(self, Behavior::Sequence | Behavior::EdgeType)
    }
}

impl fmt::Display for Behavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Behavior::Unspecified => "UNSPECIFIED",
            Behavior::Box => "BOX",
            Behavior::Sequence => "SEQUENCE",
            Behavior::KeySet => "KEY_SET",
            Behavior::Directory => "DIRECTORY",
            Behavior::PairSet => "PAIR_SET",
            Behavior::PairMap => "PAIR_MAP",
            Behavior::Vertex => "VERTEX",
            Behavior::EdgeType => "EDGE_TYPE",
            Behavior::Property => "PROPERTY",
            Behavior::Group => "GROUP",
            Behavior::Accumulator => "ACCUMULATOR",
            Behavior::Braid => "BRAID",
        };
        f.write_str(name)
    }
}
