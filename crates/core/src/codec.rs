//! Binary layouts of the store's index keys
//!
//! Every index in the store is an ordered byte-keyed table; this module
//! owns the byte layouts of those keys:
//!
//! - muts: 8-byte big-endian microsecond timestamps (`0` = none, `-1` = end of time)
//! - [`Placement`]: `container(16) ∥ middle ∥ placer(16) ∥ expiry(8)`
//! - [`LocationKey`]: `entry(16) ∥ placer(16)`
//! - [`RemovalKey`]: `container(16) ∥ removing(16) ∥ movement(16)`
//! - clearance keys: `container(16) ∥ clearance(16)`
//!
//! The middle segment of a placement depends on the container's behavior
//! (see [`EntryKey`]). Placements are parsed from the end, so the middle
//! never needs a length prefix.

use crate::error::{Error, Result};
use crate::proto::{ContainerBuilder, EntryBuilder, MuidBuilder, PairBuilder};
use crate::types::{Behavior, Muid, MuTimestamp, INT_INF};
use crate::value::{UserKey, Value};
use byteorder::{BigEndian, ByteOrder};

// =============================================================================
// Timestamps
// =============================================================================

/// Encode a timestamp as 8 big-endian bytes; `0` means "none".
pub fn encode_muts(timestamp: MuTimestamp) -> [u8; 8] {
    let raw = if timestamp == INT_INF { -1 } else { timestamp };
    raw.to_be_bytes()
}

/// Inverse of [`encode_muts`].
pub fn decode_muts(data: &[u8]) -> Result<Option<MuTimestamp>> {
    if data.len() != 8 {
        return Err(Error::SerializationError(format!(
            "timestamp must be 8 bytes, got {}",
            data.len()
        )));
    }
    Ok(match BigEndian::read_i64(data) {
        0 => None,
        -1 => Some(INT_INF),
        t => Some(t),
    })
}

// =============================================================================
// Entry keys
// =============================================================================

/// What an entry is filed under within its container.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntryKey {
    /// Boxes, vertices, edge types, accumulators
    Unkeyed,
    /// Directories and key sets
    Key(UserKey),
    /// Sequences: effective position
    Position(MuTimestamp),
    /// Properties, groups, braids: the described muid
    Describing(Muid),
    /// Pair sets and pair maps
    Pair(Muid, Muid),
}

impl EntryKey {
    /// Middle segment of a placement key.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            EntryKey::Unkeyed => Vec::new(),
            EntryKey::Key(key) => key.encode(),
            EntryKey::Position(position) => encode_muts(*position).to_vec(),
            EntryKey::Describing(muid) => muid.to_bytes().to_vec(),
            EntryKey::Pair(left, rite) => {
                let mut out = left.to_bytes().to_vec();
                out.extend_from_slice(&rite.to_bytes());
                out
            }
        }
    }

    /// Parse a middle segment written for a container of `behavior`.
    pub fn decode(behavior: Behavior, middle: &[u8]) -> Result<Self> {
        match behavior {
            Behavior::Directory | Behavior::KeySet => Ok(EntryKey::Key(UserKey::decode(middle)?)),
            Behavior::Sequence => Ok(EntryKey::Position(decode_muts(middle)?.unwrap_or(0))),
            Behavior::Property | Behavior::Group | Behavior::Braid => {
                Ok(EntryKey::Describing(Muid::from_bytes(middle)?))
            }
            Behavior::PairSet | Behavior::PairMap if middle.len() == 32 => Ok(EntryKey::Pair(
                Muid::from_bytes(&middle[..16])?,
                Muid::from_bytes(&middle[16..])?,
            )),
            Behavior::Box | Behavior::Vertex | Behavior::EdgeType | Behavior::Accumulator
                if middle.is_empty() =>
            {
                Ok(EntryKey::Unkeyed)
            }
            _ => Err(Error::SerializationError(format!(
                "middle of {} bytes does not fit {behavior}",
                middle.len()
            ))),
        }
    }

    /// Determine the key of an entry created at `entry_muid`.
    pub fn from_entry(builder: &EntryBuilder, entry_muid: Muid) -> Result<Self> {
        let behavior = behavior_of(builder)?;
        match behavior {
            Behavior::Directory | Behavior::KeySet => {
                let key = builder
                    .key
                    .as_ref()
                    .ok_or_else(|| Error::InvalidKey(format!("{behavior} entry without a key")))?;
                Ok(EntryKey::Key(UserKey::from_builder(key)?))
            }
            Behavior::Box | Behavior::Vertex | Behavior::EdgeType | Behavior::Accumulator => {
                Ok(EntryKey::Unkeyed)
            }
            Behavior::Sequence => Ok(EntryKey::Position(if builder.effective != 0 {
                builder.effective
            } else {
                entry_muid.timestamp
            })),
            Behavior::Property | Behavior::Group | Behavior::Braid => {
                let describing = builder.describing.as_ref().ok_or_else(|| {
                    Error::InvalidOperation(format!("{behavior} entry without describing"))
                })?;
                Ok(EntryKey::Describing(Muid::create(&entry_muid, Some(describing))))
            }
            Behavior::PairSet | Behavior::PairMap => {
                let (left, rite) = pair_of(builder, entry_muid)?;
                Ok(EntryKey::Pair(left, rite))
            }
            Behavior::Unspecified => Err(Error::InvalidOperation(
                "entry lacks a behavior".to_string(),
            )),
        }
    }

    /// Sequence position, if this is an ordered key.
    pub fn position(&self) -> Option<MuTimestamp> {
        match self {
            EntryKey::Position(p) => Some(*p),
            _ => None,
        }
    }
}

impl From<UserKey> for EntryKey {
    fn from(key: UserKey) -> Self {
        EntryKey::Key(key)
    }
}

impl From<Muid> for EntryKey {
    fn from(muid: Muid) -> Self {
        EntryKey::Describing(muid)
    }
}

impl From<(Muid, Muid)> for EntryKey {
    fn from((left, rite): (Muid, Muid)) -> Self {
        EntryKey::Pair(left, rite)
    }
}

// =============================================================================
// Placement
// =============================================================================

/// Key of the `placements` index: where an entry currently sits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    /// Container holding the entry
    pub container: Muid,
    /// Behavior-dependent middle segment (see [`EntryKey::encode`])
    pub middle: Vec<u8>,
    /// Entry or movement that put the entry here
    pub placer: Muid,
    /// Expiry time, if any
    pub expiry: Option<MuTimestamp>,
}

impl Placement {
    /// Placement of a freshly applied entry.
    pub fn from_entry(builder: &EntryBuilder, entry_muid: Muid) -> Result<Self> {
        let container = container_of(builder, entry_muid)?;
        let middle = EntryKey::from_entry(builder, entry_muid)?.encode();
        Ok(Self {
            container,
            middle,
            placer: entry_muid,
            expiry: (builder.expiry != 0).then_some(builder.expiry),
        })
    }

    /// Serialize to the index key.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(40 + self.middle.len());
        out.extend_from_slice(&self.container.to_bytes());
        out.extend_from_slice(&self.middle);
        out.extend_from_slice(&self.placer.to_bytes());
        out.extend_from_slice(&encode_muts(self.expiry.unwrap_or(0)));
        out
    }

    /// Parse an index key.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < 40 {
            return Err(Error::SerializationError(format!(
                "placement must be at least 40 bytes, got {}",
                data.len()
            )));
        }
        let n = data.len();
        Ok(Self {
            container: Muid::from_bytes(&data[0..16])?,
            middle: data[16..n - 24].to_vec(),
            placer: Muid::from_bytes(&data[n - 24..n - 8])?,
            expiry: decode_muts(&data[n - 8..])?,
        })
    }

    /// `container ∥ middle`, shared by every placement of the same key.
    pub fn prefix(&self) -> Vec<u8> {
        let mut out = self.container.to_bytes().to_vec();
        out.extend_from_slice(&self.middle);
        out
    }

    /// Time the entry was put at this position.
    pub fn placed_time(&self) -> MuTimestamp {
        self.placer.timestamp
    }

    /// Effective position of a sequence placement.
    pub fn position(&self) -> Result<MuTimestamp> {
        Ok(decode_muts(&self.middle)?.unwrap_or(0))
    }

    /// Parse the middle segment.
    pub fn key(&self, behavior: Behavior) -> Result<EntryKey> {
        EntryKey::decode(behavior, &self.middle)
    }
}

// =============================================================================
// Location, removal and clearance keys
// =============================================================================

/// Key of the `locations` index; the value is the placement (empty = removed).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocationKey {
    /// The entry being located
    pub entry: Muid,
    /// Entry (initial placement) or movement that placed it
    pub placer: Muid,
}

impl LocationKey {
    /// Serialize to the index key.
    pub fn to_bytes(&self) -> [u8; 32] {
        let mut out = [0u8; 32];
        out[..16].copy_from_slice(&self.entry.to_bytes());
        out[16..].copy_from_slice(&self.placer.to_bytes());
        out
    }

    /// Parse an index key.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() != 32 {
            return Err(Error::SerializationError("location key must be 32 bytes".to_string()));
        }
        Ok(Self {
            entry: Muid::from_bytes(&data[..16])?,
            placer: Muid::from_bytes(&data[16..])?,
        })
    }
}

/// Key of the `removals` index: a soft delete of one placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemovalKey {
    /// Container the entry was removed from
    pub container: Muid,
    /// Placer of the placement that was removed
    pub removing: Muid,
    /// Movement or replacing entry that did the removal
    pub movement: Muid,
}

impl RemovalKey {
    /// Serialize to the index key.
    pub fn to_bytes(&self) -> [u8; 48] {
        let mut out = [0u8; 48];
        out[..16].copy_from_slice(&self.container.to_bytes());
        out[16..32].copy_from_slice(&self.removing.to_bytes());
        out[32..].copy_from_slice(&self.movement.to_bytes());
        out
    }

    /// Parse an index key.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() != 48 {
            return Err(Error::SerializationError("removal key must be 48 bytes".to_string()));
        }
        Ok(Self {
            container: Muid::from_bytes(&data[..16])?,
            removing: Muid::from_bytes(&data[16..32])?,
            movement: Muid::from_bytes(&data[32..])?,
        })
    }
}

/// Key of the `clearances` index.
pub fn clearance_key(container: Muid, clearance: Muid) -> [u8; 32] {
    let mut out = [0u8; 32];
    out[..16].copy_from_slice(&container.to_bytes());
    out[16..].copy_from_slice(&clearance.to_bytes());
    out
}

// =============================================================================
// Entries
// =============================================================================

/// What an entry says its key holds.
#[derive(Debug, Clone, PartialEq)]
pub enum Occupant {
    /// The key was deleted
    Deletion,
    /// Membership with no value (key sets, groups, pair sets, vertices)
    Inclusion,
    /// Reference to another container
    Pointee(Muid),
    /// Immediate value
    Value(Value),
}

/// Read the behavior of an entry, rejecting unknown tags.
pub fn behavior_of(builder: &EntryBuilder) -> Result<Behavior> {
    Behavior::from_i32(builder.behavior)
        .ok_or_else(|| Error::InvalidOperation(format!("unknown behavior {}", builder.behavior)))
}

/// Absolute muid of the container an entry was written into.
pub fn container_of(builder: &EntryBuilder, entry_muid: Muid) -> Result<Muid> {
    builder
        .container
        .as_ref()
        .map(|c| Muid::create(&entry_muid, Some(c)))
        .ok_or_else(|| Error::InvalidOperation("no container specified in entry".to_string()))
}

/// Absolute (left, rite) muids of a pair entry.
pub fn pair_of(builder: &EntryBuilder, entry_muid: Muid) -> Result<(Muid, Muid)> {
    let pair = builder
        .pair
        .as_ref()
        .ok_or_else(|| Error::InvalidOperation("pair entry without a pair".to_string()))?;
    let left = pair.left.as_ref();
    let rite = pair.rite.as_ref();
    match (left, rite) {
        (Some(l), Some(r)) => Ok((
            Muid::create(&entry_muid, Some(l)),
            Muid::create(&entry_muid, Some(r)),
        )),
        _ => Err(Error::InvalidOperation("pair is missing a side".to_string())),
    }
}

/// Reject entries that can't be applied.
///
/// Instance containers (`Muid(-1, medallion, _)`) may only be written by
/// bundles of their own medallion.
pub fn ensure_entry_is_valid(builder: &EntryBuilder, entry_muid: Muid) -> Result<Behavior> {
    let behavior = behavior_of(builder)?;
    if behavior == Behavior::Unspecified {
        return Err(Error::InvalidOperation("entry lacks a behavior".to_string()));
    }
    let container = container_of(builder, entry_muid)?;
    if container.timestamp == -1
        && container.medallion > 0
        && container.medallion != entry_muid.medallion
    {
        return Err(Error::InvalidOperation(
            "attempt to modify instance container from other instance".to_string(),
        ));
    }
    Ok(behavior)
}

/// Decide what an entry holds.
pub fn decode_entry_occupant(entry_muid: Muid, builder: &EntryBuilder) -> Result<Occupant> {
    if builder.deletion {
        return Ok(Occupant::Deletion);
    }
    if let Some(pointee) = &builder.pointee {
        return Ok(Occupant::Pointee(Muid::create(&entry_muid, Some(pointee))));
    }
    if let Some(value) = &builder.value {
        return Ok(Occupant::Value(Value::from_builder(value)?));
    }
    match behavior_of(builder)? {
        Behavior::KeySet | Behavior::Group | Behavior::PairSet | Behavior::Vertex => {
            Ok(Occupant::Inclusion)
        }
        other => Err(Error::InvalidValue(format!(
            "{other} entry has neither value nor pointee"
        ))),
    }
}

/// True when two entries under the same key hold the same thing.
pub fn entries_equiv(
    first: (Muid, &EntryBuilder),
    second: (Muid, &EntryBuilder),
) -> Result<bool> {
    Ok(decode_entry_occupant(first.0, first.1)? == decode_entry_occupant(second.0, second.1)?)
}

/// Build an entry that deletes `key` from `container`.
pub fn create_deleting_entry(
    container: Muid,
    key: &EntryKey,
    behavior: Behavior,
) -> Result<EntryBuilder> {
    let mut builder = EntryBuilder {
        behavior: behavior as i32,
        container: Some(container.to_builder()),
        deletion: true,
        ..Default::default()
    };
    match (behavior, key) {
        (Behavior::Directory | Behavior::KeySet, EntryKey::Key(k)) => {
            builder.key = Some(k.to_builder())
        }
        (Behavior::Box | Behavior::Vertex, EntryKey::Unkeyed) => {}
        (Behavior::Property | Behavior::Group | Behavior::Braid, EntryKey::Describing(m)) => {
            builder.describing = Some(m.to_builder())
        }
        (Behavior::PairSet | Behavior::PairMap, EntryKey::Pair(l, r)) => {
            builder.pair = Some(PairBuilder {
                left: Some(l.to_builder()),
                rite: Some(r.to_builder()),
            })
        }
        _ => {
            return Err(Error::InvalidOperation(format!(
                "can't create a deleting entry for {behavior} with key {key:?}"
            )))
        }
    }
    Ok(builder)
}

fn absolute(builder: &mut Option<MuidBuilder>, entry_muid: Muid) {
    if let Some(b) = builder.as_mut() {
        *b = Muid::create(&entry_muid, Some(b)).to_builder();
    }
}

/// Rewrite every relative muid in an entry as absolute, so the entry can be
/// re-issued in another bundle with the same meaning.
pub fn normalize_entry_builder(builder: &mut EntryBuilder, entry_muid: Muid) {
    absolute(&mut builder.container, entry_muid);
    absolute(&mut builder.describing, entry_muid);
    absolute(&mut builder.pointee, entry_muid);
    if let Some(pair) = builder.pair.as_mut() {
        absolute(&mut pair.left, entry_muid);
        absolute(&mut pair.rite, entry_muid);
    }
}

// =============================================================================
// Query results
// =============================================================================

/// An entry found by a keyed lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct FoundEntry {
    /// Muid of the entry
    pub address: Muid,
    /// The entry itself
    pub builder: EntryBuilder,
}

/// An entry found in an ordered container.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionedEntry {
    /// Effective position within the container
    pub position: MuTimestamp,
    /// Entry or movement that put it there
    pub positioner: Muid,
    /// Muid of the entry
    pub entry_muid: Muid,
    /// The entry itself
    pub builder: EntryBuilder,
}

/// A container found by name.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FoundContainer {
    /// Muid of the container
    pub address: Muid,
    /// Its definition
    pub builder: ContainerBuilder,
}
