//! Historical queries over the index tables
//!
//! Every query takes an `as_of` timestamp; [`INT_INF`] means "now". A row
//! counts as visible at `as_of` when it was written strictly before it, was
//! not hidden by a clearance of its container, has not expired and has no
//! removal recorded before `as_of`.

use std::collections::BTreeSet;
use std::ops::ControlFlow;
use std::time::{SystemTime, UNIX_EPOCH};

use prost::Message;

use gink_core::codec::{container_of, pair_of};
use gink_core::proto::{ContainerBuilder, EntryBuilder};
use gink_core::{
    Behavior, Error, FoundContainer, FoundEntry, MuTimestamp, Muid, Placement, PositionedEntry,
    Result, Value, INT_INF,
};

use crate::kv::{concat, Direction, ReadTxn, Table};

/// Bound key `prefix ∥ as_of_bound(as_of)`.
pub(crate) fn bounded(prefix: &[u8], as_of: MuTimestamp) -> Vec<u8> {
    concat(prefix, &Muid::as_of_bound(as_of).to_bytes())
}

/// Time against which expiries are compared.
fn expiry_reference(as_of: MuTimestamp) -> MuTimestamp {
    if as_of != INT_INF {
        return as_of;
    }
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as MuTimestamp)
        .unwrap_or(0)
}

fn is_expired(placement: &Placement, as_of: MuTimestamp) -> bool {
    placement
        .expiry
        .is_some_and(|expiry| expiry < expiry_reference(as_of))
}

/// Effective position of an ordered placement; unpositioned containers
/// order by placement time.
pub(crate) fn position_of(placement: &Placement) -> Result<MuTimestamp> {
    if placement.middle.len() == 8 {
        placement.position()
    } else {
        Ok(placement.placer.timestamp)
    }
}

pub(crate) fn load_entry(txn: &impl ReadTxn, entry_muid: &[u8]) -> Result<Option<EntryBuilder>> {
    txn.get(Table::Entries, entry_muid)?
        .map(|raw| EntryBuilder::decode(raw.as_slice()).map_err(Error::from))
        .transpose()
}

/// Behavior of a container: arche/instance muids carry it, others are looked up.
pub(crate) fn container_behavior(txn: &impl ReadTxn, container: Muid) -> Result<Option<Behavior>> {
    if container.is_instance_container() {
        return Ok(container.instance_behavior());
    }
    match txn.get(Table::Containers, &container.to_bytes())? {
        Some(raw) => Ok(Behavior::from_i32(ContainerBuilder::decode(raw.as_slice())?.behavior)),
        None => Ok(None),
    }
}

pub(crate) fn container_definition(
    txn: &impl ReadTxn,
    container: Muid,
) -> Result<Option<ContainerBuilder>> {
    if container.is_instance_container() {
        return Ok(Some(ContainerBuilder {
            behavior: container.offset,
        }));
    }
    txn.get(Table::Containers, &container.to_bytes())?
        .map(|raw| ContainerBuilder::decode(raw.as_slice()).map_err(Error::from))
        .transpose()
}

/// Timestamp of the last clearance of `container` before `as_of` (0 if none).
pub(crate) fn time_of_prior_clear(
    txn: &impl ReadTxn,
    container: Muid,
    as_of: MuTimestamp,
) -> Result<MuTimestamp> {
    let prefix = container.to_bytes();
    let boundary = bounded(&prefix, as_of);
    match txn.last_with_prefix(Table::Clearances, &prefix, Some(&boundary))? {
        Some((key, _)) => Ok(Muid::from_bytes(&key[16..32])?.timestamp),
        None => Ok(0),
    }
}

/// Whether the placement made by `placer` in `container` was removed before `as_of`.
pub(crate) fn is_removed(
    txn: &impl ReadTxn,
    container: Muid,
    placer: Muid,
    as_of: MuTimestamp,
) -> Result<bool> {
    let prefix = concat(&container.to_bytes(), &placer.to_bytes());
    Ok(txn
        .last_with_prefix(Table::Removals, &prefix, Some(&bounded(&prefix, as_of)))?
        .is_some())
}

// =============================================================================
// Keyed containers
// =============================================================================

/// Entry occupying `container ∥ middle` as of a time, deletions included.
pub(crate) fn entry_by_middle(
    txn: &impl ReadTxn,
    container: Muid,
    middle: &[u8],
    as_of: MuTimestamp,
) -> Result<Option<FoundEntry>> {
    let clear = time_of_prior_clear(txn, container, as_of)?;
    let prefix = concat(&container.to_bytes(), middle);
    let Some((key, value)) =
        txn.last_with_prefix(Table::Placements, &prefix, Some(&bounded(&prefix, as_of)))?
    else {
        return Ok(None);
    };
    let placement = Placement::from_bytes(&key)?;
    if placement.middle != middle || placement.placer.timestamp < clear {
        return Ok(None);
    }
    if is_expired(&placement, as_of) || is_removed(txn, container, placement.placer, as_of)? {
        return Ok(None);
    }
    let address = Muid::from_bytes(&value)?;
    Ok(load_entry(txn, &value)?.map(|builder| FoundEntry { address, builder }))
}

/// Live entries of a keyed container, one per key, in key order.
pub(crate) fn keyed_entries(
    txn: &impl ReadTxn,
    container: Muid,
    as_of: MuTimestamp,
) -> Result<Vec<FoundEntry>> {
    let clear = time_of_prior_clear(txn, container, as_of)?;
    let container_key = container.to_bytes();
    let mut boundary: Option<Vec<u8>> = None;
    let mut found = Vec::new();
    loop {
        let Some((key, value)) =
            txn.last_with_prefix(Table::Placements, &container_key, boundary.as_deref())?
        else {
            break;
        };
        let middle_prefix = key[..key.len() - 24].to_vec();
        let row = if Placement::from_bytes(&key)?.placer.timestamp >= as_of {
            txn.last_with_prefix(
                Table::Placements,
                &middle_prefix,
                Some(&bounded(&middle_prefix, as_of)),
            )?
        } else {
            Some((key, value))
        };
        if let Some((key, value)) = row {
            let placement = Placement::from_bytes(&key)?;
            if placement.placer.timestamp >= clear
                && !is_expired(&placement, as_of)
                && !is_removed(txn, container, placement.placer, as_of)?
            {
                if let Some(builder) = load_entry(txn, &value)? {
                    if !builder.deletion {
                        found.push(FoundEntry {
                            address: Muid::from_bytes(&value)?,
                            builder,
                        });
                    }
                }
            }
        }
        if middle_prefix.len() == container_key.len() {
            break;
        }
        boundary = Some(middle_prefix);
    }
    found.reverse();
    Ok(found)
}

// =============================================================================
// Ordered containers
// =============================================================================

/// Entries of an ordered container visible as of a time, by position.
pub(crate) fn ordered_entries(
    txn: &impl ReadTxn,
    container: Muid,
    as_of: MuTimestamp,
    limit: Option<usize>,
    offset: usize,
    descending: bool,
) -> Result<Vec<PositionedEntry>> {
    let clear = time_of_prior_clear(txn, container, as_of)?;
    let direction = if descending {
        Direction::Reverse
    } else {
        Direction::Forward
    };
    let mut skipped = 0;
    let mut found = Vec::new();
    if limit == Some(0) {
        return Ok(found);
    }
    txn.walk_prefix(Table::Placements, &container.to_bytes(), direction, &mut |key, value| {
        let placement = Placement::from_bytes(key)?;
        let position = position_of(&placement)?;
        if position > as_of {
            return Ok(if descending {
                ControlFlow::Continue(())
            } else {
                ControlFlow::Break(())
            });
        }
        let placed = placement.placer.timestamp;
        if placed >= as_of || placed < clear || is_expired(&placement, as_of) {
            return Ok(ControlFlow::Continue(()));
        }
        if is_removed(txn, container, placement.placer, as_of)? {
            return Ok(ControlFlow::Continue(()));
        }
        let Some(builder) = load_entry(txn, value)? else {
            return Ok(ControlFlow::Continue(()));
        };
        if skipped < offset {
            skipped += 1;
            return Ok(ControlFlow::Continue(()));
        }
        found.push(PositionedEntry {
            position,
            positioner: placement.placer,
            entry_muid: Muid::from_bytes(value)?,
            builder,
        });
        if limit.is_some_and(|limit| found.len() >= limit) {
            return Ok(ControlFlow::Break(()));
        }
        Ok(ControlFlow::Continue(()))
    })?;
    Ok(found)
}

/// Where an entry sat as of a time (`None` if not yet placed or removed).
pub(crate) fn location_of(
    txn: &impl ReadTxn,
    entry_muid: Muid,
    as_of: MuTimestamp,
) -> Result<Option<Placement>> {
    let prefix = entry_muid.to_bytes();
    match txn.last_with_prefix(Table::Locations, &prefix, Some(&bounded(&prefix, as_of)))? {
        Some((_, value)) if !value.is_empty() => Ok(Some(Placement::from_bytes(&value)?)),
        _ => Ok(None),
    }
}

pub(crate) fn positioned_entry(
    txn: &impl ReadTxn,
    entry_muid: Muid,
    as_of: MuTimestamp,
) -> Result<Option<PositionedEntry>> {
    let Some(placement) = location_of(txn, entry_muid, as_of)? else {
        return Ok(None);
    };
    let Some(builder) = load_entry(txn, &entry_muid.to_bytes())? else {
        return Ok(None);
    };
    Ok(Some(PositionedEntry {
        position: position_of(&placement)?,
        positioner: placement.placer,
        entry_muid,
        builder,
    }))
}

// =============================================================================
// Graph queries
// =============================================================================

/// Edges visible as of a time, filtered by type and endpoints.
pub(crate) fn edge_entries(
    txn: &impl ReadTxn,
    as_of: MuTimestamp,
    edge_type: Option<Muid>,
    source: Option<Muid>,
    target: Option<Muid>,
) -> Result<Vec<FoundEntry>> {
    let matches_pair = |builder: &EntryBuilder, entry_muid: Muid| -> Result<bool> {
        let (left, rite) = pair_of(builder, entry_muid)?;
        Ok(source.map_or(true, |s| s == left) && target.map_or(true, |t| t == rite))
    };
    let mut found = Vec::new();
    if let Some(side) = source.or(target) {
        txn.walk_prefix(Table::BySide, &side.to_bytes(), Direction::Forward, &mut |key, _| {
            let entry_muid = Muid::from_bytes(&key[16..32])?;
            if entry_muid.timestamp >= as_of {
                return Ok(ControlFlow::Break(()));
            }
            let Some(builder) = load_entry(txn, &key[16..32])? else {
                return Ok(ControlFlow::Continue(()));
            };
            let container = container_of(&builder, entry_muid)?;
            if edge_type.is_some_and(|t| t != container) {
                return Ok(ControlFlow::Continue(()));
            }
            if is_removed(txn, container, entry_muid, as_of)?
                || entry_muid.timestamp < time_of_prior_clear(txn, container, as_of)?
            {
                return Ok(ControlFlow::Continue(()));
            }
            if let Some(expiry) = (builder.expiry != 0).then_some(builder.expiry) {
                if expiry < expiry_reference(as_of) {
                    return Ok(ControlFlow::Continue(()));
                }
            }
            if matches_pair(&builder, entry_muid)? {
                found.push(FoundEntry {
                    address: entry_muid,
                    builder,
                });
            }
            Ok(ControlFlow::Continue(()))
        })?;
        return Ok(found);
    }
    let Some(edge_type) = edge_type else {
        return Err(Error::InvalidOperation(
            "need an edge type, a source or a target".to_string(),
        ));
    };
    let clear = time_of_prior_clear(txn, edge_type, as_of)?;
    txn.walk_prefix(Table::Placements, &edge_type.to_bytes(), Direction::Forward, &mut |key, value| {
        let placement = Placement::from_bytes(key)?;
        let placed = placement.placer.timestamp;
        if placed >= as_of || placed < clear || is_expired(&placement, as_of) {
            return Ok(ControlFlow::Continue(()));
        }
        if is_removed(txn, edge_type, placement.placer, as_of)? {
            return Ok(ControlFlow::Continue(()));
        }
        let entry_muid = Muid::from_bytes(value)?;
        if let Some(builder) = load_entry(txn, value)? {
            if matches_pair(&builder, entry_muid)? {
                found.push(FoundEntry {
                    address: entry_muid,
                    builder,
                });
            }
        }
        Ok(ControlFlow::Continue(()))
    })?;
    Ok(found)
}

/// Entries (typically property values) describing `describing`.
pub(crate) fn by_describing(
    txn: &impl ReadTxn,
    describing: Muid,
    as_of: MuTimestamp,
) -> Result<Vec<FoundEntry>> {
    let mut found = Vec::new();
    txn.walk_prefix(
        Table::ByDescribing,
        &describing.to_bytes(),
        Direction::Forward,
        &mut |key, value| {
            let entry_muid = Muid::from_bytes(&key[16..32])?;
            if entry_muid.timestamp >= as_of {
                return Ok(ControlFlow::Continue(()));
            }
            let container = Muid::from_bytes(value)?;
            if is_removed(txn, container, entry_muid, as_of)?
                || entry_muid.timestamp < time_of_prior_clear(txn, container, as_of)?
            {
                return Ok(ControlFlow::Continue(()));
            }
            if let Some(builder) = load_entry(txn, &key[16..32])? {
                if !builder.deletion {
                    found.push(FoundEntry {
                        address: entry_muid,
                        builder,
                    });
                }
            }
            Ok(ControlFlow::Continue(()))
        },
    )?;
    Ok(found)
}

/// Containers whose name (global property value) is `name`.
pub(crate) fn by_name(
    txn: &impl ReadTxn,
    name: &str,
    as_of: MuTimestamp,
) -> Result<Vec<FoundContainer>> {
    let property = Muid::arche(Behavior::Property);
    let clear = time_of_prior_clear(txn, property, as_of)?;
    let mut prefix = name.as_bytes().to_vec();
    prefix.push(0);
    let mut found = Vec::new();
    txn.walk_prefix(Table::ByName, &prefix, Direction::Forward, &mut |key, _| {
        let rest = &key[prefix.len()..];
        if rest.len() != 32 {
            return Ok(ControlFlow::Continue(()));
        }
        let entry_muid = Muid::from_bytes(&rest[..16])?;
        let described = Muid::from_bytes(&rest[16..])?;
        if entry_muid.timestamp >= as_of
            || entry_muid.timestamp < clear
            || is_removed(txn, property, entry_muid, as_of)?
        {
            return Ok(ControlFlow::Continue(()));
        }
        if let Some(builder) = container_definition(txn, described)? {
            found.push(FoundContainer {
                address: described,
                builder,
            });
        }
        Ok(ControlFlow::Continue(()))
    })?;
    Ok(found)
}

/// Distinct containers that currently point at `pointee`.
pub(crate) fn containers_pointing_to(
    txn: &impl ReadTxn,
    pointee: Muid,
    as_of: MuTimestamp,
) -> Result<Vec<Muid>> {
    let mut found = BTreeSet::new();
    txn.walk_prefix(Table::ByPointee, &pointee.to_bytes(), Direction::Forward, &mut |key, value| {
        let entry_muid = Muid::from_bytes(&key[16..32])?;
        let container = Muid::from_bytes(value)?;
        if entry_muid.timestamp < as_of && !is_removed(txn, container, entry_muid, as_of)? {
            found.insert(container);
        }
        Ok(ControlFlow::Continue(()))
    })?;
    Ok(found.into_iter().collect())
}

// =============================================================================
// Accumulators
// =============================================================================

/// Running total kept for current reads.
pub(crate) fn stored_total(txn: &impl ReadTxn, accumulator: Muid) -> Result<i128> {
    match txn.get(Table::Totals, &accumulator.to_bytes())? {
        Some(raw) => std::str::from_utf8(&raw)
            .ok()
            .and_then(|s| s.parse::<i128>().ok())
            .ok_or_else(|| Error::SerializationError("corrupt accumulator total".to_string())),
        None => Ok(0),
    }
}

/// Total of an accumulator as of a time, in billionths.
pub(crate) fn billionths(
    txn: &impl ReadTxn,
    accumulator: Muid,
    as_of: MuTimestamp,
) -> Result<i128> {
    if as_of == INT_INF {
        return stored_total(txn, accumulator);
    }
    let clear = time_of_prior_clear(txn, accumulator, as_of)?;
    let mut total: i128 = 0;
    txn.walk_prefix(
        Table::Placements,
        &accumulator.to_bytes(),
        Direction::Forward,
        &mut |key, value| {
            let placement = Placement::from_bytes(key)?;
            let placed = placement.placer.timestamp;
            if placed >= as_of {
                return Ok(ControlFlow::Break(()));
            }
            if placed < clear {
                return Ok(ControlFlow::Continue(()));
            }
            if let Some(builder) = load_entry(txn, value)? {
                let amount = builder
                    .value
                    .as_ref()
                    .map(Value::from_builder)
                    .transpose()?
                    .and_then(|v| v.as_int())
                    .unwrap_or(0);
                total += i128::from(amount);
            }
            Ok(ControlFlow::Continue(()))
        },
    )?;
    Ok(total)
}
