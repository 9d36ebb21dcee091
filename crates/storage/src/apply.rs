//! Applying bundles to the index tables
//!
//! Everything here runs inside the store's single write transaction. A
//! bundle is checked against the stored chain head, verified, journaled and
//! then its changes are applied in offset order:
//!
//! - container definitions go to `containers`
//! - entries get an `entries` row, a placement, an initial location and
//!   whichever secondary indexes their fields call for
//! - movements relocate or remove a placed entry
//! - clearances hide (or, without history, delete) a container's contents
//!
//! With entry retention on, superseded placements are soft deleted through
//! `removals`; with it off they are hard deleted immediately.

use std::ops::ControlFlow;

use prost::Message;
use tracing::{debug, error, warn};

use gink_core::codec::{
    behavior_of, clearance_key, container_of, ensure_entry_is_valid, pair_of,
};
use gink_core::proto::{
    change_builder, ChangeBuilder, ClaimBuilder, ClearanceBuilder, ContainerBuilder,
    EntryBuilder, MovementBuilder,
};
use gink_core::{
    encode_muts, decode_muts, Behavior, BundleInfo, BundleWrapper, Error, LocationKey,
    MuTimestamp, Muid, Placement, RemovalKey, Result, Value,
};

use crate::kv::{concat, Direction, ReadTxn, Table, WriteTxn};
use crate::reads;

/// Retention flag for bundles in the `retentions` table.
pub(crate) const RETAIN_BUNDLES: &[u8] = b"bundles";
/// Retention flag for entry history in the `retentions` table.
pub(crate) const RETAIN_ENTRIES: &[u8] = b"entries";

/// Read a persisted retention flag.
pub(crate) fn retention_flag(txn: &impl ReadTxn, flag: &[u8]) -> Result<bool> {
    match txn.get(Table::Retentions, flag)? {
        Some(raw) => Ok(decode_muts(&raw)?.is_some()),
        None => Ok(false),
    }
}

/// Persist a retention flag.
pub(crate) fn set_retention_flag(txn: &mut impl WriteTxn, flag: &[u8], on: bool) -> Result<()> {
    txn.put(Table::Retentions, flag, &encode_muts(i64::from(on)))
}

/// Whether `new` extends the chain whose stored head is `old`.
///
/// `Ok(false)` means the bundle is already known.
pub(crate) fn is_needed(new: &BundleInfo, old: Option<&BundleInfo>) -> Result<bool> {
    let seen_through = old.map(|o| o.timestamp).unwrap_or(0);
    if seen_through >= new.timestamp {
        return Ok(false);
    }
    if !new.is_chain_start() && new.previous == 0 {
        return Err(Error::BadExtension(format!(
            "bundle isn't the start but has no prior: {new}"
        )));
    }
    if (new.previous != 0 || seen_through != 0) && new.previous != seen_through {
        return Err(Error::BadExtension(format!(
            "bundle received without prior link in chain: previous={} head={seen_through}",
            new.previous
        )));
    }
    Ok(true)
}

/// Row key of a symmetric key id.
pub(crate) fn symmetric_key_row(key_id: u64) -> Result<i64> {
    i64::try_from(key_id).map_err(|_| Error::CryptoError(format!("key id {key_id} out of range")))
}

/// Key of the outbox and header of a bundle info: `>QQQQ` only.
pub(crate) fn info_header(info: &BundleInfo) -> Vec<u8> {
    let mut bytes = info.to_bytes();
    bytes.truncate(32);
    bytes
}

/// Check, verify and journal a bundle, then apply its changes.
///
/// `local` bundles were produced by this instance and are queued in the
/// outbox until a peer acknowledges them. Returns `false` when the store
/// already had the bundle.
pub(crate) fn apply_bundle<T: WriteTxn>(
    txn: &mut T,
    wrapper: &BundleWrapper,
    local: bool,
    claim: Option<ClaimBuilder>,
    apply_changes: bool,
    receive_time: MuTimestamp,
) -> Result<bool> {
    let info = wrapper.info();
    let chain_key = info.chain().to_bytes();
    let builder = wrapper.builder();

    if info.is_chain_start() {
        let identity = builder.identity.clone().unwrap_or_default();
        if let Some(known) = txn.get(Table::Identities, &chain_key)? {
            if known != identity.as_bytes() {
                return Err(Error::IdentityConflict(format!(
                    "chain {} already has a different identity",
                    info.chain()
                )));
            }
        }
        if let Some(known) = txn.get(Table::VerifyKeys, &chain_key)? {
            if known != builder.verify_key {
                return Err(Error::IdentityConflict(format!(
                    "chain {} already has a different verify key",
                    info.chain()
                )));
            }
        }
    }

    let old = txn
        .get(Table::Chains, &chain_key)?
        .map(|raw| BundleInfo::from_bytes(&raw))
        .transpose()?;
    if !is_needed(info, old.as_ref())? {
        debug!(%info, "bundle already known");
        return Ok(false);
    }

    let verify_key = if info.is_chain_start() {
        wrapper.verify_key()?.ok_or_else(|| {
            Error::InvalidBundle("chain start without a verify key".to_string())
        })?
    } else {
        let expected = old.as_ref().and_then(|o| o.hash);
        if expected.map(|h| h.to_vec()) != Some(builder.prior_hash.clone()) {
            return Err(Error::BadExtension(
                "prior_hash doesn't match hash of prior bundle".to_string(),
            ));
        }
        let raw = txn.get(Table::VerifyKeys, &chain_key)?.ok_or_else(|| {
            Error::UnknownChain(format!("no verify key for chain {}", info.chain()))
        })?;
        gink_core::crypto::verifying_key(&raw)?
    };
    wrapper.verify(&verify_key)?;

    if info.is_chain_start() {
        let identity = builder.identity.clone().unwrap_or_default();
        txn.put(Table::Identities, &chain_key, identity.as_bytes())?;
        txn.put(Table::VerifyKeys, &chain_key, verify_key.as_bytes())?;
    }
    if let Some(claim) = claim.filter(|_| info.is_chain_start()) {
        crate::claims::record_claim(txn, &claim)?;
    }
    if retention_flag(txn, RETAIN_BUNDLES)? {
        let location = encode_muts(receive_time);
        txn.put(Table::Bundles, &location, wrapper.bytes())?;
        txn.put(Table::BundleInfos, &info.to_bytes(), &location)?;
    }
    if local {
        txn.put(Table::Outbox, &info_header(info), wrapper.bytes())?;
    }
    txn.put(Table::Chains, &chain_key, &info.to_bytes())?;

    if !apply_changes {
        return Ok(true);
    }
    let symmetric_key = match builder.key_id {
        Some(key_id) if builder.encrypted.is_some() => Some(
            txn.get(Table::SymmetricKeys, &encode_muts(symmetric_key_row(key_id)?))?
                .ok_or_else(|| {
                    Error::InvalidBundle(format!("no symmetric key with id {key_id}"))
                })?,
        ),
        _ => None,
    };
    let changes = wrapper.changes(symmetric_key.as_deref())?;
    let retaining = retention_flag(txn, RETAIN_ENTRIES)?;
    for (index, change) in changes.iter().enumerate() {
        let offset = index as i32 + 1;
        let change_muid = Muid::at_offset(info, offset);
        if let Err(e) = apply_change(txn, change_muid, change, retaining) {
            if matches!(e, Error::StorageError(_) | Error::IoError(_)) {
                return Err(e);
            }
            error!(%change_muid, error = %e, "could not process change");
        }
    }
    Ok(true)
}

fn apply_change<T: WriteTxn>(
    txn: &mut T,
    change_muid: Muid,
    change: &ChangeBuilder,
    retaining: bool,
) -> Result<()> {
    match &change.change {
        Some(change_builder::Change::Container(container)) => txn.put(
            Table::Containers,
            &change_muid.to_bytes(),
            &container.encode_to_vec(),
        ),
        Some(change_builder::Change::Entry(entry)) => {
            define_container_if_unknown(txn, entry, change_muid)?;
            add_entry(txn, change_muid, entry, retaining)
        }
        Some(change_builder::Change::Movement(movement)) => {
            apply_movement(txn, change_muid, movement, retaining)
        }
        Some(change_builder::Change::Clearance(clearance)) => {
            apply_clearance(txn, change_muid, clearance, retaining)
        }
        None => Err(Error::InvalidOperation("empty change".to_string())),
    }
}

/// Containers first seen through an entry get a definition with that
/// entry's behavior.
fn define_container_if_unknown<T: WriteTxn>(
    txn: &mut T,
    entry: &EntryBuilder,
    entry_muid: Muid,
) -> Result<()> {
    let container = container_of(entry, entry_muid)?;
    if container.is_instance_container() {
        return Ok(());
    }
    let key = container.to_bytes();
    if !txn.contains(Table::Containers, &key)? {
        let definition = ContainerBuilder {
            behavior: entry.behavior,
        };
        txn.put(Table::Containers, &key, &definition.encode_to_vec())?;
    }
    Ok(())
}

// =============================================================================
// Entries
// =============================================================================

fn accumulate<T: WriteTxn>(txn: &mut T, container: Muid, delta: i128) -> Result<()> {
    let key = container.to_bytes();
    let total = reads::stored_total(txn, container)? + delta;
    txn.put(Table::Totals, &key, total.to_string().as_bytes())
}

fn removal_by_time_key(movement_time: MuTimestamp, removal: &RemovalKey) -> Vec<u8> {
    concat(&encode_muts(movement_time), &removal.to_bytes())
}

fn by_name_key(name: &str, entry_muid: Muid, described: Muid) -> Vec<u8> {
    let mut key = name.as_bytes().to_vec();
    key.push(0);
    key.extend_from_slice(&entry_muid.to_bytes());
    key.extend_from_slice(&described.to_bytes());
    key
}

/// Name recorded by an entry of the global property, if any.
fn entry_name(entry: &EntryBuilder, entry_muid: Muid) -> Result<Option<(String, Muid)>> {
    if container_of(entry, entry_muid)? != Muid::arche(Behavior::Property) {
        return Ok(None);
    }
    let (Some(value), Some(describing)) = (&entry.value, &entry.describing) else {
        return Ok(None);
    };
    match Value::from_builder(value)? {
        Value::String(name) => Ok(Some((name, Muid::create(&entry_muid, Some(describing))))),
        _ => Ok(None),
    }
}

/// Place a new entry, superseding whatever held its key.
pub(crate) fn add_entry<T: WriteTxn>(
    txn: &mut T,
    entry_muid: Muid,
    entry: &EntryBuilder,
    retaining: bool,
) -> Result<()> {
    let behavior = ensure_entry_is_valid(entry, entry_muid)?;
    let placement = Placement::from_entry(entry, entry_muid)?;
    let container = placement.container;

    if behavior == Behavior::Accumulator {
        let delta = entry
            .value
            .as_ref()
            .map(Value::from_builder)
            .transpose()?
            .and_then(|v| v.as_int())
            .ok_or_else(|| {
                Error::InvalidValue("accumulator entries must carry an integer".to_string())
            })?;
        accumulate(txn, container, i128::from(delta))?;
        if !retaining {
            return Ok(());
        }
    }

    if behavior.new_entries_replace() {
        let current = reads::entry_by_middle(txn, container, &placement.middle, gink_core::INT_INF)?;
        if let Some(found) = current {
            if retaining && !entry.purge {
                let removal = RemovalKey {
                    container,
                    removing: found.address,
                    movement: entry_muid,
                };
                txn.put(Table::Removals, &removal.to_bytes(), &[])?;
                txn.put(
                    Table::RemovalsByTime,
                    &removal_by_time_key(entry_muid.timestamp, &removal),
                    &[],
                )?;
            } else {
                remove_entry(txn, found.address)?;
            }
        }
    }

    let entry_key = entry_muid.to_bytes();
    let placement_bytes = placement.to_bytes();
    txn.put(Table::Entries, &entry_key, &entry.encode_to_vec())?;
    txn.put(Table::Placements, &placement_bytes, &entry_key)?;
    let location = LocationKey {
        entry: entry_muid,
        placer: entry_muid,
    };
    txn.put(Table::Locations, &location.to_bytes(), &placement_bytes)?;

    if let Some(describing) = &entry.describing {
        let described = Muid::create(&entry_muid, Some(describing));
        txn.put(
            Table::ByDescribing,
            &concat(&described.to_bytes(), &entry_key),
            &container.to_bytes(),
        )?;
    }
    if let Some(pointee) = &entry.pointee {
        let pointee = Muid::create(&entry_muid, Some(pointee));
        txn.put(
            Table::ByPointee,
            &concat(&pointee.to_bytes(), &entry_key),
            &container.to_bytes(),
        )?;
    }
    if entry.pair.is_some() {
        let (left, rite) = pair_of(entry, entry_muid)?;
        txn.put(Table::BySide, &concat(&left.to_bytes(), &entry_key), &entry_key)?;
        txn.put(Table::BySide, &concat(&rite.to_bytes(), &entry_key), &entry_key)?;
    }
    if let Some((name, described)) = entry_name(entry, entry_muid)? {
        txn.put(Table::ByName, &by_name_key(&name, entry_muid, described), &[])?;
    }
    Ok(())
}

/// Hard delete an entry and every index row pointing at it.
///
/// Returns `false` when the entry was already gone.
pub(crate) fn remove_entry<T: WriteTxn>(txn: &mut T, entry_muid: Muid) -> Result<bool> {
    let entry_key = entry_muid.to_bytes();
    let Some(raw) = txn.get(Table::Entries, &entry_key)? else {
        debug!(%entry_muid, "entry already gone");
        return Ok(false);
    };
    txn.delete(Table::Entries, &entry_key)?;
    for (_, placement) in txn.delete_prefix(Table::Locations, &entry_key)? {
        if !placement.is_empty() {
            txn.delete(Table::Placements, &placement)?;
        }
    }
    let entry = EntryBuilder::decode(raw.as_slice())?;
    if entry.pair.is_some() {
        let (left, rite) = pair_of(&entry, entry_muid)?;
        txn.delete(Table::BySide, &concat(&left.to_bytes(), &entry_key))?;
        txn.delete(Table::BySide, &concat(&rite.to_bytes(), &entry_key))?;
    }
    if let Some(describing) = &entry.describing {
        let described = Muid::create(&entry_muid, Some(describing));
        txn.delete(Table::ByDescribing, &concat(&described.to_bytes(), &entry_key))?;
    }
    if let Some(pointee) = &entry.pointee {
        let pointee = Muid::create(&entry_muid, Some(pointee));
        txn.delete(Table::ByPointee, &concat(&pointee.to_bytes(), &entry_key))?;
    }
    if let Some((name, described)) = entry_name(&entry, entry_muid)? {
        txn.delete(Table::ByName, &by_name_key(&name, entry_muid, described))?;
    }
    Ok(true)
}

// =============================================================================
// Movements and clearances
// =============================================================================

/// Relocate (`dest != 0`) or remove (`dest == 0`) a placed entry.
pub(crate) fn apply_movement<T: WriteTxn>(
    txn: &mut T,
    movement_muid: Muid,
    movement: &MovementBuilder,
    retaining: bool,
) -> Result<()> {
    let retaining = retaining && !movement.purge;
    let entry_muid = movement
        .entry
        .as_ref()
        .map(|e| Muid::create(&movement_muid, Some(e)))
        .ok_or_else(|| Error::InvalidOperation("movement without an entry".to_string()))?;
    let entry_key = entry_muid.to_bytes();
    let Some(raw) = txn.get(Table::Entries, &entry_key)? else {
        debug!(%entry_muid, "movement of unknown entry");
        return Ok(());
    };
    let entry = EntryBuilder::decode(raw.as_slice())?;
    if movement.dest != 0 && behavior_of(&entry)? != Behavior::Sequence {
        return Err(Error::InvalidOperation(format!(
            "only sequence entries can be repositioned: {entry_muid}"
        )));
    }

    let Some((location_key, location_value)) =
        txn.last_with_prefix(Table::Locations, &entry_key, None)?
    else {
        warn!(%entry_muid, "no existing location");
        return Ok(());
    };
    let location = LocationKey::from_bytes(&location_key)?;
    if location.placer.timestamp > movement_muid.timestamp {
        warn!(%entry_muid, %movement_muid, "ignoring movement older than current location");
        return Ok(());
    }
    if location_value.is_empty() {
        warn!(%entry_muid, "entry has already been removed");
        return Ok(());
    }
    let existing = Placement::from_bytes(&location_value)?;
    if let Some(expiry) = existing.expiry {
        if expiry < movement_muid.timestamp {
            return Err(Error::Expired(format!(
                "entry {entry_muid} expired at {expiry}"
            )));
        }
    }

    if retaining {
        let removal = RemovalKey {
            container: existing.container,
            removing: existing.placer,
            movement: movement_muid,
        };
        txn.put(Table::Removals, &removal.to_bytes(), &movement.encode_to_vec())?;
        txn.put(
            Table::RemovalsByTime,
            &removal_by_time_key(movement_muid.timestamp, &removal),
            &[],
        )?;
    }
    let new_location = LocationKey {
        entry: entry_muid,
        placer: movement_muid,
    }
    .to_bytes();
    if movement.dest != 0 {
        let placement = Placement {
            container: existing.container,
            middle: encode_muts(movement.dest).to_vec(),
            placer: movement_muid,
            expiry: existing.expiry,
        };
        let placement_bytes = placement.to_bytes();
        txn.put(Table::Placements, &placement_bytes, &entry_key)?;
        txn.put(Table::Locations, &new_location, &placement_bytes)?;
    } else if retaining {
        txn.put(Table::Locations, &new_location, &[])?;
    }
    if !retaining {
        txn.delete(Table::Placements, &location_value)?;
        txn.delete(Table::Locations, &location_key)?;
        if movement.dest == 0 {
            remove_entry(txn, entry_muid)?;
        }
    }
    Ok(())
}

/// Hide everything placed in a container before the clearance.
pub(crate) fn apply_clearance<T: WriteTxn>(
    txn: &mut T,
    clearance_muid: Muid,
    clearance: &ClearanceBuilder,
    retaining: bool,
) -> Result<()> {
    let retaining = retaining && !clearance.purge;
    let container = clearance
        .container
        .as_ref()
        .map(|c| Muid::create(&clearance_muid, Some(c)))
        .ok_or_else(|| Error::InvalidOperation("clearance without a container".to_string()))?;
    let prefix = container.to_bytes();
    if !retaining {
        txn.delete_prefix(Table::Clearances, &prefix)?;
        for (_, entry_key) in txn.collect_prefix(Table::Placements, &prefix)? {
            remove_entry(txn, Muid::from_bytes(&entry_key)?)?;
        }
        txn.delete_prefix(Table::Placements, &prefix)?;
        txn.delete_prefix(Table::Removals, &prefix)?;
    }
    if reads::container_behavior(txn, container)? == Some(Behavior::Accumulator) {
        txn.put(Table::Totals, &prefix, b"0")?;
    }
    txn.put(
        Table::Clearances,
        &clearance_key(container, clearance_muid),
        &clearance.encode_to_vec(),
    )
}

// =============================================================================
// History
// =============================================================================

/// Hard delete everything soft deleted at or before `as_of`.
///
/// Returns the number of removals processed.
pub(crate) fn drop_history<T: WriteTxn>(txn: &mut T, as_of: MuTimestamp) -> Result<usize> {
    let mut due = Vec::new();
    txn.walk(
        Table::RemovalsByTime,
        std::ops::Bound::Unbounded,
        std::ops::Bound::Unbounded,
        Direction::Forward,
        &mut |key, _| {
            match decode_muts(&key[..8])? {
                Some(t) if t > as_of => return Ok(ControlFlow::Break(())),
                _ => {}
            }
            due.push(key.to_vec());
            Ok(ControlFlow::Continue(()))
        },
    )?;
    for key in &due {
        let removal = RemovalKey::from_bytes(&key[8..])?;
        let removal_key = removal.to_bytes();
        match txn.get(Table::Removals, &removal_key)? {
            Some(value) if !value.is_empty() => {
                let movement = MovementBuilder::decode(value.as_slice())?;
                let entry_muid = movement
                    .entry
                    .as_ref()
                    .map(|e| Muid::create(&removal.movement, Some(e)))
                    .unwrap_or(removal.removing);
                let location = LocationKey {
                    entry: entry_muid,
                    placer: removal.removing,
                }
                .to_bytes();
                if let Some(placement) = txn.get(Table::Locations, &location)? {
                    if !placement.is_empty() {
                        txn.delete(Table::Placements, &placement)?;
                    }
                    txn.delete(Table::Locations, &location)?;
                }
                if movement.dest == 0 {
                    remove_entry(txn, entry_muid)?;
                }
            }
            Some(_) => {
                remove_entry(txn, removal.removing)?;
            }
            None => {}
        }
        txn.delete(Table::Removals, &removal_key)?;
        txn.delete(Table::RemovalsByTime, key)?;
    }
    Ok(due.len())
}
