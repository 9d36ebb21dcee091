//! Changes that put containers back the way they were
//!
//! A reset never rewrites history: it computes the entries and movements
//! that, applied now, make the visible state equal to the state at
//! `to_time`. Requires entry retention.

use std::collections::HashSet;
use std::ops::ControlFlow;

use gink_core::codec::{
    behavior_of, create_deleting_entry, decode_entry_occupant, normalize_entry_builder,
};
use gink_core::proto::{ChangeBuilder, EntryBuilder, MovementBuilder};
use gink_core::{
    Behavior, EntryKey, Error, MuTimestamp, Muid, Occupant, Placement, Result, Value, INT_INF,
};

use crate::kv::{Direction, ReadTxn, Table};
use crate::reads::{
    billionths, bounded, container_behavior, is_removed, load_entry, location_of, position_of,
    time_of_prior_clear,
};

/// Computes reset changes within one read transaction.
pub(crate) struct Resetter<'t, T: ReadTxn> {
    txn: &'t T,
    to_time: MuTimestamp,
    seen: Option<HashSet<Muid>>,
    changes: Vec<ChangeBuilder>,
}

impl<'t, T: ReadTxn> Resetter<'t, T> {
    /// `recursive` also resets containers reachable through pointees.
    pub(crate) fn new(txn: &'t T, to_time: MuTimestamp, recursive: bool) -> Self {
        Self {
            txn,
            to_time,
            seen: recursive.then(HashSet::new),
            changes: Vec::new(),
        }
    }

    pub(crate) fn into_changes(self) -> Vec<ChangeBuilder> {
        self.changes
    }

    /// Reset every container in the store plus the arche containers.
    pub(crate) fn everything(&mut self) -> Result<()> {
        for (key, _) in self.txn.collect_prefix(Table::Containers, &[])? {
            self.container(Muid::from_bytes(&key)?)?;
        }
        for behavior in Behavior::ALL {
            if matches!(behavior, Behavior::Unspecified | Behavior::Braid) {
                continue;
            }
            self.container(Muid::arche(behavior))?;
        }
        Ok(())
    }

    /// Reset one key of one container.
    pub(crate) fn key(&mut self, container: Muid, key: &EntryKey) -> Result<()> {
        let behavior = container_behavior(self.txn, container)?
            .ok_or_else(|| Error::NotFound(format!("container {container}")))?;
        if !behavior.new_entries_replace() {
            return Err(Error::InvalidOperation(format!(
                "can't reset a single key of a {behavior}"
            )));
        }
        if let Some(seen) = self.seen.as_mut() {
            seen.insert(container);
        }
        self.keyed(container, behavior, Some(&key.encode()))
    }

    /// Reset one container.
    pub(crate) fn container(&mut self, container: Muid) -> Result<()> {
        if let Some(seen) = self.seen.as_mut() {
            if !seen.insert(container) {
                return Ok(());
            }
        }
        let behavior = container_behavior(self.txn, container)?
            .ok_or_else(|| Error::NotFound(format!("container {container}")))?;
        match behavior {
            Behavior::Vertex => self.vertex(container),
            Behavior::Sequence | Behavior::EdgeType => self.ordered(container, behavior),
            Behavior::Accumulator => self.accumulator(container),
            Behavior::Unspecified => Err(Error::InvalidOperation(format!(
                "container {container} has no behavior"
            ))),
            keyed => self.keyed(container, keyed, None),
        }
    }

    fn push_entry(&mut self, entry: EntryBuilder) {
        self.changes.push(ChangeBuilder::entry(entry));
    }

    fn recurse(&mut self, occupant: &Occupant) -> Result<()> {
        if self.seen.is_none() {
            return Ok(());
        }
        if let Occupant::Pointee(pointee) = occupant {
            self.container(*pointee)?;
        }
        Ok(())
    }

    fn keyed(&mut self, container: Muid, behavior: Behavior, single: Option<&[u8]>) -> Result<()> {
        let txn = self.txn;
        let to_time = self.to_time;
        let container_key = container.to_bytes();
        let last_clear = time_of_prior_clear(txn, container, INT_INF)?;
        let clear_then = time_of_prior_clear(txn, container, to_time)?;
        let prefix = match single {
            Some(middle) => [&container_key[..], middle].concat(),
            None => container_key.to_vec(),
        };
        let mut found = txn.last_with_prefix(Table::Placements, &prefix, None)?;
        while let Some((key, value)) = found {
            let placement = Placement::from_bytes(&key)?;
            let middle_prefix = key[..key.len() - 24].to_vec();
            let current = load_entry(txn, &value)?
                .ok_or_else(|| Error::NotFound(format!("entry for placement in {container}")))?;
            let current_muid = Muid::from_bytes(&value)?;

            let then_occupant = if placement.placer.timestamp < to_time && last_clear < to_time {
                decode_entry_occupant(current_muid, &current)?
            } else {
                let now_occupant = if last_clear <= placement.placer.timestamp {
                    decode_entry_occupant(current_muid, &current)?
                } else {
                    Occupant::Deletion
                };
                let then = txn.last_with_prefix(
                    Table::Placements,
                    &middle_prefix,
                    Some(&bounded(&middle_prefix, to_time)),
                )?;
                let then_entry = match then {
                    Some((then_key, then_value)) => {
                        let then_placement = Placement::from_bytes(&then_key)?;
                        if then_placement.placer.timestamp > clear_then {
                            let muid = Muid::from_bytes(&then_value)?;
                            load_entry(txn, &then_value)?.map(|b| (muid, b))
                        } else {
                            None
                        }
                    }
                    None => None,
                };
                let then_occupant = match &then_entry {
                    Some((muid, builder)) => decode_entry_occupant(*muid, builder)?,
                    None => Occupant::Deletion,
                };
                if then_occupant != now_occupant {
                    match then_entry {
                        Some((muid, mut builder)) => {
                            normalize_entry_builder(&mut builder, muid);
                            self.push_entry(builder);
                        }
                        None => {
                            let entry_key = placement.key(behavior)?;
                            self.push_entry(create_deleting_entry(container, &entry_key, behavior)?);
                        }
                    }
                }
                then_occupant
            };
            self.recurse(&then_occupant)?;
            if single.is_some() || middle_prefix.len() == container_key.len() {
                break;
            }
            found = txn.last_with_prefix(Table::Placements, &container_key, Some(&middle_prefix))?;
        }
        Ok(())
    }

    fn ordered(&mut self, container: Muid, behavior: Behavior) -> Result<()> {
        let txn = self.txn;
        let to_time = self.to_time;
        let last_clear = time_of_prior_clear(txn, container, INT_INF)?;
        let clear_then = time_of_prior_clear(txn, container, to_time)?;
        for (key, value) in txn.collect_prefix(Table::Placements, &container.to_bytes())? {
            let placement = Placement::from_bytes(&key)?;
            let entry_muid = Muid::from_bytes(&value)?;
            let now = location_of(txn, entry_muid, INT_INF)?;
            let then = location_of(txn, entry_muid, to_time)?;
            let placed = placement.placer.timestamp;

            if placed >= to_time && last_clear < placed && now.as_ref() == Some(&placement) {
                let dest = match &then {
                    None => Some(0),
                    Some(previous) if position_of(previous)? != position_of(&placement)? => {
                        Some(position_of(previous)?)
                    }
                    Some(_) => None,
                };
                if let Some(dest) = dest {
                    self.changes.push(ChangeBuilder::movement(MovementBuilder {
                        container: Some(container.to_builder()),
                        entry: Some(entry_muid.to_builder()),
                        dest,
                        purge: false,
                    }));
                }
            }

            if then.as_ref() == Some(&placement) && clear_then < placed {
                let Some(mut builder) = load_entry(txn, &value)? else {
                    continue;
                };
                self.recurse(&decode_entry_occupant(entry_muid, &builder)?)?;
                if now.is_none() || last_clear > placed {
                    normalize_entry_builder(&mut builder, entry_muid);
                    if behavior == Behavior::Sequence {
                        builder.effective = position_of(&placement)?;
                    }
                    self.push_entry(builder);
                    if behavior == Behavior::EdgeType {
                        self.reissue_properties(entry_muid)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Properties of an edge being re-issued follow it, addressed relative
    /// to the re-issued edge entry.
    fn reissue_properties(&mut self, describing: Muid) -> Result<()> {
        let txn = self.txn;
        let to_time = self.to_time;
        let prefix = describing.to_bytes();
        let boundary = bounded(&prefix, to_time);
        let mut rows = Vec::new();
        txn.walk(
            Table::ByDescribing,
            std::ops::Bound::Included(&prefix[..]),
            std::ops::Bound::Excluded(&boundary[..]),
            Direction::Reverse,
            &mut |key, value| {
                rows.push((key.to_vec(), value.to_vec()));
                Ok(ControlFlow::Continue(()))
            },
        )?;
        let mut issued = HashSet::new();
        let mut relative = 0;
        for (key, value) in rows {
            let property = Muid::from_bytes(&value)?;
            if !issued.insert(property) {
                continue;
            }
            let entry_muid = Muid::from_bytes(&key[16..32])?;
            if is_removed(txn, property, entry_muid, to_time)? {
                continue;
            }
            let Some(mut builder) = load_entry(txn, &key[16..32])? else {
                continue;
            };
            if builder.deletion || behavior_of(&builder)? != Behavior::Property {
                continue;
            }
            normalize_entry_builder(&mut builder, entry_muid);
            relative -= 1;
            builder.describing = Some(Muid::new(0, 0, relative).to_builder());
            self.push_entry(builder);
        }
        Ok(())
    }

    fn vertex(&mut self, container: Muid) -> Result<()> {
        let txn = self.txn;
        let prefix = container.to_bytes();
        let deleted_in = |row: Option<(Vec<u8>, Vec<u8>)>| -> Result<Option<bool>> {
            match row {
                Some((_, value)) => Ok(load_entry(txn, &value)?.map(|e| e.deletion)),
                None => Ok(None),
            }
        };
        let then = txn.last_with_prefix(
            Table::Placements,
            &prefix,
            Some(&bounded(&prefix, self.to_time)),
        )?;
        let was_deleted =
            deleted_in(then)?.unwrap_or(false) || container.timestamp > self.to_time;
        let is_deleted =
            deleted_in(txn.last_with_prefix(Table::Placements, &prefix, None)?)?.unwrap_or(false);
        if was_deleted != is_deleted {
            self.push_entry(EntryBuilder {
                behavior: Behavior::Vertex as i32,
                container: Some(container.to_builder()),
                deletion: was_deleted,
                ..Default::default()
            });
        }
        Ok(())
    }

    fn accumulator(&mut self, container: Muid) -> Result<()> {
        let then = billionths(self.txn, container, self.to_time)?;
        let now = billionths(self.txn, container, INT_INF)?;
        if then != now {
            let delta = i64::try_from(then - now)
                .map_err(|_| Error::InvalidValue("accumulator delta out of range".to_string()))?;
            self.push_entry(EntryBuilder {
                behavior: Behavior::Accumulator as i32,
                container: Some(container.to_builder()),
                value: Some(Value::Int(delta).to_builder()),
                ..Default::default()
            });
        }
        Ok(())
    }
}
