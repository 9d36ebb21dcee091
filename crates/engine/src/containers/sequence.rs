//! Sequence: an ordered list of values and container references
//!
//! Entries are ordered by position, a microsecond timestamp: the time they
//! were appended, or an explicit effective time chosen between neighbors
//! when inserting. Moving an entry gives it a new position without
//! rewriting it; removing it is a move to nowhere.

use rand::Rng;

use gink_core::proto::{ChangeBuilder, MovementBuilder};
use gink_core::{Behavior, Bundler, Error, MuTimestamp, Muid, PositionedEntry, Result};

use super::{container_facade, entry_in, occupant_contents, Contents};
use crate::clock::GenericTimestamp;

/// Largest distance a front insert lands before the first entry.
const FRONT_SPREAD: MuTimestamp = 1_000_000;

container_facade!(
    /// Ordered list of [`Contents`].
    Sequence,
    Behavior::Sequence
);

impl Sequence {
    /// Add `contents` at the end.
    pub fn append(&self, contents: impl Into<Contents>, bundler: Option<&mut Bundler>) -> Result<Muid> {
        self.place(contents.into(), 0, 0, bundler)
    }

    /// Add `contents` at the end, hidden from reads from `expiry` on.
    pub fn append_expiring(
        &self,
        contents: impl Into<Contents>,
        expiry: impl Into<GenericTimestamp>,
        bundler: Option<&mut Bundler>,
    ) -> Result<Muid> {
        let expiry = self.db.resolve_timestamp(expiry)?;
        self.place(contents.into(), 0, expiry, bundler)
    }

    /// Add `contents` so that it ends up at `index`.
    ///
    /// A negative index counts from the end: `-1` puts it after the last
    /// entry, `-2` before the last entry.
    pub fn insert(
        &self,
        index: i64,
        contents: impl Into<Contents>,
        bundler: Option<&mut Bundler>,
    ) -> Result<Muid> {
        let effective = if index == -1 {
            0
        } else {
            self.position_for(index)?
        };
        self.place(contents.into(), effective, 0, bundler)
    }

    /// Append every item in one bundle.
    pub fn extend<C: Into<Contents>>(
        &self,
        items: impl IntoIterator<Item = C>,
        bundler: Option<&mut Bundler>,
    ) -> Result<Vec<Muid>> {
        self.db.in_bundle(bundler, "extend", |bundler| {
            items
                .into_iter()
                .map(|item| self.append(item, Some(&mut *bundler)))
                .collect()
        })
    }

    fn place(
        &self,
        contents: Contents,
        effective: MuTimestamp,
        expiry: MuTimestamp,
        bundler: Option<&mut Bundler>,
    ) -> Result<Muid> {
        let mut entry = entry_in(self.muid, Behavior::Sequence);
        entry.effective = effective;
        entry.expiry = expiry;
        contents.fill(&mut entry);
        self.db.write_change(bundler, ChangeBuilder::entry(entry))
    }

    /// Entries visible as of a time, in order.
    pub fn entries(&self, as_of: impl Into<GenericTimestamp>) -> Result<Vec<PositionedEntry>> {
        let as_of = self.db.resolve_timestamp(as_of)?;
        self.db
            .store()
            .get_ordered_entries(self.muid, as_of, None, 0, false)
    }

    /// Entry at `index` (negative counts from the end) as of a time.
    pub fn at(
        &self,
        index: i64,
        as_of: impl Into<GenericTimestamp>,
    ) -> Result<Option<(Muid, Contents)>> {
        let as_of = self.db.resolve_timestamp(as_of)?;
        let (offset, descending) = if index < 0 {
            (!index, true)
        } else {
            (index, false)
        };
        let offset = usize::try_from(offset)
            .map_err(|_| Error::InvalidOperation(format!("index out of range: {index}")))?;
        let found = self
            .db
            .store()
            .get_ordered_entries(self.muid, as_of, Some(1), offset, descending)?;
        match found.into_iter().next() {
            Some(entry) => Ok(occupant_contents(entry.entry_muid, &entry.builder)?
                .map(|contents| (entry.entry_muid, contents))),
            None => Ok(None),
        }
    }

    /// Entry muids and contents, in order.
    pub fn items(&self, as_of: impl Into<GenericTimestamp>) -> Result<Vec<(Muid, Contents)>> {
        let mut items = Vec::new();
        for entry in self.entries(as_of)? {
            if let Some(contents) = occupant_contents(entry.entry_muid, &entry.builder)? {
                items.push((entry.entry_muid, contents));
            }
        }
        Ok(items)
    }

    /// Contents in order.
    pub fn values(&self, as_of: impl Into<GenericTimestamp>) -> Result<Vec<Contents>> {
        Ok(self.items(as_of)?.into_iter().map(|(_, contents)| contents).collect())
    }

    /// Contents in reverse order.
    pub fn values_reversed(&self, as_of: impl Into<GenericTimestamp>) -> Result<Vec<Contents>> {
        let as_of = self.db.resolve_timestamp(as_of)?;
        let mut values = Vec::new();
        for entry in self
            .db
            .store()
            .get_ordered_entries(self.muid, as_of, None, 0, true)?
        {
            if let Some(contents) = occupant_contents(entry.entry_muid, &entry.builder)? {
                values.push(contents);
            }
        }
        Ok(values)
    }

    /// Number of visible entries.
    pub fn size(&self, as_of: impl Into<GenericTimestamp>) -> Result<usize> {
        Ok(self.entries(as_of)?.len())
    }

    /// Index of the first entry holding `contents`.
    pub fn index_of(
        &self,
        contents: &Contents,
        as_of: impl Into<GenericTimestamp>,
    ) -> Result<Option<usize>> {
        Ok(self.values(as_of)?.iter().position(|c| c == contents))
    }

    /// Whether any entry holds `contents`.
    pub fn contains(&self, contents: &Contents, as_of: impl Into<GenericTimestamp>) -> Result<bool> {
        Ok(self.index_of(contents, as_of)?.is_some())
    }

    /// Move the entry `entry` elsewhere, or remove it.
    ///
    /// `dest` is where it goes:
    ///
    /// - `None`: out of the sequence
    /// - `Int(-1)`: the end
    /// - other small integers: before the entry at that index, or after it
    ///   for negative indexes
    /// - anything else: that position, resolved like a timestamp
    pub fn yank(
        &self,
        entry: Muid,
        dest: Option<GenericTimestamp>,
        bundler: Option<&mut Bundler>,
    ) -> Result<Muid> {
        let dest = match dest {
            None => 0,
            Some(GenericTimestamp::Int(-1)) => self.db.now(),
            Some(GenericTimestamp::Int(index)) if index.unsigned_abs() < 1_000_000 => {
                self.position_for(index)?
            }
            Some(other) => self.db.resolve_timestamp(other)?,
        };
        self.move_entry(entry, dest, false, bundler)
    }

    /// Remove the entry `entry`; with `purge` it is also dropped from history.
    pub fn remove_entry(&self, entry: Muid, purge: bool, bundler: Option<&mut Bundler>) -> Result<Muid> {
        self.move_entry(entry, 0, purge, bundler)
    }

    fn move_entry(
        &self,
        entry: Muid,
        dest: MuTimestamp,
        purge: bool,
        bundler: Option<&mut Bundler>,
    ) -> Result<Muid> {
        self.db.write_change(
            bundler,
            ChangeBuilder::movement(MovementBuilder {
                container: Some(self.muid.to_builder()),
                entry: Some(entry.to_builder()),
                dest,
                purge,
            }),
        )
    }

    /// Take the entry at `index` out, or move it to `dest` (see [`Self::yank`]).
    pub fn pop(
        &self,
        index: i64,
        dest: Option<GenericTimestamp>,
        bundler: Option<&mut Bundler>,
    ) -> Result<Option<Contents>> {
        let Some((entry, contents)) = self.at(index, GenericTimestamp::Now)? else {
            return Ok(None);
        };
        self.yank(entry, dest, bundler)?;
        Ok(Some(contents))
    }

    /// Remove the first entry holding `contents`.
    pub fn remove(&self, contents: &Contents, bundler: Option<&mut Bundler>) -> Result<Muid> {
        let found = self
            .items(GenericTimestamp::Now)?
            .into_iter()
            .find(|(_, c)| c == contents)
            .map(|(muid, _)| muid)
            .ok_or_else(|| Error::NotFound(format!("{contents:?} not in sequence {}", self.muid)))?;
        self.remove_entry(found, false, bundler)
    }

    /// A fresh position for landing at `index`.
    ///
    /// Non-negative: just before the entry currently at `index`. Negative:
    /// just after the entry at that index from the end.
    fn position_for(&self, index: i64) -> Result<MuTimestamp> {
        let positions: Vec<MuTimestamp> = self
            .entries(GenericTimestamp::Now)?
            .iter()
            .map(|e| e.position)
            .collect();
        let count = positions.len() as i64;
        let now = self.db.now();
        let (before, after) = if index >= 0 {
            let after = positions.get(index as usize).copied();
            let before = if index == 0 {
                None
            } else {
                positions.get(index as usize - 1).copied()
            };
            (before, after)
        } else {
            let at = count + index;
            if at < 0 {
                return Err(Error::InvalidOperation(format!(
                    "index {index} out of range for {count} entries"
                )));
            }
            (positions.get(at as usize).copied(), positions.get(at as usize + 1).copied())
        };
        let mut rng = rand::thread_rng();
        match (before, after) {
            (None, None) => Ok(now),
            (None, Some(first)) => Ok(first - rng.gen_range(1..=FRONT_SPREAD)),
            (Some(last), None) => Ok(now.max(last + 1)),
            (Some(low), Some(high)) if high - low >= 2 => Ok(rng.gen_range(low + 1..high)),
            (Some(low), Some(high)) => Err(Error::InvalidOperation(format!(
                "no room between positions {low} and {high}"
            ))),
        }
    }
}
