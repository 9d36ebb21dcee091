//! Ordered byte-keyed tables
//!
//! Every index of the bundle store is a table mapping byte keys to byte
//! values, ordered by key. Backends only need to offer point reads, ordered
//! walks in either direction, and single-writer transactions; everything
//! the store does is expressed in those terms.
//!
//! # Transactions
//!
//! - [`ReadTxn`]: a consistent snapshot for reading
//! - [`WriteTxn`]: the single writer; dropping it without [`WriteTxn::commit`]
//!   discards every change it made

use gink_core::Result;
use std::ops::{Bound, ControlFlow};

// =============================================================================
// Tables
// =============================================================================

/// Tables of the bundle store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Table {
    /// muts(receive_time) → signed bundle bytes
    Bundles,
    /// bundle info bytes → muts(receive_time)
    BundleInfos,
    /// chain → bundle info of the chain head
    Chains,
    /// muts(claim_time) → serialized claim
    Claims,
    /// entry muid → serialized entry
    Entries,
    /// placement key → entry muid
    Placements,
    /// entry ∥ placer → placement key (empty = removed)
    Locations,
    /// container ∥ removing ∥ movement → serialized movement
    Removals,
    /// muts(movement time) ∥ removal key → ∅
    RemovalsByTime,
    /// container ∥ clearance → serialized clearance
    Clearances,
    /// container muid → serialized container definition
    Containers,
    /// describing ∥ entry → container
    ByDescribing,
    /// pointee ∥ entry → container
    ByPointee,
    /// name ∥ 0x00 ∥ entry ∥ described → ∅
    ByName,
    /// side ∥ entry → entry
    BySide,
    /// chain → identity
    Identities,
    /// chain → verify key
    VerifyKeys,
    /// retention flag name → muts(0 or 1)
    Retentions,
    /// verify key → signing key
    SigningKeys,
    /// muts(key id) → symmetric key
    SymmetricKeys,
    /// accumulator muid → decimal total in billionths
    Totals,
    /// bundle info header → signed bundle bytes awaiting acknowledgement
    Outbox,
}

impl Table {
    /// Every table, in declaration order.
    pub const ALL: [Table; 22] = [
        Table::Bundles,
        Table::BundleInfos,
        Table::Chains,
        Table::Claims,
        Table::Entries,
        Table::Placements,
        Table::Locations,
        Table::Removals,
        Table::RemovalsByTime,
        Table::Clearances,
        Table::Containers,
        Table::ByDescribing,
        Table::ByPointee,
        Table::ByName,
        Table::BySide,
        Table::Identities,
        Table::VerifyKeys,
        Table::Retentions,
        Table::SigningKeys,
        Table::SymmetricKeys,
        Table::Totals,
        Table::Outbox,
    ];

    /// Name of the table in the backing file.
    pub fn name(&self) -> &'static str {
        match self {
            Table::Bundles => "bundles",
            Table::BundleInfos => "bundle_infos",
            Table::Chains => "chains",
            Table::Claims => "claims",
            Table::Entries => "entries",
            Table::Placements => "placements",
            Table::Locations => "locations",
            Table::Removals => "removals",
            Table::RemovalsByTime => "removals_by_time",
            Table::Clearances => "clearances",
            Table::Containers => "containers",
            Table::ByDescribing => "by_describing",
            Table::ByPointee => "by_pointee",
            Table::ByName => "by_name",
            Table::BySide => "by_side",
            Table::Identities => "identities",
            Table::VerifyKeys => "verify_keys",
            Table::Retentions => "retentions",
            Table::SigningKeys => "signing_keys",
            Table::SymmetricKeys => "symmetric_keys",
            Table::Totals => "totals",
            Table::Outbox => "outbox",
        }
    }

    /// Position of the table in [`Table::ALL`].
    pub fn index(&self) -> usize {
        *self as usize
    }
}

// =============================================================================
// Walks
// =============================================================================

/// Direction of an ordered walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Ascending keys
    Forward,
    /// Descending keys
    Reverse,
}

/// Owned key/value pair.
pub type KeyValue = (Vec<u8>, Vec<u8>);

/// Callback invoked for each row of a walk; `Break` stops the walk.
pub type Visitor<'v> = dyn FnMut(&[u8], &[u8]) -> Result<ControlFlow<()>> + 'v;

/// Smallest key greater than every key starting with `prefix`.
///
/// `None` when no such key exists (empty prefix or all `0xFF`).
pub fn prefix_end(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.pop() {
        if last < 0xFF {
            end.push(last + 1);
            return Some(end);
        }
    }
    None
}

/// `a ∥ b`
pub fn concat(a: &[u8], b: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(a.len() + b.len());
    out.extend_from_slice(a);
    out.extend_from_slice(b);
    out
}

/// Whether `(lower, upper)` can't contain any key.
pub(crate) fn is_empty_range(lower: Bound<&[u8]>, upper: Bound<&[u8]>) -> bool {
    match (lower, upper) {
        (Bound::Included(l), Bound::Included(u)) => l > u,
        (Bound::Included(l) | Bound::Excluded(l), Bound::Included(u) | Bound::Excluded(u)) => {
            l >= u
        }
        _ => false,
    }
}

// =============================================================================
// Transactions
// =============================================================================

/// A consistent view of every table.
pub trait ReadTxn {
    /// Point read.
    fn get(&self, table: Table, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Visit rows with keys in `(lower, upper)` in `direction` order.
    fn walk(
        &self,
        table: Table,
        lower: Bound<&[u8]>,
        upper: Bound<&[u8]>,
        direction: Direction,
        visit: &mut Visitor<'_>,
    ) -> Result<()>;

    /// Whether `key` is present.
    fn contains(&self, table: Table, key: &[u8]) -> Result<bool> {
        Ok(self.get(table, key)?.is_some())
    }

    /// Visit every row whose key starts with `prefix`.
    fn walk_prefix(
        &self,
        table: Table,
        prefix: &[u8],
        direction: Direction,
        visit: &mut Visitor<'_>,
    ) -> Result<()> {
        let end = prefix_end(prefix);
        let upper = match &end {
            Some(end) => Bound::Excluded(end.as_slice()),
            None => Bound::Unbounded,
        };
        self.walk(table, Bound::Included(prefix), upper, direction, visit)
    }

    /// Every row whose key starts with `prefix`, ascending.
    fn collect_prefix(&self, table: Table, prefix: &[u8]) -> Result<Vec<KeyValue>> {
        let mut rows = Vec::new();
        self.walk_prefix(table, prefix, Direction::Forward, &mut |k, v| {
            rows.push((k.to_vec(), v.to_vec()));
            Ok(ControlFlow::Continue(()))
        })?;
        Ok(rows)
    }

    /// First row with key `>= key`.
    fn first_at_or_after(&self, table: Table, key: &[u8]) -> Result<Option<KeyValue>> {
        let mut found = None;
        self.walk(
            table,
            Bound::Included(key),
            Bound::Unbounded,
            Direction::Forward,
            &mut |k, v| {
                found = Some((k.to_vec(), v.to_vec()));
                Ok(ControlFlow::Break(()))
            },
        )?;
        Ok(found)
    }

    /// Last row of the table.
    fn last(&self, table: Table) -> Result<Option<KeyValue>> {
        let mut found = None;
        self.walk(
            table,
            Bound::Unbounded,
            Bound::Unbounded,
            Direction::Reverse,
            &mut |k, v| {
                found = Some((k.to_vec(), v.to_vec()));
                Ok(ControlFlow::Break(()))
            },
        )?;
        Ok(found)
    }

    /// Last row whose key starts with `prefix` and sorts below `boundary`.
    ///
    /// Without a boundary this is simply the last row under the prefix.
    fn last_with_prefix(
        &self,
        table: Table,
        prefix: &[u8],
        boundary: Option<&[u8]>,
    ) -> Result<Option<KeyValue>> {
        let end = match boundary {
            Some(boundary) => Some(boundary.to_vec()),
            None => prefix_end(prefix),
        };
        let upper = match &end {
            Some(end) => Bound::Excluded(end.as_slice()),
            None => Bound::Unbounded,
        };
        let mut found = None;
        self.walk(
            table,
            Bound::Included(prefix),
            upper,
            Direction::Reverse,
            &mut |k, v| {
                if k.starts_with(prefix) {
                    found = Some((k.to_vec(), v.to_vec()));
                }
                Ok(ControlFlow::Break(()))
            },
        )?;
        Ok(found)
    }
}

/// The single writer.
pub trait WriteTxn: ReadTxn {
    /// Insert or overwrite.
    fn put(&mut self, table: Table, key: &[u8], value: &[u8]) -> Result<()>;

    /// Remove a row, returning whether it existed.
    fn delete(&mut self, table: Table, key: &[u8]) -> Result<bool>;

    /// Remove every row of a table.
    fn clear(&mut self, table: Table) -> Result<()>;

    /// Make every change durable and visible.
    fn commit(self) -> Result<()>
    where
        Self: Sized;

    /// Remove and return every row whose key starts with `prefix`.
    fn delete_prefix(&mut self, table: Table, prefix: &[u8]) -> Result<Vec<KeyValue>> {
        let rows = self.collect_prefix(table, prefix)?;
        for (key, _) in &rows {
            self.delete(table, key)?;
        }
        Ok(rows)
    }
}

/// Something that can open transactions over the store's tables.
pub trait Backend: Send + Sync {
    /// Snapshot reader.
    type Read<'a>: ReadTxn
    where
        Self: 'a;

    /// Exclusive writer.
    type Write<'a>: WriteTxn
    where
        Self: 'a;

    /// Open a reader.
    fn read_txn(&self) -> Result<Self::Read<'_>>;

    /// Open the writer, blocking until any other writer finishes.
    fn write_txn(&self) -> Result<Self::Write<'_>>;

    /// Short name for logs.
    fn kind(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_end() {
        assert_eq!(prefix_end(b"ab"), Some(b"ac".to_vec()));
        assert_eq!(prefix_end(&[1, 0xFF]), Some(vec![2]));
        assert_eq!(prefix_end(&[0xFF, 0xFF]), None);
        assert_eq!(prefix_end(&[]), None);
    }

    #[test]
    fn test_empty_range() {
        assert!(is_empty_range(Bound::Included(b"b"), Bound::Excluded(b"a")));
        assert!(is_empty_range(Bound::Included(b"a"), Bound::Excluded(b"a")));
        assert!(!is_empty_range(Bound::Included(b"a"), Bound::Included(b"a")));
        assert!(!is_empty_range(Bound::Unbounded, Bound::Excluded(b"a")));
    }

    #[test]
    fn test_table_names_unique() {
        let mut names: Vec<_> = Table::ALL.iter().map(|t| t.name()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), Table::ALL.len());
        for (i, table) in Table::ALL.iter().enumerate() {
            assert_eq!(table.index(), i);
        }
    }
}
