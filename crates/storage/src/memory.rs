//! MemoryBackend: in-process tables over BTreeMaps
//!
//! This module implements [`Backend`] using:
//! - one `BTreeMap<Vec<u8>, Vec<u8>>` per [`Table`] for ordered byte keys
//! - `parking_lot::RwLock` for thread-safe access
//! - an undo log so a dropped writer leaves no trace
//!
//! # Design Notes
//!
//! - **Readers share the lock**: any number of readers proceed together; the
//!   writer holds the lock exclusively for the whole transaction
//! - **Rollback by undo**: each mutation records the prior row; the log is
//!   replayed backwards when a writer is dropped uncommitted
//! - **Nothing survives the process**: use the LMDB backend for durability

use std::collections::BTreeMap;
use std::ops::{Bound, ControlFlow};

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use gink_core::Result;

use crate::kv::{is_empty_range, Backend, Direction, ReadTxn, Table, Visitor, WriteTxn};

type Rows = BTreeMap<Vec<u8>, Vec<u8>>;

/// In-memory tables shared behind a single lock.
#[derive(Debug)]
pub struct MemoryBackend {
    tables: RwLock<Vec<Rows>>,
}

impl MemoryBackend {
    /// Create empty tables.
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Table::ALL.iter().map(|_| Rows::new()).collect()),
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for MemoryBackend {
    type Read<'a> = MemoryRead<'a>;
    type Write<'a> = MemoryWrite<'a>;

    fn read_txn(&self) -> Result<MemoryRead<'_>> {
        Ok(MemoryRead {
            tables: self.tables.read(),
        })
    }

    fn write_txn(&self) -> Result<MemoryWrite<'_>> {
        Ok(MemoryWrite {
            tables: self.tables.write(),
            undo: Vec::new(),
            committed: false,
        })
    }

    fn kind(&self) -> &'static str {
        "memory"
    }
}

// =============================================================================
// Transactions
// =============================================================================

fn walk_rows(
    rows: &Rows,
    lower: Bound<&[u8]>,
    upper: Bound<&[u8]>,
    direction: Direction,
    visit: &mut Visitor<'_>,
) -> Result<()> {
    if is_empty_range(lower, upper) {
        return Ok(());
    }
    let range = rows.range::<[u8], _>((lower, upper));
    match direction {
        Direction::Forward => {
            for (k, v) in range {
                if visit(k, v)?.is_break() {
                    break;
                }
            }
        }
        Direction::Reverse => {
            for (k, v) in range.rev() {
                if visit(k, v)?.is_break() {
                    break;
                }
            }
        }
    }
    Ok(())
}

/// Reader holding the shared lock.
pub struct MemoryRead<'a> {
    tables: RwLockReadGuard<'a, Vec<Rows>>,
}

impl ReadTxn for MemoryRead<'_> {
    fn get(&self, table: Table, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.tables[table.index()].get(key).cloned())
    }

    fn walk(
        &self,
        table: Table,
        lower: Bound<&[u8]>,
        upper: Bound<&[u8]>,
        direction: Direction,
        visit: &mut Visitor<'_>,
    ) -> Result<()> {
        walk_rows(&self.tables[table.index()], lower, upper, direction, visit)
    }
}

/// Prior state of a row touched by the writer.
struct Undo {
    table: Table,
    key: Vec<u8>,
    prior: Option<Vec<u8>>,
}

/// Writer holding the exclusive lock.
pub struct MemoryWrite<'a> {
    tables: RwLockWriteGuard<'a, Vec<Rows>>,
    undo: Vec<Undo>,
    committed: bool,
}

impl ReadTxn for MemoryWrite<'_> {
    fn get(&self, table: Table, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.tables[table.index()].get(key).cloned())
    }

    fn walk(
        &self,
        table: Table,
        lower: Bound<&[u8]>,
        upper: Bound<&[u8]>,
        direction: Direction,
        visit: &mut Visitor<'_>,
    ) -> Result<()> {
        walk_rows(&self.tables[table.index()], lower, upper, direction, visit)
    }
}

impl WriteTxn for MemoryWrite<'_> {
    fn put(&mut self, table: Table, key: &[u8], value: &[u8]) -> Result<()> {
        let prior = self.tables[table.index()].insert(key.to_vec(), value.to_vec());
        self.undo.push(Undo {
            table,
            key: key.to_vec(),
            prior,
        });
        Ok(())
    }

    fn delete(&mut self, table: Table, key: &[u8]) -> Result<bool> {
        match self.tables[table.index()].remove(key) {
            Some(prior) => {
                self.undo.push(Undo {
                    table,
                    key: key.to_vec(),
                    prior: Some(prior),
                });
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn clear(&mut self, table: Table) -> Result<()> {
        let rows = std::mem::take(&mut self.tables[table.index()]);
        self.undo.extend(rows.into_iter().map(|(key, prior)| Undo {
            table,
            key,
            prior: Some(prior),
        }));
        Ok(())
    }

    fn commit(mut self) -> Result<()> {
        self.committed = true;
        self.undo.clear();
        Ok(())
    }
}

impl Drop for MemoryWrite<'_> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        while let Some(Undo { table, key, prior }) = self.undo.pop() {
            let rows = &mut self.tables[table.index()];
            match prior {
                Some(value) => {
                    rows.insert(key, value);
                }
                None => {
                    rows.remove(&key);
                }
            }
        }
    }
}
