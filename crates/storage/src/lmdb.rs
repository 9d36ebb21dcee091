//! LmdbBackend: durable tables in an LMDB environment
//!
//! Each [`Table`] is a named LMDB database of raw bytes inside one
//! environment directory. LMDB allows a single writer at a time across every
//! process that opens the directory, so [`Backend::write_txn`] is the
//! writer critical section; readers get MVCC snapshots and never block.

use std::ops::Bound;
use std::path::{Path, PathBuf};

use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions, RoTxn, RwTxn};
use tracing::debug;

use gink_core::{Error, Result};

use crate::kv::{is_empty_range, Backend, Direction, ReadTxn, Table, Visitor, WriteTxn};

type Db = Database<Bytes, Bytes>;

fn storage_error(e: heed::Error) -> Error {
    Error::StorageError(e.to_string())
}

/// Tables stored in an LMDB environment.
pub struct LmdbBackend {
    env: Env,
    dbs: Vec<Db>,
    path: PathBuf,
}

impl std::fmt::Debug for LmdbBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LmdbBackend").field("path", &self.path).finish()
    }
}

impl LmdbBackend {
    /// Open (creating if needed) the environment in directory `path`.
    pub fn open(path: impl AsRef<Path>, map_size: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        std::fs::create_dir_all(&path)?;
        // SAFETY: the environment is opened once per backend and never
        // concurrently reopened from this process with different options.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(map_size)
                .max_dbs(Table::ALL.len() as u32 + 8)
                .open(&path)
        }
        .map_err(storage_error)?;

        let mut wtxn = env.write_txn().map_err(storage_error)?;
        let mut dbs = Vec::with_capacity(Table::ALL.len());
        for table in Table::ALL {
            let db: Db = env
                .create_database(&mut wtxn, Some(table.name()))
                .map_err(storage_error)?;
            dbs.push(db);
        }
        wtxn.commit().map_err(storage_error)?;
        debug!(path = %path.display(), "opened lmdb environment");
        Ok(Self { env, dbs, path })
    }

    /// Directory of the environment.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn db(&self, table: Table) -> Db {
        self.dbs[table.index()]
    }
}

impl Backend for LmdbBackend {
    type Read<'a> = LmdbRead<'a>;
    type Write<'a> = LmdbWrite<'a>;

    fn read_txn(&self) -> Result<LmdbRead<'_>> {
        Ok(LmdbRead {
            backend: self,
            txn: self.env.read_txn().map_err(storage_error)?,
        })
    }

    fn write_txn(&self) -> Result<LmdbWrite<'_>> {
        Ok(LmdbWrite {
            backend: self,
            txn: self.env.write_txn().map_err(storage_error)?,
        })
    }

    fn kind(&self) -> &'static str {
        "lmdb"
    }
}

// =============================================================================
// Transactions
// =============================================================================

fn walk_db(
    db: Db,
    txn: &RoTxn<'_>,
    lower: Bound<&[u8]>,
    upper: Bound<&[u8]>,
    direction: Direction,
    visit: &mut Visitor<'_>,
) -> Result<()> {
    if is_empty_range(lower, upper) {
        return Ok(());
    }
    let range = (lower, upper);
    match direction {
        Direction::Forward => {
            for item in db.range(txn, &range).map_err(storage_error)? {
                let (k, v) = item.map_err(storage_error)?;
                if visit(k, v)?.is_break() {
                    break;
                }
            }
        }
        Direction::Reverse => {
            for item in db.rev_range(txn, &range).map_err(storage_error)? {
                let (k, v) = item.map_err(storage_error)?;
                if visit(k, v)?.is_break() {
                    break;
                }
            }
        }
    }
    Ok(())
}

/// Snapshot reader.
pub struct LmdbRead<'a> {
    backend: &'a LmdbBackend,
    txn: RoTxn<'a>,
}

impl ReadTxn for LmdbRead<'_> {
    fn get(&self, table: Table, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let found = self
            .backend
            .db(table)
            .get(&self.txn, key)
            .map_err(storage_error)?;
        Ok(found.map(<[u8]>::to_vec))
    }

    fn walk(
        &self,
        table: Table,
        lower: Bound<&[u8]>,
        upper: Bound<&[u8]>,
        direction: Direction,
        visit: &mut Visitor<'_>,
    ) -> Result<()> {
        walk_db(self.backend.db(table), &self.txn, lower, upper, direction, visit)
    }
}

/// The environment's single writer; aborts on drop unless committed.
pub struct LmdbWrite<'a> {
    backend: &'a LmdbBackend,
    txn: RwTxn<'a>,
}

impl ReadTxn for LmdbWrite<'_> {
    fn get(&self, table: Table, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let found = self
            .backend
            .db(table)
            .get(&self.txn, key)
            .map_err(storage_error)?;
        Ok(found.map(<[u8]>::to_vec))
    }

    fn walk(
        &self,
        table: Table,
        lower: Bound<&[u8]>,
        upper: Bound<&[u8]>,
        direction: Direction,
        visit: &mut Visitor<'_>,
    ) -> Result<()> {
        walk_db(self.backend.db(table), &self.txn, lower, upper, direction, visit)
    }
}

impl WriteTxn for LmdbWrite<'_> {
    fn put(&mut self, table: Table, key: &[u8], value: &[u8]) -> Result<()> {
        self.backend
            .db(table)
            .put(&mut self.txn, key, value)
            .map_err(storage_error)
    }

    fn delete(&mut self, table: Table, key: &[u8]) -> Result<bool> {
        self.backend
            .db(table)
            .delete(&mut self.txn, key)
            .map_err(storage_error)
    }

    fn clear(&mut self, table: Table) -> Result<()> {
        self.backend
            .db(table)
            .clear(&mut self.txn)
            .map_err(storage_error)
    }

    fn commit(self) -> Result<()> {
        self.txn.commit().map_err(storage_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reopen_keeps_data() {
        let dir = tempfile::tempdir().unwrap();
        {
            let backend = LmdbBackend::open(dir.path(), 1 << 24).unwrap();
            let mut txn = backend.write_txn().unwrap();
            txn.put(Table::Chains, b"chain", b"head").unwrap();
            txn.commit().unwrap();
        }
        let backend = LmdbBackend::open(dir.path(), 1 << 24).unwrap();
        let read = backend.read_txn().unwrap();
        assert_eq!(read.get(Table::Chains, b"chain").unwrap(), Some(b"head".to_vec()));
        assert_eq!(read.get(Table::Entries, b"chain").unwrap(), None);
    }

    #[test]
    fn test_abort_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LmdbBackend::open(dir.path(), 1 << 24).unwrap();
        {
            let mut txn = backend.write_txn().unwrap();
            txn.put(Table::Entries, b"k", b"v").unwrap();
        }
        let read = backend.read_txn().unwrap();
        assert!(read.get(Table::Entries, b"k").unwrap().is_none());
    }

    #[test]
    fn test_reverse_walk_with_boundary() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LmdbBackend::open(dir.path(), 1 << 24).unwrap();
        let mut txn = backend.write_txn().unwrap();
        for key in [&b"p1"[..], b"p2", b"p3", b"q"] {
            txn.put(Table::Placements, key, b"").unwrap();
        }
        let found = txn
            .last_with_prefix(Table::Placements, b"p", Some(b"p3"))
            .unwrap();
        assert_eq!(found.map(|(k, _)| k), Some(b"p2".to_vec()));
        let removed = txn.delete_prefix(Table::Placements, b"p").unwrap();
        assert_eq!(removed.len(), 3);
        txn.commit().unwrap();
    }
}
