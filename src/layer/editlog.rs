//! The append-only node edit log.
//!
//! Every committed batch is recorded at the next offset in a gap-free,
//! monotonically increasing sequence. Offsets are never reused, even across
//! restarts: the in-memory counter is restored from the persisted tail at
//! open. Appends happen inside the caller's transaction so the log entry and
//! the state it describes commit or fail together; the counter only advances
//! after the commit succeeds, which the single-writer discipline makes safe.

use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use super::edit::{EditMeta, NodeEdit};
use super::schema::{EditLogCfKey, EditLogCfValue, EditLogs};
use crate::rocksdb::{ColumnFamily, ColumnFamilySerde, DbAccess};

/// One committed batch as read back from the log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub offs: u64,
    pub edits: Vec<NodeEdit>,
    pub meta: EditMeta,
}

/// The edit log: offset allocation plus read/append/truncate over the
/// `layer/editlog` CF.
pub(crate) struct NodeEditLog {
    /// The next offset to be written.
    next_offs: AtomicU64,
}

impl NodeEditLog {
    /// Restore the offset counter from the persisted log tail.
    pub(crate) fn restore(db: &dyn DbAccess) -> Result<Self> {
        let next = match Self::tail_offs(db)? {
            Some(tail) => tail + 1,
            None => 0,
        };
        tracing::debug!(next_offs = next, "Restored edit log counter");
        Ok(Self {
            next_offs: AtomicU64::new(next),
        })
    }

    /// The highest committed offset, if any entry exists.
    fn tail_offs(db: &dyn DbAccess) -> Result<Option<u64>> {
        let mut iter = db.iterator_cf_from(EditLogs::CF_NAME, &u64::MAX.to_be_bytes(), true)?;
        match iter.next() {
            Some(item) => {
                let (key_bytes, _) = item?;
                Ok(Some(EditLogs::key_from_bytes(&key_bytes)?.0))
            }
            None => Ok(None),
        }
    }

    /// The next offset that will be assigned. Equals the log length.
    pub(crate) fn index(&self) -> u64 {
        self.next_offs.load(Ordering::SeqCst)
    }

    /// Stage an append at the next offset inside the caller's transaction.
    ///
    /// Returns the offset the entry will occupy once the caller commits.
    /// The counter does not move until [`advance`](Self::advance).
    pub(crate) fn stage_append(
        &self,
        txn: &rocksdb::Transaction<'_, rocksdb::TransactionDB>,
        txn_db: &rocksdb::TransactionDB,
        edits: &[NodeEdit],
        meta: &EditMeta,
    ) -> Result<u64> {
        let offs = self.index();
        let cf = txn_db
            .cf_handle(EditLogs::CF_NAME)
            .ok_or_else(|| anyhow::anyhow!("Column family '{}' not found", EditLogs::CF_NAME))?;
        let key = EditLogs::key_to_bytes(&EditLogCfKey(offs));
        let value = EditLogs::value_to_bytes(&EditLogCfValue(edits.to_vec(), meta.clone()))
            .context("Failed to serialize edit log entry")?;
        txn.put_cf(cf, key, value)?;
        Ok(offs)
    }

    /// Advance the counter past a committed offset.
    pub(crate) fn advance(&self, committed_offs: u64) {
        self.next_offs
            .fetch_max(committed_offs + 1, Ordering::SeqCst);
    }

    /// Read up to `size` entries starting at `offs`, ascending.
    pub(crate) fn slice(&self, db: &dyn DbAccess, offs: u64, size: usize) -> Result<Vec<LogEntry>> {
        let mut entries = Vec::new();
        let iter = db.iterator_cf_from(EditLogs::CF_NAME, &offs.to_be_bytes(), false)?;
        for item in iter {
            if entries.len() >= size {
                break;
            }
            let (key_bytes, value_bytes) = item?;
            entries.push(Self::entry_from_bytes(&key_bytes, &value_bytes)?);
        }
        Ok(entries)
    }

    /// Read up to `size` entries ending at `offs` (or the tail if `None`),
    /// descending.
    pub(crate) fn slice_back(
        &self,
        db: &dyn DbAccess,
        offs: Option<u64>,
        size: usize,
    ) -> Result<Vec<LogEntry>> {
        let from = offs.unwrap_or(u64::MAX);
        let mut entries = Vec::new();
        let iter = db.iterator_cf_from(EditLogs::CF_NAME, &from.to_be_bytes(), true)?;
        for item in iter {
            if entries.len() >= size {
                break;
            }
            let (key_bytes, value_bytes) = item?;
            entries.push(Self::entry_from_bytes(&key_bytes, &value_bytes)?);
        }
        Ok(entries)
    }

    /// Read the single entry at `offs`.
    pub(crate) fn get(&self, db: &dyn DbAccess, offs: u64) -> Result<Option<LogEntry>> {
        let key = EditLogs::key_to_bytes(&EditLogCfKey(offs));
        match db.get_cf(EditLogs::CF_NAME, &key)? {
            Some(value_bytes) => Ok(Some(Self::entry_from_bytes(&key, &value_bytes)?)),
            None => Ok(None),
        }
    }

    /// Stage deletion of every log entry inside the caller's transaction.
    ///
    /// Returns the number of entries staged for deletion. The caller resets
    /// the counter with [`reset`](Self::reset) after the commit succeeds.
    pub(crate) fn stage_truncate(
        &self,
        txn: &rocksdb::Transaction<'_, rocksdb::TransactionDB>,
        txn_db: &rocksdb::TransactionDB,
        db: &dyn DbAccess,
    ) -> Result<u64> {
        let cf = txn_db
            .cf_handle(EditLogs::CF_NAME)
            .ok_or_else(|| anyhow::anyhow!("Column family '{}' not found", EditLogs::CF_NAME))?;
        let mut deleted = 0u64;
        for item in db.iterator_cf(EditLogs::CF_NAME)? {
            let (key_bytes, _) = item?;
            txn.delete_cf(cf, key_bytes)?;
            deleted += 1;
        }
        Ok(deleted)
    }

    /// Reset the counter to zero. Only valid after a committed truncate.
    pub(crate) fn reset(&self) {
        self.next_offs.store(0, Ordering::SeqCst);
    }

    fn entry_from_bytes(key_bytes: &[u8], value_bytes: &[u8]) -> Result<LogEntry> {
        let key = EditLogs::key_from_bytes(key_bytes)?;
        let value = EditLogs::value_from_bytes(value_bytes)
            .context("Failed to deserialize edit log entry")?;
        Ok(LogEntry {
            offs: key.0,
            edits: value.0,
            meta: value.1,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::edit::SubEdit;
    use crate::layer::schema::LayerSubsystem;
    use crate::layer::stortype::Valu;
    use crate::rocksdb::Storage;
    use crate::Buid;
    use tempfile::TempDir;

    fn open_storage(dir: &TempDir) -> Storage<LayerSubsystem> {
        let mut storage = Storage::readwrite(&dir.path().join("db"));
        storage.ready().expect("storage ready");
        storage
    }

    fn batch(n: i64) -> Vec<NodeEdit> {
        let buid = Buid::derive("test:int", &n.to_be_bytes());
        vec![NodeEdit::new(
            buid,
            "test:int",
            vec![SubEdit::NodeAdd {
                valu: Valu::Int(n),
                subs: vec![],
            }],
        )]
    }

    fn append_committed(log: &NodeEditLog, storage: &Storage<LayerSubsystem>, n: i64) -> u64 {
        let txn_db = storage.transaction_db().unwrap();
        let txn = txn_db.transaction();
        let offs = log
            .stage_append(&txn, txn_db, &batch(n), &EditMeta::default())
            .unwrap();
        txn.commit().unwrap();
        log.advance(offs);
        offs
    }

    #[test]
    fn test_offsets_gap_free() {
        let dir = TempDir::new().unwrap();
        let storage = open_storage(&dir);
        let log = NodeEditLog::restore(storage.db_access().unwrap()).unwrap();

        for expected in 0..5 {
            let offs = append_committed(&log, &storage, expected as i64);
            assert_eq!(offs, expected);
        }
        assert_eq!(log.index(), 5);
    }

    #[test]
    fn test_restore_continues_from_tail() {
        let dir = TempDir::new().unwrap();
        let storage = open_storage(&dir);
        let log = NodeEditLog::restore(storage.db_access().unwrap()).unwrap();
        for n in 0..3 {
            append_committed(&log, &storage, n);
        }

        // A fresh log instance over the same data resumes at 3, not 0.
        let restored = NodeEditLog::restore(storage.db_access().unwrap()).unwrap();
        assert_eq!(restored.index(), 3);
        let offs = append_committed(&restored, &storage, 3);
        assert_eq!(offs, 3);
    }

    #[test]
    fn test_slice_and_slice_back() {
        let dir = TempDir::new().unwrap();
        let storage = open_storage(&dir);
        let log = NodeEditLog::restore(storage.db_access().unwrap()).unwrap();
        for n in 0..10 {
            append_committed(&log, &storage, n);
        }
        let db = storage.db_access().unwrap();

        let forward = log.slice(db, 4, 3).unwrap();
        assert_eq!(
            forward.iter().map(|e| e.offs).collect::<Vec<_>>(),
            vec![4, 5, 6]
        );

        let back = log.slice_back(db, None, 3).unwrap();
        assert_eq!(
            back.iter().map(|e| e.offs).collect::<Vec<_>>(),
            vec![9, 8, 7]
        );

        let back_from = log.slice_back(db, Some(5), 3).unwrap();
        assert_eq!(
            back_from.iter().map(|e| e.offs).collect::<Vec<_>>(),
            vec![5, 4, 3]
        );

        // Past the tail: empty, not an error.
        assert!(log.slice(db, 100, 5).unwrap().is_empty());
    }

    #[test]
    fn test_get_single_entry() {
        let dir = TempDir::new().unwrap();
        let storage = open_storage(&dir);
        let log = NodeEditLog::restore(storage.db_access().unwrap()).unwrap();
        append_committed(&log, &storage, 42);

        let db = storage.db_access().unwrap();
        let entry = log.get(db, 0).unwrap().expect("entry exists");
        assert_eq!(entry.offs, 0);
        assert_eq!(entry.edits, batch(42));
        assert!(log.get(db, 1).unwrap().is_none());
    }

    #[test]
    fn test_truncate_resets_offsets() {
        let dir = TempDir::new().unwrap();
        let storage = open_storage(&dir);
        let log = NodeEditLog::restore(storage.db_access().unwrap()).unwrap();
        for n in 0..4 {
            append_committed(&log, &storage, n);
        }

        let txn_db = storage.transaction_db().unwrap();
        let txn = txn_db.transaction();
        let deleted = log
            .stage_truncate(&txn, txn_db, storage.db_access().unwrap())
            .unwrap();
        txn.commit().unwrap();
        log.reset();

        assert_eq!(deleted, 4);
        assert_eq!(log.index(), 0);
        assert!(log
            .slice(storage.db_access().unwrap(), 0, 10)
            .unwrap()
            .is_empty());

        // New appends start over at offset zero.
        let offs = append_committed(&log, &storage, 99);
        assert_eq!(offs, 0);
    }
}
