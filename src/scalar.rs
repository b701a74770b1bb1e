//! Scalar attribute store: one full record payload per id.
//!
//! The engine only depends on the [`ScalarStore`] get/put contract; the
//! production implementation is [`RedbScalarStore`], backed by
//! [redb](https://docs.rs/redb), a pure Rust embedded key-value store with
//! ACID transactions. Values are the record's JSON document form, the
//! same shape the WAL carries.

use std::path::{Path, PathBuf};

use redb::{Database, TableDefinition};
use tracing::{debug, instrument};

use crate::error::Result;
use crate::types::{Record, RecordId};

const RECORDS_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("records");

/// Get/put contract for the scalar attribute store.
///
/// Absence is `Ok(None)`, never an error. Implementations must be
/// `Send + Sync`; the engine serializes writers above this layer.
pub trait ScalarStore: Send + Sync {
    /// Retrieves the record stored under `id`.
    fn get(&self, id: RecordId) -> Result<Option<Record>>;

    /// Overwrites the record stored under `id` (last-writer-wins).
    fn put(&self, id: RecordId, record: &Record) -> Result<()>;
}

/// redb-backed scalar store.
///
/// Each call opens and commits its own transaction; redb's shadow paging
/// keeps the file consistent across crashes without any recovery step of
/// its own.
#[derive(Debug)]
pub struct RedbScalarStore {
    db: Database,
    path: PathBuf,
}

impl RedbScalarStore {
    /// Opens or creates the store at `path`.
    ///
    /// Failure is an error the caller must treat as fatal.
    #[instrument(fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let db = Database::create(path)?;

        // Ensure the table exists so later reads never race its creation
        let txn = db.begin_write()?;
        txn.open_table(RECORDS_TABLE)?;
        txn.commit()?;

        debug!("opened scalar store");
        Ok(Self {
            db,
            path: path.to_path_buf(),
        })
    }

    /// Path to the backing database file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ScalarStore for RedbScalarStore {
    fn get(&self, id: RecordId) -> Result<Option<Record>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(RECORDS_TABLE)?;
        match table.get(id)? {
            Some(bytes) => {
                let record: Record = serde_json::from_slice(bytes.value())?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    fn put(&self, id: RecordId, record: &Record) -> Result<()> {
        let bytes = serde_json::to_vec(record)?;
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(RECORDS_TABLE)?;
            table.insert(id, bytes.as_slice())?;
        }
        txn.commit()?;
        debug!(id, "stored scalar record");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_get_absent_is_none() {
        let dir = tempdir().unwrap();
        let store = RedbScalarStore::open(dir.path().join("scalar.redb")).unwrap();
        assert!(store.get(42).unwrap().is_none());
    }

    #[test]
    fn test_put_then_get_roundtrip() {
        let dir = tempdir().unwrap();
        let store = RedbScalarStore::open(dir.path().join("scalar.redb")).unwrap();

        let record = Record::new(1, vec![1.0, 0.0]).with_attr("tag", 5i64);
        store.put(1, &record).unwrap();

        let loaded = store.get(1).unwrap().unwrap();
        assert_eq!(loaded, record);
    }

    #[test]
    fn test_put_overwrites_full_record() {
        let dir = tempdir().unwrap();
        let store = RedbScalarStore::open(dir.path().join("scalar.redb")).unwrap();

        store
            .put(1, &Record::new(1, vec![1.0]).with_attr("tag", 5i64))
            .unwrap();
        let replacement = Record::new(1, vec![2.0]).with_attr("year", 2024i64);
        store.put(1, &replacement).unwrap();

        let loaded = store.get(1).unwrap().unwrap();
        assert_eq!(loaded, replacement);
        // Old attribute set is gone, not merged
        assert!(loaded.int_attr("tag").is_none());
    }

    #[test]
    fn test_records_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("scalar.redb");
        {
            let store = RedbScalarStore::open(&path).unwrap();
            store.put(9, &Record::new(9, vec![0.5, 0.5])).unwrap();
        }
        let store = RedbScalarStore::open(&path).unwrap();
        assert!(store.get(9).unwrap().is_some());
    }
}
