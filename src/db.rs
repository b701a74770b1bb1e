//! VectorDb: the consistency and recovery orchestrator.
//!
//! [`VectorDb`] coordinates four collaborators around every write:
//!
//! 1. the write-ahead log (appended and flushed first),
//! 2. the family's ANN index adapter,
//! 3. the family's bitmap filter index,
//! 4. the scalar record store (overwritten last).
//!
//! Crash recovery replays the WAL tail past the snapshot watermark,
//! re-driving the exact code path live writes take. The replayed path is
//! read-free and idempotent, so it converges to the same final state even
//! over a crash-interrupted prior attempt or a snapshot that lags the
//! scalar store.
//!
//! # Concurrency
//!
//! The engine is single-writer per handle: all mutation and snapshotting
//! take `&mut self`, reads take `&self`, and the borrow checker enforces
//! the quiesce barrier between them. Wrap the handle in a reader/writer
//! lock to share it across threads.

use std::fs;
use std::path::Path;

use roaring::RoaringTreemap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::ann::SENTINEL_ID;
use crate::config::Config;
use crate::error::{Result, ValidationError};
use crate::filter::FilterSpec;
use crate::registry::IndexRegistry;
use crate::scalar::{RedbScalarStore, ScalarStore};
use crate::types::{IndexFamily, Record, RecordId, SearchHits};
use crate::wal::Wal;

/// WAL operation tag for upserts.
pub const OP_UPSERT: &str = "upsert";

#[derive(Serialize)]
struct UpsertPayloadRef<'a> {
    family: IndexFamily,
    record: &'a Record,
}

#[derive(Deserialize)]
struct UpsertPayload {
    family: IndexFamily,
    record: Record,
}

/// The embeddable vector database handle.
///
/// Owns the scalar store, the index registry, and the WAL. Create one
/// with [`VectorDb::open`]; recovery (snapshot load plus WAL replay) runs
/// before `open` returns, so a handle is always fully consistent.
pub struct VectorDb {
    scalar: Box<dyn ScalarStore>,
    registry: IndexRegistry,
    wal: Wal,
    config: Config,
}

impl VectorDb {
    /// Opens or creates a database rooted at `dir`.
    ///
    /// Initializes both index families, seeds the snapshot watermark,
    /// loads per-family snapshots, and replays the WAL tail. A fresh
    /// directory starts empty.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or if the WAL or
    /// scalar store cannot be opened: in that case the embedding process
    /// must not proceed, since the durability contract cannot be honored.
    #[instrument(skip(config), fields(dir = %dir.as_ref().display()))]
    pub fn open(dir: impl AsRef<Path>, config: Config) -> Result<Self> {
        config.validate()?;
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;

        info!("opening VectorDb");

        let scalar = RedbScalarStore::open(dir.join("scalar.redb"))?;

        let mut registry = IndexRegistry::new();
        for family in IndexFamily::ALL {
            registry.init(family, &config)?;
        }

        let mut wal = Wal::open(
            &dir.join("wal.log"),
            &dir.join("snapshot.maxlogid"),
            &dir.join("snapshot"),
        )?;
        wal.load_snapshot(&mut registry)?;

        let mut db = Self {
            scalar: Box::new(scalar),
            registry,
            wal,
            config,
        };
        db.reload()?;

        info!("VectorDb opened");
        Ok(db)
    }

    /// Inserts or fully replaces the record under its id.
    ///
    /// Ids are caller-assigned; `u64::MAX` is reserved (it marks unfilled
    /// search result slots) and rejected.
    ///
    /// The operation is logged to the WAL (and flushed) before any store
    /// is mutated; validation failures reject the write before either.
    /// A re-upsert replaces the vector, moves filter memberships to the
    /// new attribute values, retracts memberships for integer fields the
    /// new record no longer carries, and overwrites the stored payload.
    pub fn upsert(&mut self, record: Record, family: IndexFamily) -> Result<()> {
        self.validate_upsert(&record, family)?;

        let payload = serde_json::to_string(&UpsertPayloadRef {
            family,
            record: &record,
        })?;
        self.wal.append(OP_UPSERT, &payload)?;

        self.apply_upsert(record, family)
    }

    /// Searches `family` for the `k` nearest neighbors of each query
    /// vector in the flat `query` buffer.
    ///
    /// When `filter` is given it is resolved against the family's filter
    /// index and only matching ids are candidates. An unknown filter
    /// field or value matches nothing (the predicate bitmap is empty), it
    /// is never an error. Sentinel slots are stripped from the result.
    pub fn search(
        &self,
        query: &[f32],
        k: usize,
        family: IndexFamily,
        filter: Option<&FilterSpec>,
    ) -> Result<SearchHits> {
        if k == 0 {
            return Err(ValidationError::invalid_field("k", "must be greater than 0").into());
        }
        let slot = self
            .registry
            .get(family)
            .ok_or_else(|| ValidationError::unknown_family(family))?;

        let bitmap = filter.map(|spec| {
            let mut out = RoaringTreemap::new();
            slot.filters
                .collect_bitmap(&spec.field, spec.op, spec.value, &mut out);
            out
        });

        let raw = slot.ann.search(query, k, bitmap.as_ref())?;

        let mut hits = SearchHits::default();
        for (id, distance) in raw {
            if id != SENTINEL_ID {
                hits.ids.push(id);
                hits.distances.push(distance);
            }
        }
        Ok(hits)
    }

    /// Looks up the record stored under `id`. Absence is `Ok(None)`.
    pub fn query(&self, id: RecordId) -> Result<Option<Record>> {
        self.scalar.get(id)
    }

    /// Replays WAL entries past the snapshot watermark.
    ///
    /// Called automatically by [`VectorDb::open`]; calling it again is a
    /// no-op unless new entries were appended since. Each upsert entry
    /// re-drives the live upsert path, which is idempotent. Entries with
    /// unrecognized operation tags are read and ignored.
    pub fn reload(&mut self) -> Result<()> {
        let mut replayed = 0u64;
        while let Some(entry) = self.wal.read_next()? {
            match entry.op.as_str() {
                OP_UPSERT => {
                    let payload: UpsertPayload = match serde_json::from_str(&entry.payload) {
                        Ok(payload) => payload,
                        Err(e) => {
                            warn!(log_id = entry.log_id, error = %e, "skipping undecodable WAL payload");
                            continue;
                        }
                    };
                    self.apply_upsert(payload.record, payload.family)?;
                    replayed += 1;
                }
                other => {
                    debug!(log_id = entry.log_id, op = other, "ignoring unrecognized WAL operation");
                }
            }
        }
        if replayed > 0 {
            info!(replayed, "WAL replay complete");
        }
        Ok(())
    }

    /// Persists every index family and advances the snapshot watermark,
    /// making the WAL prefix up to the current max log id redundant.
    pub fn take_snapshot(&mut self) -> Result<()> {
        self.wal.take_snapshot(&self.registry)
    }

    /// The configuration this database was opened with.
    pub fn config(&self) -> &Config {
        &self.config
    }

    fn validate_upsert(&self, record: &Record, family: IndexFamily) -> Result<()> {
        if self.registry.get(family).is_none() {
            return Err(ValidationError::unknown_family(family).into());
        }
        // u64::MAX marks unfilled result slots, so a record stored under
        // it would be stripped from every search result
        if record.id == SENTINEL_ID {
            return Err(ValidationError::invalid_field("id", "reserved sentinel value").into());
        }
        if record.vector.len() != self.config.dimension {
            return Err(
                ValidationError::dimension_mismatch(self.config.dimension, record.vector.len())
                    .into(),
            );
        }
        Ok(())
    }

    /// The shared mutation path for live upserts and WAL replay.
    ///
    /// Deliberately read-free: both index updates supersede whatever prior
    /// state the id had (a re-insert shadows the old vector; filter
    /// memberships are cleared and re-added), so re-applying the same
    /// entry, or applying it over state a crash left partially newer,
    /// converges to the same result.
    fn apply_upsert(&mut self, record: Record, family: IndexFamily) -> Result<()> {
        let id = record.id;

        let slot = self
            .registry
            .get_mut(family)
            .ok_or_else(|| ValidationError::unknown_family(family))?;

        slot.ann.insert(&record.vector, id)?;

        slot.filters.retract_id(id);
        for (field, value) in record.int_attrs() {
            slot.filters.add_int_field(field, value, id);
        }

        self.scalar.put(id, &record)?;
        debug!(id, %family, "upsert applied");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::FilterOp;
    use tempfile::tempdir;

    fn open_db(dir: &Path) -> VectorDb {
        VectorDb::open(dir, Config::with_dimension(2)).unwrap()
    }

    #[test]
    fn test_open_fresh_directory() {
        let dir = tempdir().unwrap();
        let db = open_db(dir.path());
        assert_eq!(db.config().dimension, 2);
        assert!(db.query(1).unwrap().is_none());
    }

    #[test]
    fn test_upsert_then_query_and_search() {
        let dir = tempdir().unwrap();
        let mut db = open_db(dir.path());

        let record = Record::new(1, vec![1.0, 0.0]).with_attr("tag", 5i64);
        db.upsert(record.clone(), IndexFamily::Flat).unwrap();

        assert_eq!(db.query(1).unwrap().unwrap(), record);

        let hits = db.search(&[1.0, 0.0], 1, IndexFamily::Flat, None).unwrap();
        assert_eq!(hits.ids, vec![1]);
        assert!(hits.distances[0] < 1e-6);
    }

    #[test]
    fn test_unknown_family_rejected_before_any_mutation() {
        let dir = tempdir().unwrap();
        let mut db = open_db(dir.path());

        let err = db
            .upsert(Record::new(1, vec![1.0, 0.0]), IndexFamily::Unknown)
            .unwrap_err();
        assert!(err.is_validation());

        // Nothing was logged or stored
        assert_eq!(db.wal.max_log_id(), 0);
        assert!(db.query(1).unwrap().is_none());
    }

    #[test]
    fn test_dimension_mismatch_rejected_before_any_mutation() {
        let dir = tempdir().unwrap();
        let mut db = open_db(dir.path());

        let err = db
            .upsert(Record::new(1, vec![1.0, 0.0, 0.0]), IndexFamily::Flat)
            .unwrap_err();
        assert!(err.is_validation());
        assert_eq!(db.wal.max_log_id(), 0);
    }

    #[test]
    fn test_sentinel_id_rejected_before_any_mutation() {
        let dir = tempdir().unwrap();
        let mut db = open_db(dir.path());

        // u64::MAX would be indistinguishable from result-slot padding
        let err = db
            .upsert(Record::new(u64::MAX, vec![1.0, 0.0]), IndexFamily::Flat)
            .unwrap_err();
        assert!(err.is_validation());
        assert_eq!(db.wal.max_log_id(), 0);
        assert!(db.query(u64::MAX).unwrap().is_none());
    }

    #[test]
    fn test_wal_append_failure_blocks_mutation() {
        use crate::error::{StorageError, VecStoreError};

        let dir = tempdir().unwrap();
        let mut db = open_db(dir.path());

        // Swap in a read-only handle so the next append fails at write time
        let readonly = std::fs::File::open(dir.path().join("wal.log")).unwrap();
        db.wal.swap_writer_for_test(readonly);

        let err = db
            .upsert(Record::new(1, vec![1.0, 0.0]), IndexFamily::Flat)
            .unwrap_err();
        assert!(matches!(
            err,
            VecStoreError::Storage(StorageError::Wal(_))
        ));

        // The failed write left no trace in any store
        assert!(db.query(1).unwrap().is_none());
        let hits = db.search(&[1.0, 0.0], 1, IndexFamily::Flat, None).unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn test_search_k_zero_rejected() {
        let dir = tempdir().unwrap();
        let db = open_db(dir.path());
        assert!(db
            .search(&[1.0, 0.0], 0, IndexFamily::Flat, None)
            .unwrap_err()
            .is_validation());
    }

    #[test]
    fn test_search_unknown_family_rejected() {
        let dir = tempdir().unwrap();
        let db = open_db(dir.path());
        assert!(db
            .search(&[1.0, 0.0], 1, IndexFamily::Unknown, None)
            .unwrap_err()
            .is_validation());
    }

    #[test]
    fn test_unknown_filter_field_matches_nothing() {
        let dir = tempdir().unwrap();
        let mut db = open_db(dir.path());
        db.upsert(Record::new(1, vec![1.0, 0.0]), IndexFamily::Flat)
            .unwrap();

        let spec = FilterSpec::equal("missing", 1);
        let hits = db
            .search(&[1.0, 0.0], 1, IndexFamily::Flat, Some(&spec))
            .unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn test_upsert_retracts_dropped_int_fields() {
        let dir = tempdir().unwrap();
        let mut db = open_db(dir.path());

        db.upsert(
            Record::new(1, vec![1.0, 0.0]).with_attr("tag", 5i64),
            IndexFamily::Flat,
        )
        .unwrap();
        // Replacement record has no "tag" attribute at all
        db.upsert(
            Record::new(1, vec![1.0, 0.0]).with_attr("year", 2024i64),
            IndexFamily::Flat,
        )
        .unwrap();

        let slot = db.registry.get(IndexFamily::Flat).unwrap();
        let mut old = RoaringTreemap::new();
        slot.filters
            .collect_bitmap("tag", FilterOp::Equal, 5, &mut old);
        assert!(!old.contains(1), "dropped field must not keep membership");

        let mut new = RoaringTreemap::new();
        slot.filters
            .collect_bitmap("year", FilterOp::Equal, 2024, &mut new);
        assert!(new.contains(1));
    }

    #[test]
    fn test_upsert_families_are_isolated() {
        let dir = tempdir().unwrap();
        let mut db = open_db(dir.path());

        db.upsert(Record::new(1, vec![1.0, 0.0]), IndexFamily::Flat)
            .unwrap();

        let hits = db.search(&[1.0, 0.0], 1, IndexFamily::Hnsw, None).unwrap();
        assert!(hits.is_empty(), "record must only live in its own family");
    }
}
