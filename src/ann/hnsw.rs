//! HNSW index adapter backed by `hnsw_rs`.
//!
//! Wraps `hnsw_rs::Hnsw` with:
//! - Bidirectional record-id ↔ internal `usize` mapping
//! - Soft-delete via `HashSet` + filtered search (HNSW graphs do not
//!   support node removal, since removing nodes breaks proximity edges other
//!   nodes rely on)
//! - JSON snapshot of live `(id, vector)` pairs, with graph rebuild on
//!   load; deleted entries are compacted away by the snapshot cycle

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

use anndists::dist::{DistDot, DistL2};
use hnsw_rs::prelude::*;
use roaring::RoaringTreemap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::{HnswConfig, Metric};
use crate::error::{Result, StorageError, VecStoreError};
use crate::types::RecordId;

use super::{query_count, AnnIndex, SENTINEL_DISTANCE, SENTINEL_ID};

/// Search gate bridging the adapter's candidate rules to `FilterT`.
///
/// A candidate internal id passes when it is not soft-deleted and, if a
/// bitmap predicate was supplied, its external id is a member.
struct SearchGate<'a> {
    deleted: &'a HashSet<usize>,
    internal_to_id: &'a [RecordId],
    allowed: Option<&'a RoaringTreemap>,
}

impl FilterT for SearchGate<'_> {
    fn hnsw_filter(&self, id: &DataId) -> bool {
        if self.deleted.contains(id) {
            return false;
        }
        match self.allowed {
            Some(allowed) => self
                .internal_to_id
                .get(*id)
                .is_some_and(|ext| allowed.contains(*ext)),
            None => true,
        }
    }
}

/// The metric-specialized graph. `hnsw_rs` encodes the distance in the
/// type, so the two metrics are two concrete graph types.
enum Graph {
    L2(Hnsw<'static, f32, DistL2>),
    Dot(Hnsw<'static, f32, DistDot>),
}

impl Graph {
    fn new(metric: Metric, config: &HnswConfig) -> Self {
        match metric {
            Metric::L2 => Graph::L2(Hnsw::new(
                config.max_nb_connection,
                config.max_elements,
                config.max_layer,
                config.ef_construction,
                DistL2,
            )),
            Metric::InnerProduct => Graph::Dot(Hnsw::new(
                config.max_nb_connection,
                config.max_elements,
                config.max_layer,
                config.ef_construction,
                DistDot,
            )),
        }
    }

    fn insert(&self, data: (&[f32], usize)) {
        match self {
            Graph::L2(g) => g.insert(data),
            Graph::Dot(g) => g.insert(data),
        }
    }

    fn parallel_insert(&self, batch: &[(&Vec<f32>, usize)]) {
        match self {
            Graph::L2(g) => g.parallel_insert(batch),
            Graph::Dot(g) => g.parallel_insert(batch),
        }
    }

    fn search_filter(
        &self,
        query: &[f32],
        k: usize,
        ef_search: usize,
        gate: &SearchGate<'_>,
    ) -> Vec<Neighbour> {
        match self {
            Graph::L2(g) => g.search_filter(query, k, ef_search, Some(gate)),
            Graph::Dot(g) => g.search_filter(query, k, ef_search, Some(gate)),
        }
    }

    fn search(&self, query: &[f32], k: usize, ef_search: usize) -> Vec<Neighbour> {
        match self {
            Graph::L2(g) => g.search(query, k, ef_search),
            Graph::Dot(g) => g.search(query, k, ef_search),
        }
    }
}

/// Id mapping and soft-delete bookkeeping beside the graph.
#[derive(Default)]
struct GraphState {
    /// Forward map: record id → internal usize id (live entries only).
    id_to_internal: HashMap<RecordId, usize>,
    /// Reverse map: internal usize id → record id. Vec for O(1) lookup.
    internal_to_id: Vec<RecordId>,
    /// Vector payloads parallel to `internal_to_id`, kept for snapshots.
    vectors: Vec<Vec<f32>>,
    /// Soft-deleted internal ids, excluded from search.
    deleted: HashSet<usize>,
}

/// Approximate nearest-neighbor index backed by `hnsw_rs`.
pub struct HnswGraphIndex {
    graph: Graph,
    state: GraphState,
    dimension: usize,
    metric: Metric,
    config: HnswConfig,
}

/// On-disk snapshot blob (JSON). Only live entries are persisted; the
/// graph is rebuilt from them on load.
#[derive(Serialize, Deserialize)]
struct HnswSnapshot {
    dimension: usize,
    entries: Vec<(RecordId, Vec<f32>)>,
}

impl HnswGraphIndex {
    /// Creates a new empty index.
    pub fn new(dimension: usize, metric: Metric, config: &HnswConfig) -> Self {
        Self {
            graph: Graph::new(metric, config),
            state: GraphState::default(),
            dimension,
            metric,
            config: config.clone(),
        }
    }

    fn live_entries(&self) -> Vec<(RecordId, Vec<f32>)> {
        let mut entries: Vec<(RecordId, Vec<f32>)> = self
            .state
            .id_to_internal
            .iter()
            .map(|(id, &internal)| (*id, self.state.vectors[internal].clone()))
            .collect();
        entries.sort_by_key(|(id, _)| *id);
        entries
    }

    fn rebuild(&mut self, entries: Vec<(RecordId, Vec<f32>)>) {
        self.graph = Graph::new(self.metric, &self.config);
        self.state = GraphState::default();

        let batch: Vec<(&Vec<f32>, usize)> = entries
            .iter()
            .enumerate()
            .map(|(internal, (_, vector))| (vector, internal))
            .collect();
        self.graph.parallel_insert(&batch);

        for (internal, (id, vector)) in entries.into_iter().enumerate() {
            self.state.id_to_internal.insert(id, internal);
            self.state.internal_to_id.push(id);
            self.state.vectors.push(vector);
        }
    }
}

impl AnnIndex for HnswGraphIndex {
    fn insert(&mut self, vector: &[f32], id: RecordId) -> Result<()> {
        if vector.len() != self.dimension {
            return Err(VecStoreError::index(format!(
                "vector dimension mismatch: expected {}, got {}",
                self.dimension,
                vector.len()
            )));
        }

        // A live prior mapping for this id becomes stale: soft-delete it
        // so the new vector is the only one searchable under the id.
        if let Some(old_internal) = self.state.id_to_internal.remove(&id) {
            self.state.deleted.insert(old_internal);
        }

        let internal = self.state.internal_to_id.len();
        self.state.id_to_internal.insert(id, internal);
        self.state.internal_to_id.push(id);
        self.state.vectors.push(vector.to_vec());

        self.graph.insert((vector, internal));
        Ok(())
    }

    fn remove(&mut self, ids: &[RecordId]) {
        for id in ids {
            if let Some(internal) = self.state.id_to_internal.remove(id) {
                self.state.deleted.insert(internal);
            }
        }
    }

    fn search(
        &self,
        queries: &[f32],
        k: usize,
        filter: Option<&RoaringTreemap>,
    ) -> Result<Vec<(RecordId, f32)>> {
        let n = query_count(queries, self.dimension)?;
        let ef_search = self.config.ef_search.max(k);
        let mut out = Vec::with_capacity(n * k);

        for query in queries.chunks_exact(self.dimension) {
            let neighbours = if filter.is_none() && self.state.deleted.is_empty() {
                self.graph.search(query, k, ef_search)
            } else {
                let gate = SearchGate {
                    deleted: &self.state.deleted,
                    internal_to_id: &self.state.internal_to_id,
                    allowed: filter,
                };
                self.graph.search_filter(query, k, ef_search, &gate)
            };

            let mut slots: Vec<(RecordId, f32)> = neighbours
                .into_iter()
                .filter_map(|n| {
                    self.state
                        .internal_to_id
                        .get(n.d_id)
                        .map(|&id| (id, n.distance))
                })
                .collect();
            slots.truncate(k);
            slots.resize(k, (SENTINEL_ID, SENTINEL_DISTANCE));
            out.extend(slots);
        }

        Ok(out)
    }

    fn save(&self, path: &Path) -> Result<()> {
        let snapshot = HnswSnapshot {
            dimension: self.dimension,
            entries: self.live_entries(),
        };
        let json = serde_json::to_string(&snapshot)?;
        fs::write(path, json)?;
        debug!(path = %path.display(), entries = snapshot.entries.len(), "saved hnsw index snapshot");
        Ok(())
    }

    fn load(&mut self, path: &Path) -> Result<()> {
        if !path.exists() {
            warn!(path = %path.display(), "hnsw index snapshot missing, starting empty");
            return Ok(());
        }
        let json = fs::read_to_string(path)?;
        let snapshot: HnswSnapshot = serde_json::from_str(&json)?;
        if snapshot.dimension != self.dimension {
            return Err(StorageError::corrupted(format!(
                "hnsw snapshot dimension {} does not match configured {}",
                snapshot.dimension, self.dimension
            ))
            .into());
        }
        let entries = snapshot.entries;
        debug!(path = %path.display(), entries = entries.len(), "rebuilding hnsw graph from snapshot");
        self.rebuild(entries);
        Ok(())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn len(&self) -> usize {
        self.state.id_to_internal.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> HnswConfig {
        HnswConfig {
            max_nb_connection: 16,
            ef_construction: 100,
            ef_search: 50,
            max_layer: 8,
            max_elements: 1000,
        }
    }

    /// Deterministic embedding from a seed; close seeds give similar vectors.
    fn make_vector(seed: u64, dim: usize) -> Vec<f32> {
        (0..dim)
            .map(|i| (seed as f32 * 0.1 + i as f32 * 0.01).sin())
            .collect()
    }

    fn populated(dim: usize, count: u64) -> HnswGraphIndex {
        let mut index = HnswGraphIndex::new(dim, Metric::L2, &test_config());
        for id in 0..count {
            index.insert(&make_vector(id, dim), id).unwrap();
        }
        index
    }

    #[test]
    fn test_new_index_is_empty() {
        let index = HnswGraphIndex::new(8, Metric::L2, &test_config());
        assert!(index.is_empty());

        let hits = index.search(&make_vector(1, 8), 3, None).unwrap();
        assert_eq!(hits.len(), 3);
        assert!(hits.iter().all(|(id, _)| *id == SENTINEL_ID));
    }

    #[test]
    fn test_insert_and_search() {
        let index = populated(8, 10);
        assert_eq!(index.len(), 10);

        let hits = index.search(&make_vector(5, 8), 3, None).unwrap();
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].0, 5);
        for w in hits.windows(2) {
            assert!(w[0].1 <= w[1].1, "results not sorted by distance");
        }
    }

    #[test]
    fn test_remove_excludes_from_search() {
        let mut index = populated(8, 5);
        index.remove(&[0]);
        assert_eq!(index.len(), 4);

        let hits = index.search(&make_vector(0, 8), 10, None).unwrap();
        assert!(hits.iter().all(|(id, _)| *id != 0));
    }

    #[test]
    fn test_remove_is_noop_for_non_members() {
        let mut index = populated(8, 3);
        index.remove(&[99]);
        assert_eq!(index.len(), 3);
    }

    #[test]
    fn test_reinsert_supersedes_old_vector() {
        let dim = 8;
        let mut index = populated(dim, 4);

        // Replace id 1's vector with something far from its original
        index.insert(&make_vector(40, dim), 1).unwrap();
        assert_eq!(index.len(), 4);

        let hits = index.search(&make_vector(40, dim), 1, None).unwrap();
        assert_eq!(hits[0].0, 1);
        assert!(hits[0].1 < 1e-5);
    }

    #[test]
    fn test_bitmap_filter_restricts_results() {
        let index = populated(8, 10);

        let mut allowed = RoaringTreemap::new();
        allowed.insert(7);

        let hits = index.search(&make_vector(0, 8), 5, Some(&allowed)).unwrap();
        let live: Vec<RecordId> = hits
            .iter()
            .map(|(id, _)| *id)
            .filter(|id| *id != SENTINEL_ID)
            .collect();
        assert_eq!(live, vec![7]);
    }

    #[test]
    fn test_search_pads_with_sentinel() {
        let index = populated(8, 2);
        let hits = index.search(&make_vector(0, 8), 5, None).unwrap();
        assert_eq!(hits.len(), 5);
        assert_eq!(hits[3].0, SENTINEL_ID);
        assert_eq!(hits[4].0, SENTINEL_ID);
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        let mut index = HnswGraphIndex::new(8, Metric::L2, &test_config());
        let result = index.insert(&make_vector(1, 4), 1);
        assert!(result.is_err());
        assert!(result.unwrap_err().is_index());
    }

    #[test]
    fn test_save_and_load_rebuilds_graph() {
        let mut index = populated(8, 20);
        index.remove(&[3, 4]);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hnsw.index");
        index.save(&path).unwrap();

        let mut restored = HnswGraphIndex::new(8, Metric::L2, &test_config());
        restored.load(&path).unwrap();
        // Soft-deleted entries are compacted away by the snapshot cycle
        assert_eq!(restored.len(), 18);

        let hits = restored.search(&make_vector(10, 8), 1, None).unwrap();
        assert_eq!(hits[0].0, 10);
        let hits = restored.search(&make_vector(3, 8), 18, None).unwrap();
        assert!(hits.iter().all(|(id, _)| *id != 3));
    }

    #[test]
    fn test_load_missing_snapshot_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let mut index = HnswGraphIndex::new(8, Metric::L2, &test_config());
        index.load(&dir.path().join("nope.index")).unwrap();
        assert!(index.is_empty());
    }
}
