//! Exact brute-force index adapter.
//!
//! Scans every live vector per query and sorts by distance. Slow beyond a
//! few tens of thousands of vectors but exact, and the reference behavior
//! the graph adapter is measured against in tests.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use roaring::RoaringTreemap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::Metric;
use crate::error::{Result, StorageError, VecStoreError};
use crate::types::RecordId;

use super::{query_count, AnnIndex, SENTINEL_DISTANCE, SENTINEL_ID};

/// Exact-scan nearest-neighbor index.
///
/// Vectors live in a `BTreeMap` keyed by record id, which keeps snapshot
/// output deterministic and makes removal a real deletion (unlike the
/// graph adapter's soft-delete).
#[derive(Debug)]
pub struct FlatIndex {
    dimension: usize,
    metric: Metric,
    vectors: BTreeMap<RecordId, Vec<f32>>,
}

/// On-disk snapshot blob (JSON).
#[derive(Serialize, Deserialize)]
struct FlatSnapshot {
    dimension: usize,
    entries: Vec<(RecordId, Vec<f32>)>,
}

impl FlatIndex {
    /// Creates an empty index for the given dimension and metric.
    pub fn new(dimension: usize, metric: Metric) -> Self {
        Self {
            dimension,
            metric,
            vectors: BTreeMap::new(),
        }
    }

    fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        match self.metric {
            Metric::L2 => a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum(),
            Metric::InnerProduct => 1.0 - a.iter().zip(b).map(|(x, y)| x * y).sum::<f32>(),
        }
    }
}

impl AnnIndex for FlatIndex {
    fn insert(&mut self, vector: &[f32], id: RecordId) -> Result<()> {
        if vector.len() != self.dimension {
            return Err(VecStoreError::index(format!(
                "vector dimension mismatch: expected {}, got {}",
                self.dimension,
                vector.len()
            )));
        }
        self.vectors.insert(id, vector.to_vec());
        Ok(())
    }

    fn remove(&mut self, ids: &[RecordId]) {
        for id in ids {
            self.vectors.remove(id);
        }
    }

    fn search(
        &self,
        queries: &[f32],
        k: usize,
        filter: Option<&RoaringTreemap>,
    ) -> Result<Vec<(RecordId, f32)>> {
        let n = query_count(queries, self.dimension)?;
        let mut out = Vec::with_capacity(n * k);

        for query in queries.chunks_exact(self.dimension) {
            let mut candidates: Vec<(RecordId, f32)> = self
                .vectors
                .iter()
                .filter(|(id, _)| filter.is_none_or(|allowed| allowed.contains(**id)))
                .map(|(id, vector)| (*id, self.distance(query, vector)))
                .collect();

            // Ties break on id so results are stable across runs
            candidates.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
            candidates.truncate(k);
            candidates.resize(k, (SENTINEL_ID, SENTINEL_DISTANCE));
            out.extend(candidates);
        }

        Ok(out)
    }

    fn save(&self, path: &Path) -> Result<()> {
        let snapshot = FlatSnapshot {
            dimension: self.dimension,
            entries: self
                .vectors
                .iter()
                .map(|(id, vector)| (*id, vector.clone()))
                .collect(),
        };
        let json = serde_json::to_string(&snapshot)?;
        fs::write(path, json)?;
        debug!(path = %path.display(), entries = self.vectors.len(), "saved flat index snapshot");
        Ok(())
    }

    fn load(&mut self, path: &Path) -> Result<()> {
        if !path.exists() {
            warn!(path = %path.display(), "flat index snapshot missing, starting empty");
            return Ok(());
        }
        let json = fs::read_to_string(path)?;
        let snapshot: FlatSnapshot = serde_json::from_str(&json)?;
        if snapshot.dimension != self.dimension {
            return Err(StorageError::corrupted(format!(
                "flat snapshot dimension {} does not match configured {}",
                snapshot.dimension, self.dimension
            ))
            .into());
        }
        self.vectors = snapshot.entries.into_iter().collect();
        debug!(path = %path.display(), entries = self.vectors.len(), "loaded flat index snapshot");
        Ok(())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn len(&self) -> usize {
        self.vectors.len()
    }
}
