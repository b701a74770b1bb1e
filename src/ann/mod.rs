//! ANN index adapters for nearest-neighbor search.
//!
//! This module provides a trait-based abstraction over vector indexes so
//! the orchestrator and registry never depend on a concrete search
//! algorithm. Two adapters exist:
//!
//! - [`FlatIndex`]: exact brute-force scan
//! - [`HnswGraphIndex`]: approximate graph search backed by [`hnsw_rs`]
//!
//! Adapters echo caller-assigned u64 ids verbatim and report distances in
//! ascending order (the inner-product metric is folded into `1 - dot` so
//! ascending always means best-first). Result slots a query could not fill
//! carry [`SENTINEL_ID`]; the orchestrator strips them before anything is
//! exposed externally.

mod flat;
mod hnsw;

pub use flat::FlatIndex;
pub use hnsw::HnswGraphIndex;

use std::path::Path;

use roaring::RoaringTreemap;

use crate::error::Result;
use crate::types::RecordId;

/// Reserved id marking an unfilled result slot.
///
/// Mirrors the `-1` padding of exact-k search APIs; never a valid record id.
pub const SENTINEL_ID: RecordId = RecordId::MAX;

/// Distance reported for sentinel slots.
pub const SENTINEL_DISTANCE: f32 = f32::MAX;

/// Contract every nearest-neighbor index adapter fulfills.
///
/// Implementations must be `Send + Sync` so the database handle can be
/// shared across threads behind a caller-provided lock. All mutation takes
/// `&mut self`; the borrow checker is the single-writer guard.
pub trait AnnIndex: Send + Sync {
    /// Associates `id` with `vector`. Ids are caller-assigned.
    ///
    /// Inserting an id that is already live replaces its previous vector.
    fn insert(&mut self, vector: &[f32], id: RecordId) -> Result<()>;

    /// Removes the given ids. A no-op for ids not in the index.
    fn remove(&mut self, ids: &[RecordId]);

    /// Searches for the `k` nearest neighbors of each query vector.
    ///
    /// `queries` is a flat slice holding one or more dimension-length
    /// vectors. Returns exactly `k` slots per query, concatenated in query
    /// order, ascending by distance, padded with
    /// ([`SENTINEL_ID`], [`SENTINEL_DISTANCE`]) where fewer than `k`
    /// candidates matched. When `filter` is given, only ids it contains
    /// are candidates.
    fn search(
        &self,
        queries: &[f32],
        k: usize,
        filter: Option<&RoaringTreemap>,
    ) -> Result<Vec<(RecordId, f32)>>;

    /// Serializes full index state to the named blob, overwriting it.
    fn save(&self, path: &Path) -> Result<()>;

    /// Replaces index state from the named blob.
    ///
    /// A missing blob is non-fatal: the index starts empty and a warning
    /// is raised.
    fn load(&mut self, path: &Path) -> Result<()>;

    /// The vector dimension this index was configured with.
    fn dimension(&self) -> usize;

    /// Number of live (searchable) vectors.
    fn len(&self) -> usize;

    /// Returns true if the index has no live vectors.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Validates a flat query buffer and returns the number of query vectors.
pub(crate) fn query_count(queries: &[f32], dimension: usize) -> Result<usize> {
    if queries.is_empty() || queries.len() % dimension != 0 {
        return Err(crate::error::VecStoreError::index(format!(
            "query buffer length {} is not a positive multiple of dimension {}",
            queries.len(),
            dimension
        )));
    }
    Ok(queries.len() / dimension)
}
