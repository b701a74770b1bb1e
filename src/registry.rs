//! Index registry: one `{ANN adapter, filter index}` pair per family.
//!
//! The registry is an explicit object constructed once by the orchestrator
//! and passed by reference wherever index access is needed; there is no
//! hidden global. Dispatch over the closed family set is a tagged variant
//! ([`AnnBackend`]) pattern-matched for delegation, so each family carries
//! its strongly-typed adapter.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use roaring::RoaringTreemap;
use tracing::{error, info};

use crate::ann::{AnnIndex, FlatIndex, HnswGraphIndex};
use crate::config::Config;
use crate::error::{Result, ValidationError};
use crate::filter::FilterIndex;
use crate::types::{IndexFamily, RecordId};

/// Strongly-typed adapter per family, dispatched by pattern match.
pub enum AnnBackend {
    /// Exact brute-force scan.
    Flat(FlatIndex),
    /// Graph-based approximate search.
    Hnsw(HnswGraphIndex),
}

impl AnnBackend {
    fn as_index(&self) -> &dyn AnnIndex {
        match self {
            AnnBackend::Flat(index) => index,
            AnnBackend::Hnsw(index) => index,
        }
    }

    fn as_index_mut(&mut self) -> &mut dyn AnnIndex {
        match self {
            AnnBackend::Flat(index) => index,
            AnnBackend::Hnsw(index) => index,
        }
    }

    /// Associates `id` with `vector` in the family's adapter.
    pub fn insert(&mut self, vector: &[f32], id: RecordId) -> Result<()> {
        self.as_index_mut().insert(vector, id)
    }

    /// Removes the given ids; a no-op for non-members.
    pub fn remove(&mut self, ids: &[RecordId]) {
        self.as_index_mut().remove(ids)
    }

    /// Predicate-filtered k-nearest search (see [`AnnIndex::search`]).
    pub fn search(
        &self,
        queries: &[f32],
        k: usize,
        filter: Option<&RoaringTreemap>,
    ) -> Result<Vec<(RecordId, f32)>> {
        self.as_index().search(queries, k, filter)
    }

    /// Number of live vectors.
    pub fn len(&self) -> usize {
        self.as_index().len()
    }

    /// Returns true if the adapter holds no live vectors.
    pub fn is_empty(&self) -> bool {
        self.as_index().is_empty()
    }
}

/// One initialized family: its ANN adapter plus its filter index.
pub struct FamilySlot {
    /// The family's nearest-neighbor adapter.
    pub ann: AnnBackend,
    /// The family's bitmap filter index.
    pub filters: FilterIndex,
}

/// Owns every initialized index family for the process lifetime.
#[derive(Default)]
pub struct IndexRegistry {
    families: BTreeMap<IndexFamily, FamilySlot>,
}

impl IndexRegistry {
    /// Creates an empty registry with no families initialized.
    pub fn new() -> Self {
        Self::default()
    }

    /// Initializes one family from the configuration.
    ///
    /// Re-initializing an already-initialized family is rejected: logged,
    /// an error returned, no state changed. The `Unknown` family can never
    /// be initialized.
    pub fn init(&mut self, family: IndexFamily, config: &Config) -> Result<()> {
        if self.families.contains_key(&family) {
            error!(%family, "index family has already been initialized");
            return Err(ValidationError::family_already_initialized(family).into());
        }

        let ann = match family {
            IndexFamily::Flat => AnnBackend::Flat(FlatIndex::new(config.dimension, config.metric)),
            IndexFamily::Hnsw => AnnBackend::Hnsw(HnswGraphIndex::new(
                config.dimension,
                config.metric,
                &config.hnsw,
            )),
            IndexFamily::Unknown => {
                error!("refusing to initialize the unknown index family");
                return Err(ValidationError::unknown_family(family).into());
            }
        };

        info!(%family, dimension = config.dimension, "initialized index family");
        self.families.insert(
            family,
            FamilySlot {
                ann,
                filters: FilterIndex::new(),
            },
        );
        Ok(())
    }

    /// Returns the slot for a family, or `None` when the family is
    /// unknown or was never initialized.
    pub fn get(&self, family: IndexFamily) -> Option<&FamilySlot> {
        self.families.get(&family)
    }

    /// Mutable access to a family's slot.
    pub fn get_mut(&mut self, family: IndexFamily) -> Option<&mut FamilySlot> {
        self.families.get_mut(&family)
    }

    /// Initialized families, in registry order.
    pub fn families(&self) -> impl Iterator<Item = IndexFamily> + '_ {
        self.families.keys().copied()
    }

    /// Persists every family to its deterministic paths under `root`.
    pub fn save_all(&self, root: &Path) -> Result<()> {
        for (family, slot) in &self.families {
            let (index_path, filter_path) = snapshot_paths(root, *family);
            match &slot.ann {
                AnnBackend::Flat(index) => index.save(&index_path)?,
                AnnBackend::Hnsw(index) => index.save(&index_path)?,
            }
            slot.filters.save_to(&filter_path)?;
        }
        Ok(())
    }

    /// Loads every family's state from its deterministic paths under
    /// `root`. Missing files are non-fatal: the family starts empty.
    pub fn load_all(&mut self, root: &Path) -> Result<()> {
        for (family, slot) in &mut self.families {
            let (index_path, filter_path) = snapshot_paths(root, *family);
            match &mut slot.ann {
                AnnBackend::Flat(index) => index.load(&index_path)?,
                AnnBackend::Hnsw(index) => index.load(&index_path)?,
            }
            if filter_path.exists() {
                slot.filters = FilterIndex::load_from(&filter_path)?;
            }
        }
        Ok(())
    }
}

/// Deterministic snapshot paths for a family: `{root}.{family}.index`
/// (ANN blob) and `{root}.{family}.filter` (filter index lines).
pub(crate) fn snapshot_paths(root: &Path, family: IndexFamily) -> (PathBuf, PathBuf) {
    let base = root.as_os_str().to_os_string();
    let mut index = base.clone();
    index.push(format!(".{}.index", family.file_tag()));
    let mut filter = base;
    filter.push(format!(".{}.filter", family.file_tag()));
    (PathBuf::from(index), PathBuf::from(filter))
}
