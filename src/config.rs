//! Configuration types for VecStore.
//!
//! The [`Config`] struct controls database behavior: the vector dimension
//! shared by all index families, the distance metric, and HNSW tuning
//! parameters.
//!
//! # Example
//! ```rust
//! use vecstore::{Config, Metric};
//!
//! // Use defaults (L2 metric, 128 dimensions)
//! let config = Config::default();
//!
//! // Customize
//! let config = Config {
//!     dimension: 768,
//!     metric: Metric::InnerProduct,
//!     ..Default::default()
//! };
//! ```

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Database configuration options.
///
/// All fields have sensible defaults. Use struct update syntax to override
/// specific settings:
///
/// ```rust
/// use vecstore::Config;
///
/// let config = Config {
///     dimension: 384,
///     ..Default::default()
/// };
/// ```
#[derive(Clone, Debug)]
pub struct Config {
    /// Vector dimension. Every vector inserted into any index family must
    /// have exactly this many components.
    pub dimension: usize,

    /// Distance metric used by all index families.
    pub metric: Metric,

    /// HNSW tuning parameters for the graph-based family.
    pub hnsw: HnswConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dimension: 128,
            metric: Metric::L2,
            hnsw: HnswConfig::default(),
        }
    }
}

impl Config {
    /// Creates a new Config with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a Config with the given dimension and defaults otherwise.
    pub fn with_dimension(dimension: usize) -> Self {
        Self {
            dimension,
            ..Default::default()
        }
    }

    /// Validates the configuration.
    ///
    /// Called automatically by `VectorDb::open()`. You can also call this
    /// explicitly to check configuration before attempting to open.
    ///
    /// # Errors
    /// Returns `ValidationError` if:
    /// - `dimension` is 0 or > 4096
    /// - Any HNSW parameter is 0
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.dimension == 0 {
            return Err(ValidationError::invalid_field(
                "dimension",
                "must be greater than 0",
            ));
        }
        if self.dimension > 4096 {
            return Err(ValidationError::invalid_field(
                "dimension",
                "must not exceed 4096",
            ));
        }
        self.hnsw.validate()
    }
}

/// Distance metric for nearest-neighbor search.
///
/// Results are always ordered ascending by the reported distance, so the
/// inner-product metric reports `1 - dot(a, b)` rather than the raw
/// similarity.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Metric {
    /// Squared Euclidean distance. 0.0 = identical.
    #[default]
    L2,

    /// Inner-product similarity, reported as `1 - dot`. Assumes vectors
    /// are normalized if a true cosine ranking is wanted.
    InnerProduct,
}

impl Metric {
    /// Returns true for the L2 metric.
    pub fn is_l2(&self) -> bool {
        matches!(self, Self::L2)
    }
}

/// HNSW graph tuning parameters.
///
/// Defaults are reasonable for collections up to ~100k vectors. Raise
/// `ef_search` for better recall at the cost of query latency.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HnswConfig {
    /// Maximum number of connections per graph node.
    pub max_nb_connection: usize,

    /// Size of the dynamic candidate list during construction.
    pub ef_construction: usize,

    /// Size of the dynamic candidate list during search.
    pub ef_search: usize,

    /// Maximum number of graph layers.
    pub max_layer: usize,

    /// Capacity hint for the graph.
    pub max_elements: usize,
}

impl Default for HnswConfig {
    fn default() -> Self {
        Self {
            max_nb_connection: 32,
            ef_construction: 200,
            ef_search: 64,
            max_layer: 16,
            max_elements: 100_000,
        }
    }
}

impl HnswConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        if self.max_nb_connection == 0 {
            return Err(ValidationError::invalid_field(
                "hnsw.max_nb_connection",
                "must be greater than 0",
            ));
        }
        if self.ef_construction == 0 || self.ef_search == 0 {
            return Err(ValidationError::invalid_field(
                "hnsw.ef_construction/ef_search",
                "must be greater than 0",
            ));
        }
        if self.max_layer == 0 || self.max_elements == 0 {
            return Err(ValidationError::invalid_field(
                "hnsw.max_layer/max_elements",
                "must be greater than 0",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.dimension, 128);
        assert_eq!(config.metric, Metric::L2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_with_dimension() {
        let config = Config::with_dimension(768);
        assert_eq!(config.dimension, 768);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_dimension_zero() {
        let config = Config {
            dimension: 0,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ValidationError::InvalidField { field, .. } if field == "dimension"));
    }

    #[test]
    fn test_validate_dimension_too_large() {
        let config = Config {
            dimension: 5000,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_hnsw_params() {
        let config = Config {
            hnsw: HnswConfig {
                ef_search: 0,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_metric_checks() {
        assert!(Metric::L2.is_l2());
        assert!(!Metric::InnerProduct.is_l2());
    }
}
