//! Core type definitions for VecStore records and index families.
//!
//! The [`Record`] type is the structured shape every layer of the engine
//! works with; it is converted to/from a generic JSON document only at the
//! storage and wire boundaries.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Record identifier. Ids are externally assigned, unique per database.
pub type RecordId = u64;

/// Attribute key reserved for the record id at the wire boundary.
///
/// An `attrs` entry under this key never participates in filtering.
pub const ID_FIELD: &str = "id";

/// One stored record: a fixed-dimension vector plus scalar attributes.
///
/// A record is created on first upsert. A later upsert with the same id
/// fully replaces the vector, the attribute set, and the stored payload
/// (last-writer-wins; there is no partial field merge).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Externally assigned unique id.
    pub id: RecordId,

    /// The embedding vector. Length must match the configured dimension.
    pub vector: Vec<f32>,

    /// Named scalar attributes. Only [`ScalarValue::Int`] attributes
    /// participate in filtering.
    #[serde(default)]
    pub attrs: BTreeMap<String, ScalarValue>,
}

impl Record {
    /// Creates a record with no attributes.
    pub fn new(id: RecordId, vector: Vec<f32>) -> Self {
        Self {
            id,
            vector,
            attrs: BTreeMap::new(),
        }
    }

    /// Adds or replaces an attribute, builder-style.
    pub fn with_attr(mut self, name: impl Into<String>, value: impl Into<ScalarValue>) -> Self {
        self.attrs.insert(name.into(), value.into());
        self
    }

    /// Iterates the integer attributes that participate in filtering.
    ///
    /// The reserved [`ID_FIELD`] key is excluded.
    pub fn int_attrs(&self) -> impl Iterator<Item = (&str, i64)> {
        self.attrs.iter().filter_map(|(name, value)| match value {
            ScalarValue::Int(v) if name != ID_FIELD => Some((name.as_str(), *v)),
            _ => None,
        })
    }

    /// Returns the integer value of an attribute, if it is an integer.
    pub fn int_attr(&self, name: &str) -> Option<i64> {
        match self.attrs.get(name) {
            Some(ScalarValue::Int(v)) => Some(*v),
            _ => None,
        }
    }
}

/// Closed set of scalar attribute kinds.
///
/// Serialized untagged, so the JSON document form carries plain scalars:
/// `{"tag": 5, "score": 0.3, "label": "x"}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScalarValue {
    /// Integer attribute; the only kind the filter index covers.
    Int(i64),
    /// Floating-point attribute (stored, not filterable).
    Float(f64),
    /// Text attribute (stored, not filterable).
    Text(String),
}

impl From<i64> for ScalarValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for ScalarValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for ScalarValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for ScalarValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

/// Index family selector: one configured ANN adapter plus its filter index.
///
/// The set is closed. Requests naming anything else resolve to `Unknown`,
/// which every operation rejects before touching any store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum IndexFamily {
    /// Exact brute-force scan.
    Flat,
    /// Graph-based approximate search.
    Hnsw,
    /// Rejecting sentinel for unrecognized or absent selectors.
    Unknown,
}

impl IndexFamily {
    /// Parses a wire-format selector. Unrecognized or absent values map to
    /// [`IndexFamily::Unknown`], never to an error.
    pub fn parse(value: Option<&str>) -> Self {
        match value {
            Some("FLAT") => Self::Flat,
            Some("HNSW") => Self::Hnsw,
            _ => Self::Unknown,
        }
    }

    /// The two concrete families, in registry order.
    pub const ALL: [IndexFamily; 2] = [IndexFamily::Flat, IndexFamily::Hnsw];

    /// Lowercase name used in snapshot file paths.
    pub(crate) fn file_tag(&self) -> &'static str {
        match self {
            Self::Flat => "flat",
            Self::Hnsw => "hnsw",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for IndexFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Flat => "FLAT",
            Self::Hnsw => "HNSW",
            Self::Unknown => "UNKNOWN",
        };
        f.write_str(s)
    }
}

/// Search result: parallel id/distance sequences with sentinel slots
/// already stripped.
///
/// For multi-query searches the per-query groups are concatenated in
/// query order.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchHits {
    /// Matched record ids, best first per query.
    pub ids: Vec<RecordId>,
    /// Distances parallel to `ids`, ascending per query.
    pub distances: Vec<f32>,
}

impl SearchHits {
    /// Returns the number of hits.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Returns true if no hits were found.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}
