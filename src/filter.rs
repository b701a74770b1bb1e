//! Bitmap inverted index for integer attribute filtering.
//!
//! [`FilterIndex`] maps `(field, value)` pairs to compressed id sets
//! ([`roaring::RoaringTreemap`]) and resolves equality/inequality
//! predicates by unioning bitmaps into a caller-owned accumulator.
//!
//! # Invariant
//!
//! In steady state a given id belongs to at most one value's bitmap per
//! field. The orchestrator maintains this by clearing the id from every
//! bitmap ([`FilterIndex::retract_id`]) before re-adding its current
//! memberships on each upsert, so the invariant holds even when recovery
//! replays over partially applied state.
//!
//! # Persistence
//!
//! One line per `(field, value)` pair: `field|value|<bitmap bytes>`.
//! Parsing consumes the field and value up to the first two `|` delimiters
//! and then hands the reader to `RoaringTreemap::deserialize_from`, which
//! reads exactly the bitmap payload, so payload bytes containing `|` or
//! newlines round-trip correctly.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use roaring::RoaringTreemap;
use tracing::debug;

use crate::error::{Result, StorageError};
use crate::types::RecordId;

/// Filter comparison operator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterOp {
    /// Ids whose field equals the value.
    Equal,
    /// Ids whose field holds any other value ever seen for the field.
    NotEqual,
}

impl FilterOp {
    /// Parses the wire operator: `"="` is equality, anything else is
    /// inequality.
    pub fn parse(op: &str) -> Self {
        if op == "=" {
            Self::Equal
        } else {
            Self::NotEqual
        }
    }
}

/// A single-field predicate as decoded from a request.
#[derive(Clone, Debug, PartialEq)]
pub struct FilterSpec {
    /// Attribute name to filter on.
    pub field: String,
    /// Comparison operator.
    pub op: FilterOp,
    /// Integer value compared against.
    pub value: i64,
}

impl FilterSpec {
    /// Creates an equality predicate.
    pub fn equal(field: impl Into<String>, value: i64) -> Self {
        Self {
            field: field.into(),
            op: FilterOp::Equal,
            value,
        }
    }

    /// Creates an inequality predicate.
    pub fn not_equal(field: impl Into<String>, value: i64) -> Self {
        Self {
            field: field.into(),
            op: FilterOp::NotEqual,
            value,
        }
    }
}

/// Inverted bitmap index: `(field, value) → set of record ids`.
///
/// Unknown fields and values degrade to "no restriction": lookups
/// contribute nothing to the output bitmap and never error.
#[derive(Debug, Default)]
pub struct FilterIndex {
    // BTreeMaps keep serialization output deterministic.
    fields: BTreeMap<String, BTreeMap<i64, RoaringTreemap>>,
}

impl FilterIndex {
    /// Creates an empty filter index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `id` to the bitmap for `(field, value)`, creating the bitmap
    /// if absent. Used for the first sighting of a field.
    pub fn add_int_field(&mut self, field: &str, value: i64, id: RecordId) {
        self.fields
            .entry(field.to_string())
            .or_default()
            .entry(value)
            .or_default()
            .insert(id);
        debug!(field, value, id, "added int field filter");
    }

    /// Moves `id` to the bitmap for `(field, new_value)`.
    ///
    /// If `old_value` is given and its bitmap exists, `id` is removed from
    /// it first, so the value transition is atomic from the caller's view.
    /// A wholly unseen field behaves as [`FilterIndex::add_int_field`].
    pub fn update_int_field(
        &mut self,
        field: &str,
        new_value: i64,
        id: RecordId,
        old_value: Option<i64>,
    ) {
        let Some(value_map) = self.fields.get_mut(field) else {
            self.add_int_field(field, new_value, id);
            return;
        };

        if let Some(old) = old_value {
            if let Some(old_bitmap) = value_map.get_mut(&old) {
                old_bitmap.remove(id);
            }
        }

        value_map.entry(new_value).or_default().insert(id);
        debug!(field, new_value, id, ?old_value, "updated int field filter");
    }

    /// Removes `id` from every bitmap in the index.
    ///
    /// Linear in the number of `(field, value)` pairs the index has ever
    /// seen. The upsert path calls this before re-adding the record's
    /// current memberships, so the index converges to the latest attribute
    /// set no matter what prior state replay starts from.
    pub fn retract_id(&mut self, id: RecordId) {
        for value_map in self.fields.values_mut() {
            for bitmap in value_map.values_mut() {
                bitmap.remove(id);
            }
        }
    }

    /// Removes `id` from the bitmap for `(field, value)` if present.
    ///
    /// Used when an upsert drops a field the old record carried, so stale
    /// memberships do not survive the rewrite.
    pub fn retract_int_field(&mut self, field: &str, value: i64, id: RecordId) {
        if let Some(bitmap) = self.fields.get_mut(field).and_then(|m| m.get_mut(&value)) {
            bitmap.remove(id);
            debug!(field, value, id, "retracted int field filter");
        }
    }

    /// Unions the ids matching `(field, op, value)` into `out`.
    ///
    /// `Equal` unions the one matching bitmap; `NotEqual` unions every
    /// bitmap for the field except the matching one. Unknown fields and
    /// values contribute nothing. `out` is caller-owned so multiple
    /// predicates can be composed by repeated calls.
    pub fn collect_bitmap(&self, field: &str, op: FilterOp, value: i64, out: &mut RoaringTreemap) {
        let Some(value_map) = self.fields.get(field) else {
            return;
        };

        match op {
            FilterOp::Equal => {
                if let Some(bitmap) = value_map.get(&value) {
                    *out |= bitmap;
                }
            }
            FilterOp::NotEqual => {
                for (other, bitmap) in value_map {
                    if *other != value {
                        *out |= bitmap;
                    }
                }
            }
        }
    }

    /// Returns true if no field has ever been added.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Writes every `(field, value)` bitmap as a `field|value|<bytes>` line.
    pub fn serialize_into<W: Write>(&self, mut writer: W) -> Result<()> {
        for (field, value_map) in &self.fields {
            for (value, bitmap) in value_map {
                write!(writer, "{}|{}|", field, value)
                    .map_err(|e| StorageError::serialization(e.to_string()))?;
                bitmap
                    .serialize_into(&mut writer)
                    .map_err(|e| StorageError::serialization(e.to_string()))?;
                writer
                    .write_all(b"\n")
                    .map_err(|e| StorageError::serialization(e.to_string()))?;
            }
        }
        Ok(())
    }

    /// Reads an index back from the line format written by
    /// [`FilterIndex::serialize_into`].
    pub fn deserialize_from<R: BufRead>(mut reader: R) -> Result<Self> {
        let mut index = Self::new();

        loop {
            let Some(field) = read_delimited(&mut reader)? else {
                break;
            };
            let value_text = read_delimited(&mut reader)?.ok_or_else(|| {
                StorageError::corrupted("filter index entry truncated after field")
            })?;
            let value: i64 = value_text.parse().map_err(|_| {
                StorageError::corrupted(format!("invalid filter value '{}'", value_text))
            })?;

            let bitmap = RoaringTreemap::deserialize_from(&mut reader)
                .map_err(|e| StorageError::corrupted(format!("bitmap payload: {}", e)))?;

            // Line terminator written after each bitmap
            let mut newline = [0u8; 1];
            reader
                .read_exact(&mut newline)
                .map_err(|e| StorageError::corrupted(format!("missing line terminator: {}", e)))?;
            if newline[0] != b'\n' {
                return Err(StorageError::corrupted("missing line terminator").into());
            }

            index
                .fields
                .entry(field)
                .or_default()
                .insert(value, bitmap);
        }

        Ok(index)
    }

    /// Persists the index to `path`, overwriting any previous file.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        let file = File::create(path)?;
        self.serialize_into(BufWriter::new(file))
    }

    /// Loads an index from `path`.
    pub fn load_from(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        Self::deserialize_from(BufReader::new(file))
    }
}

/// Reads bytes up to the next `|`. Returns `None` at clean end of input.
fn read_delimited<R: BufRead>(reader: &mut R) -> Result<Option<String>> {
    let mut buf = Vec::new();
    let n = reader
        .read_until(b'|', &mut buf)
        .map_err(|e| StorageError::corrupted(e.to_string()))?;
    if n == 0 {
        return Ok(None);
    }
    if buf.last() != Some(&b'|') {
        return Err(StorageError::corrupted("filter index entry missing delimiter").into());
    }
    buf.pop();
    let text = String::from_utf8(buf)
        .map_err(|_| StorageError::corrupted("filter index field is not UTF-8"))?;
    Ok(Some(text))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashMap;
    use std::io::Cursor;

    fn eq_set(index: &FilterIndex, field: &str, value: i64) -> RoaringTreemap {
        let mut out = RoaringTreemap::new();
        index.collect_bitmap(field, FilterOp::Equal, value, &mut out);
        out
    }

    fn neq_set(index: &FilterIndex, field: &str, value: i64) -> RoaringTreemap {
        let mut out = RoaringTreemap::new();
        index.collect_bitmap(field, FilterOp::NotEqual, value, &mut out);
        out
    }

    #[test]
    fn test_add_and_equal_lookup() {
        let mut index = FilterIndex::new();
        index.add_int_field("tag", 5, 1);
        index.add_int_field("tag", 5, 2);
        index.add_int_field("tag", 7, 3);

        let hits = eq_set(&index, "tag", 5);
        assert!(hits.contains(1) && hits.contains(2));
        assert!(!hits.contains(3));
    }

    #[test]
    fn test_update_moves_membership() {
        let mut index = FilterIndex::new();
        index.update_int_field("tag", 5, 1, None);
        index.update_int_field("tag", 7, 1, Some(5));

        assert!(!eq_set(&index, "tag", 5).contains(1));
        assert!(eq_set(&index, "tag", 7).contains(1));
    }

    #[test]
    fn test_update_unseen_field_behaves_as_add() {
        let mut index = FilterIndex::new();
        index.update_int_field("fresh", 3, 9, Some(1));
        assert!(eq_set(&index, "fresh", 3).contains(9));
    }

    #[test]
    fn test_not_equal_unions_other_values() {
        let mut index = FilterIndex::new();
        index.update_int_field("tag", 5, 1, None);
        index.update_int_field("tag", 7, 2, None);
        index.update_int_field("tag", 9, 3, None);

        let hits = neq_set(&index, "tag", 7);
        assert!(hits.contains(1) && hits.contains(3));
        assert!(!hits.contains(2));
    }

    #[test]
    fn test_unknown_field_and_value_contribute_nothing() {
        let mut index = FilterIndex::new();
        index.add_int_field("tag", 5, 1);

        assert!(eq_set(&index, "missing", 5).is_empty());
        assert!(eq_set(&index, "tag", 99).is_empty());
        assert!(neq_set(&index, "missing", 5).is_empty());
    }

    #[test]
    fn test_retract_removes_membership() {
        let mut index = FilterIndex::new();
        index.add_int_field("tag", 5, 1);
        index.retract_int_field("tag", 5, 1);
        assert!(eq_set(&index, "tag", 5).is_empty());

        // Retracting an unknown entry is a no-op
        index.retract_int_field("tag", 42, 1);
        index.retract_int_field("other", 5, 1);
    }

    #[test]
    fn test_retract_id_clears_all_memberships() {
        let mut index = FilterIndex::new();
        index.add_int_field("tag", 5, 1);
        index.add_int_field("year", 2024, 1);
        index.add_int_field("tag", 5, 2);

        index.retract_id(1);
        assert!(!eq_set(&index, "tag", 5).contains(1));
        assert!(!eq_set(&index, "year", 2024).contains(1));
        assert!(eq_set(&index, "tag", 5).contains(2));
    }

    #[test]
    fn test_composed_predicates_union_into_one_bitmap() {
        let mut index = FilterIndex::new();
        index.add_int_field("tag", 5, 1);
        index.add_int_field("year", 2024, 2);

        let mut out = RoaringTreemap::new();
        index.collect_bitmap("tag", FilterOp::Equal, 5, &mut out);
        index.collect_bitmap("year", FilterOp::Equal, 2024, &mut out);
        assert!(out.contains(1) && out.contains(2));
    }

    #[test]
    fn test_serialization_roundtrip() {
        let mut index = FilterIndex::new();
        for id in 0..500u64 {
            index.update_int_field("tag", (id % 7) as i64, id, None);
            index.update_int_field("year", 2000 + (id % 3) as i64, id, None);
        }
        // Negative values exercise the sign in the value column
        index.add_int_field("offset", -12, 3);

        let mut bytes = Vec::new();
        index.serialize_into(&mut bytes).unwrap();
        let restored = FilterIndex::deserialize_from(Cursor::new(bytes)).unwrap();

        for value in 0..7i64 {
            assert_eq!(
                eq_set(&index, "tag", value),
                eq_set(&restored, "tag", value),
                "tag={} membership must survive a round-trip",
                value
            );
        }
        assert_eq!(eq_set(&restored, "offset", -12).len(), 1);
    }

    #[test]
    fn test_roundtrip_with_awkward_payload_bytes() {
        // Ids chosen so the serialized bitmap bytes contain 0x7c ('|')
        // and 0x0a ('\n')
        let mut index = FilterIndex::new();
        for id in [0x7cu64, 0x0a, 0x7c7c, 0x0a0a, 1 << 33] {
            index.add_int_field("raw", 1, id);
        }

        let mut bytes = Vec::new();
        index.serialize_into(&mut bytes).unwrap();
        let restored = FilterIndex::deserialize_from(Cursor::new(bytes)).unwrap();
        assert_eq!(eq_set(&index, "raw", 1), eq_set(&restored, "raw", 1));
    }

    #[test]
    fn test_save_and_load_file() {
        let mut index = FilterIndex::new();
        index.add_int_field("tag", 5, 1);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("filters");
        index.save_to(&path).unwrap();

        let restored = FilterIndex::load_from(&path).unwrap();
        assert!(eq_set(&restored, "tag", 5).contains(1));
    }

    #[test]
    fn test_truncated_input_is_corrupted() {
        let result = FilterIndex::deserialize_from(Cursor::new(b"tag|5".to_vec()));
        assert!(result.is_err());
    }

    proptest! {
        // EQUAL(f,v) and NOT_EQUAL(f,v) partition the set of ids ever
        // added under f, for every value v the field has seen.
        #[test]
        fn prop_equal_and_not_equal_partition_field(
            ops in prop::collection::vec((0u64..200, 0i64..8), 1..300)
        ) {
            let mut index = FilterIndex::new();
            let mut current: HashMap<u64, i64> = HashMap::new();

            // Drive updates the way the orchestrator does: supply the
            // previous value so membership stays single-valued per field.
            for (id, value) in ops {
                let old = current.insert(id, value);
                index.update_int_field("f", value, id, old);
            }

            let all_ids: RoaringTreemap = current.keys().copied().collect();
            for value in 0i64..8 {
                let mut eq = RoaringTreemap::new();
                index.collect_bitmap("f", FilterOp::Equal, value, &mut eq);
                let mut neq = RoaringTreemap::new();
                index.collect_bitmap("f", FilterOp::NotEqual, value, &mut neq);

                prop_assert_eq!(&eq | &neq, all_ids.clone());
                prop_assert!((eq & neq).is_empty());
            }
        }
    }
}
