//! Core data model: relation/entity ids, sentence locations, inverted
//! indices and aggregated relation rows.

use std::collections::BTreeMap;

use kgmerge_store::{Row, HEAD_COLUMN, ID_COLUMN, RELATION_SENSES, TAIL_COLUMN};
use serde::{Deserialize, Serialize};

use crate::error::{MergeError, Result};

pub type RelationId = String;
pub type EntityId = String;

pub const SENSE_COUNT: usize = RELATION_SENSES.len();

// ============================================================================
// Sentence locations and inverted indices
// ============================================================================

/// Where textual evidence was found: a tuple of path/offset components.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SentenceLocation(pub Vec<String>);

impl SentenceLocation {
    pub fn new<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(parts.into_iter().map(Into::into).collect())
    }

    /// Prepend `prefix` to every component.
    pub fn with_prefix(&self, prefix: &str) -> Self {
        Self(self.0.iter().map(|part| format!("{prefix}{part}")).collect())
    }

    pub fn parts(&self) -> &[String] {
        &self.0
    }
}

/// `key -> [location]`, ordered by key so serialization is deterministic.
///
/// Location lists keep insertion order and are never deduplicated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocationIndex<K: Ord> {
    entries: BTreeMap<K, Vec<SentenceLocation>>,
}

/// Relation id -> evidence locations.
pub type InvertedIndex = LocationIndex<RelationId>;

/// Entity id -> evidence locations. Only its key set matters to the merge:
/// a relation survives only if both endpoints are keys here.
pub type EntityIndex = LocationIndex<EntityId>;

impl<K: Ord> Default for LocationIndex<K> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }
}

impl<K: Ord> LocationIndex<K> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: std::borrow::Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.entries.contains_key(key)
    }

    pub fn get<Q>(&self, key: &Q) -> Option<&[SentenceLocation]>
    where
        K: std::borrow::Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.entries.get(key).map(Vec::as_slice)
    }

    /// Append locations to `key`'s list (never overwrites).
    pub fn extend_locations(
        &mut self,
        key: K,
        locations: impl IntoIterator<Item = SentenceLocation>,
    ) {
        self.entries.entry(key).or_default().extend(locations);
    }

    /// Concatenate every list of `other` after the matching list here.
    pub fn append(&mut self, other: LocationIndex<K>) {
        for (key, locations) in other.entries {
            self.extend_locations(key, locations);
        }
    }

    /// Keep only the keys for which `keep` holds; consumes `self` so no
    /// second copy of the location lists is made.
    pub fn into_restricted(mut self, mut keep: impl FnMut(&K) -> bool) -> Self {
        self.entries.retain(|key, _| keep(key));
        self
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.entries.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &[SentenceLocation])> {
        self.entries.iter().map(|(k, v)| (k, v.as_slice()))
    }

    pub fn location_count(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }
}

impl<K: Ord> IntoIterator for LocationIndex<K> {
    type Item = (K, Vec<SentenceLocation>);
    type IntoIter = std::collections::btree_map::IntoIter<K, Vec<SentenceLocation>>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl<K: Ord> FromIterator<(K, Vec<SentenceLocation>)> for LocationIndex<K> {
    fn from_iter<T: IntoIterator<Item = (K, Vec<SentenceLocation>)>>(iter: T) -> Self {
        let mut index = Self::new();
        for (key, locations) in iter {
            index.extend_locations(key, locations);
        }
        index
    }
}

// ============================================================================
// Relation rows
// ============================================================================

/// One frequency per relation sense, in `RELATION_SENSES` order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SenseVector([f64; SENSE_COUNT]);

impl Default for SenseVector {
    fn default() -> Self {
        Self([0.0; SENSE_COUNT])
    }
}

impl SenseVector {
    pub fn from_counts(counts: &[(&str, f64)]) -> Self {
        let mut v = Self::default();
        for (sense, count) in counts {
            if let Some(i) = sense_index(sense) {
                v.0[i] += count;
            }
        }
        v
    }

    pub fn get(&self, sense: &str) -> f64 {
        sense_index(sense).map(|i| self.0[i]).unwrap_or(0.0)
    }

    pub fn total(&self) -> f64 {
        self.0.iter().sum()
    }

    pub fn accumulate(&mut self, other: &SenseVector) {
        for (slot, x) in self.0.iter_mut().zip(other.0.iter()) {
            *slot += x;
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, f64)> + '_ {
        RELATION_SENSES.iter().copied().zip(self.0.iter().copied())
    }
}

pub fn sense_index(sense: &str) -> Option<usize> {
    RELATION_SENSES.iter().position(|s| *s == sense)
}

/// A relation table row: structural fields plus sense frequencies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationRow {
    pub id: RelationId,
    pub head: EntityId,
    pub tail: EntityId,
    pub senses: SenseVector,
}

impl RelationRow {
    pub fn new(
        id: impl Into<RelationId>,
        head: impl Into<EntityId>,
        tail: impl Into<EntityId>,
        senses: SenseVector,
    ) -> Self {
        Self {
            id: id.into(),
            head: head.into(),
            tail: tail.into(),
            senses,
        }
    }

    /// FrequencyTotal: the sum over all sense fields.
    pub fn frequency_total(&self) -> f64 {
        self.senses.total()
    }

    /// Decode a stored row. Missing or NULL sense columns count as zero.
    pub fn from_row(row: &Row) -> Result<Self> {
        let field = |name: &str| {
            row.get_str(name)
                .map(str::to_string)
                .ok_or_else(|| MergeError::MalformedRow(format!("missing text column `{name}`")))
        };
        let id = field(ID_COLUMN)?;
        let head = field(HEAD_COLUMN)?;
        let tail = field(TAIL_COLUMN)?;
        let mut senses = SenseVector::default();
        for (i, sense) in RELATION_SENSES.iter().enumerate() {
            senses.0[i] = row.get_f64_or_zero(sense);
        }
        Ok(Self {
            id,
            head,
            tail,
            senses,
        })
    }

    pub fn to_row(&self) -> Row {
        let mut row = Row::with_capacity(3 + SENSE_COUNT);
        row.set(ID_COLUMN, self.id.as_str());
        row.set(HEAD_COLUMN, self.head.as_str());
        row.set(TAIL_COLUMN, self.tail.as_str());
        for (sense, count) in self.senses.iter() {
            row.set(sense, count);
        }
        row
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kgmerge_store::Value;

    fn loc(parts: &[&str]) -> SentenceLocation {
        SentenceLocation::new(parts.iter().copied())
    }

    #[test]
    fn extend_appends_instead_of_overwriting() {
        let mut index = InvertedIndex::new();
        index.extend_locations("r1".to_string(), vec![loc(&["a", "1"])]);
        index.extend_locations("r1".to_string(), vec![loc(&["a", "1"]), loc(&["b", "2"])]);
        assert_eq!(
            index.get("r1").unwrap(),
            &[loc(&["a", "1"]), loc(&["a", "1"]), loc(&["b", "2"])]
        );
        assert_eq!(index.location_count(), 3);
    }

    #[test]
    fn restriction_keeps_lists_untouched() {
        let index: InvertedIndex = vec![
            ("r1".to_string(), vec![loc(&["x"])]),
            ("r2".to_string(), vec![loc(&["y"]), loc(&["z"])]),
        ]
        .into_iter()
        .collect();
        let core = index.into_restricted(|id| id != "r1");
        assert_eq!(core.len(), 1);
        assert_eq!(core.get("r2").unwrap().len(), 2);
        assert!(!core.contains("r1"));
    }

    #[test]
    fn prefix_applies_to_every_component() {
        let l = loc(&["file.txt", "12"]).with_prefix("nyt/parsed_para/");
        assert_eq!(l.parts(), &["nyt/parsed_para/file.txt", "nyt/parsed_para/12"]);
    }

    #[test]
    fn relation_row_round_trips_through_store_row() {
        let row = RelationRow::new(
            "r1",
            "e1",
            "e2",
            SenseVector::from_counts(&[("Reason", 2.0), ("Co_Occurrence", 1.5)]),
        );
        let stored = row.to_row();
        assert_eq!(stored.len(), 3 + SENSE_COUNT);
        assert_eq!(RelationRow::from_row(&stored).unwrap(), row);
        assert_eq!(row.frequency_total(), 3.5);
    }

    #[test]
    fn missing_senses_read_as_zero_and_missing_id_is_malformed() {
        let partial = Row::new()
            .with("_id", "r1")
            .with("hid", "e1")
            .with("tid", "e2")
            .with("Result", Value::Null)
            .with("Reason", 4.0);
        let row = RelationRow::from_row(&partial).unwrap();
        assert_eq!(row.senses.get("Reason"), 4.0);
        assert_eq!(row.senses.get("Result"), 0.0);
        assert_eq!(row.frequency_total(), 4.0);

        let no_id = Row::new().with("hid", "e1").with("tid", "e2");
        assert!(matches!(
            RelationRow::from_row(&no_id),
            Err(MergeError::MalformedRow(_))
        ));
    }
}
