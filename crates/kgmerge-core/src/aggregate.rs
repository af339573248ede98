//! Frequency Aggregator: per-relation sums of sense frequencies across shards.
//!
//! The aggregator is a plain value. Each shard scan folds into it, and two
//! aggregators built over disjoint shard ranges can be combined with
//! [`FrequencyAggregator::merge`], so shards could be scanned independently
//! and reduced in shard order.

use ahash::AHashMap;
use kgmerge_store::{relation_schema, KgConnection, RELATION_TABLE_NAME};

use crate::error::Result;
use crate::model::{InvertedIndex, RelationId, RelationRow};

#[derive(Debug, Clone, PartialEq)]
pub struct Aggregate {
    /// Structural fields from the first occurrence, senses accumulated.
    pub row: RelationRow,
    /// Sum of the FrequencyTotal of every absorbed row.
    pub total: f64,
    /// Whether the first occurrence came from the merged table itself.
    pub seeded: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanStats {
    pub rows_seen: usize,
    pub rows_absorbed: usize,
}

#[derive(Debug, Clone, Default)]
pub struct FrequencyAggregator {
    entries: AHashMap<RelationId, Aggregate>,
    grand_total: f64,
}

impl FrequencyAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one row in. Returns its FrequencyTotal.
    pub fn absorb(&mut self, row: RelationRow) -> f64 {
        self.absorb_with_origin(row, false)
    }

    fn absorb_with_origin(&mut self, row: RelationRow, seeded: bool) -> f64 {
        let freq = row.frequency_total();
        self.grand_total += freq;
        match self.entries.get_mut(&row.id) {
            Some(agg) => {
                agg.row.senses.accumulate(&row.senses);
                agg.total += freq;
            }
            None => {
                self.entries.insert(
                    row.id.clone(),
                    Aggregate {
                        row,
                        total: freq,
                        seeded,
                    },
                );
            }
        }
        freq
    }

    /// Start from the merged table's existing relation rows, if any.
    pub fn seed_from(&mut self, conn: &dyn KgConnection) -> Result<ScanStats> {
        if !conn.table_exists(RELATION_TABLE_NAME)? {
            return Ok(ScanStats::default());
        }
        self.scan(conn, |_| true, true)
    }

    /// Fold every row of one shard whose id is a key of `candidates`.
    pub fn absorb_shard(
        &mut self,
        conn: &dyn KgConnection,
        candidates: &InvertedIndex,
    ) -> Result<ScanStats> {
        self.scan(conn, |rid| candidates.contains(rid), false)
    }

    fn scan(
        &mut self,
        conn: &dyn KgConnection,
        accept: impl Fn(&str) -> bool,
        seeded: bool,
    ) -> Result<ScanStats> {
        let schema = relation_schema();
        let columns = schema.column_names();
        let mut stats = ScanStats::default();
        let mut malformed = None;

        conn.for_each_row(RELATION_TABLE_NAME, &columns, &mut |stored| {
            if malformed.is_some() {
                return;
            }
            stats.rows_seen += 1;
            match RelationRow::from_row(&stored) {
                Ok(row) if accept(&row.id) => {
                    self.absorb_with_origin(row, seeded);
                    stats.rows_absorbed += 1;
                }
                Ok(_) => {}
                Err(err) => malformed = Some(err),
            }
        })?;

        match malformed {
            Some(err) => Err(err),
            None => Ok(stats),
        }
    }

    /// Fold `other` in after everything already here. Rows already present
    /// keep their structural fields.
    pub fn merge(&mut self, other: FrequencyAggregator) {
        self.grand_total += other.grand_total;
        for (rid, incoming) in other.entries {
            match self.entries.get_mut(&rid) {
                Some(agg) => {
                    agg.row.senses.accumulate(&incoming.row.senses);
                    agg.total += incoming.total;
                }
                None => {
                    self.entries.insert(rid, incoming);
                }
            }
        }
    }

    /// GrandTotal: sum of every absorbed row's FrequencyTotal.
    pub fn grand_total(&self) -> f64 {
        self.grand_total
    }

    pub fn unique_relations(&self) -> usize {
        self.entries.len()
    }

    pub fn total(&self, rid: &str) -> Option<f64> {
        self.entries.get(rid).map(|agg| agg.total)
    }

    pub fn get(&self, rid: &str) -> Option<&Aggregate> {
        self.entries.get(rid)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&RelationId, &Aggregate)> {
        self.entries.iter()
    }

    pub fn into_entries(self) -> impl Iterator<Item = (RelationId, Aggregate)> {
        self.entries.into_iter()
    }
}
