//! Relation Filter: keep/drop decision per aggregated relation.

use ahash::AHashSet;
use serde::{Deserialize, Serialize};

use crate::aggregate::FrequencyAggregator;
use crate::model::{EntityIndex, RelationId, RelationRow};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FilterThresholds {
    /// Drop when FrequencyTotal < this count.
    pub lower_count: f64,
    /// Drop when FrequencyTotal > this fraction of GrandTotal.
    pub upper_fraction: f64,
}

impl Default for FilterThresholds {
    fn default() -> Self {
        Self {
            lower_count: 1.0001,
            upper_fraction: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    BelowLowerThreshold,
    AboveUpperThreshold,
    DanglingEndpoint,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterReport {
    /// GrandTotal.
    pub total_mass: f64,
    pub total_unique: usize,
    pub kept_mass: f64,
    pub kept_unique: usize,
    pub dropped_mass: f64,
    pub below_lower: usize,
    pub above_upper: usize,
    pub dangling: usize,
}

#[derive(Debug, Clone, Default)]
pub struct FilterDecision {
    dropped: AHashSet<RelationId>,
    report: FilterReport,
}

impl FilterDecision {
    pub fn is_kept(&self, rid: &str) -> bool {
        !self.dropped.contains(rid)
    }

    pub fn nothing_dropped(&self) -> bool {
        self.dropped.is_empty()
    }

    pub fn dropped(&self) -> &AHashSet<RelationId> {
        &self.dropped
    }

    pub fn report(&self) -> &FilterReport {
        &self.report
    }
}

pub struct RelationFilter<'a> {
    thresholds: FilterThresholds,
    entities: &'a EntityIndex,
}

impl<'a> RelationFilter<'a> {
    pub fn new(thresholds: FilterThresholds, entities: &'a EntityIndex) -> Self {
        Self {
            thresholds,
            entities,
        }
    }

    pub fn upper_limit(&self, grand_total: f64) -> f64 {
        self.thresholds.upper_fraction * grand_total
    }

    /// `None` keeps the relation.
    pub fn judge(&self, row: &RelationRow, total: f64, upper_limit: f64) -> Option<DropReason> {
        if total < self.thresholds.lower_count {
            Some(DropReason::BelowLowerThreshold)
        } else if total > upper_limit {
            Some(DropReason::AboveUpperThreshold)
        } else if !self.entities.contains(row.head.as_str())
            || !self.entities.contains(row.tail.as_str())
        {
            Some(DropReason::DanglingEndpoint)
        } else {
            None
        }
    }

    pub fn decide(&self, aggregator: &FrequencyAggregator) -> FilterDecision {
        let total_mass = aggregator.grand_total();
        let upper_limit = self.upper_limit(total_mass);
        let mut decision = FilterDecision {
            dropped: AHashSet::new(),
            report: FilterReport {
                total_mass,
                total_unique: aggregator.unique_relations(),
                ..FilterReport::default()
            },
        };

        for (rid, agg) in aggregator.iter() {
            let report = &mut decision.report;
            let Some(reason) = self.judge(&agg.row, agg.total, upper_limit) else {
                report.kept_mass += agg.total;
                continue;
            };
            report.dropped_mass += agg.total;
            match reason {
                DropReason::BelowLowerThreshold => report.below_lower += 1,
                DropReason::AboveUpperThreshold => report.above_upper += 1,
                DropReason::DanglingEndpoint => report.dangling += 1,
            }
            decision.dropped.insert(rid.clone());
        }

        let report = &mut decision.report;
        report.kept_unique = report.total_unique - decision.dropped.len();
        tracing::debug!(
            below_lower = report.below_lower,
            above_upper = report.above_upper,
            dangling = report.dangling,
            upper_limit,
            "relation drop reasons"
        );
        decision
    }
}
