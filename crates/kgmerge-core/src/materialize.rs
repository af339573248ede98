//! Core Materializer: merged relation table + core inverted index.

use kgmerge_store::{
    eventuality_schema, relation_schema, KgConnection, StoreError, RELATION_TABLE_NAME,
};
use serde::{Deserialize, Serialize};

use crate::aggregate::FrequencyAggregator;
use crate::artifacts::ArtifactStore;
use crate::error::Result;
use crate::filter::FilterDecision;
use crate::layout::{CORE_INDEX, CORE_INDEX_FILE, FULL_INDEX};
use crate::model::{InvertedIndex, RelationRow};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoreIndexOutcome {
    /// Nothing was dropped: `core := full`.
    Aliased,
    /// A restricted copy was written.
    Restricted { relations: usize },
}

/// Create the eventuality and relation tables. An existing table is logged
/// and left as is; its schema is not checked.
pub fn create_tables(conn: &mut dyn KgConnection) -> Result<()> {
    tracing::info!("creating tables");
    for schema in [eventuality_schema(), relation_schema()] {
        match conn.create_table(&schema) {
            Ok(()) => {}
            Err(StoreError::TableExists(table)) => {
                tracing::warn!(table = %table, "table already exists; keeping existing schema");
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

/// Write the core index: an alias of `full` when nothing was dropped,
/// otherwise `full` restricted to surviving ids. Consumes `full`.
pub fn write_core_index(
    store: &mut ArtifactStore,
    full: InvertedIndex,
    decision: &FilterDecision,
) -> Result<CoreIndexOutcome> {
    if decision.nothing_dropped() {
        drop(full);
        store.alias(CORE_INDEX, FULL_INDEX)?;
        tracing::info!("no relation filtered; core index aliases the full index");
        return Ok(CoreIndexOutcome::Aliased);
    }
    let core = full.into_restricted(|rid| decision.is_kept(rid));
    let relations = core.len();
    store.store_index(CORE_INDEX, CORE_INDEX_FILE, &core)?;
    tracing::info!(relations, "stored core inverted index");
    Ok(CoreIndexOutcome::Restricted { relations })
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationWriteStats {
    pub inserted: usize,
    /// Previously merged rows that did not survive this run.
    pub removed: usize,
}

/// Replace the merged relation table's rows with the survivors.
///
/// Survivors are inserted (replacing by id); ids that came from the existing
/// merged table but were dropped are deleted, so the table ends up holding
/// exactly the surviving rows. Both halves commit together.
pub fn write_relations(
    conn: &mut dyn KgConnection,
    aggregator: FrequencyAggregator,
    decision: &FilterDecision,
) -> Result<RelationWriteStats> {
    let mut survivors: Vec<RelationRow> = Vec::with_capacity(decision.report().kept_unique);
    let mut stale: Vec<String> = Vec::new();
    for (rid, agg) in aggregator.into_entries() {
        if decision.is_kept(&rid) {
            survivors.push(agg.row);
        } else if agg.seeded {
            stale.push(rid);
        }
    }
    survivors.sort_by(|a, b| a.id.cmp(&b.id));

    let rows: Vec<_> = survivors.iter().map(RelationRow::to_row).collect();
    drop(survivors);
    let batch = conn.replace_rows(RELATION_TABLE_NAME, &rows, &stale)?;
    let table_rows = conn.row_count(RELATION_TABLE_NAME)?;
    tracing::info!(
        inserted = batch.inserted,
        removed = batch.deleted,
        table_rows,
        "relations written to merged table"
    );
    Ok(RelationWriteStats {
        inserted: batch.inserted,
        removed: batch.deleted,
    })
}
