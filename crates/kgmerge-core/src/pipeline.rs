//! End-to-end merge run: unify -> aggregate -> filter -> materialize.

use std::path::Path;

use kgmerge_store::Backend;
use serde::{Deserialize, Serialize};

use crate::aggregate::FrequencyAggregator;
use crate::artifacts::{read_artifact, ArtifactStore, CacheOutcome};
use crate::config::MergeConfig;
use crate::error::{MergeError, Result};
use crate::filter::{FilterReport, RelationFilter};
use crate::layout::{shard_db_files, ENTITY_INDEX_FILE, MERGED_DB_FILE};
use crate::materialize::{
    create_tables, write_core_index, write_relations, CoreIndexOutcome, RelationWriteStats,
};
use crate::model::{EntityIndex, InvertedIndex};
use crate::unify::IndexUnifier;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeReport {
    pub filter: FilterReport,
    pub full_index: CacheOutcome,
    pub full_relations: usize,
    pub core_index: CoreIndexOutcome,
    pub shards_scanned: usize,
    pub relations: RelationWriteStats,
}

/// Load the entity membership set that must already sit in the output
/// directory.
pub fn load_entity_index(merged_dir: &Path) -> Result<EntityIndex> {
    let path = merged_dir.join(ENTITY_INDEX_FILE);
    if !path.is_file() {
        tracing::error!(
            file = ENTITY_INDEX_FILE,
            dir = %merged_dir.display(),
            "entity membership set not found; generate it first"
        );
        return Err(MergeError::MissingPrecondition {
            file: ENTITY_INDEX_FILE.to_string(),
            dir: merged_dir.to_path_buf(),
        });
    }
    read_artifact(&path)
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Fold every shard database of `shard_dir` into `aggregator`, one at a time.
fn scan_shards(
    backend: Backend,
    shard_dir: &Path,
    merged_db: &Path,
    full: &InvertedIndex,
    aggregator: &mut FrequencyAggregator,
) -> Result<usize> {
    let mut scanned = 0usize;
    for path in shard_db_files(shard_dir)? {
        if same_file(&path, merged_db) {
            tracing::debug!(path = %path.display(), "skipping the merged database itself");
            continue;
        }
        tracing::info!(path = %path.display(), "connecting shard database");
        let conn = backend.open(&path)?;
        let stats = aggregator.absorb_shard(&*conn, full)?;
        tracing::info!(
            path = %path.display(),
            rows_seen = stats.rows_seen,
            rows_absorbed = stats.rows_absorbed,
            "retrieved relation rows"
        );
        conn.close()?;
        scanned += 1;
    }
    Ok(scanned)
}

pub fn run_merge(config: &MergeConfig) -> Result<MergeReport> {
    config.validate()?;
    let backend = config.backend()?;

    let entities = load_entity_index(&config.merged_kg_path)?;
    tracing::info!(entities = entities.len(), "loaded entity membership set");
    let mut store = ArtifactStore::open(&config.merged_kg_path)?;

    let (full, full_index) = IndexUnifier::new(&config.kg_path)
        .with_prefix_tagging(config.fix_prefix)
        .with_rebuild(config.rebuild_index)
        .unify(&mut store)?;
    let full_relations = full.len();

    let merged_db = config.merged_kg_path.join(MERGED_DB_FILE);
    tracing::info!(path = %merged_db.display(), "connecting merged database");
    let mut merged = backend.open(&merged_db)?;
    create_tables(&mut *merged)?;

    let mut aggregator = FrequencyAggregator::new();
    let seeded = aggregator.seed_from(&*merged)?;
    if seeded.rows_absorbed > 0 {
        tracing::info!(rows = seeded.rows_absorbed, "seeded from existing merged relations");
    }
    let shards_scanned = scan_shards(
        backend,
        &config.kg_path,
        &merged_db,
        &full,
        &mut aggregator,
    )?;
    tracing::info!(
        "{} relations ({} unique) have been extracted",
        aggregator.grand_total(),
        aggregator.unique_relations()
    );

    tracing::info!("filtering high-frequency and low-frequency relations");
    let decision = RelationFilter::new(config.thresholds(), &entities).decide(&aggregator);
    drop(entities);
    let filter = decision.report().clone();
    tracing::info!(
        "{} relations ({} unique) will be inserted into the core KG",
        filter.kept_mass,
        filter.kept_unique
    );

    let core_index = write_core_index(&mut store, full, &decision)?;
    let relations = write_relations(&mut *merged, aggregator, &decision)?;
    merged.close()?;
    tracing::info!("done");

    Ok(MergeReport {
        filter,
        full_index,
        full_relations,
        core_index,
        shards_scanned,
        relations,
    })
}
