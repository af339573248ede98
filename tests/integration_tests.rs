//! Integration tests for the complete merge pipeline
//!
//! These tests drive `run_merge` end to end over shard directories built on
//! disk:
//! - shard indices + shard databases → merged `KG.db`
//! - full/core index artifacts and the manifest aliasing between them
//! - cache reuse across runs
//!
//! Run with: cargo test --test integration_tests

use approx::assert_relative_eq;
use kgmerge_core::artifacts::{read_artifact, write_artifact};
use kgmerge_core::layout::{
    CORE_INDEX, CORE_INDEX_FILE, ENTITY_INDEX_FILE, FULL_INDEX, FULL_INDEX_FILE, MANIFEST_FILE,
    MERGED_DB_FILE,
};
use kgmerge_core::materialize::create_tables;
use kgmerge_core::{
    run_merge, ArtifactRef, ArtifactStore, CacheOutcome, CoreIndexOutcome, EntityIndex,
    InvertedIndex, MergeConfig, MergeError, RelationRow, SenseVector, SentenceLocation,
};
use kgmerge_store::{
    KgConnection, SqliteConnection, HEAD_COLUMN, ID_COLUMN, RELATION_SENSES, RELATION_TABLE_NAME,
    TAIL_COLUMN,
};
use std::fs;
use std::path::Path;
use tempfile::tempdir;

// ============================================================================
// Fixtures
// ============================================================================

fn loc(parts: &[&str]) -> SentenceLocation {
    SentenceLocation::new(parts.iter().copied())
}

fn relation(id: &str, head: &str, tail: &str, counts: &[(&str, f64)]) -> RelationRow {
    RelationRow::new(id, head, tail, SenseVector::from_counts(counts))
}

/// Write one shard: `rid2sids_<name>.bin` plus `KG<name>.db`.
fn write_shard(dir: &Path, name: &str, rows: &[RelationRow]) {
    let index: InvertedIndex = rows
        .iter()
        .map(|row| (row.id.clone(), vec![loc(&[name, row.id.as_str()])]))
        .collect();
    write_artifact(&dir.join(format!("rid2sids_{name}.bin")), &index).unwrap();

    let mut conn = SqliteConnection::open(&dir.join(format!("KG{name}.db"))).unwrap();
    create_tables(&mut conn).unwrap();
    let stored: Vec<_> = rows.iter().map(RelationRow::to_row).collect();
    conn.insert_rows(RELATION_TABLE_NAME, &stored).unwrap();
}

fn write_entities(merged: &Path, ids: &[&str]) {
    fs::create_dir_all(merged).unwrap();
    let entities: EntityIndex = ids
        .iter()
        .map(|id| (id.to_string(), vec![loc(&["doc", id])]))
        .collect();
    write_artifact(&merged.join(ENTITY_INDEX_FILE), &entities).unwrap();
}

/// (id, head, tail, s1..s15) of every merged relation, ordered by id.
fn merged_relations(merged: &Path) -> Vec<RelationRow> {
    let conn = SqliteConnection::open(&merged.join(MERGED_DB_FILE)).unwrap();
    let mut columns = vec![ID_COLUMN, HEAD_COLUMN, TAIL_COLUMN];
    columns.extend(RELATION_SENSES.iter().copied());
    let mut rows = Vec::new();
    conn.for_each_row(RELATION_TABLE_NAME, &columns, &mut |row| {
        rows.push(RelationRow::from_row(&row).unwrap())
    })
    .unwrap();
    rows.sort_by(|a, b| a.id.cmp(&b.id));
    rows
}

/// Two shards: A has r1 {Result: 2}; B has r1 {Result: 3} and r2 {Result: 1}
/// with an endpoint outside the entity set.
fn two_shard_fixture(shards: &Path, merged: &Path) {
    write_shard(
        shards,
        "a",
        &[relation("r1", "e1", "e2", &[("Result", 2.0)])],
    );
    write_shard(
        shards,
        "b",
        &[
            relation("r1", "e1", "e2", &[("Result", 3.0)]),
            relation("r2", "e9", "e2", &[("Result", 1.0)]),
        ],
    );
    write_entities(merged, &["e1", "e2"]);
}

// ============================================================================
// End-to-end scenarios
// ============================================================================

#[test]
fn test_merge_sums_senses_and_drops_rare_relation() {
    let shards = tempdir().unwrap();
    let merged = tempdir().unwrap();
    two_shard_fixture(shards.path(), merged.path());

    let report = run_merge(&MergeConfig::new(shards.path(), merged.path())).unwrap();

    assert_eq!(report.shards_scanned, 2);
    assert_eq!(report.full_index, CacheOutcome::Built);
    assert_eq!(report.full_relations, 2);
    assert_relative_eq!(report.filter.total_mass, 6.0);
    assert_eq!(report.filter.total_unique, 2);
    assert_relative_eq!(report.filter.kept_mass, 5.0);
    assert_eq!(report.filter.kept_unique, 1);
    assert_eq!(report.filter.below_lower, 1);

    let rows = merged_relations(merged.path());
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].id, "r1");
    assert_eq!(rows[0].head, "e1");
    assert_relative_eq!(rows[0].senses.get("Result"), 5.0);
    assert_relative_eq!(rows[0].frequency_total(), 5.0);

    // r2 was dropped, so core is a restricted copy.
    assert_eq!(
        report.core_index,
        CoreIndexOutcome::Restricted { relations: 1 }
    );
    let core: InvertedIndex = read_artifact(&merged.path().join(CORE_INDEX_FILE)).unwrap();
    assert_eq!(core.keys().collect::<Vec<_>>(), vec!["r1"]);
    assert_eq!(core.get("r1").unwrap(), &[loc(&["a", "r1"]), loc(&["b", "r1"])][..]);
}

#[test]
fn test_upper_fraction_drops_dominant_relation() {
    let shards = tempdir().unwrap();
    let merged = tempdir().unwrap();
    write_shard(
        shards.path(),
        "a",
        &[
            relation("a", "e1", "e2", &[("Reason", 1.0)]),
            relation("b", "e2", "e1", &[("Reason", 1.0)]),
            relation("c", "e1", "e1", &[("Reason", 5.0), ("Result", 3.0)]),
        ],
    );
    write_entities(merged.path(), &["e1", "e2"]);

    let mut config = MergeConfig::new(shards.path(), merged.path());
    config.relation_frequency_lower_cnt_threshold = 0.0;
    config.relation_frequency_upper_percent_threshold = 0.5;
    let report = run_merge(&config).unwrap();

    assert_relative_eq!(report.filter.total_mass, 10.0);
    assert_eq!(report.filter.above_upper, 1);
    assert_eq!(report.filter.kept_unique, 2);
    let ids: Vec<_> = merged_relations(merged.path())
        .into_iter()
        .map(|r| r.id)
        .collect();
    assert_eq!(ids, vec!["a".to_string(), "b".to_string()]);
}

#[test]
fn test_core_aliases_full_when_nothing_dropped() {
    let shards = tempdir().unwrap();
    let merged = tempdir().unwrap();
    write_shard(
        shards.path(),
        "a",
        &[relation("r1", "e1", "e2", &[("Result", 4.0)])],
    );
    write_entities(merged.path(), &["e1", "e2"]);

    let report = run_merge(&MergeConfig::new(shards.path(), merged.path())).unwrap();
    assert_eq!(report.core_index, CoreIndexOutcome::Aliased);
    assert!(!merged.path().join(CORE_INDEX_FILE).exists());

    let store = ArtifactStore::open(merged.path()).unwrap();
    assert!(store.is_alias(CORE_INDEX));
    assert_eq!(
        store.entry(CORE_INDEX),
        Some(&ArtifactRef::Alias {
            target: FULL_INDEX.to_string()
        })
    );
    assert_eq!(
        store.load_index(CORE_INDEX).unwrap(),
        store.load_index(FULL_INDEX).unwrap()
    );
}

#[test]
fn test_missing_entity_set_fails_without_outputs() {
    let shards = tempdir().unwrap();
    let root = tempdir().unwrap();
    let merged = root.path().join("merged");
    write_shard(
        shards.path(),
        "a",
        &[relation("r1", "e1", "e2", &[("Result", 4.0)])],
    );

    let err = run_merge(&MergeConfig::new(shards.path(), &merged)).unwrap_err();
    match err {
        MergeError::MissingPrecondition { file, .. } => assert_eq!(file, ENTITY_INDEX_FILE),
        other => panic!("unexpected error: {other}"),
    }
    assert!(!merged.exists());
}

// ============================================================================
// Full index: determinism and caching
// ============================================================================

#[test]
fn test_full_index_is_deterministic_and_reused() {
    let shards = tempdir().unwrap();
    let first = tempdir().unwrap();
    let second = tempdir().unwrap();
    two_shard_fixture(shards.path(), first.path());
    write_entities(second.path(), &["e1", "e2"]);

    let a = run_merge(&MergeConfig::new(shards.path(), first.path())).unwrap();
    let b = run_merge(&MergeConfig::new(shards.path(), second.path())).unwrap();
    assert_eq!(a.full_index, CacheOutcome::Built);
    assert_eq!(b.full_index, CacheOutcome::Built);
    assert_eq!(
        fs::read(first.path().join(FULL_INDEX_FILE)).unwrap(),
        fs::read(second.path().join(FULL_INDEX_FILE)).unwrap()
    );

    let built = fs::read(first.path().join(FULL_INDEX_FILE)).unwrap();
    let again = run_merge(&MergeConfig::new(shards.path(), first.path())).unwrap();
    assert_eq!(again.full_index, CacheOutcome::Reused);
    assert_eq!(again.full_relations, a.full_relations);
    assert_eq!(fs::read(first.path().join(FULL_INDEX_FILE)).unwrap(), built);
    let reused = ArtifactStore::open(first.path()).unwrap();
    let expected: InvertedIndex = read_artifact(&second.path().join(FULL_INDEX_FILE)).unwrap();
    assert_eq!(reused.load_index(FULL_INDEX).unwrap(), expected);

    let mut rebuild = MergeConfig::new(shards.path(), first.path());
    rebuild.rebuild_index = true;
    assert_eq!(run_merge(&rebuild).unwrap().full_index, CacheOutcome::Built);
}

#[test]
fn test_tampered_full_index_is_rebuilt() {
    let shards = tempdir().unwrap();
    let merged = tempdir().unwrap();
    two_shard_fixture(shards.path(), merged.path());
    run_merge(&MergeConfig::new(shards.path(), merged.path())).unwrap();

    let empty = InvertedIndex::new();
    write_artifact(&merged.path().join(FULL_INDEX_FILE), &empty).unwrap();

    let report = run_merge(&MergeConfig::new(shards.path(), merged.path())).unwrap();
    assert_eq!(report.full_index, CacheOutcome::Built);
    assert_eq!(report.full_relations, 2);
}

#[test]
fn test_premerged_full_index_is_adopted() {
    let shards = tempdir().unwrap();
    let merged = tempdir().unwrap();
    two_shard_fixture(shards.path(), merged.path());

    // Only r1 is listed, so r2 is never a candidate.
    let premerged: InvertedIndex = vec![("r1".to_string(), vec![loc(&["x", "1"])])]
        .into_iter()
        .collect();
    write_artifact(&shards.path().join(FULL_INDEX_FILE), &premerged).unwrap();

    let report = run_merge(&MergeConfig::new(shards.path(), merged.path())).unwrap();
    assert_eq!(report.full_index, CacheOutcome::AdoptedExternal);
    assert_eq!(report.filter.total_unique, 1);
    assert_relative_eq!(report.filter.total_mass, 5.0);
    assert_eq!(report.core_index, CoreIndexOutcome::Aliased);
    assert!(!merged.path().join(FULL_INDEX_FILE).exists());

    let store = ArtifactStore::open(merged.path()).unwrap();
    assert!(matches!(
        store.entry(FULL_INDEX),
        Some(ArtifactRef::External { .. })
    ));
    assert_eq!(store.load_index(CORE_INDEX).unwrap(), premerged);
}

// ============================================================================
// Prefix tagging
// ============================================================================

#[test]
fn test_prefix_tagging_skips_unknown_datasets() {
    let shards = tempdir().unwrap();
    let merged = tempdir().unwrap();
    write_shard(
        shards.path(),
        "nyt_0",
        &[relation("r1", "e1", "e2", &[("Result", 2.0)])],
    );
    write_shard(
        shards.path(),
        "misc_0",
        &[relation("r2", "e1", "e2", &[("Result", 2.0)])],
    );
    write_entities(merged.path(), &["e1", "e2"]);

    let mut config = MergeConfig::new(shards.path(), merged.path());
    config.fix_prefix = true;
    let report = run_merge(&config).unwrap();

    // r2's shard index was skipped, so r2 is not a candidate.
    assert_eq!(report.full_relations, 1);
    assert_eq!(report.filter.total_unique, 1);

    let full: InvertedIndex = read_artifact(&merged.path().join(FULL_INDEX_FILE)).unwrap();
    let prefix = format!(
        "nyt{sep}parsed_para{sep}",
        sep = std::path::MAIN_SEPARATOR
    );
    let sids = full.get("r1").unwrap();
    assert!(sids[0].parts().iter().all(|part| part.starts_with(&prefix)));
}

#[test]
fn test_switching_prefix_mode_invalidates_cached_full_index() {
    let shards = tempdir().unwrap();
    let merged = tempdir().unwrap();
    write_shard(
        shards.path(),
        "nyt_0",
        &[relation("r1", "e1", "e2", &[("Result", 2.0)])],
    );
    write_entities(merged.path(), &["e1", "e2"]);
    let prefix = format!(
        "nyt{sep}parsed_para{sep}",
        sep = std::path::MAIN_SEPARATOR
    );
    let full_parts = || -> Vec<String> {
        let full: InvertedIndex = read_artifact(&merged.path().join(FULL_INDEX_FILE)).unwrap();
        full.get("r1").unwrap()[0].parts().to_vec()
    };

    let plain = MergeConfig::new(shards.path(), merged.path());
    assert_eq!(run_merge(&plain).unwrap().full_index, CacheOutcome::Built);
    assert_eq!(full_parts(), vec!["nyt_0".to_string(), "r1".to_string()]);

    let mut tagged = plain.clone();
    tagged.fix_prefix = true;
    assert_eq!(run_merge(&tagged).unwrap().full_index, CacheOutcome::Built);
    assert!(full_parts().iter().all(|part| part.starts_with(&prefix)));
    assert_eq!(run_merge(&tagged).unwrap().full_index, CacheOutcome::Reused);

    assert_eq!(run_merge(&plain).unwrap().full_index, CacheOutcome::Built);
    assert_eq!(full_parts(), vec!["nyt_0".to_string(), "r1".to_string()]);
}

// ============================================================================
// Re-running over an existing merged table
// ============================================================================

#[test]
fn test_rerun_seeds_from_existing_merged_table() {
    let shards = tempdir().unwrap();
    let merged = tempdir().unwrap();
    two_shard_fixture(shards.path(), merged.path());
    run_merge(&MergeConfig::new(shards.path(), merged.path())).unwrap();

    // The merged r1 (5) is seeded, then both shards are folded in again.
    let report = run_merge(&MergeConfig::new(shards.path(), merged.path())).unwrap();
    assert_relative_eq!(report.filter.total_mass, 11.0);
    assert_eq!(report.relations.removed, 0);

    let rows = merged_relations(merged.path());
    assert_eq!(rows.len(), 1);
    assert_relative_eq!(rows[0].senses.get("Result"), 10.0);
}

#[test]
fn test_rerun_removes_relations_that_no_longer_survive() {
    let shards = tempdir().unwrap();
    let merged = tempdir().unwrap();
    two_shard_fixture(shards.path(), merged.path());
    run_merge(&MergeConfig::new(shards.path(), merged.path())).unwrap();
    assert_eq!(merged_relations(merged.path()).len(), 1);

    let mut strict = MergeConfig::new(shards.path(), merged.path());
    strict.relation_frequency_lower_cnt_threshold = 100.0;
    let report = run_merge(&strict).unwrap();
    assert_eq!(report.filter.kept_unique, 0);
    assert_eq!(report.relations.removed, 1);
    assert!(merged_relations(merged.path()).is_empty());

    let manifest = fs::read_to_string(merged.path().join(MANIFEST_FILE)).unwrap();
    assert!(manifest.contains(CORE_INDEX_FILE));
}
