//! On-disk naming conventions for shard and merged directories.

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::Result;

/// Manifest names of the two merged inverted indices.
pub const FULL_INDEX: &str = "full";
pub const CORE_INDEX: &str = "core";

pub const SHARD_INDEX_PREFIX: &str = "rid2sids";
pub const INDEX_EXTENSION: &str = ".bin";
pub const FULL_INDEX_FILE: &str = "rid2sids_full.bin";
pub const CORE_INDEX_FILE: &str = "rid2sids_core.bin";

pub const SHARD_DB_PREFIX: &str = "KG";
pub const DB_EXTENSION: &str = ".db";
pub const MERGED_DB_FILE: &str = "KG.db";

pub const ENTITY_INDEX_FILE: &str = "eid2sids_core.bin";
pub const MANIFEST_FILE: &str = "merge_manifest.json";
pub const LOG_FILE: &str = "merge_kg.log";

/// Shard inverted indices: `rid2sids*.bin`, minus the reserved merged names.
pub fn is_shard_index_name(file_name: &str) -> bool {
    file_name.starts_with(SHARD_INDEX_PREFIX)
        && file_name.ends_with(INDEX_EXTENSION)
        && file_name != FULL_INDEX_FILE
        && file_name != CORE_INDEX_FILE
}

/// Shard databases: `KG*.db`.
pub fn is_shard_db_name(file_name: &str) -> bool {
    file_name.starts_with(SHARD_DB_PREFIX) && file_name.ends_with(DB_EXTENSION)
}

/// List files directly inside `dir` whose name passes `accept`, sorted by
/// file name so shard visitation order is stable across runs.
pub fn list_files(dir: &Path, accept: impl Fn(&str) -> bool) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(name) = entry.file_name().to_str() else {
            continue;
        };
        if accept(name) {
            out.push(entry.into_path());
        }
    }
    Ok(out)
}

pub fn shard_index_files(dir: &Path) -> Result<Vec<PathBuf>> {
    list_files(dir, is_shard_index_name)
}

pub fn shard_db_files(dir: &Path) -> Result<Vec<PathBuf>> {
    list_files(dir, is_shard_db_name)
}
