//! Index Unifier: union of every shard inverted index into the full index.

use std::path::PathBuf;

use crate::artifacts::{read_artifact, ArtifactStore, CacheOutcome, IndexCache};
use crate::error::Result;
use crate::layout::{shard_index_files, FULL_INDEX, FULL_INDEX_FILE};
use crate::model::InvertedIndex;

/// Dataset names recognized when tagging locations with a source prefix.
pub const KNOWN_DATASETS: [&str; 6] = [
    "nyt",
    "yelp",
    "wikipedia",
    "reddit",
    "subtitles",
    "gutenberg",
];

/// `<dataset>/parsed_para/` for the first known dataset named in
/// `file_name`, if any.
pub fn dataset_prefix(file_name: &str) -> Option<String> {
    let sep = std::path::MAIN_SEPARATOR;
    KNOWN_DATASETS
        .iter()
        .find(|d| file_name.contains(*d))
        .map(|d| format!("{d}{sep}parsed_para{sep}"))
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnifyStats {
    pub shards_merged: usize,
    /// Shards dropped in prefix mode because no known dataset matched.
    pub shards_skipped: Vec<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct IndexUnifier {
    shard_dir: PathBuf,
    fix_prefix: bool,
    rebuild: bool,
}

impl IndexUnifier {
    pub fn new(shard_dir: impl Into<PathBuf>) -> Self {
        Self {
            shard_dir: shard_dir.into(),
            fix_prefix: false,
            rebuild: false,
        }
    }

    /// Tag every location with its shard's dataset prefix.
    pub fn with_prefix_tagging(mut self, enabled: bool) -> Self {
        self.fix_prefix = enabled;
        self
    }

    /// Ignore a cached full index in the output directory.
    pub fn with_rebuild(mut self, rebuild: bool) -> Self {
        self.rebuild = rebuild;
        self
    }

    /// Build parameters recorded with the stored full index. A cached index
    /// built under different parameters is not reused.
    pub fn build_params(&self) -> String {
        format!("fix_prefix={}", self.fix_prefix)
    }

    /// Produce the full index for this shard set, recording it in `store`.
    ///
    /// Lookup order: a pre-merged `rid2sids_full.bin` in the shard directory
    /// is adopted by reference; then a valid `full` entry of an earlier run
    /// built with the same parameters; otherwise the shards are merged and
    /// the result stored once.
    pub fn unify(&self, store: &mut ArtifactStore) -> Result<(InvertedIndex, CacheOutcome)> {
        let premerged = self.shard_dir.join(FULL_INDEX_FILE);
        if premerged.is_file() {
            tracing::info!(
                path = %premerged.display(),
                "pre-merged full index found in shard directory; adopting it by reference"
            );
            store.adopt_external(FULL_INDEX, &premerged)?;
            let index = store.load_index(FULL_INDEX)?;
            return Ok((index, CacheOutcome::AdoptedExternal));
        }

        let params = self.build_params();
        let build = || -> Result<InvertedIndex> {
            tracing::info!(dir = %self.shard_dir.display(), "generating inverted tables");
            let (index, stats) = self.merge_shards()?;
            tracing::info!(
                shards = stats.shards_merged,
                skipped = stats.shards_skipped.len(),
                relations = index.len(),
                locations = index.location_count(),
                "storing inverted tables"
            );
            Ok(index)
        };

        if self.rebuild {
            let index = build()?;
            store.store(FULL_INDEX, FULL_INDEX_FILE, &params, &index)?;
            return Ok((index, CacheOutcome::Built));
        }

        let (index, outcome) = store.get_or_build(FULL_INDEX, FULL_INDEX_FILE, &params, build)?;
        if outcome == CacheOutcome::Reused {
            tracing::info!(relations = index.len(), %params, "reusing full index from an earlier run");
        }
        Ok((index, outcome))
    }

    /// Merge every shard index in file-name order, concatenating location
    /// lists per relation.
    pub fn merge_shards(&self) -> Result<(InvertedIndex, UnifyStats)> {
        let mut full = InvertedIndex::new();
        let mut stats = UnifyStats::default();

        for path in shard_index_files(&self.shard_dir)? {
            let file_name = path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or_default()
                .to_string();

            let prefix = if self.fix_prefix {
                match dataset_prefix(&file_name) {
                    Some(prefix) => Some(prefix),
                    None => {
                        // Unknown datasets are left out of the full index.
                        tracing::warn!(
                            path = %path.display(),
                            datasets = ?KNOWN_DATASETS,
                            "shard index matches no known dataset; its relations are skipped"
                        );
                        stats.shards_skipped.push(path);
                        continue;
                    }
                }
            } else {
                None
            };

            tracing::info!(path = %path.display(), "connecting shard index");
            let shard: InvertedIndex = read_artifact(&path)?;
            match prefix {
                Some(prefix) => {
                    for (rid, sids) in shard {
                        full.extend_locations(rid, sids.iter().map(|sid| sid.with_prefix(&prefix)));
                    }
                }
                None => full.append(shard),
            }
            stats.shards_merged += 1;
        }

        Ok((full, stats))
    }
}
