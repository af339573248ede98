//! Merge run configuration.

use std::path::{Path, PathBuf};

use kgmerge_store::Backend;
use serde::{Deserialize, Serialize};

use crate::error::{MergeError, Result};
use crate::filter::FilterThresholds;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    /// Directory holding the shard indices and shard databases.
    pub kg_path: PathBuf,
    /// Output directory for the merged database, indices and log.
    pub merged_kg_path: PathBuf,
    /// Storage backend name. Only `sqlite` is implemented.
    pub backend: String,
    /// Tag sentence locations with `<dataset>/parsed_para/`.
    pub fix_prefix: bool,
    /// Ignore a cached full index from an earlier run.
    pub rebuild_index: bool,
    pub relation_frequency_lower_cnt_threshold: f64,
    pub relation_frequency_upper_percent_threshold: f64,
}

impl Default for MergeConfig {
    fn default() -> Self {
        let thresholds = FilterThresholds::default();
        Self {
            kg_path: PathBuf::new(),
            merged_kg_path: PathBuf::new(),
            backend: Backend::default().to_string(),
            fix_prefix: false,
            rebuild_index: false,
            relation_frequency_lower_cnt_threshold: thresholds.lower_count,
            relation_frequency_upper_percent_threshold: thresholds.upper_fraction,
        }
    }
}

impl MergeConfig {
    pub fn new(kg_path: impl Into<PathBuf>, merged_kg_path: impl Into<PathBuf>) -> Self {
        Self {
            kg_path: kg_path.into(),
            merged_kg_path: merged_kg_path.into(),
            ..Default::default()
        }
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn backend(&self) -> Result<Backend> {
        Ok(self.backend.parse::<Backend>()?)
    }

    pub fn thresholds(&self) -> FilterThresholds {
        FilterThresholds {
            lower_count: self.relation_frequency_lower_cnt_threshold,
            upper_fraction: self.relation_frequency_upper_percent_threshold,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.kg_path.as_os_str().is_empty() {
            return Err(MergeError::InvalidConfig("kg_path is required".into()));
        }
        if self.merged_kg_path.as_os_str().is_empty() {
            return Err(MergeError::InvalidConfig(
                "merged_kg_path is required".into(),
            ));
        }
        let lower = self.relation_frequency_lower_cnt_threshold;
        if !lower.is_finite() || lower < 0.0 {
            return Err(MergeError::InvalidConfig(format!(
                "relation_frequency_lower_cnt_threshold must be a non-negative number, got {lower}"
            )));
        }
        let upper = self.relation_frequency_upper_percent_threshold;
        if !(0.0..=1.0).contains(&upper) {
            return Err(MergeError::InvalidConfig(format!(
                "relation_frequency_upper_percent_threshold must be in [0, 1], got {upper}"
            )));
        }
        self.backend()?;
        Ok(())
    }
}
