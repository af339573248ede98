//! Durable merge artifacts (index files + manifest).
//!
//! Every named output of a merge run is addressed through
//! `merge_manifest.json` in the output directory:
//!
//! ```text
//! full  -> stored   { path: "rid2sids_full.bin", sha256, params: "fix_prefix=false" }
//!       |  external { path: "/shards/rid2sids_full.bin", sha256 }
//! core  -> alias    { target: "full" }
//!       |  stored   { path: "rid2sids_core.bin", sha256 }
//! ```
//!
//! Consumers resolve a name to a physical file with [`ArtifactStore::resolve`]
//! and never look at the directory directly, so `core := full` costs no
//! second copy and needs no filesystem symlinks.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{MergeError, Result};
use crate::layout::MANIFEST_FILE;
use crate::model::InvertedIndex;

pub const MERGE_MANIFEST_VERSION_V1: &str = "merge_manifest_v1";

// ============================================================================
// Binary artifact files
// ============================================================================

/// Write `value` with bincode to a `.tmp` sibling, then rename into place.
pub fn write_artifact<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("bin.tmp");
    let mut f = io::BufWriter::new(fs::File::create(&tmp)?);
    bincode::serialize_into(&mut f, value).map_err(|source| MergeError::Encode {
        path: path.to_path_buf(),
        source,
    })?;
    f.into_inner().map_err(|e| e.into_error())?.sync_all()?;
    fs::rename(&tmp, path)?;
    Ok(())
}

pub fn read_artifact<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let f = io::BufReader::new(fs::File::open(path)?);
    bincode::deserialize_from(f).map_err(|source| MergeError::Decode {
        path: path.to_path_buf(),
        source,
    })
}

/// Hex SHA-256 of a file, streamed.
pub fn file_digest(path: &Path) -> Result<String> {
    let mut f = fs::File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut f, &mut hasher)?;
    Ok(format!("{:x}", hasher.finalize()))
}

// ============================================================================
// Manifest
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ArtifactRef {
    /// A file inside the output directory (path relative to it), with the
    /// build parameters it was produced under.
    Stored {
        path: String,
        sha256: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        params: Option<String>,
    },
    /// A file adopted by reference from outside the output directory.
    External { path: PathBuf, sha256: String },
    /// Same storage as another named artifact.
    Alias { target: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeManifest {
    pub version: String,
    pub updated_at: DateTime<Utc>,
    pub artifacts: BTreeMap<String, ArtifactRef>,
}

impl Default for MergeManifest {
    fn default() -> Self {
        Self {
            version: MERGE_MANIFEST_VERSION_V1.to_string(),
            updated_at: Utc::now(),
            artifacts: BTreeMap::new(),
        }
    }
}

/// Where an index came from on a cache lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheOutcome {
    /// Adopted by reference from a pre-merged artifact in the shard directory.
    AdoptedExternal,
    /// Loaded from a valid manifest entry of an earlier run.
    Reused,
    /// Computed in this run and stored.
    Built,
}

/// The output directory plus its manifest.
#[derive(Debug)]
pub struct ArtifactStore {
    root: PathBuf,
    manifest: MergeManifest,
}

impl ArtifactStore {
    /// Open `root`, loading its manifest if one exists.
    pub fn open(root: &Path) -> Result<Self> {
        fs::create_dir_all(root)?;
        let manifest_path = root.join(MANIFEST_FILE);
        let manifest = if manifest_path.exists() {
            serde_json::from_str(&fs::read_to_string(&manifest_path)?)?
        } else {
            MergeManifest::default()
        };
        Ok(Self {
            root: root.to_path_buf(),
            manifest,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn entry(&self, name: &str) -> Option<&ArtifactRef> {
        self.manifest.artifacts.get(name)
    }

    /// Follow aliases from `name` to a physical entry.
    fn resolve_entry(&self, name: &str) -> Result<Option<Resolved<'_>>> {
        let mut current = name;
        let mut hops = 0usize;
        loop {
            let Some(entry) = self.manifest.artifacts.get(current) else {
                return Ok(None);
            };
            match entry {
                ArtifactRef::Stored {
                    path,
                    sha256,
                    params,
                } => {
                    return Ok(Some(Resolved {
                        path: self.root.join(path),
                        sha256,
                        params: params.as_deref(),
                    }))
                }
                ArtifactRef::External { path, sha256 } => {
                    return Ok(Some(Resolved {
                        path: path.clone(),
                        sha256,
                        params: None,
                    }))
                }
                ArtifactRef::Alias { target } => {
                    hops += 1;
                    if hops > self.manifest.artifacts.len() {
                        return Err(MergeError::AliasCycle(name.to_string()));
                    }
                    current = target;
                }
            }
        }
    }

    /// Physical file behind `name`, following aliases.
    pub fn resolve(&self, name: &str) -> Result<Option<PathBuf>> {
        Ok(self.resolve_entry(name)?.map(|resolved| resolved.path))
    }

    /// A name is valid when its file exists and still has the recorded digest.
    pub fn is_valid(&self, name: &str) -> Result<bool> {
        let Some(resolved) = self.resolve_entry(name)? else {
            return Ok(false);
        };
        if !resolved.path.is_file() {
            return Ok(false);
        }
        Ok(file_digest(&resolved.path)? == resolved.sha256)
    }

    /// Valid, and produced under exactly `params`.
    pub fn is_valid_for(&self, name: &str, params: &str) -> Result<bool> {
        let recorded = match self.resolve_entry(name)? {
            Some(resolved) => resolved.params == Some(params),
            None => false,
        };
        Ok(recorded && self.is_valid(name)?)
    }

    pub fn is_alias(&self, name: &str) -> bool {
        matches!(self.entry(name), Some(ArtifactRef::Alias { .. }))
    }

    /// Write `index` to `file_name` inside the output directory and record it.
    pub fn store_index(&mut self, name: &str, file_name: &str, index: &InvertedIndex) -> Result<()> {
        self.write_stored(name, file_name, None, index)
    }

    /// [`store_index`](Self::store_index), tagging the entry with the build
    /// parameters a later lookup must match.
    pub fn store_index_with_params(
        &mut self,
        name: &str,
        file_name: &str,
        params: &str,
        index: &InvertedIndex,
    ) -> Result<()> {
        self.write_stored(name, file_name, Some(params), index)
    }

    fn write_stored(
        &mut self,
        name: &str,
        file_name: &str,
        params: Option<&str>,
        index: &InvertedIndex,
    ) -> Result<()> {
        let path = self.root.join(file_name);
        write_artifact(&path, index)?;
        let sha256 = file_digest(&path)?;
        self.record(
            name,
            ArtifactRef::Stored {
                path: file_name.to_string(),
                sha256,
                params: params.map(str::to_string),
            },
        )
    }

    /// Record an existing file outside the output directory under `name`.
    pub fn adopt_external(&mut self, name: &str, path: &Path) -> Result<()> {
        let path = path.canonicalize()?;
        let sha256 = file_digest(&path)?;
        self.record(name, ArtifactRef::External { path, sha256 })
    }

    /// Record `name := target`. The target must already be recorded.
    pub fn alias(&mut self, name: &str, target: &str) -> Result<()> {
        if self.entry(target).is_none() {
            return Err(MergeError::UnknownArtifact(target.to_string()));
        }
        self.record(
            name,
            ArtifactRef::Alias {
                target: target.to_string(),
            },
        )
    }

    /// Load the index behind `name`, following aliases.
    pub fn load_index(&self, name: &str) -> Result<InvertedIndex> {
        let path = self
            .resolve(name)?
            .ok_or_else(|| MergeError::UnknownArtifact(name.to_string()))?;
        read_artifact(&path)
    }

    fn record(&mut self, name: &str, entry: ArtifactRef) -> Result<()> {
        let previous = self.manifest.artifacts.insert(name.to_string(), entry);
        if let Some(ArtifactRef::Stored { path, .. }) = previous {
            if !self.stores_path(&path) {
                let stale = self.root.join(&path);
                if stale.exists() {
                    tracing::debug!(path = %stale.display(), "removing unreferenced artifact file");
                    fs::remove_file(stale)?;
                }
            }
        }
        self.save()
    }

    fn stores_path(&self, file_name: &str) -> bool {
        self.manifest
            .artifacts
            .values()
            .any(|entry| matches!(entry, ArtifactRef::Stored { path, .. } if path == file_name))
    }

    pub fn save(&mut self) -> Result<()> {
        self.manifest.updated_at = Utc::now();
        let path = self.root.join(MANIFEST_FILE);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_string_pretty(&self.manifest)?)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }
}

/// A manifest entry with aliases followed.
struct Resolved<'a> {
    path: PathBuf,
    sha256: &'a str,
    params: Option<&'a str>,
}

// ============================================================================
// Cache lookup
// ============================================================================

/// "Load if present and valid, else compute and store."
///
/// `params` identifies how the index is built; an entry recorded under
/// different parameters is a miss.
pub trait IndexCache {
    /// The cached index under `name`, if present, valid and built with `params`.
    fn lookup(&self, name: &str, params: &str) -> Result<Option<InvertedIndex>>;

    fn store(
        &mut self,
        name: &str,
        file_name: &str,
        params: &str,
        index: &InvertedIndex,
    ) -> Result<()>;

    fn get_or_build<F>(
        &mut self,
        name: &str,
        file_name: &str,
        params: &str,
        build: F,
    ) -> Result<(InvertedIndex, CacheOutcome)>
    where
        Self: Sized,
        F: FnOnce() -> Result<InvertedIndex>,
    {
        if let Some(index) = self.lookup(name, params)? {
            return Ok((index, CacheOutcome::Reused));
        }
        let index = build()?;
        self.store(name, file_name, params, &index)?;
        Ok((index, CacheOutcome::Built))
    }
}

impl IndexCache for ArtifactStore {
    fn lookup(&self, name: &str, params: &str) -> Result<Option<InvertedIndex>> {
        if !self.is_valid_for(name, params)? {
            return Ok(None);
        }
        self.load_index(name).map(Some)
    }

    fn store(
        &mut self,
        name: &str,
        file_name: &str,
        params: &str,
        index: &InvertedIndex,
    ) -> Result<()> {
        self.store_index_with_params(name, file_name, params, index)
    }
}
