use std::path::PathBuf;

use kgmerge_store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum MergeError {
    /// A required input artifact produced by an upstream step is absent.
    #[error("{file} is not found in {}; generate it first", dir.display())]
    MissingPrecondition { file: String, dir: PathBuf },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("artifact `{0}` is not recorded in the manifest")]
    UnknownArtifact(String),

    #[error("artifact alias cycle through `{0}`")]
    AliasCycle(String),

    #[error("failed to decode {}: {source}", path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: bincode::Error,
    },

    #[error("failed to encode {}: {source}", path.display())]
    Encode {
        path: PathBuf,
        #[source]
        source: bincode::Error,
    },

    #[error("malformed relation row: {0}")]
    MalformedRow(String),

    #[error("manifest error: {0}")]
    Manifest(#[from] serde_json::Error),

    #[error("directory listing failed: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, MergeError>;
