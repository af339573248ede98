//! KGMerge: merge independently built knowledge-graph shards into one graph.
//!
//! ```text
//!   shard dir                                   merged dir
//!  ┌──────────────────┐                        ┌──────────────────────┐
//!  │ rid2sids_*.bin   │──► IndexUnifier ──────►│ rid2sids_full.bin    │
//!  │                  │        │               │                      │
//!  │ KG*.db           │──► FrequencyAggregator │                      │
//!  └──────────────────┘        │               │                      │
//!                              ▼               │                      │
//!   eid2sids_core.bin ──► RelationFilter       │                      │
//!                              │               │                      │
//!                              ▼               │                      │
//!                       Core Materializer ────►│ KG.db  (Relations)   │
//!                                              │ rid2sids_core.bin    │
//!                                              │   or core := full    │
//!                                              │ merge_manifest.json  │
//!                                              └──────────────────────┘
//! ```
//!
//! A relation survives when its aggregated frequency is at least the lower
//! count threshold, at most `upper_fraction * GrandTotal`, and both of its
//! endpoints are in the entity membership set.

pub mod aggregate;
pub mod artifacts;
pub mod config;
pub mod error;
pub mod filter;
pub mod layout;
pub mod materialize;
pub mod model;
pub mod pipeline;
pub mod unify;

pub use aggregate::{Aggregate, FrequencyAggregator, ScanStats};
pub use artifacts::{ArtifactRef, ArtifactStore, CacheOutcome, IndexCache, MergeManifest};
pub use config::MergeConfig;
pub use error::{MergeError, Result};
pub use filter::{DropReason, FilterDecision, FilterReport, FilterThresholds, RelationFilter};
pub use materialize::{CoreIndexOutcome, RelationWriteStats};
pub use model::{
    EntityId, EntityIndex, InvertedIndex, RelationId, RelationRow, SenseVector, SentenceLocation,
};
pub use pipeline::{run_merge, MergeReport};
pub use unify::{IndexUnifier, UnifyStats};
