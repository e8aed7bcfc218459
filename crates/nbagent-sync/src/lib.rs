//! Synchronization engine for the NetBox discovery agent.
//!
//! The pipeline runs in five stages, orchestrated by [`CycleRunner`]:
//!
//! 1. discovery — query all sources concurrently ([`discovery`])
//! 2. deduplication — correlate and merge records ([`dedup`])
//! 3. snapshot — one-shot read of the inventory ([`snapshot`])
//! 4. reconciliation — plan and apply changes ([`reconcile`])
//! 5. reporting — counters and the cycle report ([`stats`], [`report`])

pub mod cycle;
pub mod dedup;
pub mod discovery;
pub mod reconcile;
pub mod report;
pub mod snapshot;
pub mod stats;

pub use cycle::{CycleError, CycleRunner, SyncConfig};
pub use dedup::{DedupConfig, DedupSummary, Deduplicator, IdentityField, MergeStrategy, MergedRecord};
pub use discovery::{DiscoveryCoordinator, DiscoveryOutcome, SourceReport};
pub use reconcile::{
    ApplyStatus, ConflictPolicy, Decision, ReconcileConfig, Reconciler, RefSpec, SyncAction,
    SyncOutcome,
};
pub use report::{ActionSummary, CycleReport, SourceSummary};
pub use snapshot::{content_hash, Snapshot, SnapshotEntry};
pub use stats::{CycleStats, MetricsStore, StatsTracker};
