//! The cycle orchestrator: discover, deduplicate, snapshot, plan,
//! apply (or preview), report.

use std::sync::Arc;

use chrono::Utc;
use nbagent_connector::Source;
use nbagent_netbox::{Inventory, NetBoxError};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info};
use uuid::Uuid;

use crate::dedup::{DedupConfig, Deduplicator};
use crate::discovery::DiscoveryCoordinator;
use crate::reconcile::{ApplyStatus, ReconcileConfig, Reconciler};
use crate::report::{ActionSummary, CycleReport, SourceSummary};
use crate::snapshot::Snapshot;
use crate::stats::StatsTracker;

/// Errors that abort a cycle outright. Per-source and per-device
/// failures do not abort; they are carried in the report.
#[derive(Error, Debug)]
pub enum CycleError {
    /// The inventory snapshot could not be built. Reconciling without
    /// it would mis-decide every record, so the cycle stops here.
    #[error("inventory snapshot failed: {0}")]
    Snapshot(#[source] NetBoxError),

    /// Planning needed inventory lookups and they failed.
    #[error("reconciliation planning failed: {0}")]
    Planning(#[source] NetBoxError),
}

/// Configuration for the full synchronization pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub dedup: DedupConfig,
    #[serde(default)]
    pub reconcile: ReconcileConfig,
}

/// Runs complete synchronization cycles.
pub struct CycleRunner {
    coordinator: DiscoveryCoordinator,
    inventory: Arc<dyn Inventory>,
    dedup: Deduplicator,
    reconciler: Reconciler,
}

impl CycleRunner {
    #[must_use]
    pub fn new(
        sources: Vec<Arc<dyn Source>>,
        inventory: Arc<dyn Inventory>,
        config: SyncConfig,
    ) -> Self {
        Self {
            coordinator: DiscoveryCoordinator::new(sources),
            dedup: Deduplicator::new(config.dedup),
            reconciler: Reconciler::new(inventory.clone(), config.reconcile),
            inventory,
        }
    }

    /// Run one cycle. With `dry_run`, decisions are computed and
    /// reported but nothing is written to the inventory.
    pub async fn run(&self, dry_run: bool) -> Result<CycleReport, CycleError> {
        let cycle_id = Uuid::new_v4();
        let started_at = Utc::now();
        let stats = StatsTracker::new();
        info!(%cycle_id, dry_run, "cycle started");

        // Discover.
        let discovery = self.coordinator.discover_all().await;
        stats.add_discovered(discovery.records.len() as u64);
        stats.add_sources(
            discovery.reports.len() as u64,
            discovery.failed_sources() as u64,
        );

        // Deduplicate.
        let (merged, dedup_summary) = self
            .dedup
            .dedupe(discovery.records, &discovery.priorities);
        stats.add_merge(
            dedup_summary.duplicates_merged as u64,
            dedup_summary.merged_assets as u64,
            dedup_summary.unidentified as u64,
        );

        // Snapshot the inventory; a failure here aborts the cycle.
        let snapshot = match Snapshot::build(self.inventory.as_ref()).await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                error!(%cycle_id, error = %err, "aborting cycle, snapshot unavailable");
                return Err(CycleError::Snapshot(err));
            }
        };

        // Plan.
        let decisions = self
            .reconciler
            .plan(&merged, &snapshot)
            .await
            .map_err(CycleError::Planning)?;

        // Apply or preview.
        let outcomes = self.reconciler.apply(decisions, dry_run).await;
        for outcome in &outcomes {
            match &outcome.status {
                ApplyStatus::Created { .. } => stats.record_created(),
                ApplyStatus::Updated { .. } => stats.record_updated(),
                ApplyStatus::Skipped => stats.record_skipped(),
                ApplyStatus::ConflictRecorded => stats.record_conflict(),
                ApplyStatus::Failed { .. } => stats.record_failure(),
                ApplyStatus::Previewed => match outcome.action {
                    crate::reconcile::SyncAction::Create => stats.record_created(),
                    crate::reconcile::SyncAction::Update => stats.record_updated(),
                    _ => stats.record_skipped(),
                },
            }
        }

        let report = CycleReport {
            cycle_id,
            started_at,
            finished_at: Utc::now(),
            dry_run,
            stats: stats.snapshot(),
            sources: discovery
                .reports
                .iter()
                .map(|r| SourceSummary {
                    name: r.name.clone(),
                    kind: r.kind.clone(),
                    records: r.record_count,
                    duration_ms: r.duration_ms,
                    error: r.error.clone(),
                })
                .collect(),
            actions: outcomes.iter().map(ActionSummary::from).collect(),
        };

        info!(%cycle_id, summary = %report.summary_line(), "cycle finished");
        Ok(report)
    }
}
