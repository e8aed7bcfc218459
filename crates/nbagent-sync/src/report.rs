//! The cycle report: everything one synchronization cycle did, in a
//! serializable form for logs and the CLI.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::reconcile::{ApplyStatus, SyncAction, SyncOutcome};
use crate::stats::CycleStats;

/// Per-source section of the report.
#[derive(Debug, Clone, Serialize)]
pub struct SourceSummary {
    pub name: String,
    pub kind: String,
    pub records: usize,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Per-asset line item of the report.
#[derive(Debug, Clone, Serialize)]
pub struct ActionSummary {
    pub name: String,
    pub action: SyncAction,
    pub outcome: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub reason: String,
}

impl From<&SyncOutcome> for ActionSummary {
    fn from(outcome: &SyncOutcome) -> Self {
        let outcome_str = match &outcome.status {
            ApplyStatus::Created { id } => format!("created (id {id})"),
            ApplyStatus::Updated { id } => format!("updated (id {id})"),
            ApplyStatus::Skipped => "skipped".to_string(),
            ApplyStatus::ConflictRecorded => "conflict".to_string(),
            ApplyStatus::Previewed => "previewed".to_string(),
            ApplyStatus::Failed { error } => format!("failed: {error}"),
        };
        Self {
            name: outcome.name.clone(),
            action: outcome.action,
            outcome: outcome_str,
            reason: outcome.reason.clone(),
        }
    }
}

/// Full record of one synchronization cycle.
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub cycle_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// True when this cycle previewed changes without applying them.
    pub dry_run: bool,
    pub stats: CycleStats,
    pub sources: Vec<SourceSummary>,
    pub actions: Vec<ActionSummary>,
}

impl CycleReport {
    #[must_use]
    pub fn duration_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }

    /// One-line summary for the end-of-cycle log.
    #[must_use]
    pub fn summary_line(&self) -> String {
        let mode = if self.dry_run { "dry-run" } else { "applied" };
        format!(
            "{mode}: {} discovered, {} merged, {} created, {} updated, {} skipped, {} conflicts, {} failures ({}ms)",
            self.stats.records_discovered,
            self.stats.assets_after_merge,
            self.stats.created,
            self.stats.updated,
            self.stats.skipped,
            self.stats.conflicts,
            self.stats.failures,
            self.duration_ms()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_line_reflects_mode_and_counts() {
        let report = CycleReport {
            cycle_id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: Utc::now(),
            dry_run: true,
            stats: CycleStats {
                records_discovered: 7,
                assets_after_merge: 5,
                created: 2,
                skipped: 3,
                ..CycleStats::default()
            },
            sources: Vec::new(),
            actions: Vec::new(),
        };
        let line = report.summary_line();
        assert!(line.starts_with("dry-run"));
        assert!(line.contains("7 discovered"));
        assert!(line.contains("2 created"));
    }

    #[test]
    fn action_summary_from_outcome() {
        let outcome = SyncOutcome {
            name: "host-1".into(),
            action: SyncAction::Create,
            status: ApplyStatus::Created { id: 12 },
            reason: "not present in inventory".into(),
        };
        let summary = ActionSummary::from(&outcome);
        assert_eq!(summary.outcome, "created (id 12)");
    }
}
