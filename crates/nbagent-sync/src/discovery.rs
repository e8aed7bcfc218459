//! Discovery coordinator: queries all configured sources concurrently
//! and collects their records, isolating per-source failures.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use nbagent_connector::{DiscoveredRecord, Source};
use tracing::{info, warn};

/// Outcome of one discovery pass for a single source.
#[derive(Debug)]
pub struct SourceReport {
    pub name: String,
    pub kind: String,
    pub record_count: usize,
    pub duration_ms: u64,
    /// Error code and message when the source failed.
    pub error: Option<String>,
}

impl SourceReport {
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Aggregated discovery output across all sources.
#[derive(Debug, Default)]
pub struct DiscoveryOutcome {
    /// All records from all successful sources, in source order.
    pub records: Vec<DiscoveredRecord>,
    /// One report per queried source.
    pub reports: Vec<SourceReport>,
    /// Merge priority per source name, for the deduplication step.
    pub priorities: BTreeMap<String, u32>,
}

impl DiscoveryOutcome {
    #[must_use]
    pub fn failed_sources(&self) -> usize {
        self.reports.iter().filter(|r| !r.succeeded()).count()
    }
}

/// Queries every enabled source concurrently, enforcing each source's
/// configured timeout. A failing or slow source never blocks the
/// others; its failure is recorded in the outcome.
pub struct DiscoveryCoordinator {
    sources: Vec<Arc<dyn Source>>,
}

impl DiscoveryCoordinator {
    #[must_use]
    pub fn new(sources: Vec<Arc<dyn Source>>) -> Self {
        Self { sources }
    }

    #[must_use]
    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    pub async fn discover_all(&self) -> DiscoveryOutcome {
        let enabled: Vec<_> = self
            .sources
            .iter()
            .filter(|s| s.settings().enabled)
            .cloned()
            .collect();

        info!(sources = enabled.len(), "starting discovery pass");

        let tasks = enabled.iter().map(|source| {
            let source = source.clone();
            async move {
                let started = Instant::now();
                let timeout = source.settings().timeout();
                let result = tokio::time::timeout(timeout, source.discover()).await;
                let duration_ms = started.elapsed().as_millis() as u64;
                (source, result, duration_ms)
            }
        });

        let mut outcome = DiscoveryOutcome::default();
        for (source, result, duration_ms) in join_all(tasks).await {
            let name = source.name().to_string();
            let kind = source.kind().to_string();
            outcome.priorities.insert(name.clone(), source.priority());

            match result {
                Ok(Ok(records)) => {
                    let records = normalize(records, &name);
                    info!(
                        source = %name,
                        kind = %kind,
                        count = records.len(),
                        duration_ms,
                        "source discovery complete"
                    );
                    outcome.reports.push(SourceReport {
                        name,
                        kind,
                        record_count: records.len(),
                        duration_ms,
                        error: None,
                    });
                    outcome.records.extend(records);
                }
                Ok(Err(err)) => {
                    warn!(
                        source = %name,
                        kind = %kind,
                        error = %err,
                        code = err.error_code(),
                        transient = err.is_transient(),
                        "source discovery failed"
                    );
                    outcome.reports.push(SourceReport {
                        name,
                        kind,
                        record_count: 0,
                        duration_ms,
                        error: Some(format!("{}: {}", err.error_code(), err)),
                    });
                }
                Err(_) => {
                    let timeout_secs = source.settings().timeout_secs;
                    warn!(
                        source = %name,
                        kind = %kind,
                        timeout_secs,
                        "source discovery timed out"
                    );
                    outcome.reports.push(SourceReport {
                        name,
                        kind,
                        record_count: 0,
                        duration_ms,
                        error: Some(format!("TIMEOUT: exceeded {timeout_secs}s")),
                    });
                }
            }
        }

        outcome
    }
}

/// Stamp provenance and drop records that cannot be synced at all.
fn normalize(records: Vec<DiscoveredRecord>, source_name: &str) -> Vec<DiscoveredRecord> {
    records
        .into_iter()
        .filter_map(|mut record| {
            record.name = record.name.trim().to_string();
            if record.name.is_empty() {
                warn!(source = %source_name, "dropping record with empty name");
                return None;
            }
            record.source = source_name.to_string();
            Some(record)
        })
        .collect()
}
