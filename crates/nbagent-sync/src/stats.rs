//! Cycle statistics: lock-free counters updated while a cycle runs,
//! snapshotted into the final report.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Final counters for one synchronization cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleStats {
    pub records_discovered: u64,
    pub sources_queried: u64,
    pub sources_failed: u64,
    pub duplicates_merged: u64,
    pub assets_after_merge: u64,
    pub unidentified_records: u64,
    pub created: u64,
    pub updated: u64,
    pub skipped: u64,
    pub conflicts: u64,
    pub failures: u64,
}

impl CycleStats {
    /// Total write attempts, successful or not.
    #[must_use]
    pub fn writes_attempted(&self) -> u64 {
        self.created + self.updated + self.failures
    }

    /// A cycle is clean when nothing failed and nothing needs a human.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.sources_failed == 0 && self.failures == 0 && self.conflicts == 0
    }
}

/// Shared counter set, safe to update from concurrent tasks.
#[derive(Debug, Default)]
pub struct StatsTracker {
    records_discovered: AtomicU64,
    sources_queried: AtomicU64,
    sources_failed: AtomicU64,
    duplicates_merged: AtomicU64,
    assets_after_merge: AtomicU64,
    unidentified_records: AtomicU64,
    created: AtomicU64,
    updated: AtomicU64,
    skipped: AtomicU64,
    conflicts: AtomicU64,
    failures: AtomicU64,
}

impl StatsTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_discovered(&self, count: u64) {
        self.records_discovered.fetch_add(count, Ordering::Relaxed);
    }

    pub fn add_sources(&self, queried: u64, failed: u64) {
        self.sources_queried.fetch_add(queried, Ordering::Relaxed);
        self.sources_failed.fetch_add(failed, Ordering::Relaxed);
    }

    pub fn add_merge(&self, duplicates: u64, assets: u64, unidentified: u64) {
        self.duplicates_merged.fetch_add(duplicates, Ordering::Relaxed);
        self.assets_after_merge.fetch_add(assets, Ordering::Relaxed);
        self.unidentified_records
            .fetch_add(unidentified, Ordering::Relaxed);
    }

    pub fn record_created(&self) {
        self.created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_updated(&self) {
        self.updated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_conflict(&self) {
        self.conflicts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn snapshot(&self) -> CycleStats {
        CycleStats {
            records_discovered: self.records_discovered.load(Ordering::Relaxed),
            sources_queried: self.sources_queried.load(Ordering::Relaxed),
            sources_failed: self.sources_failed.load(Ordering::Relaxed),
            duplicates_merged: self.duplicates_merged.load(Ordering::Relaxed),
            assets_after_merge: self.assets_after_merge.load(Ordering::Relaxed),
            unidentified_records: self.unidentified_records.load(Ordering::Relaxed),
            created: self.created.load(Ordering::Relaxed),
            updated: self.updated.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            conflicts: self.conflicts.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}

/// Rolling history of recent cycle statistics. This is the only state
/// the agent keeps across cycles; everything else is rebuilt each run.
#[derive(Debug)]
pub struct MetricsStore {
    capacity: usize,
    entries: Mutex<VecDeque<(DateTime<Utc>, CycleStats)>>,
}

impl MetricsStore {
    /// Keep at most `capacity` recent cycles.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: Mutex::new(VecDeque::new()),
        }
    }

    pub fn record(&self, stats: CycleStats) {
        let mut entries = self.entries.lock().unwrap();
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back((Utc::now(), stats));
    }

    #[must_use]
    pub fn last(&self) -> Option<CycleStats> {
        self.entries
            .lock()
            .unwrap()
            .back()
            .map(|(_, stats)| stats.clone())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sum of every retained cycle's counters.
    #[must_use]
    pub fn totals(&self) -> CycleStats {
        let entries = self.entries.lock().unwrap();
        let mut totals = CycleStats::default();
        for (_, stats) in entries.iter() {
            totals.records_discovered += stats.records_discovered;
            totals.sources_queried += stats.sources_queried;
            totals.sources_failed += stats.sources_failed;
            totals.duplicates_merged += stats.duplicates_merged;
            totals.assets_after_merge += stats.assets_after_merge;
            totals.unidentified_records += stats.unidentified_records;
            totals.created += stats.created;
            totals.updated += stats.updated;
            totals.skipped += stats.skipped;
            totals.conflicts += stats.conflicts;
            totals.failures += stats.failures;
        }
        totals
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracker_accumulates_counts() {
        let tracker = StatsTracker::new();
        tracker.add_discovered(10);
        tracker.add_sources(3, 1);
        tracker.add_merge(4, 6, 1);
        tracker.record_created();
        tracker.record_created();
        tracker.record_updated();
        tracker.record_skipped();
        tracker.record_conflict();
        tracker.record_failure();

        let stats = tracker.snapshot();
        assert_eq!(stats.records_discovered, 10);
        assert_eq!(stats.sources_failed, 1);
        assert_eq!(stats.duplicates_merged, 4);
        assert_eq!(stats.created, 2);
        assert_eq!(stats.writes_attempted(), 4);
        assert!(!stats.is_clean());
    }

    #[test]
    fn metrics_store_caps_history_and_totals() {
        let store = MetricsStore::new(2);
        assert!(store.is_empty());
        for created in [1, 2, 3] {
            store.record(CycleStats {
                created,
                ..CycleStats::default()
            });
        }
        // Oldest entry evicted.
        assert_eq!(store.len(), 2);
        assert_eq!(store.last().unwrap().created, 3);
        assert_eq!(store.totals().created, 5);
    }

    #[test]
    fn clean_cycle_detection() {
        let stats = CycleStats {
            records_discovered: 5,
            sources_queried: 2,
            created: 1,
            skipped: 4,
            ..CycleStats::default()
        };
        assert!(stats.is_clean());
    }
}
