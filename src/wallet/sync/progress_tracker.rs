//! Progress tracking for card synchronization.
//!
//! This module provides the `SyncProgressTracker`, which records what one sync cycle did: objects
//! added and removed by the merge, spends merged from the tag, spends settled, failed or left
//! pending, and the bytes written back. The orchestrator returns the resulting `SyncReport` to the
//! caller and logs its summary.

use std::time::{Duration, Instant};
use tracing::info;

/// Service for tracking the progress of one sync cycle
#[derive(Debug, Clone)]
pub struct SyncProgressTracker {
    /// Card being synchronized, once known
    card_id: Option<String>,
    /// When the cycle started
    started_at: Instant,
    /// Whether the tag created a new card
    new_card: bool,
    objects_added: usize,
    objects_removed: usize,
    /// Spends first seen on the tag
    spends_merged: usize,
    /// Spends on the tag that collapsed into known ones or were already resolved
    spends_dropped: usize,
    spends_settled: usize,
    spends_failed: usize,
    spends_pending: usize,
    /// Whether the merge changed the store
    store_changed: bool,
    bytes_written: Option<usize>,
}

impl Default for SyncProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncProgressTracker {
    /// Create a new progress tracker for a cycle starting now.
    pub fn new() -> Self {
        Self {
            card_id: None,
            started_at: Instant::now(),
            new_card: false,
            objects_added: 0,
            objects_removed: 0,
            spends_merged: 0,
            spends_dropped: 0,
            spends_settled: 0,
            spends_failed: 0,
            spends_pending: 0,
            store_changed: false,
            bytes_written: None,
        }
    }

    pub fn record_card(&mut self, card_id: &str, new_card: bool) {
        self.card_id = Some(card_id.to_string());
        self.new_card = new_card;
    }

    /// Record the effect of a committed merge plan
    pub fn record_merge(
        &mut self,
        objects_added: usize,
        objects_removed: usize,
        spends_merged: usize,
        spends_dropped: usize,
        store_changed: bool,
    ) {
        self.objects_added = objects_added;
        self.objects_removed = objects_removed;
        self.spends_merged = spends_merged;
        self.spends_dropped = spends_dropped;
        self.store_changed = store_changed;
    }

    pub fn record_settled(&mut self) {
        self.spends_settled += 1;
    }

    pub fn record_failed(&mut self) {
        self.spends_failed += 1;
    }

    pub fn record_still_pending(&mut self) {
        self.spends_pending += 1;
    }

    pub fn record_written(&mut self, bytes: usize) {
        self.bytes_written = Some(bytes);
    }

    /// Log the current progress
    pub fn log_progress(&self) {
        info!(
            "Sync progress for {:?}: {} settled, {} failed, {} pending after {:?}",
            self.card_id,
            self.spends_settled,
            self.spends_failed,
            self.spends_pending,
            self.started_at.elapsed()
        );
    }

    /// Get the report of this cycle
    pub fn get_report(&self) -> SyncReport {
        SyncReport {
            card_id: self.card_id.clone().unwrap_or_default(),
            new_card: self.new_card,
            objects_added: self.objects_added,
            objects_removed: self.objects_removed,
            spends_merged: self.spends_merged,
            spends_dropped: self.spends_dropped,
            spends_settled: self.spends_settled,
            spends_failed: self.spends_failed,
            spends_pending: self.spends_pending,
            store_changed: self.store_changed,
            bytes_written: self.bytes_written,
            elapsed: self.started_at.elapsed(),
        }
    }
}

/// Outcome of one sync cycle
///
/// `bytes_written` is `None` when the tag could not be written; the store is still reconciled in
/// that case and the tag catches up on the next cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub card_id: String,
    pub new_card: bool,
    pub objects_added: usize,
    pub objects_removed: usize,
    pub spends_merged: usize,
    pub spends_dropped: usize,
    pub spends_settled: usize,
    pub spends_failed: usize,
    pub spends_pending: usize,
    pub store_changed: bool,
    pub bytes_written: Option<usize>,
    pub elapsed: Duration,
}

impl SyncReport {
    /// True when the cycle neither changed the store nor resolved any spend.
    pub fn is_noop(&self) -> bool {
        !self.store_changed && self.spends_settled == 0 && self.spends_failed == 0
    }

    /// Get a human-readable summary of the report
    pub fn summary(&self) -> String {
        format!(
            "+{} -{} objects, {} merged, {} dropped, {} settled, {} failed, {} pending, {}",
            self.objects_added,
            self.objects_removed,
            self.spends_merged,
            self.spends_dropped,
            self.spends_settled,
            self.spends_failed,
            self.spends_pending,
            match self.bytes_written {
                Some(bytes) => format!("{} bytes written", bytes),
                None => "tag not written".to_string(),
            }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_reflects_recorded_work() {
        let mut tracker = SyncProgressTracker::new();
        tracker.record_card("c1", false);
        tracker.record_merge(1, 0, 2, 1, true);
        tracker.record_settled();
        tracker.record_still_pending();
        tracker.record_written(120);

        let report = tracker.get_report();
        assert_eq!(report.card_id, "c1");
        assert!(!report.is_noop());
        assert_eq!(
            report.summary(),
            "+1 -0 objects, 2 merged, 1 dropped, 1 settled, 0 failed, 1 pending, 120 bytes written"
        );
    }

    #[test]
    fn untouched_cycle_is_noop() {
        let mut tracker = SyncProgressTracker::new();
        tracker.record_card("c1", false);
        tracker.record_still_pending();
        assert!(tracker.get_report().is_noop());
    }
}
