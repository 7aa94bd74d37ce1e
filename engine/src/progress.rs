//! Sync progress counters published to observers.

use crate::Timestamp;
use serde::{Deserialize, Serialize};

/// Snapshot of a sync cycle's progress.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncProgress {
    /// Operations in the cycle's snapshot
    pub total: usize,
    /// Applied (or found already applied) and removed from the queue
    pub completed: usize,
    /// Moved to the conflict log
    pub failed: usize,
    /// Whether a cycle is running
    pub in_progress: bool,
    /// End of the last finished cycle
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync_time: Option<Timestamp>,
}

impl SyncProgress {
    /// Start a new cycle, carrying over the last sync time.
    pub fn begin(total: usize, last_sync_time: Option<Timestamp>) -> Self {
        Self {
            total,
            completed: 0,
            failed: 0,
            in_progress: true,
            last_sync_time,
        }
    }

    pub fn record_completed(&mut self) {
        self.completed += 1;
    }

    pub fn record_failed(&mut self) {
        self.failed += 1;
    }

    /// Close the cycle.
    pub fn finish(&mut self, now: Timestamp) {
        self.in_progress = false;
        self.last_sync_time = Some(now);
    }

    /// Operations that neither completed nor failed (still queued).
    pub fn pending(&self) -> usize {
        self.total.saturating_sub(self.completed + self.failed)
    }
}
