//! Sync pass results and coordinator status.

use std::collections::VecDeque;

use chrono::Utc;
use ferry_engine::Timestamp;
use serde::Serialize;

/// Capacity of the strategy-level error log.
pub const ERROR_LOG_CAPACITY: usize = 10;

/// Outcome counts of one execution pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResult {
    pub success: usize,
    pub failed: usize,
    /// Resolved conflicts; a form of success, counted separately
    pub conflicts: usize,
}

impl SyncResult {
    pub fn merge(&mut self, other: SyncResult) {
        self.success += other.success;
        self.failed += other.failed;
        self.conflicts += other.conflicts;
    }

    /// Items that reached a settled state (delivered or resolved).
    pub fn settled(&self) -> usize {
        self.success + self.conflicts
    }
}

/// A strategy-level failure kept in the error log.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncErrorEntry {
    pub message: String,
    pub timestamp: Timestamp,
}

/// Snapshot of the coordinator's sync state.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub is_syncing: bool,
    /// Records currently flagged as needing sync
    pub pending: usize,
    /// Cumulative settled items
    pub synced: usize,
    /// Cumulative failed item deliveries
    pub failed: usize,
    pub last_sync: Option<Timestamp>,
    /// Most recent strategy-level failures, oldest first
    pub errors: VecDeque<SyncErrorEntry>,
}

impl SyncStatus {
    /// Fold a completed pass into the cumulative counters.
    pub(crate) fn record_pass(&mut self, result: &SyncResult, pending: usize) {
        self.synced += result.settled();
        self.failed += result.failed;
        self.pending = pending;
        self.last_sync = Some(Utc::now());
    }

    /// Append to the error log, evicting the oldest entry when full.
    pub(crate) fn record_error(&mut self, message: impl Into<String>) {
        if self.errors.len() == ERROR_LOG_CAPACITY {
            self.errors.pop_front();
        }
        self.errors.push_back(SyncErrorEntry {
            message: message.into(),
            timestamp: Utc::now(),
        });
    }
}
