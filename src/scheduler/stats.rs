//! Job Statistics Module
//!
//! Snapshot of tracked jobs by lifecycle state.

use serde::Serialize;

use super::JobStatus;

// == Job Stats ==
/// Counts of tracked jobs by status.
///
/// Terminal jobs only count while they are retained after settling.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct JobStats {
    pub queued: usize,
    pub running: usize,
    pub retry_pending: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    /// Jobs accepted since the scheduler was created
    pub total_enqueued: u64,
}

impl JobStats {
    pub fn new() -> Self {
        Self::default()
    }

    // == Record ==
    /// Adds one job in `status` to the snapshot.
    pub fn record(&mut self, status: JobStatus) {
        match status {
            JobStatus::Queued => self.queued += 1,
            JobStatus::Running => self.running += 1,
            JobStatus::RetryPending => self.retry_pending += 1,
            JobStatus::Completed => self.completed += 1,
            JobStatus::Failed => self.failed += 1,
            JobStatus::Cancelled => self.cancelled += 1,
        }
    }

    /// Jobs that have not reached a terminal state.
    pub fn pending(&self) -> usize {
        self.queued + self.running + self.retry_pending
    }
}
