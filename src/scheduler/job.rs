//! Job Module
//!
//! Priority levels, lifecycle states and per-job scheduling options.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::RetryPolicy;

/// Identifier of a scheduled job.
pub type JobId = String;

// == Priority ==
/// Admission priority. Lower numeric value is admitted first.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Critical = 0,
    High = 1,
    #[default]
    Normal = 2,
    Low = 3,
    Maintenance = 4,
}

// == Job Status ==
/// Lifecycle state of a job.
///
/// State transitions:
/// - Queued -> Running -> Completed
/// - Queued -> Running -> RetryPending -> Queued (until the retry policy gives up)
/// - Queued -> Running -> Failed
/// - Queued | Running | RetryPending -> Cancelled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
    RetryPending,
}

impl JobStatus {
    /// Is this a terminal state (no further transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Queued => write!(f, "queued"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
            JobStatus::Cancelled => write!(f, "cancelled"),
            JobStatus::RetryPending => write!(f, "retry_pending"),
        }
    }
}

// == Throttle ==
/// Concurrency cap shared by all jobs carrying the same key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Throttle {
    pub key: String,
    pub limit: usize,
}

// == Job Options ==
/// Scheduling options supplied at enqueue time.
#[derive(Debug, Clone, Default)]
pub struct JobOptions {
    pub priority: Priority,
    pub timeout: Option<Duration>,
    pub retry: Option<RetryPolicy>,
    /// Caller-supplied id; re-enqueuing a live id returns the existing job
    pub job_id: Option<JobId>,
    pub sequence_group: Option<String>,
    pub throttle: Option<Throttle>,
}

impl JobOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn with_id(mut self, job_id: impl Into<JobId>) -> Self {
        self.job_id = Some(job_id.into());
        self
    }

    /// Jobs sharing a sequence group run one at a time, in enqueue order.
    pub fn in_sequence(mut self, group: impl Into<String>) -> Self {
        self.sequence_group = Some(group.into());
        self
    }

    /// Caps the number of RUNNING jobs sharing `key`. A limit of 0 is treated as 1.
    pub fn throttled(mut self, key: impl Into<String>, limit: usize) -> Self {
        self.throttle = Some(Throttle {
            key: key.into(),
            limit: limit.max(1),
        });
        self
    }
}
