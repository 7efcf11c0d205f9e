//! Scheduler Module
//!
//! Prioritized, cooperatively cancelled job execution with bounded
//! concurrency, per-key sequencing, throttling and retry with backoff.

mod engine;
mod groups;
mod handle;
mod job;
mod retry;
mod stats;

// Re-export public types
pub use engine::JobScheduler;
pub use handle::JobHandle;
pub use job::{JobId, JobOptions, JobStatus, Priority, Throttle};
pub use retry::RetryPolicy;
pub use stats::JobStats;

pub use tokio_util::sync::CancellationToken;
