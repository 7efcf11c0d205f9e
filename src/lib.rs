//! Fairway Cache - prioritized job scheduling and two-tier caching
//!
//! Provides a priority job scheduler with sequence groups, throttling, retries
//! and timeouts, plus a two-tier cache whose persistent tier is only ever
//! touched through that scheduler.

pub mod cache;
pub mod config;
pub mod error;
pub mod persistent;
pub mod scheduler;
pub mod tasks;
pub mod telemetry;

pub use cache::{CacheStats, CacheStore, MaintenanceReport, SetOptions};
pub use config::{CacheConfig, Config, SchedulerConfig};
pub use error::{CacheError, ErrorKind, JobError, StoreError};
pub use persistent::{MemoryStore, PersistentStore};
pub use scheduler::{
    CancellationToken, JobHandle, JobOptions, JobScheduler, JobStatus, Priority, RetryPolicy,
};
pub use tasks::spawn_maintenance_task;
