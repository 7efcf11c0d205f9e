//! Background Tasks Module
//!
//! Contains background tasks that run periodically alongside the cache.
//!
//! # Tasks
//! - Maintenance: purges expired entries and enforces tier budgets at a fixed interval

mod maintenance;

pub use maintenance::{spawn_maintenance_task, MAINTENANCE_JOB_ID};
