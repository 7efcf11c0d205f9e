//! Cache Maintenance Task
//!
//! Background task that periodically runs a maintenance pass through the
//! scheduler at MAINTENANCE priority.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::cache::{CacheStore, MaintenanceReport};
use crate::error::JobError;
use crate::scheduler::{JobOptions, Priority};

/// Scheduler id of the maintenance job. A tick that fires while a pass is
/// still pending joins that pass instead of queueing another.
pub const MAINTENANCE_JOB_ID: &str = "cache:maintenance";

/// Spawns a background task that runs cache maintenance every `interval`.
///
/// Each tick enqueues one pass and waits for it. While a pass reports a
/// backlog, further passes follow immediately. Missed ticks are skipped, so a
/// slow pass never causes a burst of catch-up passes.
///
/// The task ends on its own once the scheduler starts shutting down.
///
/// # Returns
/// A JoinHandle for the spawned task, which can also be aborted directly.
///
/// # Example
/// ```ignore
/// let handle = spawn_maintenance_task(cache.clone(), Duration::from_secs(60));
/// // Later, during shutdown:
/// cache.scheduler().shutdown(Duration::from_secs(5)).await;
/// handle.await.ok();
/// ```
pub fn spawn_maintenance_task(cache: CacheStore, interval: Duration) -> JoinHandle<()> {
    let period = interval.max(Duration::from_millis(1));

    tokio::spawn(async move {
        info!(interval_ms = period.as_millis() as u64, "Starting cache maintenance task");

        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            ticker.tick().await;

            loop {
                match run_pass(&cache).await {
                    Ok(report) if report.backlog => {
                        debug!("Maintenance backlog remains, running another pass");
                        tokio::task::yield_now().await;
                    }
                    Ok(_) => break,
                    Err(JobError::ShuttingDown) => {
                        info!("Scheduler shutting down, maintenance task stopped");
                        return;
                    }
                    Err(err) => {
                        warn!(error = %err, "Cache maintenance pass failed");
                        break;
                    }
                }
            }
        }
    })
}

async fn run_pass(cache: &CacheStore) -> Result<MaintenanceReport, JobError> {
    let target = cache.clone();
    let handle = cache.scheduler().enqueue(
        JobOptions::new()
            .with_priority(Priority::Maintenance)
            .with_id(MAINTENANCE_JOB_ID),
        move |_| {
            let cache = target.clone();
            async move { cache.run_maintenance_pass().await.map_err(JobError::from) }
        },
    )?;
    handle.wait().await
}
