//! Cache Maintenance Module
//!
//! One bounded maintenance pass over both tiers: expired memory entries,
//! expired persistent entries, then persistent entries over budget.
//! Persistent deletions are queued as per-key jobs.

use serde::Serialize;
use tracing::{debug, info};

use crate::cache::{current_timestamp_ms, CacheEntry, CacheStore};
use crate::error::StoreError;
use crate::scheduler::Priority;

// == Maintenance Report ==
/// Outcome of a single maintenance pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MaintenanceReport {
    /// Expired entries dropped from the memory tier
    pub memory_expired: usize,
    /// Expired persistent entries queued for deletion
    pub store_expired: usize,
    /// Least recently accessed persistent entries queued for eviction
    pub store_evicted: usize,
    /// More work remained when the pass stopped at its batch bound
    pub backlog: bool,
}

impl MaintenanceReport {
    pub fn removed(&self) -> usize {
        self.memory_expired + self.store_expired + self.store_evicted
    }
}

impl CacheStore {
    // == Maintenance Pass ==
    /// Runs one maintenance pass.
    ///
    /// The pass only scans the persistent tier. Each deletion it decides on
    /// runs as a LOW-priority job in the key's sequence group and re-checks
    /// its condition there, so a write queued for the same key is never
    /// overtaken. At most `maintenance_batch_size` deletions are queued per
    /// step.
    ///
    /// # Errors
    /// Propagates a failed scan or count; deletions already queued still run.
    pub async fn run_maintenance_pass(&self) -> Result<MaintenanceReport, StoreError> {
        let batch = self.config().maintenance_batch_size.max(1);
        let mut report = MaintenanceReport::default();

        report.memory_expired = self.memory().purge_expired(current_timestamp_ms());

        let (store_expired, expiry_backlog) = self.queue_expired_removals(batch).await?;
        report.store_expired = store_expired;

        let (store_evicted, budget_backlog) = self.enforce_persistent_budget(batch).await?;
        report.store_evicted = store_evicted;
        report.backlog = expiry_backlog || budget_backlog;

        if report.removed() > 0 {
            info!(
                memory_expired = report.memory_expired,
                store_expired = report.store_expired,
                store_evicted = report.store_evicted,
                backlog = report.backlog,
                "Cache maintenance queued removals"
            );
        } else {
            debug!("Cache maintenance: nothing to remove");
        }

        Ok(report)
    }

    /// Queues removal of up to `batch` expired persistent entries, soonest
    /// expiry first.
    async fn queue_expired_removals(&self, batch: usize) -> Result<(usize, bool), StoreError> {
        let candidates = self.inner.store.scan_by_expiry_ascending(batch).await?;
        let scanned = candidates.len();
        let now = current_timestamp_ms();

        let expired: Vec<CacheEntry> = candidates
            .into_iter()
            .take_while(|candidate| candidate.is_expired_at(now))
            .collect();
        let reached_live = expired.len() < scanned;

        for candidate in &expired {
            self.schedule_expired_removal(&candidate.key);
        }

        Ok((expired.len(), !reached_live && scanned == batch))
    }

    /// Queues eviction of least recently accessed persistent entries while
    /// the tier is over `max_persistent_items`, at most `batch` of them.
    async fn enforce_persistent_budget(&self, batch: usize) -> Result<(usize, bool), StoreError> {
        let store = &self.inner.store;
        let count = store.count().await?;
        let budget = self.config().max_persistent_items;
        if count <= budget {
            return Ok((0, false));
        }

        let excess = count - budget;
        let candidates = store
            .scan_by_last_accessed_ascending(excess.min(batch))
            .await?;

        for candidate in &candidates {
            self.schedule_budget_eviction(&candidate.key, candidate.last_accessed);
        }
        Ok((candidates.len(), excess > batch))
    }

    /// Evicts a persisted entry only if it was not accessed since the scan.
    fn schedule_budget_eviction(&self, key: &str, last_accessed: i64) {
        let cache = self.clone();
        let owned_key = key.to_string();
        self.spawn_store_job(
            "evict",
            key,
            self.key_job(key, Priority::Low)
                .with_id(format!("cache:evict:{key}")),
            move |_| {
                let cache = cache.clone();
                let key = owned_key.clone();
                async move { cache.evict_if_unchanged(&key, last_accessed).await }
            },
        );
    }

    async fn evict_if_unchanged(&self, key: &str, last_accessed: i64) -> Result<(), StoreError> {
        let unchanged = self
            .inner
            .store
            .get(key)
            .await?
            .is_some_and(|current| current.last_accessed == last_accessed);
        if !unchanged {
            return Ok(());
        }

        self.inner.store.delete(key).await?;
        let mut memory = self.memory();
        memory.remove_if_not_newer(key, last_accessed);
        memory.stats_mut().record_evictions(1);
        Ok(())
    }
}
