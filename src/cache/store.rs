//! Cache Store Module
//!
//! Two-tier cache: a bounded memory tier answered synchronously, backed by a
//! persistent tier reached only through scheduler jobs. Every persistent
//! mutation of a key runs in that key's sequence group, so writes and deletes
//! of one key reach the persistent tier in call order.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::cache::{current_timestamp_ms, CacheEntry, CacheStats, MemoryTier, MAX_KEY_LENGTH};
use crate::config::CacheConfig;
use crate::error::{CacheError, JobError, Result, StoreError};
use crate::persistent::PersistentStore;
use crate::scheduler::{JobHandle, JobOptions, JobScheduler, Priority};

// == Set Options ==
/// Per-write options of `CacheStore::set`.
#[derive(Debug, Clone)]
pub struct SetOptions {
    /// Lifetime of the entry; the configured default when None
    pub ttl: Option<Duration>,
    /// Deep-copy the value through a serialize/parse round trip before storing
    pub sanitize: bool,
}

impl Default for SetOptions {
    fn default() -> Self {
        Self {
            ttl: None,
            sanitize: true,
        }
    }
}

impl SetOptions {
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl: Some(ttl),
            ..Self::default()
        }
    }

    /// Skips the round trip for trusted, already-plain data.
    pub fn trusted(mut self) -> Self {
        self.sanitize = false;
        self
    }
}

pub(crate) struct CacheInner {
    pub(crate) memory: Mutex<MemoryTier>,
    pub(crate) store: Arc<dyn PersistentStore>,
    pub(crate) scheduler: JobScheduler,
    pub(crate) config: CacheConfig,
}

// == Cache Store ==
/// Cloneable handle to a shared two-tier cache.
///
/// Persistent tier failures never reach callers: reads degrade to a miss and
/// writes are logged, leaving the memory tier as the state of record.
#[derive(Clone)]
pub struct CacheStore {
    pub(crate) inner: Arc<CacheInner>,
}

impl CacheStore {
    // == Constructor ==
    pub fn new(store: Arc<dyn PersistentStore>, scheduler: JobScheduler, config: CacheConfig) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                memory: Mutex::new(MemoryTier::new(config.max_memory_items)),
                store,
                scheduler,
                config,
            }),
        }
    }

    pub(crate) fn memory(&self) -> MutexGuard<'_, MemoryTier> {
        self.inner
            .memory
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn scheduler(&self) -> &JobScheduler {
        &self.inner.scheduler
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    // == Get ==
    /// Retrieves a value, memory tier first, persistent tier on a miss.
    ///
    /// A memory hit returns without scheduling anything beyond a LOW-priority
    /// access-time update. A miss runs a read job at `priority` in the key's
    /// sequence group. Absent, expired, undecodable and failed reads all
    /// return None.
    pub async fn get<T: DeserializeOwned>(&self, key: &str, priority: Priority) -> Option<T> {
        let cached = self.memory().lookup(key);
        if let Some(data) = cached {
            self.memory().stats_mut().record_hit();
            self.schedule_touch(key);
            return self.decode(key, data);
        }

        let cache = self.clone();
        let owned_key = key.to_string();
        let read = self.inner.scheduler.enqueue(
            self.key_job(key, priority),
            move |_| {
                let cache = cache.clone();
                let key = owned_key.clone();
                async move { cache.read_through(&key).await }
            },
        );

        let data = match read {
            Ok(handle) => self.await_read(key, handle).await,
            Err(err) => {
                warn!(key, error = %err, "Cache read could not be scheduled");
                None
            }
        };

        match data {
            Some(data) => {
                self.memory().stats_mut().record_hit();
                self.decode(key, data)
            }
            None => {
                self.memory().stats_mut().record_miss();
                None
            }
        }
    }

    async fn await_read(&self, key: &str, handle: JobHandle<Option<Value>>) -> Option<Value> {
        match handle.wait().await {
            Ok(data) => data,
            Err(err) => {
                self.memory().stats_mut().record_store_error();
                warn!(key, error = %err, "Persistent read failed, treating as miss");
                None
            }
        }
    }

    /// Body of a read job: persistent lookup, memory population, touch.
    async fn read_through(&self, key: &str) -> std::result::Result<Option<Value>, JobError> {
        let Some(entry) = self.inner.store.get(key).await? else {
            return Ok(None);
        };

        if entry.is_expired() {
            debug!(key, "Persistent entry expired, scheduling removal");
            self.memory().stats_mut().record_expirations(1);
            self.schedule_expired_removal(key);
            return Ok(None);
        }

        let data = entry.data.clone();
        let populated = {
            let mut memory = self.memory();
            if memory.is_removal_pending(key) {
                None
            } else {
                Some(memory.insert_if_absent(entry))
            }
        };

        match populated {
            // Removed after this read was issued; the persisted copy is stale.
            None => Ok(None),
            Some(inserted) => {
                if inserted {
                    self.schedule_touch(key);
                }
                Ok(Some(data))
            }
        }
    }

    fn decode<T: DeserializeOwned>(&self, key: &str, data: Value) -> Option<T> {
        match T::deserialize(data) {
            Ok(value) => Some(value),
            Err(err) => {
                warn!(key, error = %err, "Cached value does not match requested type");
                None
            }
        }
    }

    // == Set ==
    /// Stores a value in the memory tier and schedules its persistence.
    ///
    /// The memory write happens before this returns; the persistent write
    /// runs later in the key's sequence group.
    ///
    /// # Errors
    /// `InvalidKey` for empty or oversized keys, `Serialization` when the
    /// value cannot be represented as JSON.
    pub fn set<T: Serialize>(
        &self,
        key: &str,
        data: &T,
        options: SetOptions,
        priority: Priority,
    ) -> Result<()> {
        validate_key(key)?;

        let value = if options.sanitize {
            serde_json::from_slice(&serde_json::to_vec(data)?)?
        } else {
            serde_json::to_value(data)?
        };
        let ttl = options.ttl.unwrap_or(self.inner.config.default_ttl);
        let entry = CacheEntry::new(key, value, ttl);

        let evicted = {
            let mut memory = self.memory();
            memory.begin_write(key);
            memory.insert(entry.clone())
        };
        if evicted > 0 {
            debug!(evicted, "Memory tier over budget, evicted least recently used");
        }

        let store = self.inner.store.clone();
        let settled_key = key.to_string();
        self.spawn_store_job_then(
            "persist",
            key,
            self.key_job(key, priority)
                .with_retry(self.inner.config.write_retry.clone()),
            move |cache: &CacheStore| cache.memory().write_settled(&settled_key),
            move |_| {
                let store = store.clone();
                let entry = entry.clone();
                async move { store.put(entry).await }
            },
        );
        Ok(())
    }

    // == Remove ==
    /// Deletes a key from the memory tier now and from the persistent tier
    /// in the key's sequence group.
    pub fn remove(&self, key: &str, priority: Priority) {
        self.memory().mark_removed(key);
        self.schedule_delete(key, priority);
    }

    /// Deletes the persisted copy of a key already held as pending removal,
    /// releasing the hold once the job settles.
    fn schedule_delete(&self, key: &str, priority: Priority) {
        let cache = self.clone();
        let owned_key = key.to_string();
        let settled_key = key.to_string();
        self.spawn_store_job_then(
            "delete",
            key,
            self.key_job(key, priority)
                .with_retry(self.inner.config.write_retry.clone()),
            move |cache: &CacheStore| cache.memory().key_removal_settled(&settled_key),
            move |_| {
                let cache = cache.clone();
                let key = owned_key.clone();
                async move {
                    // A newer set has already re-populated the key.
                    let repopulated = cache.memory().contains(&key);
                    if repopulated {
                        return Ok(());
                    }
                    cache.inner.store.delete(&key).await
                }
            },
        );
    }

    /// Deletes a persisted entry only if it is still expired when the job runs.
    /// Pending removals of the same key coalesce.
    pub(crate) fn schedule_expired_removal(&self, key: &str) {
        let store = self.inner.store.clone();
        let owned_key = key.to_string();
        self.spawn_store_job(
            "expire",
            key,
            self.key_job(key, Priority::Low)
                .with_id(format!("cache:expire:{key}")),
            move |_| {
                let store = store.clone();
                let key = owned_key.clone();
                async move {
                    match store.get(&key).await? {
                        Some(entry) if entry.is_expired() => store.delete(&key).await,
                        _ => Ok(()),
                    }
                }
            },
        );
    }

    // == Remove By Prefix ==
    /// Deletes every key starting with `prefix`.
    ///
    /// Memory tier keys go immediately. A scan job then lists persisted keys
    /// and schedules per-key deletes in batches of `removal_batch_size`,
    /// yielding between batches.
    ///
    /// Keys whose persistent writes are still queued get their own delete,
    /// ordered behind those writes in the key's sequence group.
    pub fn remove_by_prefix(&self, prefix: &str, priority: Priority) {
        let in_flight = {
            let mut memory = self.memory();
            let removed = memory.mark_prefix_removed(prefix);
            debug!(prefix, removed, "Removed prefix from memory tier");
            memory.hold_pending_writes(prefix)
        };
        for key in &in_flight {
            self.schedule_delete(key, priority);
        }

        let cache = self.clone();
        let owned_prefix = prefix.to_string();
        let settled_prefix = prefix.to_string();
        self.spawn_store_job_then(
            "remove-prefix",
            prefix,
            JobOptions::new()
                .with_priority(priority)
                .with_timeout(self.inner.config.store_timeout),
            move |cache: &CacheStore| cache.memory().prefix_removal_settled(&settled_prefix),
            move |token| {
                let cache = cache.clone();
                let prefix = owned_prefix.clone();
                async move { cache.scan_prefix(&prefix, priority, token).await }
            },
        );
    }

    async fn scan_prefix(
        &self,
        prefix: &str,
        priority: Priority,
        token: CancellationToken,
    ) -> std::result::Result<(), StoreError> {
        let matching: Vec<String> = self
            .inner
            .store
            .list_keys()
            .await?
            .into_iter()
            .filter(|key| key.starts_with(prefix))
            .collect();

        let batch_size = self.inner.config.removal_batch_size.max(1);
        for batch in matching.chunks(batch_size) {
            if token.is_cancelled() {
                break;
            }
            for key in batch {
                self.memory().hold_removal(key);
                self.schedule_delete(key, priority);
            }
            tokio::task::yield_now().await;
        }
        Ok(())
    }

    // == Get Or Compute ==
    /// Returns the cached value, or computes, stores and returns it.
    ///
    /// A computed None is returned without being stored. Errors from
    /// `compute` propagate to the caller and nothing is cached.
    pub async fn get_or_compute<T, E, F, Fut>(
        &self,
        key: &str,
        compute: F,
        priority: Priority,
    ) -> std::result::Result<Option<T>, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<Option<T>, E>>,
    {
        if let Some(cached) = self.get(key, priority).await {
            return Ok(Some(cached));
        }

        let computed = compute().await?;
        if let Some(value) = &computed {
            if let Err(err) = self.set(key, value, SetOptions::default(), priority) {
                warn!(key, error = %err, "Computed value could not be cached");
            }
        }
        Ok(computed)
    }

    // == Clear ==
    /// Empties the memory tier now and schedules a full persistent clear.
    ///
    /// Keys with persistent writes still in flight also get a delete queued
    /// behind those writes, so a write issued before the clear cannot land
    /// after it.
    pub fn clear(&self) {
        let in_flight = {
            let mut memory = self.memory();
            memory.mark_cleared();
            memory.hold_pending_writes("")
        };
        for key in &in_flight {
            self.schedule_delete(key, Priority::High);
        }

        let store = self.inner.store.clone();
        self.spawn_store_job_then(
            "clear",
            "*",
            JobOptions::new()
                .with_priority(Priority::High)
                .with_timeout(self.inner.config.store_timeout)
                .with_retry(self.inner.config.write_retry.clone()),
            |cache: &CacheStore| cache.memory().clear_settled(),
            move |_| {
                let store = store.clone();
                async move { store.clear().await }
            },
        );
    }

    // == Stats ==
    /// Returns current cache statistics.
    pub fn stats(&self) -> CacheStats {
        self.memory().stats()
    }

    // == Background Jobs ==
    /// Schedules the persisted access time of `key` to catch up with the
    /// memory tier. Pending touches of the same key coalesce.
    fn schedule_touch(&self, key: &str) {
        let cache = self.clone();
        let owned_key = key.to_string();
        let settled_key = key.to_string();
        self.memory().begin_write(key);
        self.spawn_store_job_then(
            "touch",
            key,
            self.key_job(key, Priority::Low)
                .with_id(format!("cache:touch:{key}")),
            move |cache: &CacheStore| cache.memory().write_settled(&settled_key),
            move |_| {
                let cache = cache.clone();
                let key = owned_key.clone();
                async move { cache.persist_access_time(&key).await }
            },
        );
    }

    async fn persist_access_time(&self, key: &str) -> std::result::Result<(), StoreError> {
        let Some(mut entry) = self.inner.store.get(key).await? else {
            return Ok(());
        };

        let accessed = self
            .memory()
            .last_accessed(key)
            .unwrap_or_else(current_timestamp_ms);
        if accessed <= entry.last_accessed {
            return Ok(());
        }

        entry.last_accessed = accessed;
        self.inner.store.put(entry).await
    }

    /// Options shared by every job touching a single key.
    pub(crate) fn key_job(&self, key: &str, priority: Priority) -> JobOptions {
        JobOptions::new()
            .with_priority(priority)
            .in_sequence(key_group(key))
            .with_timeout(self.inner.config.store_timeout)
    }

    /// Enqueues a persistent tier job nobody awaits; its failure is logged
    /// and counted, never surfaced.
    pub(crate) fn spawn_store_job<F, Fut>(&self, operation: &'static str, key: &str, options: JobOptions, work: F)
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<(), StoreError>> + Send + 'static,
    {
        self.spawn_store_job_then(operation, key, options, |_: &CacheStore| {}, work);
    }

    /// Like `spawn_store_job`, running `on_settled` once the job reaches a
    /// terminal state or fails to enqueue.
    fn spawn_store_job_then<S, F, Fut>(
        &self,
        operation: &'static str,
        key: &str,
        options: JobOptions,
        on_settled: S,
        work: F,
    ) where
        S: FnOnce(&CacheStore) + Send + 'static,
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<(), StoreError>> + Send + 'static,
    {
        let enqueued = self.inner.scheduler.enqueue(options, move |token| {
            let attempt = work(token);
            async move { attempt.await.map_err(JobError::from) }
        });

        let handle: JobHandle<()> = match enqueued {
            Ok(handle) => handle,
            Err(err) => {
                warn!(operation, key, error = %err, "Cache job could not be scheduled");
                on_settled(self);
                return;
            }
        };

        let cache = self.clone();
        let key = key.to_string();
        tokio::spawn(async move {
            let outcome = handle.wait().await;
            on_settled(&cache);
            if let Err(err) = outcome {
                if !matches!(err, JobError::Cancelled(_)) {
                    cache.memory().stats_mut().record_store_error();
                    warn!(operation, key = %key, error = %err, "Cache background job failed");
                }
            }
        });
    }
}

/// Sequence group shared by every job touching `key`.
fn key_group(key: &str) -> String {
    format!("cache:key:{key}")
}

fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(CacheError::InvalidKey("key cannot be empty".to_string()));
    }
    if key.len() > MAX_KEY_LENGTH {
        return Err(CacheError::InvalidKey(format!(
            "key exceeds maximum length of {} bytes",
            MAX_KEY_LENGTH
        )));
    }
    Ok(())
}
