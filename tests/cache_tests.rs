//! Integration Tests for the Two-Tier Cache
//!
//! Drives CacheStore against the in-memory persistent backend and a
//! failure-injecting wrapper around it.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fairway_cache::cache::CacheEntry;
use fairway_cache::config::{CacheConfig, SchedulerConfig};
use fairway_cache::{
    CacheStore, JobOptions, JobScheduler, MemoryStore, PersistentStore, Priority, RetryPolicy,
    SetOptions, StoreError,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::Notify;

// == Helper Functions ==

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Profile {
    handle: String,
    handicap: f32,
    home_course: Option<String>,
}

fn profile(handle: &str) -> Profile {
    Profile {
        handle: handle.to_string(),
        handicap: 12.4,
        home_course: Some("Torrey Pines".to_string()),
    }
}

fn test_config() -> CacheConfig {
    CacheConfig {
        write_retry: RetryPolicy::new(1, Duration::from_millis(5), 1.0, Duration::from_millis(5)),
        ..CacheConfig::default()
    }
}

fn cache_on<S: PersistentStore + 'static>(store: Arc<S>, config: CacheConfig) -> CacheStore {
    fairway_cache::telemetry::init_tracing("fairway_cache=debug");
    let scheduler = JobScheduler::new(SchedulerConfig::default());
    CacheStore::new(store, scheduler, config)
}

fn cache_with(config: CacheConfig) -> (CacheStore, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    (cache_on(store.clone(), config), store)
}

/// Cache on a single-slot scheduler whose slot is held until the returned
/// gate is notified.
fn gated_cache() -> (CacheStore, Arc<MemoryStore>, Arc<Notify>) {
    fairway_cache::telemetry::init_tracing("fairway_cache=debug");
    let store = Arc::new(MemoryStore::new());
    let scheduler = JobScheduler::new(SchedulerConfig {
        max_concurrent: 1,
        ..SchedulerConfig::default()
    });

    let gate = Arc::new(Notify::new());
    let held = gate.clone();
    scheduler
        .enqueue(JobOptions::new().with_priority(Priority::Critical), move |_| {
            let held = held.clone();
            async move {
                held.notified().await;
                Ok(())
            }
        })
        .unwrap();

    (CacheStore::new(store.clone(), scheduler, test_config()), store, gate)
}

/// Persistent backend whose every call fails while `failing` is set, and
/// whose deletes stall while `slow_deletes` is set.
#[derive(Default)]
struct FlakyStore {
    inner: MemoryStore,
    failing: AtomicBool,
    slow_deletes: AtomicBool,
}

impl FlakyStore {
    fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn set_slow_deletes(&self, slow: bool) {
        self.slow_deletes.store(slow, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("storage offline".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl PersistentStore for FlakyStore {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, StoreError> {
        self.check()?;
        self.inner.get(key).await
    }

    async fn put(&self, entry: CacheEntry) -> Result<(), StoreError> {
        self.check()?;
        self.inner.put(entry).await
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.check()?;
        if self.slow_deletes.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        self.inner.delete(key).await
    }

    async fn clear(&self) -> Result<(), StoreError> {
        self.check()?;
        self.inner.clear().await
    }

    async fn count(&self) -> Result<usize, StoreError> {
        self.check()?;
        self.inner.count().await
    }

    async fn scan_by_expiry_ascending(&self, limit: usize) -> Result<Vec<CacheEntry>, StoreError> {
        self.check()?;
        self.inner.scan_by_expiry_ascending(limit).await
    }

    async fn scan_by_last_accessed_ascending(
        &self,
        limit: usize,
    ) -> Result<Vec<CacheEntry>, StoreError> {
        self.check()?;
        self.inner.scan_by_last_accessed_ascending(limit).await
    }

    async fn list_keys(&self) -> Result<Vec<String>, StoreError> {
        self.check()?;
        self.inner.list_keys().await
    }
}

// == Get / Set Tests ==

#[tokio::test]
async fn test_set_get_round_trip() {
    let (cache, _) = cache_with(test_config());
    let ana = profile("ana");

    cache
        .set("profile:ana", &ana, SetOptions::default(), Priority::Normal)
        .unwrap();

    let cached: Option<Profile> = cache.get("profile:ana", Priority::High).await;
    assert_eq!(cached, Some(ana));
}

#[tokio::test]
async fn test_entry_expires_after_ttl() {
    let (cache, _) = cache_with(test_config());
    cache
        .set(
            "tee-times:today",
            &vec!["07:30", "08:10"],
            SetOptions::with_ttl(Duration::from_millis(50)),
            Priority::Normal,
        )
        .unwrap();

    tokio::time::sleep(Duration::from_millis(20)).await;
    let early: Option<Vec<String>> = cache.get("tee-times:today", Priority::Normal).await;
    assert_eq!(early, Some(vec!["07:30".to_string(), "08:10".to_string()]));

    tokio::time::sleep(Duration::from_millis(60)).await;
    let late: Option<Vec<String>> = cache.get("tee-times:today", Priority::Normal).await;
    assert_eq!(late, None);
}

#[tokio::test]
async fn test_writes_to_one_key_persist_in_call_order() {
    let (cache, store) = cache_with(test_config());

    for round in 0..10u32 {
        cache
            .set("score:hole-18", &round, SetOptions::default(), Priority::Normal)
            .unwrap();
    }
    cache.scheduler().idle().await;

    let persisted = store.get("score:hole-18").await.unwrap().unwrap();
    assert_eq!(persisted.data, json!(9));
}

#[tokio::test]
async fn test_read_through_populates_memory() {
    let (cache, store) = cache_with(test_config());
    store
        .put(CacheEntry::new(
            "course:pebble",
            json!({"par": 72}),
            Duration::from_secs(60),
        ))
        .await
        .unwrap();

    let first: Option<serde_json::Value> = cache.get("course:pebble", Priority::Normal).await;
    assert_eq!(first, Some(json!({"par": 72})));
    assert_eq!(cache.stats().memory_entries, 1);

    // Served from memory even if the persisted copy disappears.
    store.delete("course:pebble").await.unwrap();
    let second: Option<serde_json::Value> = cache.get("course:pebble", Priority::Normal).await;
    assert_eq!(second, Some(json!({"par": 72})));
    assert_eq!(cache.stats().hits, 2);
}

#[tokio::test]
async fn test_expired_persistent_entry_is_removed_on_read() {
    let (cache, store) = cache_with(test_config());
    store
        .put(CacheEntry::new("stale", json!(1), Duration::from_millis(5)))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(15)).await;

    assert_eq!(cache.get::<u32>("stale", Priority::Normal).await, None);
    cache.scheduler().idle().await;

    assert!(store.get("stale").await.unwrap().is_none());
    assert_eq!(cache.stats().misses, 1);
}

// == Eviction Tests ==

#[tokio::test]
async fn test_lru_evicts_oldest_keys() {
    let config = CacheConfig {
        max_memory_items: 3,
        max_persistent_items: 3,
        ..test_config()
    };
    let (cache, store) = cache_with(config);

    for key in ["k1", "k2", "k3", "k4", "k5"] {
        cache.set(key, &key, SetOptions::default(), Priority::Normal).unwrap();
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    let stats = cache.stats();
    assert_eq!(stats.memory_entries, 3);
    assert_eq!(stats.evictions, 2);

    cache.scheduler().idle().await;
    assert_eq!(store.count().await.unwrap(), 5);

    let report = cache.run_maintenance_pass().await.unwrap();
    cache.scheduler().idle().await;
    assert_eq!(report.store_evicted, 2);
    assert!(store.get("k1").await.unwrap().is_none());
    assert!(store.get("k2").await.unwrap().is_none());
    for key in ["k3", "k4", "k5"] {
        assert!(store.get(key).await.unwrap().is_some(), "{key} should survive");
    }
}

// == Remove Tests ==

#[tokio::test]
async fn test_remove_deletes_from_both_tiers() {
    let (cache, store) = cache_with(test_config());
    cache.set("friend:1", &"bo", SetOptions::default(), Priority::Normal).unwrap();
    cache.scheduler().idle().await;

    cache.remove("friend:1", Priority::High);
    assert_eq!(cache.get::<String>("friend:1", Priority::Normal).await, None);

    cache.scheduler().idle().await;
    assert!(store.get("friend:1").await.unwrap().is_none());
}

#[tokio::test]
async fn test_remove_by_prefix() {
    let config = CacheConfig {
        removal_batch_size: 2,
        ..test_config()
    };
    let (cache, store) = cache_with(config);
    for key in ["chat:1:a", "chat:1:b", "chat:1:c", "chat:2:a"] {
        cache.set(key, &key, SetOptions::default(), Priority::Normal).unwrap();
    }
    cache.scheduler().idle().await;

    cache.remove_by_prefix("chat:1:", Priority::Normal);
    assert_eq!(cache.get::<String>("chat:1:a", Priority::Normal).await, None);
    assert_eq!(
        cache.get::<String>("chat:2:a", Priority::Normal).await,
        Some("chat:2:a".to_string())
    );

    cache.scheduler().idle().await;
    let mut remaining = store.list_keys().await.unwrap();
    remaining.sort();
    assert_eq!(remaining, vec!["chat:2:a".to_string()]);
}

#[tokio::test]
async fn test_set_after_prefix_removal_survives() {
    let (cache, _) = cache_with(test_config());
    cache.set("feed:1:old", &1u32, SetOptions::default(), Priority::Normal).unwrap();
    cache.scheduler().idle().await;

    cache.remove_by_prefix("feed:1:", Priority::Normal);
    cache.set("feed:1:new", &2u32, SetOptions::default(), Priority::Normal).unwrap();
    cache.scheduler().idle().await;

    assert_eq!(cache.get::<u32>("feed:1:new", Priority::Normal).await, Some(2));
    assert_eq!(cache.get::<u32>("feed:1:old", Priority::Normal).await, None);
}

#[tokio::test]
async fn test_clear_empties_both_tiers() {
    let (cache, store) = cache_with(test_config());
    cache.set("a", &1u32, SetOptions::default(), Priority::Normal).unwrap();
    cache.set("b", &2u32, SetOptions::default(), Priority::Normal).unwrap();
    cache.scheduler().idle().await;

    cache.clear();
    assert_eq!(cache.stats().memory_entries, 0);
    assert_eq!(cache.get::<u32>("a", Priority::Normal).await, None);

    cache.scheduler().idle().await;
    assert_eq!(store.count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_prefix_removal_covers_queued_writes() {
    let (cache, store, gate) = gated_cache();

    cache.set("chat:1:a", &"v", SetOptions::default(), Priority::Normal).unwrap();
    cache.remove_by_prefix("chat:1:", Priority::High);

    gate.notify_one();
    cache.scheduler().idle().await;

    assert!(store.get("chat:1:a").await.unwrap().is_none());
    assert_eq!(cache.get::<String>("chat:1:a", Priority::Normal).await, None);
}

#[tokio::test]
async fn test_clear_covers_queued_writes() {
    let (cache, store, gate) = gated_cache();

    cache.set("k", &"v", SetOptions::default(), Priority::Normal).unwrap();
    cache.clear();

    gate.notify_one();
    cache.scheduler().idle().await;

    assert_eq!(store.count().await.unwrap(), 0);
    assert_eq!(cache.get::<String>("k", Priority::Normal).await, None);
}

#[tokio::test]
async fn test_set_after_clear_survives() {
    let (cache, store, gate) = gated_cache();

    cache.set("k", &"old", SetOptions::default(), Priority::Normal).unwrap();
    cache.clear();
    cache.set("k", &"new", SetOptions::default(), Priority::Normal).unwrap();

    gate.notify_one();
    cache.scheduler().idle().await;

    let persisted = store.get("k").await.unwrap().unwrap();
    assert_eq!(persisted.data, json!("new"));
    assert_eq!(cache.get::<String>("k", Priority::Normal).await, Some("new".to_string()));
}

// == Get Or Compute Tests ==

#[tokio::test]
async fn test_get_or_compute_caches_result() {
    let (cache, _) = cache_with(test_config());
    let calls = Arc::new(AtomicU32::new(0));

    for _ in 0..3 {
        let calls = calls.clone();
        let value = cache
            .get_or_compute(
                "leaderboard:weekly",
                || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, String>(Some(vec![68u32, 70, 71]))
                },
                Priority::Normal,
            )
            .await
            .unwrap();
        assert_eq!(value, Some(vec![68, 70, 71]));
    }

    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_get_or_compute_error_is_not_cached() {
    let (cache, _) = cache_with(test_config());

    let result = cache
        .get_or_compute(
            "weather:course-9",
            || async { Err::<Option<String>, _>("forecast service down".to_string()) },
            Priority::Normal,
        )
        .await;
    assert_eq!(result, Err("forecast service down".to_string()));
    assert_eq!(cache.get::<String>("weather:course-9", Priority::Normal).await, None);

    let absent = cache
        .get_or_compute(
            "weather:course-9",
            || async { Ok::<Option<String>, String>(None) },
            Priority::Normal,
        )
        .await;
    assert_eq!(absent, Ok(None));
    assert_eq!(cache.stats().memory_entries, 0);
}

// == Degradation Tests ==

#[tokio::test]
async fn test_persistent_failures_degrade_gracefully() {
    let store = Arc::new(FlakyStore::default());
    let cache = cache_on(store.clone(), test_config());

    store.set_failing(true);
    cache.set("round:1", &"in progress", SetOptions::default(), Priority::Normal).unwrap();

    // Memory tier still answers.
    assert_eq!(
        cache.get::<String>("round:1", Priority::Normal).await,
        Some("in progress".to_string())
    );

    // A miss that needs the persistent tier degrades to absent.
    assert_eq!(cache.get::<String>("round:2", Priority::Normal).await, None);
    assert!(cache.stats().store_errors >= 1);

    cache.scheduler().idle().await;
    store.set_failing(false);

    cache.set("round:3", &"done", SetOptions::default(), Priority::Normal).unwrap();
    cache.scheduler().idle().await;
    assert!(store.get("round:3").await.unwrap().is_some());
}

#[tokio::test]
async fn test_maintenance_failure_is_reported() {
    let store = Arc::new(FlakyStore::default());
    let cache = cache_on(store.clone(), test_config());

    store.set_failing(true);
    let result = cache.run_maintenance_pass().await;
    assert!(matches!(result, Err(StoreError::Unavailable(_))));
}

#[tokio::test]
async fn test_maintenance_delete_queues_behind_later_write() {
    let store = Arc::new(FlakyStore::default());
    let cache = cache_on(store.clone(), test_config());
    store
        .put(CacheEntry::new("k", json!("old"), Duration::from_millis(1)))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    store.set_slow_deletes(true);

    let maintenance = cache.clone();
    let pass = tokio::spawn(async move { maintenance.run_maintenance_pass().await });
    tokio::time::sleep(Duration::from_millis(10)).await;
    cache.set("k", &"new", SetOptions::default(), Priority::Normal).unwrap();

    let report = pass.await.unwrap().unwrap();
    cache.scheduler().idle().await;

    assert_eq!(report.store_expired, 1);
    let persisted = store.get("k").await.unwrap().unwrap();
    assert_eq!(persisted.data, json!("new"));
    assert_eq!(cache.get::<String>("k", Priority::Normal).await, Some("new".to_string()));
}
