//! Memory Tier Module
//!
//! Bounded in-process map combining HashMap storage with LRU tracking and TTL
//! expiration. Every operation completes synchronously.

use std::collections::HashMap;

use serde_json::Value;

use crate::cache::{current_timestamp_ms, CacheEntry, CacheStats, LruTracker};

// == Memory Tier ==
/// Fast, bounded, process-local cache layer.
#[derive(Debug)]
pub struct MemoryTier {
    /// Key-value storage
    entries: HashMap<String, CacheEntry>,
    /// LRU access tracker
    lru: LruTracker,
    /// Performance statistics
    stats: CacheStats,
    /// Maximum number of entries allowed
    max_items: usize,
    /// Removals whose persistent deletion has not settled yet
    removals: PendingRemovals,
    /// Keys with persistent writes queued or running, by count
    writes: HashMap<String, usize>,
}

/// Keys, prefixes and clears removed from memory but possibly still persisted.
#[derive(Debug, Default)]
struct PendingRemovals {
    keys: HashMap<String, usize>,
    prefixes: Vec<String>,
    clears: usize,
}

impl MemoryTier {
    // == Constructor ==
    pub fn new(max_items: usize) -> Self {
        Self {
            entries: HashMap::new(),
            lru: LruTracker::new(),
            stats: CacheStats::new(),
            max_items,
            removals: PendingRemovals::default(),
            writes: HashMap::new(),
        }
    }

    // == Lookup ==
    /// Returns the data of a live entry and records the access.
    ///
    /// An expired entry is dropped and reported as absent.
    pub fn lookup(&mut self, key: &str) -> Option<Value> {
        let now = current_timestamp_ms();
        let entry = self.entries.get_mut(key)?;

        if entry.is_expired_at(now) {
            self.entries.remove(key);
            self.lru.remove(key);
            self.stats.record_expirations(1);
            return None;
        }

        entry.touch();
        let data = entry.data.clone();
        self.lru.touch(key);
        Some(data)
    }

    // == Insert ==
    /// Stores an entry, overwriting any previous one, then enforces the budget.
    ///
    /// Returns the number of entries evicted.
    pub fn insert(&mut self, entry: CacheEntry) -> usize {
        self.lru.touch(&entry.key);
        self.entries.insert(entry.key.clone(), entry);
        self.enforce_capacity()
    }

    /// Stores an entry only when the key has no entry yet.
    ///
    /// Used when populating from the persistent tier so that a newer
    /// in-memory write is never replaced by an older persisted copy.
    pub fn insert_if_absent(&mut self, entry: CacheEntry) -> bool {
        if self.entries.contains_key(&entry.key) {
            return false;
        }
        self.insert(entry);
        true
    }

    // == Remove ==
    pub fn remove(&mut self, key: &str) -> bool {
        self.lru.remove(key);
        self.entries.remove(key).is_some()
    }

    /// Removes the entry unless it was accessed after `last_accessed`.
    pub fn remove_if_not_newer(&mut self, key: &str, last_accessed: i64) -> bool {
        let stale = self
            .entries
            .get(key)
            .is_some_and(|entry| entry.last_accessed <= last_accessed);
        if stale {
            self.remove(key);
        }
        stale
    }

    /// Removes every key starting with `prefix`. Returns how many were removed.
    pub fn remove_prefix(&mut self, prefix: &str) -> usize {
        let matching: Vec<String> = self
            .entries
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect();

        for key in &matching {
            self.remove(key);
        }
        matching.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.lru.clear();
    }

    // == Pending Removals ==
    /// Removes a key and holds it as pending until `key_removal_settled`.
    pub fn mark_removed(&mut self, key: &str) -> bool {
        self.hold_removal(key);
        self.remove(key)
    }

    /// Holds a key as pending without touching its current entry.
    pub fn hold_removal(&mut self, key: &str) {
        *self.removals.keys.entry(key.to_string()).or_insert(0) += 1;
    }

    pub fn key_removal_settled(&mut self, key: &str) {
        if let Some(count) = self.removals.keys.get_mut(key) {
            *count -= 1;
            if *count == 0 {
                self.removals.keys.remove(key);
            }
        }
    }

    /// Removes a prefix and holds it as pending until `prefix_removal_settled`.
    pub fn mark_prefix_removed(&mut self, prefix: &str) -> usize {
        self.removals.prefixes.push(prefix.to_string());
        self.remove_prefix(prefix)
    }

    pub fn prefix_removal_settled(&mut self, prefix: &str) {
        if let Some(pos) = self.removals.prefixes.iter().position(|p| p == prefix) {
            self.removals.prefixes.swap_remove(pos);
        }
    }

    /// Clears the tier and holds every key as pending until `clear_settled`.
    pub fn mark_cleared(&mut self) {
        self.removals.clears += 1;
        self.clear();
    }

    pub fn clear_settled(&mut self) {
        self.removals.clears = self.removals.clears.saturating_sub(1);
    }

    /// True while a removal covering `key` may not have reached the
    /// persistent tier. Persisted copies of such keys must not repopulate
    /// the tier.
    pub fn is_removal_pending(&self, key: &str) -> bool {
        self.removals.clears > 0
            || self.removals.keys.contains_key(key)
            || self.removals.prefixes.iter().any(|p| key.starts_with(p.as_str()))
    }

    // == Pending Writes ==
    /// Counts a persistent write of `key` until `write_settled`.
    pub fn begin_write(&mut self, key: &str) {
        *self.writes.entry(key.to_string()).or_insert(0) += 1;
    }

    pub fn write_settled(&mut self, key: &str) {
        if let Some(count) = self.writes.get_mut(key) {
            *count -= 1;
            if *count == 0 {
                self.writes.remove(key);
            }
        }
    }

    /// Holds every key under `prefix` that still has a persistent write in
    /// flight and returns those keys.
    ///
    /// A prefix scan or full clear cannot see such writes, so each returned
    /// key needs its own delete queued behind them.
    pub fn hold_pending_writes(&mut self, prefix: &str) -> Vec<String> {
        let keys: Vec<String> = self
            .writes
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect();

        for key in &keys {
            self.hold_removal(key);
        }
        keys
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn last_accessed(&self, key: &str) -> Option<i64> {
        self.entries.get(key).map(|entry| entry.last_accessed)
    }

    // == Purge Expired ==
    /// Removes all entries expired at `now_ms`. Returns the number removed.
    pub fn purge_expired(&mut self, now_ms: i64) -> usize {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired_at(now_ms))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            self.remove(key);
        }
        self.stats.record_expirations(expired.len());
        expired.len()
    }

    // == Capacity ==
    /// Drops expired entries, then least recently used ones, until within budget.
    fn enforce_capacity(&mut self) -> usize {
        if self.entries.len() <= self.max_items {
            return 0;
        }

        self.purge_expired(current_timestamp_ms());

        let mut evicted = 0;
        while self.entries.len() > self.max_items {
            let Some(oldest) = self.lru.evict_oldest() else {
                break;
            };
            self.entries.remove(&oldest);
            evicted += 1;
        }
        self.stats.record_evictions(evicted);
        evicted
    }

    // == Stats ==
    /// Returns current cache statistics.
    pub fn stats(&self) -> CacheStats {
        let mut stats = self.stats.clone();
        stats.memory_entries = self.entries.len();
        stats
    }

    pub fn stats_mut(&mut self) -> &mut CacheStats {
        &mut self.stats
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::thread::sleep;
    use std::time::Duration;

    fn entry(key: &str, value: Value) -> CacheEntry {
        CacheEntry::new(key, value, Duration::from_secs(300))
    }

    #[test]
    fn test_insert_and_lookup() {
        let mut tier = MemoryTier::new(100);
        tier.insert(entry("key1", json!("value1")));

        assert_eq!(tier.lookup("key1"), Some(json!("value1")));
        assert_eq!(tier.lookup("missing"), None);
        assert_eq!(tier.len(), 1);
    }

    #[test]
    fn test_overwrite() {
        let mut tier = MemoryTier::new(100);
        tier.insert(entry("key1", json!(1)));
        tier.insert(entry("key1", json!(2)));

        assert_eq!(tier.lookup("key1"), Some(json!(2)));
        assert_eq!(tier.len(), 1);
    }

    #[test]
    fn test_expired_lookup_drops_entry() {
        let mut tier = MemoryTier::new(100);
        tier.insert(CacheEntry::new("key1", json!(1), Duration::from_millis(20)));

        sleep(Duration::from_millis(40));

        assert_eq!(tier.lookup("key1"), None);
        assert!(tier.is_empty());
        assert_eq!(tier.stats().expirations, 1);
    }

    #[test]
    fn test_lru_eviction_over_budget() {
        let mut tier = MemoryTier::new(3);
        for key in ["k1", "k2", "k3", "k4", "k5"] {
            tier.insert(entry(key, json!(key)));
        }

        assert_eq!(tier.len(), 3);
        assert!(!tier.contains("k1"));
        assert!(!tier.contains("k2"));
        assert!(tier.contains("k5"));
        assert_eq!(tier.stats().evictions, 2);
    }

    #[test]
    fn test_lookup_refreshes_lru_position() {
        let mut tier = MemoryTier::new(3);
        tier.insert(entry("key1", json!(1)));
        tier.insert(entry("key2", json!(2)));
        tier.insert(entry("key3", json!(3)));

        tier.lookup("key1");
        tier.insert(entry("key4", json!(4)));

        assert!(tier.contains("key1"));
        assert!(!tier.contains("key2"));
    }

    #[test]
    fn test_expired_entries_evicted_before_live_ones() {
        let mut tier = MemoryTier::new(2);
        tier.insert(entry("live", json!(1)));
        tier.insert(CacheEntry::new("short", json!(2), Duration::from_millis(10)));
        sleep(Duration::from_millis(30));

        tier.insert(entry("new", json!(3)));

        assert!(tier.contains("live"));
        assert!(tier.contains("new"));
        assert_eq!(tier.stats().evictions, 0);
    }

    #[test]
    fn test_insert_if_absent_keeps_existing() {
        let mut tier = MemoryTier::new(10);
        tier.insert(entry("key1", json!("fresh")));

        assert!(!tier.insert_if_absent(entry("key1", json!("stale"))));
        assert_eq!(tier.lookup("key1"), Some(json!("fresh")));
    }

    #[test]
    fn test_remove_prefix() {
        let mut tier = MemoryTier::new(10);
        tier.insert(entry("chat:1:a", json!(1)));
        tier.insert(entry("chat:1:b", json!(2)));
        tier.insert(entry("chat:2:a", json!(3)));

        assert_eq!(tier.remove_prefix("chat:1:"), 2);
        assert_eq!(tier.len(), 1);
        assert!(tier.contains("chat:2:a"));
    }

    #[test]
    fn test_remove_if_not_newer() {
        let mut tier = MemoryTier::new(10);
        let e = entry("key1", json!(1));
        let accessed = e.last_accessed;
        tier.insert(e);

        assert!(!tier.remove_if_not_newer("key1", accessed - 1));
        assert!(tier.remove_if_not_newer("key1", accessed));
        assert!(tier.is_empty());
    }

    #[test]
    fn test_pending_removal_blocks_until_settled() {
        let mut tier = MemoryTier::new(10);
        tier.insert(entry("key1", json!(1)));

        assert!(tier.mark_removed("key1"));
        assert!(tier.is_removal_pending("key1"));
        assert!(!tier.is_removal_pending("key2"));

        tier.key_removal_settled("key1");
        assert!(!tier.is_removal_pending("key1"));
    }

    #[test]
    fn test_pending_prefix_and_clear() {
        let mut tier = MemoryTier::new(10);
        tier.insert(entry("chat:1:a", json!(1)));

        assert_eq!(tier.mark_prefix_removed("chat:1:"), 1);
        assert!(tier.is_removal_pending("chat:1:b"));
        assert!(!tier.is_removal_pending("chat:2:a"));
        tier.prefix_removal_settled("chat:1:");
        assert!(!tier.is_removal_pending("chat:1:b"));

        tier.mark_cleared();
        assert!(tier.is_removal_pending("anything"));
        tier.clear_settled();
        assert!(!tier.is_removal_pending("anything"));
    }

    #[test]
    fn test_pending_writes_held_by_prefix() {
        let mut tier = MemoryTier::new(10);
        tier.begin_write("chat:1:a");
        tier.begin_write("chat:1:a");
        tier.begin_write("chat:2:a");

        assert_eq!(tier.hold_pending_writes("chat:1:"), vec!["chat:1:a".to_string()]);
        assert!(tier.is_removal_pending("chat:1:a"));
        assert!(!tier.is_removal_pending("chat:2:a"));

        tier.write_settled("chat:1:a");
        tier.write_settled("chat:1:a");
        tier.write_settled("chat:2:a");
        assert!(tier.hold_pending_writes("").is_empty());
    }

    #[test]
    fn test_purge_expired() {
        let mut tier = MemoryTier::new(10);
        tier.insert(CacheEntry::new("short", json!(1), Duration::from_millis(10)));
        tier.insert(entry("long", json!(2)));
        sleep(Duration::from_millis(30));

        assert_eq!(tier.purge_expired(current_timestamp_ms()), 1);
        assert_eq!(tier.len(), 1);
        assert!(tier.contains("long"));
    }
}
