//! In-process persistent tier backed by a HashMap.
//!
//! Both scan orderings break timestamp ties by write order, so entries
//! written within the same millisecond still rank oldest-written first.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use super::PersistentStore;
use crate::cache::CacheEntry;
use crate::error::StoreError;

#[derive(Debug)]
struct StoredRecord {
    entry: CacheEntry,
    write_seq: u64,
}

#[derive(Debug, Default)]
struct MemoryStoreState {
    records: HashMap<String, StoredRecord>,
    next_write: u64,
}

/// In-process store with the secondary orderings the cache needs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryStoreState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryStoreState>, StoreError> {
        self.state
            .lock()
            .map_err(|e| StoreError::Unavailable(e.to_string()))
    }

    fn scan_by<K, F>(&self, limit: usize, rank: F) -> Result<Vec<CacheEntry>, StoreError>
    where
        K: Ord,
        F: Fn(&CacheEntry) -> K,
    {
        let state = self.lock()?;
        let mut records: Vec<&StoredRecord> = state.records.values().collect();
        records.sort_by(|a, b| {
            rank(&a.entry)
                .cmp(&rank(&b.entry))
                .then(a.write_seq.cmp(&b.write_seq))
        });

        Ok(records
            .into_iter()
            .take(limit)
            .map(|record| record.entry.clone())
            .collect())
    }
}

#[async_trait]
impl PersistentStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, StoreError> {
        Ok(self.lock()?.records.get(key).map(|record| record.entry.clone()))
    }

    async fn put(&self, entry: CacheEntry) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        let write_seq = state.next_write;
        state.next_write += 1;
        state
            .records
            .insert(entry.key.clone(), StoredRecord { entry, write_seq });
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.lock()?.records.remove(key);
        Ok(())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        self.lock()?.records.clear();
        Ok(())
    }

    async fn count(&self) -> Result<usize, StoreError> {
        Ok(self.lock()?.records.len())
    }

    async fn scan_by_expiry_ascending(&self, limit: usize) -> Result<Vec<CacheEntry>, StoreError> {
        self.scan_by(limit, |entry| entry.expiry)
    }

    async fn scan_by_last_accessed_ascending(
        &self,
        limit: usize,
    ) -> Result<Vec<CacheEntry>, StoreError> {
        self.scan_by(limit, |entry| entry.last_accessed)
    }

    async fn list_keys(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.lock()?.records.keys().cloned().collect())
    }
}
