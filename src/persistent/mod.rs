//! Persistent tier interface.
//!
//! The durable key-value store behind the cache. Any backend providing keyed
//! access plus ascending scans over the expiry and last-access orderings can
//! serve as the persistent tier.

mod memory;

use async_trait::async_trait;

use crate::cache::CacheEntry;
use crate::error::StoreError;

pub use memory::MemoryStore;

/// Trait for persistent tier backends.
///
/// Failures are reported as `StoreError`; the cache treats all of them as
/// non-fatal.
#[async_trait]
pub trait PersistentStore: Send + Sync {
    /// Get an entry by key.
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, StoreError>;

    /// Insert or replace the entry stored under `entry.key`.
    async fn put(&self, entry: CacheEntry) -> Result<(), StoreError>;

    /// Remove an entry. Removing a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Remove every entry.
    async fn clear(&self) -> Result<(), StoreError>;

    /// Number of stored entries.
    async fn count(&self) -> Result<usize, StoreError>;

    /// Up to `limit` entries, soonest expiry first.
    async fn scan_by_expiry_ascending(&self, limit: usize) -> Result<Vec<CacheEntry>, StoreError>;

    /// Up to `limit` entries, least recently accessed first.
    async fn scan_by_last_accessed_ascending(
        &self,
        limit: usize,
    ) -> Result<Vec<CacheEntry>, StoreError>;

    /// Every stored key, in no particular order.
    async fn list_keys(&self) -> Result<Vec<String>, StoreError>;
}
