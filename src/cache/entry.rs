//! Cache Entry Module
//!
//! Defines the persistable form of a cached value with expiry and access metadata.

use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

// == Cache Entry ==
/// A cached value together with its expiry and LRU metadata.
///
/// The same shape is held by the memory tier and written to the persistent tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Cache key
    pub key: String,
    /// Value in plain, persistable form
    pub data: Value,
    /// Absolute expiry (Unix milliseconds)
    pub expiry: i64,
    /// Last successful read or write (Unix milliseconds)
    pub last_accessed: i64,
}

impl CacheEntry {
    // == Constructor ==
    /// Creates a new entry expiring `ttl` from now.
    pub fn new(key: impl Into<String>, data: Value, ttl: Duration) -> Self {
        let now = current_timestamp_ms();
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);

        Self {
            key: key.into(),
            data,
            expiry: now.saturating_add(ttl_ms),
            last_accessed: now,
        }
    }

    // == Is Expired ==
    /// Checks if the entry has expired.
    ///
    /// An entry is invalid once the current time is greater than or equal to
    /// its expiry.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(current_timestamp_ms())
    }

    pub fn is_expired_at(&self, now_ms: i64) -> bool {
        now_ms >= self.expiry
    }

    /// Records an access at the current time.
    pub fn touch(&mut self) {
        self.last_accessed = current_timestamp_ms().max(self.last_accessed);
    }
}

// == Utility Functions ==
/// Returns current Unix timestamp in milliseconds.
pub fn current_timestamp_ms() -> i64 {
    Utc::now().timestamp_millis()
}
