//! Cache Module
//!
//! Provides a two-tier cache: a bounded in-memory tier with TTL expiration and
//! LRU eviction, backed by a persistent tier reached through the job scheduler.

mod entry;
mod lru;
mod maintenance;
mod memory;
mod stats;
mod store;


// Re-export public types
pub use entry::{current_timestamp_ms, CacheEntry};
pub use lru::LruTracker;
pub use maintenance::MaintenanceReport;
pub use memory::MemoryTier;
pub use stats::CacheStats;
pub use store::{CacheStore, SetOptions};

// == Public Constants ==
/// Maximum allowed key length in bytes
pub const MAX_KEY_LENGTH: usize = 256;
