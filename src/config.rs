//! Configuration Module
//!
//! Handles loading scheduler and cache tuning parameters from environment variables.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::scheduler::RetryPolicy;

/// Scheduler tuning parameters.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Maximum number of jobs RUNNING at the same time
    pub max_concurrent: usize,
    /// How long terminal jobs stay visible before they are forgotten
    pub completed_retention: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 16,
            completed_retention: Duration::from_millis(5_000),
        }
    }
}

/// Cache tuning parameters.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// TTL applied when `set` is called without one
    pub default_ttl: Duration,
    /// Entry budget of the in-process tier
    pub max_memory_items: usize,
    /// Entry budget of the persistent tier, enforced by maintenance
    pub max_persistent_items: usize,
    /// Period of the maintenance loop
    pub maintenance_interval: Duration,
    /// Upper bound on persistent deletions per maintenance step
    pub maintenance_batch_size: usize,
    /// Deletions per batch when removing by prefix
    pub removal_batch_size: usize,
    /// Per-attempt timeout of every persistent tier job
    pub store_timeout: Duration,
    /// Retry policy of persistent tier writes and deletes
    pub write_retry: RetryPolicy,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_millis(300_000),
            max_memory_items: 1000,
            max_persistent_items: 5000,
            maintenance_interval: Duration::from_millis(60_000),
            maintenance_batch_size: 100,
            removal_batch_size: 50,
            store_timeout: Duration::from_millis(10_000),
            write_retry: RetryPolicy::new(
                2,
                Duration::from_millis(50),
                2.0,
                Duration::from_millis(1_000),
            ),
        }
    }
}

/// Full configuration of the subsystem.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub scheduler: SchedulerConfig,
    pub cache: CacheConfig,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `SCHEDULER_MAX_CONCURRENT` - Running job cap (default: 16)
    /// - `SCHEDULER_RETENTION_MS` - Terminal job retention (default: 5000)
    /// - `CACHE_DEFAULT_TTL_MS` - Default entry TTL (default: 300000)
    /// - `CACHE_MAX_MEMORY_ITEMS` - Memory tier budget (default: 1000)
    /// - `CACHE_MAX_PERSISTENT_ITEMS` - Persistent tier budget (default: 5000)
    /// - `CACHE_MAINTENANCE_INTERVAL_MS` - Maintenance period (default: 60000)
    /// - `CACHE_MAINTENANCE_BATCH` - Deletions per maintenance step (default: 100)
    /// - `CACHE_REMOVAL_BATCH` - Deletions per prefix-removal batch (default: 50)
    /// - `CACHE_STORE_TIMEOUT_MS` - Persistent tier job timeout (default: 10000)
    ///
    /// Unset or unparsable variables fall back to the defaults.
    pub fn from_env() -> Self {
        let scheduler_defaults = SchedulerConfig::default();
        let cache_defaults = CacheConfig::default();

        Self {
            scheduler: SchedulerConfig {
                max_concurrent: env_or("SCHEDULER_MAX_CONCURRENT", scheduler_defaults.max_concurrent),
                completed_retention: env_millis_or(
                    "SCHEDULER_RETENTION_MS",
                    scheduler_defaults.completed_retention,
                ),
            },
            cache: CacheConfig {
                default_ttl: env_millis_or("CACHE_DEFAULT_TTL_MS", cache_defaults.default_ttl),
                max_memory_items: env_or("CACHE_MAX_MEMORY_ITEMS", cache_defaults.max_memory_items),
                max_persistent_items: env_or(
                    "CACHE_MAX_PERSISTENT_ITEMS",
                    cache_defaults.max_persistent_items,
                ),
                maintenance_interval: env_millis_or(
                    "CACHE_MAINTENANCE_INTERVAL_MS",
                    cache_defaults.maintenance_interval,
                ),
                maintenance_batch_size: env_or(
                    "CACHE_MAINTENANCE_BATCH",
                    cache_defaults.maintenance_batch_size,
                ),
                removal_batch_size: env_or("CACHE_REMOVAL_BATCH", cache_defaults.removal_batch_size),
                store_timeout: env_millis_or("CACHE_STORE_TIMEOUT_MS", cache_defaults.store_timeout),
                write_retry: cache_defaults.write_retry,
            },
        }
    }
}

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_millis_or(name: &str, default: Duration) -> Duration {
    env::var(name)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(default)
}
