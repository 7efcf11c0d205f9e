//! Tracing initialisation for hosts embedding the scheduler and cache.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Installs a global subscriber with an env filter and a fmt layer.
///
/// `RUST_LOG` overrides `default_directive` (e.g. `"fairway_cache=info"`).
/// Subsequent calls are no-ops.
pub fn init_tracing(default_directive: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}
