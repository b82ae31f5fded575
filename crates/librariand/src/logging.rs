//! tracing subscriber setup.

use tracing_subscriber::EnvFilter;

/// Build the filter: `RUST_LOG` when set, otherwise the configured level.
pub fn env_filter(configured_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::try_new(configured_level.to_lowercase())
            .unwrap_or_else(|_| EnvFilter::new("info"))
    })
}

/// Install the global subscriber. Safe to call more than once; later calls
/// are ignored.
pub fn init(configured_level: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter(configured_level))
        .with_target(true)
        .with_level(true)
        .try_init();
}
