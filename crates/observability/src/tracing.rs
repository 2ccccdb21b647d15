//! JSON log output filtered by `RUST_LOG`.

use tracing_subscriber::EnvFilter;

/// Install the global subscriber, falling back to `default_directive` when
/// `RUST_LOG` is unset or invalid.
pub fn init(default_directive: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .json()
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_current_span(true)
        .with_target(false)
        .try_init();
}
