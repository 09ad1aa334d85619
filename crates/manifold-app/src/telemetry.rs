//! Logging initialisation.

use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber: compact fmt output filtered by
/// `RUST_LOG`, defaulting to `info`.
pub(crate) fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}
