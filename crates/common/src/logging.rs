//! Tracing subscriber setup shared by binaries and integration tests.

use tracing_subscriber::{fmt, EnvFilter};

/// Initialize the global tracing subscriber.
///
/// Respects `RUST_LOG`; falls back to `info` for our crates. Safe to call
/// more than once (subsequent calls are no-ops).
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,routing=debug,pipeline=debug"));

    let _ = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
