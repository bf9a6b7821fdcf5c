//! Shared test setup

use tracing_subscriber::EnvFilter;

/// Install a test subscriber so `cargo test -- --nocapture` shows the
/// crate's log output. Safe to call from every test; later calls are no-ops.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("otlp_conduit=debug"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}
