//! Process-wide test tracing setup.

use std::sync::Once;

use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

/// Initialise the global `tracing` subscriber once per test process.
///
/// Respects `RUST_LOG`; falls back to `mycelia=debug,info` when unset. Safe
/// to call from every test — only the first call installs the subscriber.
pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "mycelia=debug,info".parse().unwrap()))
            .with_test_writer()
            .init();
    });
}
