//! `tracing` subscriber setup for binaries and tests.

use tracing_subscriber::EnvFilter;

/// Filter variable checked before `RUST_LOG`.
pub const ENV_LOG: &str = "TEXSHARE_LOG";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env(ENV_LOG)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install a formatting subscriber. Does nothing if one is already installed.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .try_init();
}

/// Like [`init_tracing`], writing through the test harness's capture.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_test_writer()
        .try_init();
}
