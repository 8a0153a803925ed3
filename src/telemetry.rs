//! Tracing setup.
//!
//! One fmt subscriber, filtered by `RUST_LOG` (default `info`). Teardown
//! helpers log swallowed failures at WARN, so operator visibility of broken
//! restores depends on this being initialized: suites call
//! [`init_for_tests`] from their setup path.

use tracing_subscriber::EnvFilter;

fn filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Initialize tracing for a binary. Safe to call once.
pub fn init() {
    let _ = tracing_subscriber::fmt().with_env_filter(filter()).try_init();
}

/// Initialize tracing inside a test process: output is captured per test,
/// repeated calls are no-ops.
pub fn init_for_tests() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter())
        .with_test_writer()
        .try_init();
}
