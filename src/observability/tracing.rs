//! Tracing setup.
//!
//! Process diagnostics (pool lifecycle, flush failures, cron errors) go
//! through `tracing`. Application logs are persisted separately by the
//! [`Logger`](crate::logger::Logger) and only mirrored here in dev mode,
//! under the `app` target.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize tracing with the given default level.
///
/// This sets up:
/// - Console logging on stderr with structured format, keeping stdout for
///   command output
/// - Environment-based filter (via RUST_LOG), falling back to `level`
/// - JSON output instead when `json` is set
///
/// # Panics
///
/// Panics if tracing has already been initialized.
pub fn init_tracing(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{level},dualite={level},app=debug")));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_writer(std::io::stderr),
            )
            .init();
    }

    tracing::debug!(level, json, "Tracing initialized");
}

/// Initialize tracing for tests (only logs errors).
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("error")
        .with_test_writer()
        .try_init();
}
