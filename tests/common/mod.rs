//! Test utilities for Dualite integration tests.
//!
//! Provides:
//! - Temporary-directory application fixtures
//! - Query recording for routing assertions
//! - Polling helper for background effects

#![allow(dead_code)]

use dualite::observability::tracing::init_test_tracing;
use dualite::storage::{Db, PoolRole, QueryEvent, StoreKind};
use dualite::{App, AppConfig};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Test fixture owning an app whose data directory is a temporary dir.
///
/// The directory is removed when the fixture is dropped.
pub struct TestApp {
    /// Temporary directory holding the data directory
    pub temp_dir: TempDir,
    pub app: App,
}

impl TestApp {
    /// Create an unbootstrapped app with small pools.
    pub fn new() -> Self {
        Self::with_config(|config| config)
    }

    /// Create an unbootstrapped app, letting the caller adjust the config.
    pub fn with_config(adjust: impl FnOnce(AppConfig) -> AppConfig) -> Self {
        init_test_tracing();
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let config = AppConfig {
            data_max_open_conns: 4,
            aux_max_open_conns: 2,
            acquire_timeout: Duration::from_secs(5),
            ..AppConfig::new(temp_dir.path().join("dl_data"))
        };
        let app = App::new(adjust(config));
        Self { temp_dir, app }
    }

    /// Create and bootstrap an app.
    pub fn bootstrapped() -> Self {
        let fixture = Self::new();
        fixture.app.bootstrap().expect("bootstrap failed");
        fixture
    }

    /// Create and bootstrap an app in dev mode.
    pub fn bootstrapped_dev() -> Self {
        let fixture = Self::with_config(|config| config.with_dev(true));
        fixture.app.bootstrap().expect("bootstrap failed");
        fixture
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        let _ = self.app.reset_bootstrap_state();
    }
}

/// One statement seen by a [`QueryRecorder`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Executed {
    pub store: StoreKind,
    pub role: PoolRole,
    pub sql: String,
}

/// Records every statement executed by the pools behind a handle.
#[derive(Clone, Default)]
pub struct QueryRecorder {
    seen: Arc<Mutex<Vec<Executed>>>,
}

impl QueryRecorder {
    /// Install a recorder on both pools of `db`.
    pub fn install(db: &Db) -> Self {
        let recorder = Self::default();
        let seen = recorder.seen.clone();
        db.set_query_observer(Some(Arc::new(move |event: &QueryEvent<'_>| {
            seen.lock().push(Executed {
                store: event.store,
                role: event.role,
                sql: event.sql.to_string(),
            });
        })));
        recorder
    }

    /// Role of the last execution of `sql`.
    pub fn role_of(&self, sql: &str) -> Option<PoolRole> {
        self.seen
            .lock()
            .iter()
            .rev()
            .find(|executed| executed.sql == sql)
            .map(|executed| executed.role)
    }

    pub fn executed(&self) -> Vec<Executed> {
        self.seen.lock().clone()
    }

    pub fn clear(&self) {
        self.seen.lock().clear();
    }
}

/// Number of persisted log rows.
pub fn log_count(app: &App) -> i64 {
    app.log_query()
        .expect("app not bootstrapped")
        .count()
        .expect("count failed")
}

/// Wait for a condition to become true with timeout.
///
/// # Arguments
///
/// * `timeout` - Maximum time to wait
/// * `condition` - Closure that returns true when condition is met
///
/// # Returns
///
/// `true` if condition was met, `false` if timeout expired
pub async fn wait_for<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixture_creates_temp_dir() {
        let fixture = TestApp::new();
        assert!(fixture.temp_dir.path().exists());
        assert!(fixture.app.data_dir().starts_with(fixture.temp_dir.path()));
    }
}
