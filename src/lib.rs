//! Dualite: dual-pool SQLite application core.
//!
//! Provides:
//! - Read/write statement routing over a concurrent and a single-connection
//!   nonconcurrent pool per store
//! - Reentrant transactions threaded through transactional app views
//! - Bootstrap/reset lifecycle of a primary and an auxiliary store
//! - Batched persistence of application logs into the auxiliary store
//! - Transactionally saved settings

pub mod app;
pub mod broker;
pub mod config;
pub mod cron;
pub mod error;
pub mod logger;
pub mod logs;
pub mod observability;
pub mod settings;
pub mod storage;
pub mod store;
pub mod task;
pub mod transport;
pub mod tx;

pub use app::App;
pub use config::AppConfig;
pub use error::{Error, Result};
pub use logger::{Level, Logger};
pub use settings::Settings;
pub use storage::Db;
pub use tx::TxInfo;

use std::time::{SystemTime, UNIX_EPOCH};

/// Generate a new time-ordered unique id (UUIDv7).
pub fn generate_id() -> String {
    uuid::Uuid::now_v7().to_string()
}

/// Current time as Unix milliseconds.
pub fn now_millis() -> i64 {
    millis_since_epoch(SystemTime::now())
}

/// Convert a timestamp to Unix milliseconds. Times before the epoch map to 0.
pub fn millis_since_epoch(time: SystemTime) -> i64 {
    time.duration_since(UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_generated_ids_are_unique_and_ordered() {
        let a = generate_id();
        let b = generate_id();
        assert_ne!(a, b);
        assert!(a < b);
    }

    #[test]
    fn test_millis_since_epoch() {
        assert_eq!(millis_since_epoch(UNIX_EPOCH + Duration::from_millis(1500)), 1500);
        assert_eq!(millis_since_epoch(UNIX_EPOCH - Duration::from_secs(1)), 0);
    }
}
