//! Configuration for the application core and the `dualite` CLI.
//!
//! Supports:
//! - [`AppConfig`]: construction-time settings of an [`App`](crate::app::App)
//! - [`Cli`]: CLI arguments via clap, with environment variable overrides

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};

/// Construction-time configuration of an application instance.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Directory holding the primary and auxiliary store files.
    pub data_dir: PathBuf,
    /// Name of the environment variable collaborators read the at-rest
    /// encryption key from.
    pub encryption_env: String,
    /// Development mode (verbose app logs, mirrored to tracing).
    pub is_dev: bool,
    /// Concurrent pool size of the primary store.
    pub data_max_open_conns: u32,
    /// Concurrent pool size of the auxiliary store.
    pub aux_max_open_conns: u32,
    /// SQLite busy timeout.
    pub busy_timeout: Duration,
    /// Maximum wait for a free pooled connection.
    pub acquire_timeout: Duration,
    /// Buffered log records that trigger an immediate flush.
    pub log_batch_size: usize,
    /// Period of the background log flusher.
    pub log_flush_interval: Duration,
}

impl AppConfig {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    pub fn with_dev(mut self, is_dev: bool) -> Self {
        self.is_dev = is_dev;
        self
    }

    pub fn with_encryption_env(mut self, name: impl Into<String>) -> Self {
        self.encryption_env = name.into();
        self
    }

    /// Check the values that would make bootstrap fail.
    pub fn validate(&self) -> Result<()> {
        if self.data_dir.as_os_str().is_empty() {
            return Err(Error::config("data directory cannot be empty"));
        }
        if self.data_max_open_conns < 2 || self.aux_max_open_conns < 2 {
            return Err(Error::config(format!(
                "concurrent pools need at least 2 connections (data: {}, aux: {})",
                self.data_max_open_conns, self.aux_max_open_conns
            )));
        }
        if self.log_batch_size == 0 {
            return Err(Error::config("log batch size must be positive"));
        }
        if self.log_flush_interval.is_zero() {
            return Err(Error::config("log flush interval must be positive"));
        }
        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./dl_data"),
            encryption_env: String::new(),
            is_dev: false,
            data_max_open_conns: 16,
            aux_max_open_conns: 8,
            busy_timeout: Duration::from_secs(10),
            acquire_timeout: Duration::from_secs(30),
            log_batch_size: 200,
            log_flush_interval: Duration::from_secs(3),
        }
    }
}

/// Dualite: dual-pool SQLite application core.
#[derive(Parser, Debug, Clone)]
#[command(name = "dualite")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Data directory for the SQLite stores
    #[arg(short, long, env = "DUALITE_DATA_DIR", default_value = "./dl_data")]
    pub data_dir: PathBuf,

    /// Enable development mode
    #[arg(long, env = "DUALITE_DEV", default_value_t = false)]
    pub dev: bool,

    /// Name of the env variable holding the at-rest encryption key
    #[arg(long, env = "DUALITE_ENCRYPTION_ENV", default_value = "")]
    pub encryption_env: String,

    /// Log level for process diagnostics (trace, debug, info, warn, error)
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    pub log_level: String,

    /// Emit process diagnostics as JSON lines
    #[arg(long, env = "DUALITE_LOG_JSON", default_value_t = false)]
    pub log_json: bool,

    /// Size of the primary store's concurrent pool
    #[arg(long, env = "DUALITE_DATA_MAX_OPEN_CONNS", default_value_t = 16)]
    pub data_max_open_conns: u32,

    /// Size of the auxiliary store's concurrent pool
    #[arg(long, env = "DUALITE_AUX_MAX_OPEN_CONNS", default_value_t = 8)]
    pub aux_max_open_conns: u32,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Bootstrap and keep background jobs running until interrupted
    Run,

    /// Print persisted logs, newest first
    Logs {
        /// Maximum number of rows
        #[arg(long, default_value_t = 50)]
        limit: u32,

        /// Minimum level (debug, info, warn, error or a number)
        #[arg(long)]
        min_level: Option<String>,
    },

    /// Delete logs older than the given number of days
    PruneLogs {
        #[arg(long, default_value_t = 5)]
        days: u32,
    },

    /// Inspect or change settings
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum SettingsAction {
    /// Print the current settings as JSON
    Show,

    /// Set the minimum persisted log level
    SetLogLevel { level: String },

    /// Set the log retention in days (0 disables log persistence)
    SetMaxDays { days: u32 },
}

impl Cli {
    /// Parse configuration from CLI arguments and environment.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    pub fn app_config(&self) -> AppConfig {
        AppConfig {
            data_dir: self.data_dir.clone(),
            encryption_env: self.encryption_env.clone(),
            is_dev: self.dev,
            data_max_open_conns: self.data_max_open_conns,
            aux_max_open_conns: self.aux_max_open_conns,
            ..AppConfig::default()
        }
    }
}
