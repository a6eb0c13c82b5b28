//! Error taxonomy for the data-access core.
//!
//! Storage errors propagate unchanged from the statement executor; the core
//! never retries writes on behalf of callers.

use std::path::PathBuf;
use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Error type for application core operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("failed to prepare data directory {path}: {source}")]
    DataDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("application is not bootstrapped")]
    NotBootstrapped,

    #[error("connection pool {0} is closed")]
    PoolClosed(&'static str),

    #[error("writer connection of the {0} store is busy")]
    WriterBusy(&'static str),

    #[error("transaction {0} is no longer active")]
    TransactionClosed(String),

    #[error("transaction rolled back after a nested failure: {0}")]
    TransactionAborted(String),
}

impl Error {
    /// Build a [`Error::Config`] from anything displayable.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Build a [`Error::Validation`] from anything displayable.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}
