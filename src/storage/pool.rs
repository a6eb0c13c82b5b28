//! SQLite connection pools.
//!
//! Uses r2d2 with r2d2_sqlite. Each logical store gets two pools:
//! - a concurrent pool with several connections for read-classified statements
//! - a nonconcurrent pool capped at one connection, which serializes every
//!   write and every transaction against that store

use parking_lot::{Mutex, RwLock};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::OpenFlags;
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::Duration;

use super::schema::{apply_common_pragmas, apply_writer_pragmas};
use crate::error::{Error, Result};

/// A checked-out SQLite connection.
pub type Connection = PooledConnection<SqliteConnectionManager>;

/// Callback invoked after every statement a pool executes.
pub type QueryObserver = Arc<dyn Fn(&QueryEvent<'_>) + Send + Sync>;

/// Which logical database a pool belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreKind {
    /// Application data.
    Primary,
    /// Logs and other secondary data.
    Aux,
}

impl StoreKind {
    /// File name of the store under the data directory.
    pub fn file_name(self) -> &'static str {
        match self {
            Self::Primary => "data.db",
            Self::Aux => "auxiliary.db",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Aux => "aux",
        }
    }
}

/// Role of a pool within its pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PoolRole {
    Concurrent,
    Nonconcurrent,
}

impl PoolRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Concurrent => "concurrent",
            Self::Nonconcurrent => "nonconcurrent",
        }
    }
}

/// A single executed statement, as reported to query observers.
#[derive(Debug, Clone, Copy)]
pub struct QueryEvent<'a> {
    pub store: StoreKind,
    pub role: PoolRole,
    pub sql: &'a str,
    pub elapsed: Duration,
    pub failed: bool,
}

/// Options for opening a pool.
#[derive(Debug, Clone, Copy)]
pub struct PoolOptions {
    /// Maximum number of live connections. Forced to 1 for nonconcurrent pools.
    pub max_size: u32,
    /// SQLite busy timeout applied to each connection.
    pub busy_timeout: Duration,
    /// How long a caller waits for a free connection before failing.
    pub acquire_timeout: Duration,
}

/// Pooled access to one SQLite database file.
pub struct DbPool {
    store: StoreKind,
    role: PoolRole,
    pool: Pool<SqliteConnectionManager>,
    closed: AtomicBool,
    observer: RwLock<Option<QueryObserver>>,
    /// Thread that opened the transaction currently holding a connection.
    tx_owner: Mutex<Option<ThreadId>>,
}

impl DbPool {
    /// Open a pool for the given database file.
    ///
    /// # Arguments
    ///
    /// * `db_path` - Path to the SQLite database file (created if missing)
    /// * `store` - Logical store the file belongs to
    /// * `role` - Concurrent or nonconcurrent
    /// * `options` - Sizing and timeouts
    ///
    /// # Errors
    ///
    /// Returns an error if the first connection cannot be opened.
    pub fn open<P: AsRef<Path>>(
        db_path: P,
        store: StoreKind,
        role: PoolRole,
        options: PoolOptions,
    ) -> Result<Self> {
        let manager = SqliteConnectionManager::file(db_path.as_ref()).with_flags(
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX
                | OpenFlags::SQLITE_OPEN_URI,
        );

        let max_size = match role {
            PoolRole::Concurrent => options.max_size,
            PoolRole::Nonconcurrent => 1,
        };

        let pool = Pool::builder()
            .max_size(max_size)
            .min_idle(Some(1))
            .connection_timeout(options.acquire_timeout)
            .connection_customizer(Box::new(PragmaCustomizer {
                role,
                busy_timeout: options.busy_timeout,
            }))
            .build(manager)?;

        tracing::debug!(
            store = store.as_str(),
            role = role.as_str(),
            max_size,
            path = %db_path.as_ref().display(),
            "Opened connection pool"
        );

        Ok(Self {
            store,
            role,
            pool,
            closed: AtomicBool::new(false),
            observer: RwLock::new(None),
            tx_owner: Mutex::new(None),
        })
    }

    pub fn store(&self) -> StoreKind {
        self.store
    }

    pub fn role(&self) -> PoolRole {
        self.role
    }

    /// Check out a connection, waiting up to the acquire timeout.
    pub fn get(&self) -> Result<Connection> {
        if self.is_closed() {
            return Err(Error::PoolClosed(self.role.as_str()));
        }
        Ok(self.pool.get()?)
    }

    /// Check out a connection only if one is idle right now.
    pub fn try_get(&self) -> Result<Option<Connection>> {
        if self.is_closed() {
            return Err(Error::PoolClosed(self.role.as_str()));
        }
        Ok(self.pool.try_get())
    }

    /// Maximum number of live connections.
    pub fn max_size(&self) -> u32 {
        self.pool.max_size()
    }

    /// Get the current pool state for monitoring.
    pub fn state(&self) -> r2d2::State {
        self.pool.state()
    }

    /// Mark the pool closed. Later checkouts fail with [`Error::PoolClosed`];
    /// idle connections are released when the last handle is dropped.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            tracing::debug!(
                store = self.store.as_str(),
                role = self.role.as_str(),
                "Closed connection pool"
            );
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn set_tx_owner(&self, owner: Option<ThreadId>) {
        *self.tx_owner.lock() = owner;
    }

    /// Whether the calling thread opened the transaction holding this pool.
    ///
    /// Such a thread would wait on itself if it asked for another connection.
    pub fn is_held_by_current_thread(&self) -> bool {
        *self.tx_owner.lock() == Some(thread::current().id())
    }

    /// Install (or clear) the statement observer.
    pub fn set_query_observer(&self, observer: Option<QueryObserver>) {
        *self.observer.write() = observer;
    }

    /// Report an executed statement to tracing and the observer.
    pub(crate) fn observe(&self, sql: &str, elapsed: Duration, failed: bool) {
        tracing::trace!(
            store = self.store.as_str(),
            role = self.role.as_str(),
            elapsed_us = elapsed.as_micros() as u64,
            failed,
            sql,
            "Executed statement"
        );

        let observer = self.observer.read().clone();
        if let Some(observer) = observer {
            observer(&QueryEvent {
                store: self.store,
                role: self.role,
                sql,
                elapsed,
                failed,
            });
        }
    }
}

impl fmt::Debug for DbPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbPool")
            .field("store", &self.store)
            .field("role", &self.role)
            .field("max_size", &self.pool.max_size())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Connection customizer that applies role-specific pragmas.
#[derive(Debug)]
struct PragmaCustomizer {
    role: PoolRole,
    busy_timeout: Duration,
}

impl r2d2::CustomizeConnection<rusqlite::Connection, rusqlite::Error> for PragmaCustomizer {
    fn on_acquire(&self, conn: &mut rusqlite::Connection) -> Result<(), rusqlite::Error> {
        match self.role {
            PoolRole::Concurrent => apply_common_pragmas(conn, self.busy_timeout),
            PoolRole::Nonconcurrent => apply_writer_pragmas(conn, self.busy_timeout),
        }
    }
}
