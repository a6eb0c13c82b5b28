//! Transaction context and the reentrant transaction runner.
//!
//! A transaction owns the single connection of a store's nonconcurrent pool
//! from `BEGIN` until `COMMIT`/`ROLLBACK`. Nested calls on the same store
//! never open a second transaction: they run on the outer [`TxInfo`], and
//! only the outermost call commits or rolls back. Any failure at any nesting
//! level marks the transaction rollback-only.

use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::Instant;

use crate::error::{Error, Result};
use crate::storage::pool::{Connection, DbPool, StoreKind};

type CommitHook = Box<dyn FnOnce() + Send>;

/// An active transaction on one store.
pub struct TxInfo {
    id: String,
    store: StoreKind,
    started_at: Instant,
    owner: ThreadId,
    writer: Arc<DbPool>,
    conn: Mutex<Option<Connection>>,
    active: AtomicBool,
    failure: Mutex<Option<String>>,
    on_commit: Mutex<Vec<CommitHook>>,
}

impl TxInfo {
    /// Check out the writer connection and open an immediate transaction.
    ///
    /// Blocks while another transaction or write holds the connection.
    pub(crate) fn begin(writer: Arc<DbPool>) -> Result<Arc<Self>> {
        let conn = writer.get()?;
        Self::open(writer, conn)
    }

    fn open(writer: Arc<DbPool>, conn: Connection) -> Result<Arc<Self>> {
        // A connection handed back mid-transaction would make our BEGIN fail
        // or, worse, make COMMIT apply someone else's statements.
        if !conn.is_autocommit() {
            tracing::warn!(
                store = writer.store().as_str(),
                "Writer connection returned with an open transaction, rolling it back"
            );
            conn.execute_batch("ROLLBACK")?;
        }

        let start = Instant::now();
        let begun = conn.execute_batch("BEGIN IMMEDIATE");
        writer.observe("BEGIN IMMEDIATE", start.elapsed(), begun.is_err());
        begun?;

        let owner = thread::current().id();
        writer.set_tx_owner(Some(owner));

        let tx = Arc::new(Self {
            id: crate::generate_id(),
            store: writer.store(),
            started_at: Instant::now(),
            owner,
            writer,
            conn: Mutex::new(Some(conn)),
            active: AtomicBool::new(true),
            failure: Mutex::new(None),
            on_commit: Mutex::new(Vec::new()),
        });

        tracing::trace!(tx_id = %tx.id, store = tx.store.as_str(), "Transaction started");
        Ok(tx)
    }

    /// Unique id of this transaction.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Store the transaction runs against.
    pub fn store(&self) -> StoreKind {
        self.store
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    /// Thread that began the transaction.
    pub fn owner(&self) -> ThreadId {
        self.owner
    }

    /// Whether the transaction has neither committed nor rolled back yet.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Whether a nested call failed, forcing the outermost call to roll back.
    pub fn is_rollback_only(&self) -> bool {
        self.failure.lock().is_some()
    }

    /// Register a callback to run after the outermost commit succeeds.
    ///
    /// Callbacks are discarded on rollback.
    pub fn on_commit(&self, hook: impl FnOnce() + Send + 'static) {
        self.on_commit.lock().push(Box::new(hook));
    }

    pub(crate) fn writer(&self) -> &Arc<DbPool> {
        &self.writer
    }

    /// Run `f` on the transaction's connection.
    pub(crate) fn with_connection<T, F>(&self, sql: &str, f: F) -> Result<T>
    where
        F: FnOnce(&rusqlite::Connection) -> rusqlite::Result<T>,
    {
        let guard = self.conn.lock();
        let conn = guard
            .as_ref()
            .ok_or_else(|| Error::TransactionClosed(self.id.clone()))?;

        let start = Instant::now();
        let result = f(&**conn);
        drop(guard);

        self.writer.observe(sql, start.elapsed(), result.is_err());
        Ok(result?)
    }

    fn mark_failed(&self, reason: String) {
        let mut failure = self.failure.lock();
        if failure.is_none() {
            *failure = Some(reason);
        }
    }

    fn commit(&self) -> Result<()> {
        self.finish("COMMIT")?;
        let hooks = std::mem::take(&mut *self.on_commit.lock());
        for hook in hooks {
            hook();
        }
        Ok(())
    }

    fn rollback(&self) {
        self.on_commit.lock().clear();
        if let Err(e) = self.finish("ROLLBACK") {
            tracing::error!(tx_id = %self.id, error = %e, "Rollback failed");
        }
    }

    /// Run the terminating statement and release the connection.
    fn finish(&self, sql: &'static str) -> Result<()> {
        let conn = self
            .conn
            .lock()
            .take()
            .ok_or_else(|| Error::TransactionClosed(self.id.clone()))?;
        self.active.store(false, Ordering::SeqCst);
        self.writer.set_tx_owner(None);

        let start = Instant::now();
        let result = conn.execute_batch(sql);
        self.writer.observe(sql, start.elapsed(), result.is_err());

        if result.is_err() && !conn.is_autocommit() {
            // A failed COMMIT leaves the transaction open.
            let _ = conn.execute_batch("ROLLBACK");
        }

        tracing::trace!(
            tx_id = %self.id,
            store = self.store.as_str(),
            outcome = sql,
            elapsed_us = self.started_at.elapsed().as_micros() as u64,
            "Transaction finished"
        );

        Ok(result?)
    }
}

impl Drop for TxInfo {
    fn drop(&mut self) {
        // Only reached with a live connection when the callback panicked.
        if let Some(conn) = self.conn.get_mut().take() {
            self.writer.set_tx_owner(None);
            if !conn.is_autocommit() {
                let _ = conn.execute_batch("ROLLBACK");
            }
        }
    }
}

impl fmt::Debug for TxInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TxInfo")
            .field("id", &self.id)
            .field("store", &self.store)
            .field("active", &self.is_active())
            .field("rollback_only", &self.is_rollback_only())
            .finish()
    }
}

/// Run `f` as a call nested in an already active transaction.
///
/// The callback's error is returned unchanged, but the shared transaction
/// becomes rollback-only.
pub(crate) fn run_nested<T, E, F>(tx: &TxInfo, f: F) -> Result<T, E>
where
    E: fmt::Display,
    F: FnOnce() -> Result<T, E>,
{
    let result = f();
    if let Err(err) = &result {
        tx.mark_failed(err.to_string());
    }
    result
}

/// Settle the outermost call of a transaction.
///
/// - callback error: roll back, return the callback's error unchanged
/// - callback ok but a nested call failed: roll back, [`Error::TransactionAborted`]
/// - otherwise commit; a failed commit is surfaced as the error
pub(crate) fn settle<T, E>(tx: &TxInfo, result: Result<T, E>) -> Result<T, E>
where
    E: From<Error>,
{
    match result {
        Err(err) => {
            tx.rollback();
            Err(err)
        }
        Ok(value) => {
            let failure = tx.failure.lock().clone();
            if let Some(reason) = failure {
                tx.rollback();
                return Err(Error::TransactionAborted(reason).into());
            }
            tx.commit()?;
            Ok(value)
        }
    }
}
