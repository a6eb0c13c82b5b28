//! Statement-executor handles.
//!
//! A [`Db`] is what callers receive from `App::db()` and friends. Depending on
//! how it was obtained it either routes each statement through the
//! classifier, pins every statement to one pool, or runs every statement on
//! the single connection owned by an active transaction.

use rusqlite::{OptionalExtension, Params, Row};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use super::classify::{classify, StatementClass};
use super::pool::{DbPool, PoolOptions, PoolRole, QueryObserver, StoreKind};
use crate::error::Result;
use crate::tx::TxInfo;

/// The concurrent and nonconcurrent pools of one logical store.
#[derive(Debug, Clone)]
pub struct PoolPair {
    pub concurrent: Arc<DbPool>,
    pub nonconcurrent: Arc<DbPool>,
}

impl PoolPair {
    /// Open both pools for `store` under `data_dir`.
    ///
    /// The nonconcurrent pool is opened first so the WAL journal mode is in
    /// place before any reader connects.
    pub fn open(data_dir: &Path, store: StoreKind, options: PoolOptions) -> Result<Self> {
        let path = data_dir.join(store.file_name());
        let nonconcurrent = DbPool::open(&path, store, PoolRole::Nonconcurrent, options)?;
        let concurrent = DbPool::open(&path, store, PoolRole::Concurrent, options)?;

        Ok(Self {
            concurrent: Arc::new(concurrent),
            nonconcurrent: Arc::new(nonconcurrent),
        })
    }

    pub fn store(&self) -> StoreKind {
        self.nonconcurrent.store()
    }

    /// Close both pools.
    pub fn close(&self) {
        self.concurrent.close();
        self.nonconcurrent.close();
    }

    /// Pick the pool a statement should run on.
    pub fn route(&self, sql: &str) -> &Arc<DbPool> {
        match classify(sql) {
            StatementClass::Concurrent => &self.concurrent,
            StatementClass::Nonconcurrent => &self.nonconcurrent,
        }
    }
}

/// Statement executor.
#[derive(Debug, Clone)]
pub enum Db {
    /// Routes each statement by its class.
    Dual(PoolPair),
    /// Every statement runs on one pool.
    Pool(Arc<DbPool>),
    /// Every statement runs on the transaction's connection.
    Tx(Arc<TxInfo>),
}

impl Db {
    /// Execute a single statement, returning the number of changed rows.
    pub fn execute<P: Params>(&self, sql: &str, params: P) -> Result<usize> {
        self.with_connection(sql, |conn| conn.execute(sql, params))
    }

    /// Execute one or more `;`-separated statements without parameters.
    ///
    /// Routing is decided by the first statement.
    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        self.with_connection(sql, |conn| conn.execute_batch(sql))
    }

    /// Run a query expected to return exactly one row.
    pub fn query_row<T, P, F>(&self, sql: &str, params: P, f: F) -> Result<T>
    where
        P: Params,
        F: FnOnce(&Row<'_>) -> rusqlite::Result<T>,
    {
        self.with_connection(sql, |conn| conn.query_row(sql, params, f))
    }

    /// Run a query returning at most one row.
    pub fn query_row_optional<T, P, F>(&self, sql: &str, params: P, f: F) -> Result<Option<T>>
    where
        P: Params,
        F: FnOnce(&Row<'_>) -> rusqlite::Result<T>,
    {
        self.with_connection(sql, |conn| conn.query_row(sql, params, f).optional())
    }

    /// Run a query and map every row.
    pub fn query_map<T, P, F>(&self, sql: &str, params: P, f: F) -> Result<Vec<T>>
    where
        P: Params,
        F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
    {
        self.with_connection(sql, |conn| {
            let mut stmt = conn.prepare(sql)?;
            let rows = stmt.query_map(params, f)?.collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Whether statements run inside a transaction.
    pub fn is_transactional(&self) -> bool {
        matches!(self, Self::Tx(_))
    }

    /// Install (or clear) a statement observer on the pools behind this handle.
    pub fn set_query_observer(&self, observer: Option<QueryObserver>) {
        match self {
            Self::Dual(pair) => {
                pair.concurrent.set_query_observer(observer.clone());
                pair.nonconcurrent.set_query_observer(observer);
            }
            Self::Pool(pool) => pool.set_query_observer(observer),
            Self::Tx(tx) => tx.writer().set_query_observer(observer),
        }
    }

    fn with_connection<T, F>(&self, sql: &str, f: F) -> Result<T>
    where
        F: FnOnce(&rusqlite::Connection) -> rusqlite::Result<T>,
    {
        match self {
            Self::Dual(pair) => run_on_pool(pair.route(sql), sql, f),
            Self::Pool(pool) => run_on_pool(pool, sql, f),
            Self::Tx(tx) => tx.with_connection(sql, f),
        }
    }
}

fn run_on_pool<T, F>(pool: &DbPool, sql: &str, f: F) -> Result<T>
where
    F: FnOnce(&rusqlite::Connection) -> rusqlite::Result<T>,
{
    let conn = pool.get()?;
    let start = Instant::now();
    let result = f(&*conn);
    drop(conn);
    pool.observe(sql, start.elapsed(), result.is_err());
    Ok(result?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::pool::QueryEvent;
    use parking_lot::Mutex;
    use std::time::Duration;
    use tempfile::TempDir;

    fn open_pair(dir: &Path) -> PoolPair {
        PoolPair::open(
            dir,
            StoreKind::Primary,
            PoolOptions {
                max_size: 4,
                busy_timeout: Duration::from_secs(1),
                acquire_timeout: Duration::from_secs(1),
            },
        )
        .unwrap()
    }

    #[test]
    fn test_dual_routes_by_statement_class() {
        let temp_dir = TempDir::new().unwrap();
        let pair = open_pair(temp_dir.path());
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = seen.clone();
        let observer: QueryObserver = Arc::new(move |event: &QueryEvent<'_>| {
            sink.lock().push((event.role, event.sql.to_string()));
        });
        let db = Db::Dual(pair);
        db.set_query_observer(Some(observer));

        db.execute("create table t(x int)", []).unwrap();
        db.execute("insert into t(x) values(?1)", [7]).unwrap();
        let x: i64 = db.query_row("select x from t", [], |row| row.get(0)).unwrap();
        assert_eq!(x, 7);

        let seen = seen.lock();
        assert_eq!(
            *seen,
            vec![
                (PoolRole::Nonconcurrent, "create table t(x int)".to_string()),
                (PoolRole::Nonconcurrent, "insert into t(x) values(?1)".to_string()),
                (PoolRole::Concurrent, "select x from t".to_string()),
            ]
        );
    }

    #[test]
    fn test_query_helpers() {
        let temp_dir = TempDir::new().unwrap();
        let db = Db::Dual(open_pair(temp_dir.path()));

        db.execute_batch("create table t(x int); insert into t values (1), (2), (3);")
            .unwrap();

        let xs: Vec<i64> = db
            .query_map("select x from t order by x", [], |row| row.get(0))
            .unwrap();
        assert_eq!(xs, vec![1, 2, 3]);

        let missing: Option<i64> = db
            .query_row_optional("select x from t where x = 9", [], |row| row.get(0))
            .unwrap();
        assert_eq!(missing, None);
    }

    #[test]
    fn test_statement_error_propagates() {
        let temp_dir = TempDir::new().unwrap();
        let db = Db::Dual(open_pair(temp_dir.path()));

        let err = db.execute("insert into missing_table values (1)", []).unwrap_err();
        assert!(matches!(err, crate::error::Error::Database(_)));
    }
}
