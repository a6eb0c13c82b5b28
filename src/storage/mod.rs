//! SQLite storage layer.
//!
//! Provides:
//! - Statement classification into concurrent and nonconcurrent work
//! - r2d2 connection pools, one pair per logical store
//! - [`Db`](db::Db) statement executors routing through a pair or a transaction
//! - Connection pragmas and the system tables

pub mod classify;
pub mod db;
pub mod pool;
pub mod schema;

pub use classify::{classify, StatementClass};
pub use db::{Db, PoolPair};
pub use pool::{DbPool, PoolOptions, PoolRole, QueryEvent, QueryObserver, StoreKind};
