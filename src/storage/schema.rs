//! Connection pragmas and system tables.
//!
//! Tables are created idempotently at bootstrap:
//! - `_params` in the primary store (settings and other named values)
//! - `_logs` in the auxiliary store (persisted log records)

use rusqlite::Connection;
use std::time::Duration;

/// Name of the persisted log table (auxiliary store).
pub const LOGS_TABLE: &str = "_logs";

/// Name of the named-values table (primary store).
pub const PARAMS_TABLE: &str = "_params";

/// Apply pragmas shared by every connection.
///
/// `journal_mode` is persistent in the database file, so it is only set by
/// the writer connection (see [`apply_writer_pragmas`]).
pub fn apply_common_pragmas(conn: &Connection, busy_timeout: Duration) -> rusqlite::Result<()> {
    conn.busy_timeout(busy_timeout)?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.pragma_update(None, "temp_store", "MEMORY")?;
    conn.pragma_update(None, "cache_size", -16000)?;
    Ok(())
}

/// Apply pragmas for the single writer connection.
///
/// WAL lets concurrent readers see the pre-transaction state while a write
/// transaction is open.
pub fn apply_writer_pragmas(conn: &Connection, busy_timeout: Duration) -> rusqlite::Result<()> {
    apply_common_pragmas(conn, busy_timeout)?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    Ok(())
}

/// Create the primary store's system tables.
pub fn initialize_primary_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS _params (
            id      TEXT PRIMARY KEY NOT NULL,
            value   JSON DEFAULT NULL,
            created INTEGER NOT NULL,
            updated INTEGER NOT NULL
        );
        "#,
    )
}

/// Create the auxiliary store's system tables.
pub fn initialize_aux_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS _logs (
            id      TEXT PRIMARY KEY NOT NULL,
            level   INTEGER NOT NULL DEFAULT 0,
            message TEXT NOT NULL DEFAULT '',
            data    JSON NOT NULL DEFAULT '{}',
            created INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_logs_level ON _logs (level);
        CREATE INDEX IF NOT EXISTS idx_logs_created ON _logs (created);
        "#,
    )
}

/// List user-visible table names, ordered by name.
pub fn list_tables(conn: &Connection) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name ASC",
    )?;
    let rows = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}
