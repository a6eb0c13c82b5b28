//! Persisted log rows in the auxiliary store.

use rusqlite::types::{Type, Value as SqlValue};
use rusqlite::Row;
use serde::Serialize;

use crate::error::Result;
use crate::logger::{Attrs, Level, LogRecord};
use crate::storage::db::Db;

/// A log row read back from the `_logs` table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogRow {
    pub id: String,
    pub level: Level,
    pub message: String,
    pub data: Attrs,
    /// Unix milliseconds.
    pub created: i64,
}

impl LogRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let data_idx = row.as_ref().column_index("data")?;
        let data: String = row.get(data_idx)?;
        let data = serde_json::from_str(&data).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(data_idx, Type::Text, Box::new(e))
        })?;

        Ok(Self {
            id: row.get("id")?,
            level: Level(row.get("level")?),
            message: row.get("message")?,
            data,
            created: row.get("created")?,
        })
    }
}

/// Filter for [`LogQuery::list`].
#[derive(Debug, Clone, Default)]
pub struct LogFilter {
    pub min_level: Option<Level>,
    /// Only rows created at or after this Unix millisecond timestamp.
    pub since: Option<i64>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

/// Read access to persisted logs.
#[derive(Debug, Clone)]
pub struct LogQuery {
    db: Db,
}

impl LogQuery {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Total number of persisted rows.
    pub fn count(&self) -> Result<i64> {
        self.db
            .query_row("SELECT COUNT(*) FROM _logs", [], |row| row.get(0))
    }

    /// Rows matching `filter`, newest first.
    pub fn list(&self, filter: &LogFilter) -> Result<Vec<LogRow>> {
        let mut sql = String::from("SELECT id, level, message, data, created FROM _logs");
        let mut clauses = Vec::new();
        let mut params: Vec<SqlValue> = Vec::new();

        if let Some(level) = filter.min_level {
            params.push(SqlValue::Integer(level.as_i32().into()));
            clauses.push(format!("level >= ?{}", params.len()));
        }
        if let Some(since) = filter.since {
            params.push(SqlValue::Integer(since));
            clauses.push(format!("created >= ?{}", params.len()));
        }
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }

        sql.push_str(" ORDER BY created DESC, id DESC");

        params.push(SqlValue::Integer(filter.limit.map_or(-1, i64::from)));
        sql.push_str(&format!(" LIMIT ?{}", params.len()));
        params.push(SqlValue::Integer(filter.offset.map_or(0, i64::from)));
        sql.push_str(&format!(" OFFSET ?{}", params.len()));

        self.db.query_map(
            &sql,
            rusqlite::params_from_iter(params),
            LogRow::from_row,
        )
    }

    pub fn find_by_id(&self, id: &str) -> Result<Option<LogRow>> {
        self.db.query_row_optional(
            "SELECT id, level, message, data, created FROM _logs WHERE id = ?1",
            [id],
            LogRow::from_row,
        )
    }
}

/// Insert `records` through `db`.
///
/// Callers run this inside an auxiliary transaction so a batch lands
/// atomically.
pub fn insert_batch(db: &Db, records: &[LogRecord]) -> Result<()> {
    for record in records {
        let data = serde_json::to_string(&record.data)?;
        db.execute(
            "INSERT INTO _logs (id, level, message, data, created) VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![
                record.id,
                record.level.as_i32(),
                record.message,
                data,
                record.timestamp
            ],
        )?;
    }
    Ok(())
}

/// Delete rows created at or before `before` (Unix milliseconds).
///
/// Returns the number of deleted rows.
pub fn delete_before(db: &Db, before: i64) -> Result<usize> {
    db.execute("DELETE FROM _logs WHERE created <= ?1", [before])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::db::PoolPair;
    use crate::storage::pool::{PoolOptions, StoreKind};
    use crate::storage::schema::initialize_aux_schema;
    use serde_json::json;
    use std::time::Duration;
    use tempfile::TempDir;

    fn aux_db(dir: &std::path::Path) -> Db {
        let pair = PoolPair::open(
            dir,
            StoreKind::Aux,
            PoolOptions {
                max_size: 2,
                busy_timeout: Duration::from_secs(1),
                acquire_timeout: Duration::from_secs(1),
            },
        )
        .unwrap();
        initialize_aux_schema(&pair.nonconcurrent.get().unwrap()).unwrap();
        Db::Dual(pair)
    }

    fn record(level: Level, message: &str, timestamp: i64) -> LogRecord {
        let mut data = Attrs::new();
        data.insert("n".into(), json!(timestamp));
        LogRecord {
            timestamp,
            ..LogRecord::new(level, message, data)
        }
    }

    #[test]
    fn test_insert_and_list() {
        let temp_dir = TempDir::new().unwrap();
        let db = aux_db(temp_dir.path());
        insert_batch(
            &db,
            &[
                record(Level::INFO, "first", 1_000),
                record(Level::ERROR, "second", 2_000),
                record(Level::DEBUG, "third", 3_000),
            ],
        )
        .unwrap();

        let query = LogQuery::new(db);
        assert_eq!(query.count().unwrap(), 3);

        let all = query.list(&LogFilter::default()).unwrap();
        let messages: Vec<&str> = all.iter().map(|r| r.message.as_str()).collect();
        assert_eq!(messages, vec!["third", "second", "first"]);
        assert_eq!(all[1].data.get("n"), Some(&json!(2_000)));

        let important = query
            .list(&LogFilter {
                min_level: Some(Level::INFO),
                since: Some(1_500),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(important.len(), 1);
        assert_eq!(important[0].message, "second");

        let page = query
            .list(&LogFilter {
                limit: Some(1),
                offset: Some(1),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(page[0].message, "second");

        let found = query.find_by_id(&all[0].id).unwrap().unwrap();
        assert_eq!(found, all[0]);
    }

    #[test]
    fn test_delete_before() {
        let temp_dir = TempDir::new().unwrap();
        let db = aux_db(temp_dir.path());
        insert_batch(
            &db,
            &[
                record(Level::INFO, "old", 1_000),
                record(Level::INFO, "edge", 2_000),
                record(Level::INFO, "new", 3_000),
            ],
        )
        .unwrap();

        assert_eq!(delete_before(&db, 2_000).unwrap(), 2);
        assert_eq!(LogQuery::new(db).count().unwrap(), 1);
    }

    #[test]
    fn test_corrupt_data_column_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let db = aux_db(temp_dir.path());
        db.execute(
            "INSERT INTO _logs (id, level, message, data, created) VALUES ('bad', 0, 'm', '{not json', 1)",
            [],
        )
        .unwrap();

        let err = LogQuery::new(db).find_by_id("bad").unwrap_err();
        assert!(matches!(
            err,
            crate::error::Error::Database(rusqlite::Error::FromSqlConversionFailure(
                3,
                Type::Text,
                _
            ))
        ));
    }
}
