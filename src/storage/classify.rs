//! Statement classifier for read/write routing.
//!
//! Only a prefix check is performed. Anything not recognized as a read is
//! routed to the serialized writer path.

/// Which pool a statement is eligible for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatementClass {
    /// Read-only construct; may run on the concurrent pool.
    Concurrent,
    /// Write, DDL or unrecognized; must run on the nonconcurrent pool.
    Nonconcurrent,
}

/// Keywords that mark a statement as read-only.
const CONCURRENT_KEYWORDS: [&str; 2] = ["select", "with"];

/// Classify a SQL statement.
///
/// Leading whitespace is ignored and the keyword match is case-insensitive.
pub fn classify(sql: &str) -> StatementClass {
    let trimmed = sql.trim_start();

    let is_read = CONCURRENT_KEYWORDS.iter().any(|keyword| {
        trimmed
            .get(..keyword.len())
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case(keyword))
    });

    if is_read {
        StatementClass::Concurrent
    } else {
        StatementClass::Nonconcurrent
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reads_are_concurrent() {
        let reads = [
            "select 1",
            "  \n  sEleCt 1",
            "\t\tSELECT * FROM t",
            "With abc(x) AS (select 2) SELECT x FROM abc",
            " \n WITH abc(x) AS (select 4) SELECT x FROM abc",
        ];

        for sql in reads {
            assert_eq!(classify(sql), StatementClass::Concurrent, "{sql:?}");
        }
    }

    #[test]
    fn test_writes_are_nonconcurrent() {
        let writes = [
            "create table t1(x int)",
            "insert into t1(x) values(1)",
            "update t1 set x = 2",
            "delete from t1",
            "DROP TABLE t1",
            "PRAGMA journal_mode = WAL",
            "BEGIN",
            "",
            "   ",
            "sel",
        ];

        for sql in writes {
            assert_eq!(classify(sql), StatementClass::Nonconcurrent, "{sql:?}");
        }
    }

    #[test]
    fn test_multibyte_prefix_does_not_panic() {
        assert_eq!(classify("é select"), StatementClass::Nonconcurrent);
        assert_eq!(classify("sé"), StatementClass::Nonconcurrent);
    }
}
