use std::path::Path;

use duckdb::{AccessMode, Config};

use crate::utils::lib_retry::RetryPolicy;

/// Use this function to open a DuckDB connection.  Another process holding
/// the write lock makes the open fail, so keep trying for a while.
/// Suggested `RetryPolicy::new(8, Duration::from_millis(25), Duration::from_secs(2))`.
pub fn open_with_retry(
    duckdb_path: &Path,
    retry: &RetryPolicy,
    access_mode: AccessMode,
) -> Result<duckdb::Connection, duckdb::Error> {
    retry.run(|_| {
        let config = Config::default().access_mode(same_mode(&access_mode))?;
        duckdb::Connection::open_with_flags(duckdb_path, config)
    })
}

/// `AccessMode` is not `Clone`, and `Config` takes it by value.
fn same_mode(mode: &AccessMode) -> AccessMode {
    match mode {
        AccessMode::Automatic => AccessMode::Automatic,
        AccessMode::ReadOnly => AccessMode::ReadOnly,
        AccessMode::ReadWrite => AccessMode::ReadWrite,
    }
}

/// Quote a string literal for DuckDB SQL.
pub fn sql_string(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

#[cfg(test)]
mod tests {
    use std::error::Error;
    use std::time::Duration;

    use super::*;

    #[test]
    fn open_new_file() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("ticks.duckdb");
        let conn = open_with_retry(&path, &RetryPolicy::once(), AccessMode::ReadWrite)?;
        let n: i64 = conn.query_row("SELECT 41 + 1", [], |row| row.get(0))?;
        assert_eq!(n, 42);
        Ok(())
    }

    #[test]
    fn reopen_read_only() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("ticks.duckdb");
        let conn = open_with_retry(&path, &RetryPolicy::once(), AccessMode::ReadWrite)?;
        conn.execute_batch("CREATE TABLE t (x INTEGER); INSERT INTO t VALUES (1), (2);")?;
        drop(conn);

        let retry = RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(2));
        let conn = open_with_retry(&path, &retry, AccessMode::ReadOnly)?;
        let n: i64 = conn.query_row("SELECT count(*) FROM t", [], |row| row.get(0))?;
        assert_eq!(n, 2);
        assert!(conn.execute_batch("INSERT INTO t VALUES (3)").is_err());
        Ok(())
    }

    #[test]
    fn missing_parent_fails_after_every_attempt() {
        let retry = RetryPolicy::new(2, Duration::ZERO, Duration::ZERO);
        let res = open_with_retry(Path::new("/nonexistent/dir/ticks.duckdb"), &retry, AccessMode::Automatic);
        assert!(res.is_err());
    }

    #[test]
    fn quote_literal() {
        assert_eq!(sql_string("/tmp/a.csv"), "'/tmp/a.csv'");
        assert_eq!(sql_string("/tmp/o'neil.csv"), "'/tmp/o''neil.csv'");
    }
}
