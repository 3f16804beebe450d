use std::fs;
use std::path::Path;

use duckdb::{AccessMode, Connection};
use itertools::Itertools;
use log::debug;
use tempfile::TempDir;

use crate::etl::schema::{TickRow, COLUMNS};
use crate::etl::writer::{encode_csv, BatchInsertError, TableWriter};
use crate::utils::lib_duckdb::{open_with_retry, sql_string};
use crate::utils::lib_retry::RetryPolicy;

const NULL: &str = "\\N";

/// DuckDB types in [`COLUMNS`] order.
const TYPES: [&str; 10] = [
    "VARCHAR", "VARCHAR", "VARCHAR", "INTEGER", "FLOAT", "DATE", "INTEGER", "FLOAT", "VARCHAR",
    "INTEGER",
];

pub fn create_table_sql(table: &str) -> String {
    let columns = COLUMNS
        .iter()
        .zip(TYPES)
        .map(|(name, ty)| {
            let not_null = if *name == "Msg_Code" { "" } else { " NOT NULL" };
            format!("    \"{}\" {}{}", name, ty, not_null)
        })
        .join(",\n");
    format!("CREATE TABLE IF NOT EXISTS {} (\n{}\n);", table, columns)
}

/// A local DuckDB file as the sink.  Each batch goes through a csv file in a
/// scratch dir and `read_csv`, which is a lot faster than row inserts.
pub struct DuckDbWriter {
    conn: Connection,
    scratch: TempDir,
}

impl DuckDbWriter {
    pub fn open(path: &Path, retry: &RetryPolicy) -> Result<Self, BatchInsertError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let conn = open_with_retry(path, retry, AccessMode::ReadWrite)?;
        Ok(DuckDbWriter {
            conn,
            scratch: tempfile::tempdir()?,
        })
    }

    pub fn in_memory() -> Result<Self, BatchInsertError> {
        Ok(DuckDbWriter {
            conn: Connection::open_in_memory()?,
            scratch: tempfile::tempdir()?,
        })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

impl TableWriter for DuckDbWriter {
    fn ensure_table(&self, table: &str) -> Result<(), BatchInsertError> {
        self.conn.execute_batch(&create_table_sql(table))?;
        Ok(())
    }

    fn write_batch(&self, table: &str, rows: &[TickRow]) -> Result<(), BatchInsertError> {
        if rows.is_empty() {
            return Ok(());
        }
        let path = self.scratch.path().join("batch.csv");
        fs::write(&path, encode_csv(rows, NULL)?)?;
        let columns = COLUMNS
            .iter()
            .zip(TYPES)
            .map(|(name, ty)| format!("'{}': '{}'", name, ty))
            .join(", ");
        let sql = format!(
            r"
            INSERT INTO {}
            SELECT * FROM read_csv(
                {},
                header = false,
                nullstr = '{}',
                dateformat = '%Y-%m-%d',
                columns = {{{}}}
            );
            ",
            table,
            sql_string(&path.to_string_lossy()),
            NULL,
            columns
        );
        let n = self.conn.execute(&sql, [])?;
        debug!("inserted {} rows into {}", n, table);
        fs::remove_file(&path)?;
        Ok(())
    }
}
