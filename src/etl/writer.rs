use std::io;

use thiserror::Error;

use crate::config::SinkKind;
use crate::etl::clickhouse_writer::ClickHouseWriter;
use crate::etl::duckdb_writer::DuckDbWriter;
use crate::etl::schema::TickRow;
use crate::utils::lib_retry::RetryPolicy;

#[derive(Debug, Error)]
pub enum BatchInsertError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("duckdb: {0}")]
    DuckDb(#[from] duckdb::Error),
    #[error("csv encoding failed: {0}")]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// A database table that takes [`TickRow`]s in bulk.
pub trait TableWriter {
    /// Create the table if it doesn't exist yet.
    fn ensure_table(&self, table: &str) -> Result<(), BatchInsertError>;

    /// Insert all rows in one go.  On error nothing should be assumed
    /// written, so the batch can be retried as a whole.
    fn write_batch(&self, table: &str, rows: &[TickRow]) -> Result<(), BatchInsertError>;
}

/// Table names go into SQL verbatim, only allow `name` or `db.name`.
pub fn is_valid_table_name(table: &str) -> bool {
    let parts: Vec<&str> = table.split('.').collect();
    parts.len() <= 2
        && parts.iter().all(|p| {
            let mut chars = p.chars();
            matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        })
}

/// Encode rows as headerless csv in column order, `null` marks a missing
/// `Msg_Code`.
pub fn encode_csv(rows: &[TickRow], null: &str) -> Result<Vec<u8>, csv::Error> {
    let mut wtr = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    for row in rows {
        wtr.write_record(row.fields(null))?;
    }
    wtr.into_inner().map_err(|e| csv::Error::from(e.into_error()))
}

pub fn open_writer(sink: &SinkKind, retry: &RetryPolicy) -> Result<Box<dyn TableWriter>, BatchInsertError> {
    match sink {
        SinkKind::ClickHouse(settings) => Ok(Box::new(ClickHouseWriter::new(settings)?)),
        SinkKind::DuckDb { path } => Ok(Box::new(DuckDbWriter::open(path, retry)?)),
    }
}
