use std::io::Read;
use std::sync::Arc;

use thiserror::Error;

use crate::etl::schema::{RowParseError, TickRow, COLUMNS};
use crate::storage::{ObjectStore, StorageError};

/// The whole file is unusable, or can't be read past some line.
#[derive(Debug, Error)]
pub enum ReadError {
    #[error("cannot open {key}: {source}")]
    Open {
        key: String,
        #[source]
        source: StorageError,
    },
    #[error("{key}: malformed header: {reason}")]
    Header { key: String, reason: String },
    #[error("{key}: read failed: {source}")]
    Csv {
        key: String,
        #[source]
        source: csv::Error,
    },
}

#[derive(Debug, Error)]
pub enum RowError {
    /// Bad row, skip it.
    #[error(transparent)]
    Parse(#[from] RowParseError),
    /// Stop reading this file.
    #[error(transparent)]
    Fatal(#[from] ReadError),
}

pub type RowStream = Box<dyn Iterator<Item = Result<TickRow, RowError>>>;

/// Turns a staged object into typed rows.
pub trait TableReader {
    fn open(&self, key: &str) -> Result<RowStream, ReadError>;
}

/// Check a header against [`COLUMNS`], ignoring case, padding and a BOM.
pub fn check_header(headers: &csv::StringRecord) -> Result<(), String> {
    let found: Vec<String> = headers
        .iter()
        .map(|h| h.trim_start_matches('\u{feff}').trim().to_ascii_lowercase())
        .collect();
    let ok = found.len() == COLUMNS.len()
        && found
            .iter()
            .zip(COLUMNS.iter())
            .all(|(f, c)| *f == c.to_ascii_lowercase());
    if ok {
        Ok(())
    } else {
        Err(format!(
            "expected {}, found {}",
            COLUMNS.join(","),
            headers.iter().collect::<Vec<_>>().join(",")
        ))
    }
}

/// Streams csv files with a header row out of an [`ObjectStore`].
pub struct CsvTableReader {
    store: Arc<dyn ObjectStore>,
}

impl CsvTableReader {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        CsvTableReader { store }
    }
}

impl TableReader for CsvTableReader {
    fn open(&self, key: &str) -> Result<RowStream, ReadError> {
        let input = self.store.open(key).map_err(|source| ReadError::Open {
            key: key.to_string(),
            source,
        })?;
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(input);
        let headers = reader.headers().map_err(|e| ReadError::Header {
            key: key.to_string(),
            reason: e.to_string(),
        })?;
        check_header(headers).map_err(|reason| ReadError::Header {
            key: key.to_string(),
            reason,
        })?;
        Ok(Box::new(CsvRows {
            key: key.to_string(),
            records: reader.into_records(),
            done: false,
        }))
    }
}

struct CsvRows<R> {
    key: String,
    records: csv::StringRecordsIntoIter<R>,
    done: bool,
}

impl<R: Read> Iterator for CsvRows<R> {
    type Item = Result<TickRow, RowError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let record = match self.records.next()? {
            Ok(record) => record,
            Err(e) => {
                // invalid utf-8 spoils one record, anything else the rest of the file
                if let csv::ErrorKind::Utf8 { pos, .. } = e.kind() {
                    return Some(Err(RowError::Parse(RowParseError {
                        line: pos.as_ref().map(|p| p.line()).unwrap_or(0),
                        column: "*",
                        reason: "invalid utf-8".to_string(),
                    })));
                }
                self.done = true;
                return Some(Err(RowError::Fatal(ReadError::Csv {
                    key: self.key.clone(),
                    source: e,
                })));
            }
        };
        let line = record.position().map(|p| p.line()).unwrap_or(0);
        Some(TickRow::from_record(&record, line).map_err(RowError::from))
    }
}
