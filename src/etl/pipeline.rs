use std::mem;
use std::sync::Arc;

use thiserror::Error;

use crate::etl::reader::{RowError, TableReader};
use crate::etl::schema::TickRow;
use crate::etl::writer::{is_valid_table_name, BatchInsertError, TableWriter};
use crate::logging::EventLog;
use crate::storage::{ObjectStore, StorageError};
use crate::utils::lib_retry::RetryPolicy;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("no staged files match {pattern}")]
    NoInputData { pattern: String },
    #[error("cannot list {pattern}: {source}")]
    Storage {
        pattern: String,
        #[source]
        source: StorageError,
    },
    #[error("batch size must be at least 1")]
    InvalidBatchSize,
    #[error("invalid table name {0:?}")]
    InvalidTable(String),
    #[error("cannot create table {table}: {source}")]
    CreateTable {
        table: String,
        #[source]
        source: BatchInsertError,
    },
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LoadSummary {
    pub files_read: usize,
    pub files_failed: usize,
    pub rows_loaded: usize,
    /// Rows that didn't parse, or were left unflushed in an aborted file.
    pub rows_rejected: usize,
    /// Rows of batches that couldn't be inserted.
    pub rows_failed: usize,
    pub batches_loaded: usize,
    pub batches_failed: usize,
}

impl LoadSummary {
    pub fn is_success(&self) -> bool {
        self.files_failed == 0 && self.batches_failed == 0 && self.rows_rejected == 0
    }
}

/// Reads staged csv files and inserts them in batches.
pub struct LoadPipeline {
    store: Arc<dyn ObjectStore>,
    reader: Box<dyn TableReader>,
    writer: Box<dyn TableWriter>,
    retry: RetryPolicy,
    log: Arc<dyn EventLog>,
}

impl LoadPipeline {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        reader: Box<dyn TableReader>,
        writer: Box<dyn TableWriter>,
        retry: RetryPolicy,
        log: Arc<dyn EventLog>,
    ) -> Self {
        LoadPipeline {
            store,
            reader,
            writer,
            retry,
            log,
        }
    }

    /// Create the target table if needed.
    pub fn prepare(&self, table: &str) -> Result<(), LoadError> {
        check_table(table)?;
        self.writer
            .ensure_table(table)
            .map_err(|source| LoadError::CreateTable {
                table: table.to_string(),
                source,
            })?;
        self.log.info(&format!("table {} is ready", table));
        Ok(())
    }

    /// Load every staged file matching `pattern` into `table`.  Bad rows,
    /// bad files and failed batches are counted in the summary and don't
    /// stop the run.
    pub fn run(&self, pattern: &str, table: &str, batch_size: usize) -> Result<LoadSummary, LoadError> {
        if batch_size == 0 {
            return Err(LoadError::InvalidBatchSize);
        }
        check_table(table)?;
        let keys = self.store.list(pattern).map_err(|source| LoadError::Storage {
            pattern: pattern.to_string(),
            source,
        })?;
        if keys.is_empty() {
            return Err(LoadError::NoInputData {
                pattern: pattern.to_string(),
            });
        }
        self.log
            .info(&format!("found {} file(s) matching {}", keys.len(), pattern));

        let mut summary = LoadSummary::default();
        for (i, key) in keys.iter().enumerate() {
            self.log
                .info(&format!("[{}/{}] loading {}", i + 1, keys.len(), key));
            self.load_file(key, table, batch_size, &mut summary);
        }
        self.log.info(&format!(
            "load finished, {} rows loaded in {} batches, {} rejected, {} failed",
            summary.rows_loaded, summary.batches_loaded, summary.rows_rejected, summary.rows_failed
        ));
        Ok(summary)
    }

    fn load_file(&self, key: &str, table: &str, batch_size: usize, summary: &mut LoadSummary) {
        let rows = match self.reader.open(key) {
            Ok(rows) => rows,
            Err(e) => {
                self.log.error(&format!("skipping file: {}", e));
                summary.files_failed += 1;
                return;
            }
        };
        let mut batch: Vec<TickRow> = Vec::with_capacity(batch_size.min(100_000));
        let mut batch_index = 0;
        let mut rejected = 0;
        for row in rows {
            match row {
                Ok(row) => {
                    batch.push(row);
                    if batch.len() == batch_size {
                        batch_index += 1;
                        self.flush(key, table, batch_index, mem::take(&mut batch), summary);
                    }
                }
                Err(RowError::Parse(e)) => {
                    self.log.debug(&format!("{}: rejected {}", key, e));
                    rejected += 1;
                }
                Err(RowError::Fatal(e)) => {
                    self.log.error(&format!(
                        "aborting file, {} unflushed row(s) dropped: {}",
                        batch.len(),
                        e
                    ));
                    summary.rows_rejected += rejected + batch.len();
                    summary.files_failed += 1;
                    return;
                }
            }
        }
        if !batch.is_empty() {
            batch_index += 1;
            self.flush(key, table, batch_index, batch, summary);
        }
        if rejected > 0 {
            self.log
                .warn(&format!("{}: {} row(s) rejected", key, rejected));
        }
        summary.rows_rejected += rejected;
        summary.files_read += 1;
    }

    /// Insert one batch, retrying as configured.  `batch_index` starts at 1
    /// for each file.
    fn flush(&self, key: &str, table: &str, batch_index: usize, batch: Vec<TickRow>, summary: &mut LoadSummary) {
        let result = self.retry.run(|attempt| {
            let res = self.writer.write_batch(table, &batch);
            if let Err(e) = &res {
                self.log.warn(&format!(
                    "{} batch {} ({} rows), attempt {}/{} failed: {}",
                    key,
                    batch_index,
                    batch.len(),
                    attempt,
                    self.retry.max_attempts,
                    e
                ));
            }
            res
        });
        match result {
            Ok(()) => {
                self.log.info(&format!(
                    "{} batch {}: inserted {} rows into {}",
                    key,
                    batch_index,
                    batch.len(),
                    table
                ));
                summary.batches_loaded += 1;
                summary.rows_loaded += batch.len();
            }
            Err(e) => {
                self.log.error(&format!(
                    "{} batch {} ({} rows) skipped: {}",
                    key,
                    batch_index,
                    batch.len(),
                    e
                ));
                summary.batches_failed += 1;
                summary.rows_failed += batch.len();
            }
        }
    }
}

fn check_table(table: &str) -> Result<(), LoadError> {
    if is_valid_table_name(table) {
        Ok(())
    } else {
        Err(LoadError::InvalidTable(table.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::{HashMap, HashSet};
    use std::error::Error;
    use std::fs;
    use std::rc::Rc;
    use std::time::Duration;

    use log::Level;

    use super::*;
    use crate::etl::duckdb_writer::DuckDbWriter;
    use crate::etl::reader::{CsvTableReader, ReadError, RowStream};
    use crate::etl::writer::tests::tick;
    use crate::logging::MemoryLog;
    use crate::storage::local::LocalStore;

    const HEADER: &str = "Comm,Contract_Type,Mth_Code,Year,Strike,Trade_Date,Log_Time,Price,Msg_Code,Volume";

    /// Records the batches it gets, fails every attempt on a batch whose
    /// first row has a `log_time` in `poison`.
    #[derive(Clone, Default)]
    struct StubWriter {
        batches: Rc<RefCell<Vec<Vec<TickRow>>>>,
        attempts: Rc<RefCell<usize>>,
        tables: Rc<RefCell<Vec<String>>>,
        poison: HashSet<i32>,
    }

    impl TableWriter for StubWriter {
        fn ensure_table(&self, table: &str) -> Result<(), BatchInsertError> {
            self.tables.borrow_mut().push(table.to_string());
            Ok(())
        }

        fn write_batch(&self, _table: &str, rows: &[TickRow]) -> Result<(), BatchInsertError> {
            *self.attempts.borrow_mut() += 1;
            if self.poison.contains(&rows[0].log_time) {
                return Err(BatchInsertError::Status {
                    status: 500,
                    body: "Code: 241. DB::Exception: Memory limit exceeded".to_string(),
                });
            }
            self.batches.borrow_mut().push(rows.to_vec());
            Ok(())
        }
    }

    impl StubWriter {
        fn sizes(&self) -> Vec<usize> {
            self.batches.borrow().iter().map(|b| b.len()).collect()
        }
    }

    /// Every file has `n` good rows with `log_time` 0..n.
    struct StubReader {
        rows: HashMap<String, i32>,
    }

    impl TableReader for StubReader {
        fn open(&self, key: &str) -> Result<RowStream, ReadError> {
            let n = self.rows.get(key).copied().unwrap_or(0);
            Ok(Box::new((0..n).map(|i| Ok::<_, RowError>(tick(i, None)))))
        }
    }

    fn no_wait(attempts: u32) -> RetryPolicy {
        RetryPolicy::new(attempts, Duration::ZERO, Duration::ZERO)
    }

    fn store_with(files: &[(&str, String)]) -> Result<(tempfile::TempDir, Arc<LocalStore>), Box<dyn Error>> {
        let scratch = tempfile::tempdir()?;
        let store = LocalStore::new(scratch.path().join("bucket"));
        let local = scratch.path().join("upload.csv");
        for (key, content) in files {
            fs::write(&local, content)?;
            store.put_file(key, &local, "text/csv")?;
        }
        Ok((scratch, Arc::new(store)))
    }

    #[test]
    fn batches_are_bounded() -> Result<(), Box<dyn Error>> {
        let key = "sgx-data/2025-03-14/WEBPXTICK_DT-20250314.csv";
        let (_scratch, store) = store_with(&[(key, String::new())])?;
        let writer = StubWriter::default();
        let pipeline = LoadPipeline::new(
            store,
            Box::new(StubReader {
                rows: HashMap::from([(key.to_string(), 250_000)]),
            }),
            Box::new(writer.clone()),
            no_wait(3),
            Arc::new(MemoryLog::new()),
        );
        let summary = pipeline.run("sgx-data/*.csv", "sgx_tick_data", 100_000)?;
        assert_eq!(writer.sizes(), vec![100_000, 100_000, 50_000]);
        assert_eq!(writer.batches.borrow()[1][0].log_time, 100_000);
        assert_eq!(
            summary,
            LoadSummary {
                files_read: 1,
                rows_loaded: 250_000,
                batches_loaded: 3,
                ..LoadSummary::default()
            }
        );
        assert!(summary.is_success());
        Ok(())
    }

    #[test]
    fn failed_batch_is_skipped_after_retries() -> Result<(), Box<dyn Error>> {
        let key = "sgx-data/2025-03-14/t.csv";
        let (_scratch, store) = store_with(&[(key, String::new())])?;
        let writer = StubWriter {
            poison: HashSet::from([100]),
            ..StubWriter::default()
        };
        let log = Arc::new(MemoryLog::new());
        let pipeline = LoadPipeline::new(
            store,
            Box::new(StubReader {
                rows: HashMap::from([(key.to_string(), 300)]),
            }),
            Box::new(writer.clone()),
            no_wait(3),
            log.clone(),
        );
        let summary = pipeline.run("sgx-data/*.csv", "sgx_tick_data", 100)?;
        assert_eq!(writer.sizes(), vec![100, 100]);
        assert_eq!(*writer.attempts.borrow(), 5);
        assert_eq!(summary.batches_loaded, 2);
        assert_eq!(summary.batches_failed, 1);
        assert_eq!(summary.rows_loaded, 200);
        assert_eq!(summary.rows_failed, 100);
        assert!(!summary.is_success());
        assert_eq!(log.messages(Level::Warn).len(), 3);
        let errors = log.messages(Level::Error);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("batch 2 (100 rows) skipped"));
        Ok(())
    }

    #[test]
    fn no_match_is_an_error() -> Result<(), Box<dyn Error>> {
        let (_scratch, store) = store_with(&[("other/a.csv", String::new())])?;
        let pipeline = LoadPipeline::new(
            store.clone(),
            Box::new(CsvTableReader::new(store)),
            Box::new(StubWriter::default()),
            no_wait(1),
            Arc::new(MemoryLog::new()),
        );
        assert!(matches!(
            pipeline.run("sgx-data/*.csv", "sgx_tick_data", 10),
            Err(LoadError::NoInputData { .. })
        ));
        assert!(matches!(
            pipeline.run("other/*.csv", "sgx_tick_data", 0),
            Err(LoadError::InvalidBatchSize)
        ));
        assert!(matches!(
            pipeline.run("other/*.csv", "drop table", 10),
            Err(LoadError::InvalidTable(_))
        ));
        Ok(())
    }

    #[test]
    fn bad_files_and_rows_are_counted() -> Result<(), Box<dyn Error>> {
        let good = format!(
            "{}\nCN,F,H,2025,0,20250314,84512,13245.5,,3\nCN,F,H,2025,0,20250314,84513,x,,3\nCN,F,H,2025,0,2025-03-14,84514,13246,C,1\n",
            HEADER
        );
        let (_scratch, store) = store_with(&[
            ("sgx-data/2025-03-14/a.csv", good),
            ("sgx-data/2025-03-14/b.csv", "Foo,Bar\n1,2\n".to_string()),
        ])?;
        let writer = StubWriter::default();
        let pipeline = LoadPipeline::new(
            store.clone(),
            Box::new(CsvTableReader::new(store)),
            Box::new(writer.clone()),
            no_wait(1),
            Arc::new(MemoryLog::new()),
        );
        pipeline.prepare("sgx_tick_data")?;
        let summary = pipeline.run("sgx-data/*.csv", "sgx_tick_data", 10)?;
        assert_eq!(*writer.tables.borrow(), vec!["sgx_tick_data".to_string()]);
        assert_eq!(
            summary,
            LoadSummary {
                files_read: 1,
                files_failed: 1,
                rows_loaded: 2,
                rows_rejected: 1,
                batches_loaded: 1,
                ..LoadSummary::default()
            }
        );
        let batches = writer.batches.borrow();
        let batch = &batches[0];
        assert_eq!(batch[0].msg_code, None);
        assert_eq!(batch[1].msg_code.as_deref(), Some("C"));
        Ok(())
    }

    #[test]
    fn load_into_duckdb() -> Result<(), Box<dyn Error>> {
        let rows: String = (0..25)
            .map(|i| format!("CN,F,H,2025,0,20250314,{},13245.5,,1\n", 84500 + i))
            .collect();
        let (_scratch, store) = store_with(&[
            ("sgx-data/2025-03-14/a.csv", format!("{}\n{}", HEADER, rows)),
            ("sgx-data/2025-03-17/a.csv", format!("{}\n{}", HEADER, rows)),
        ])?;
        let writer = DuckDbWriter::in_memory()?;
        let pipeline = LoadPipeline::new(
            store.clone(),
            Box::new(CsvTableReader::new(store)),
            Box::new(writer),
            no_wait(1),
            Arc::new(MemoryLog::new()),
        );
        pipeline.prepare("sgx_tick_data")?;
        let summary = pipeline.run("sgx-data/*.csv", "sgx_tick_data", 10)?;
        assert_eq!(summary.rows_loaded, 50);
        assert_eq!(summary.batches_loaded, 6);
        assert!(summary.is_success());
        Ok(())
    }
}
