use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;

use itertools::Itertools;
use jiff::civil::Date;
use thiserror::Error;

use crate::config::Settings;
use crate::fetch::extract::{extract_members, ExtractError};
use crate::fetch::missed::MissedFileLog;
use crate::fetch::source::{publication_id, ArchiveSource, DownloadError, UrlTemplate};
use crate::logging::EventLog;
use crate::storage::{content_type_for, ObjectStore, StorageError};

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("download of {url} failed: {source}")]
    Download {
        url: String,
        #[source]
        source: DownloadError,
    },
    #[error("extraction of {archive} failed: {source}")]
    Extraction {
        archive: String,
        #[source]
        source: ExtractError,
    },
    #[error("upload of {key} failed: {source}")]
    Upload {
        key: String,
        #[source]
        source: StorageError,
    },
    #[error("cannot create a temp dir under {root}: {source}")]
    TempDir {
        root: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOptions {
    pub url_template: UrlTemplate,
    pub archives: Vec<String>,
    pub base_date: Date,
    pub base_url_id: i64,
    pub stage_prefix: String,
    pub temp_root: PathBuf,
    pub missed_files_path: PathBuf,
}

impl From<&Settings> for FetchOptions {
    fn from(settings: &Settings) -> Self {
        FetchOptions {
            url_template: UrlTemplate::new(settings.url_template.clone()),
            archives: settings.archives.clone(),
            base_date: settings.base_date,
            base_url_id: settings.base_url_id,
            stage_prefix: settings.stage_prefix.clone(),
            temp_root: settings.temp_root.clone(),
            missed_files_path: settings.missed_files_path.clone(),
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FetchSummary {
    pub succeeded: BTreeSet<Date>,
    /// Failed dates with the reason(s).
    pub failed: BTreeMap<Date, String>,
    pub staged_keys: Vec<String>,
}

impl FetchSummary {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Key of a staged file, `<prefix>/<ISO date>/<path in archive>`.  The same
/// day always maps to the same key, so a re-run overwrites.
pub fn staged_key(prefix: &str, date: Date, file_name: &str) -> String {
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        format!("{}/{}", date, file_name)
    } else {
        format!("{}/{}/{}", prefix, date, file_name)
    }
}

pub struct FetchPipeline {
    options: FetchOptions,
    source: Box<dyn ArchiveSource>,
    store: Arc<dyn ObjectStore>,
    missed: MissedFileLog,
    log: Arc<dyn EventLog>,
}

impl FetchPipeline {
    pub fn new(
        options: FetchOptions,
        source: Box<dyn ArchiveSource>,
        store: Arc<dyn ObjectStore>,
        log: Arc<dyn EventLog>,
    ) -> Self {
        let missed = MissedFileLog::new(options.missed_files_path.clone());
        FetchPipeline {
            options,
            source,
            store,
            missed,
            log,
        }
    }

    pub fn url(&self, date: Date, archive: &str) -> String {
        let id = publication_id(date, self.options.base_date, self.options.base_url_id);
        self.options.url_template.render(date, archive, id)
    }

    /// Fetch and stage every date in turn.  A failed date is logged, written
    /// to the missed files log and doesn't stop the others.
    pub fn run(&self, dates: &[Date]) -> FetchSummary {
        let mut summary = FetchSummary::default();
        for (i, date) in dates.iter().enumerate() {
            self.log
                .info(&format!("[{}/{}] working on {}", i + 1, dates.len(), date));
            let mut reasons = Vec::new();
            for archive in &self.options.archives {
                let url = self.url(*date, archive);
                match self.fetch_archive(*date, archive, &url) {
                    Ok(keys) => {
                        self.log.info(&format!(
                            "staged {} file(s) from {} for {}",
                            keys.len(),
                            archive,
                            date
                        ));
                        summary.staged_keys.extend(keys);
                    }
                    Err(e) => {
                        self.log.error(&format!("{}: {}", date, e));
                        if let Err(io_err) = self.missed.append(*date, &url, &e.to_string()) {
                            self.log.error(&format!(
                                "cannot record missed file in {}: {}",
                                self.missed.path().display(),
                                io_err
                            ));
                        }
                        reasons.push(e.to_string());
                    }
                }
            }
            if reasons.is_empty() {
                summary.succeeded.insert(*date);
            } else {
                summary.failed.insert(*date, reasons.iter().join("; "));
            }
        }
        self.log.info(&format!(
            "fetch finished, {} succeeded, {} failed",
            summary.succeeded.len(),
            summary.failed.len()
        ));
        summary
    }

    /// Download one archive into a fresh temp dir, unzip it and upload the
    /// members.  The temp dir goes away when this returns, whatever happened.
    fn fetch_archive(&self, date: Date, archive: &str, url: &str) -> Result<Vec<String>, FetchError> {
        let temp_err = |source| FetchError::TempDir {
            root: self.options.temp_root.clone(),
            source,
        };
        fs::create_dir_all(&self.options.temp_root).map_err(temp_err)?;
        let workdir = tempfile::Builder::new()
            .prefix("sgx-fetch-")
            .tempdir_in(&self.options.temp_root)
            .map_err(temp_err)?;

        let archive_path = workdir.path().join(archive);
        let download_err = |source: DownloadError| FetchError::Download {
            url: url.to_string(),
            source,
        };
        let mut out = BufWriter::new(
            File::create(&archive_path).map_err(|e| download_err(e.into()))?,
        );
        self.log.debug(&format!("downloading {} to {}", url, archive_path.display()));
        let bytes = self.source.download(url, &mut out).map_err(download_err)?;
        out.flush().map_err(|e| download_err(e.into()))?;
        drop(out);
        self.log.info(&format!("downloaded {} bytes from {}", bytes, url));

        let members_dir = workdir.path().join("members");
        let extract_err = |source: ExtractError| FetchError::Extraction {
            archive: archive.to_string(),
            source,
        };
        fs::create_dir(&members_dir).map_err(|e| extract_err(e.into()))?;
        let members = extract_members(&archive_path, &members_dir).map_err(extract_err)?;

        let mut keys = Vec::with_capacity(members.len());
        for member in &members {
            let key = staged_key(&self.options.stage_prefix, date, &member.name);
            self.store
                .put_file(&key, &member.path, content_type_for(&member.name))
                .map_err(|source| FetchError::Upload {
                    key: key.clone(),
                    source,
                })?;
            self.log.info(&format!("uploaded {}", key));
            keys.push(key);
        }

        if let Err(e) = workdir.close() {
            self.log.warn(&format!("could not remove temp files: {}", e));
        }
        Ok(keys)
    }
}
