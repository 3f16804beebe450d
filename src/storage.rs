pub mod gcs;
pub mod local;
pub mod pattern;

use std::io::{self, Read};
use std::path::Path;
use std::sync::Arc;

use thiserror::Error;

use crate::config::StorageBackend;

use self::gcs::{DefaultCredentials, GcsStore, StaticToken, TokenSource};
use self::local::LocalStore;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{operation} returned HTTP {status}: {body}")]
    Status {
        operation: &'static str,
        status: u16,
        body: String,
    },
    #[error("object not found: {0}")]
    NotFound(String),
    #[error("invalid key {0:?}")]
    InvalidKey(String),
    #[error("unexpected response: {0}")]
    Decode(String),
    #[error("cannot get credentials: {0}")]
    Auth(#[from] gcp_auth::Error),
}

/// A key addressed blob store.  Keys use `/` as separator.
pub trait ObjectStore {
    /// Upload the local file at `path` under `key`, replacing any existing
    /// object.
    fn put_file(&self, key: &str, path: &Path, content_type: &str) -> Result<(), StorageError>;

    /// Keys matching the glob `pattern`, sorted.  See [`pattern::KeyPattern`].
    fn list(&self, pattern: &str) -> Result<Vec<String>, StorageError>;

    fn open(&self, key: &str) -> Result<Box<dyn Read + Send>, StorageError>;
}

pub fn open_store(backend: &StorageBackend) -> Result<Arc<dyn ObjectStore>, StorageError> {
    match backend {
        StorageBackend::Local { root } => Ok(Arc::new(LocalStore::new(root))),
        StorageBackend::Gcs { bucket, token } => {
            let tokens: Arc<dyn TokenSource> = match token {
                Some(token) => Arc::new(StaticToken(token.clone())),
                None => Arc::new(DefaultCredentials::new()?),
            };
            Ok(Arc::new(GcsStore::new(bucket, tokens)?))
        }
    }
}

/// `text/csv` for csv files, opaque bytes otherwise.
pub fn content_type_for(file_name: &str) -> &'static str {
    if file_name.to_ascii_lowercase().ends_with(".csv") {
        "text/csv"
    } else {
        "application/octet-stream"
    }
}
