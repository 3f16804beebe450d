use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use reqwest::{blocking::Client, header::CONTENT_TYPE, Url};
use serde::Deserialize;

use super::pattern::KeyPattern;
use super::{ObjectStore, StorageError};

pub const GCS_ENDPOINT: &str = "https://storage.googleapis.com";

const SCOPES: &[&str] = &["https://www.googleapis.com/auth/devstorage.read_write"];

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ObjectList {
    #[serde(default)]
    items: Vec<ObjectMeta>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ObjectMeta {
    name: String,
}

/// Hands out a bearer token for each request.
pub trait TokenSource: Send + Sync {
    fn token(&self) -> Result<String, StorageError>;
}

/// A fixed token, e.g. from `gcloud auth print-access-token` or for an
/// emulator.  It is never refreshed.
pub struct StaticToken(pub String);

impl TokenSource for StaticToken {
    fn token(&self) -> Result<String, StorageError> {
        Ok(self.0.clone())
    }
}

/// Application default credentials through `gcp_auth`: the service account
/// in `GOOGLE_APPLICATION_CREDENTIALS`, the gcloud user, or the metadata
/// server.  The provider caches the token and fetches a new one when it
/// expires.
pub struct DefaultCredentials {
    runtime: tokio::runtime::Runtime,
    provider: Arc<dyn gcp_auth::TokenProvider>,
}

impl DefaultCredentials {
    pub fn new() -> Result<DefaultCredentials, StorageError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let provider = runtime.block_on(gcp_auth::provider())?;
        Ok(DefaultCredentials { runtime, provider })
    }
}

impl TokenSource for DefaultCredentials {
    fn token(&self) -> Result<String, StorageError> {
        let token = self.runtime.block_on(self.provider.token(SCOPES))?;
        Ok(token.as_str().to_string())
    }
}

/// Google Cloud Storage through its JSON API.  Every request asks the
/// [`TokenSource`] for a bearer token, so long runs survive token expiry.
pub struct GcsStore {
    client: Client,
    endpoint: String,
    bucket: String,
    tokens: Arc<dyn TokenSource>,
}

impl GcsStore {
    pub fn new(bucket: &str, tokens: Arc<dyn TokenSource>) -> Result<GcsStore, StorageError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(600))
            .build()?;
        Ok(GcsStore {
            client,
            endpoint: GCS_ENDPOINT.to_string(),
            bucket: bucket.to_string(),
            tokens,
        })
    }

    /// Point at another server speaking the same API, e.g. a local emulator.
    pub fn with_endpoint(mut self, endpoint: &str) -> GcsStore {
        self.endpoint = endpoint.trim_end_matches('/').to_string();
        self
    }

    fn url(&self, segments: &[&str]) -> Result<Url, StorageError> {
        let mut url =
            Url::parse(&self.endpoint).map_err(|e| StorageError::Decode(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| StorageError::Decode(format!("bad endpoint {}", self.endpoint)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Object names go into a single path segment, so `/` is escaped.
    fn object_url(&self, key: &str) -> Result<Url, StorageError> {
        self.url(&["storage", "v1", "b", &self.bucket, "o", key])
    }

    fn check(
        operation: &'static str,
        response: reqwest::blocking::Response,
    ) -> Result<reqwest::blocking::Response, StorageError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().unwrap_or_default();
        Err(StorageError::Status {
            operation,
            status: status.as_u16(),
            body: body.trim().to_string(),
        })
    }
}

impl ObjectStore for GcsStore {
    fn put_file(&self, key: &str, path: &Path, content_type: &str) -> Result<(), StorageError> {
        let url = self.url(&["upload", "storage", "v1", "b", &self.bucket, "o"])?;
        let file = File::open(path)?;
        let response = self
            .client
            .post(url)
            .query(&[("uploadType", "media"), ("name", key)])
            .bearer_auth(self.tokens.token()?)
            .header(CONTENT_TYPE, content_type)
            .body(file)
            .send()?;
        Self::check("upload", response)?;
        Ok(())
    }

    fn list(&self, pattern: &str) -> Result<Vec<String>, StorageError> {
        let pattern = KeyPattern::new(pattern)?;
        let url = self.url(&["storage", "v1", "b", &self.bucket, "o"])?;
        let mut keys = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut request = self
                .client
                .get(url.clone())
                .query(&[("prefix", pattern.literal_prefix()), ("fields", "items(name),nextPageToken")])
                .bearer_auth(self.tokens.token()?);
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token)]);
            }
            let response = Self::check("list", request.send()?)?;
            let page: ObjectList = response
                .json()
                .map_err(|e| StorageError::Decode(e.to_string()))?;
            keys.extend(
                page.items
                    .into_iter()
                    .map(|o| o.name)
                    .filter(|name| pattern.matches(name)),
            );
            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }
        keys.sort();
        Ok(keys)
    }

    fn open(&self, key: &str) -> Result<Box<dyn Read + Send>, StorageError> {
        let response = self
            .client
            .get(self.object_url(key)?)
            .query(&[("alt", "media")])
            .bearer_auth(self.tokens.token()?)
            .send()?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(StorageError::NotFound(key.to_string()));
        }
        Ok(Box::new(Self::check("download", response)?))
    }
}
