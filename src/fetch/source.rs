use std::io::{self, Write};
use std::time::Duration;

use jiff::civil::Date;
use jiff::ToSpan;
use reqwest::{
    blocking::Client,
    header::{ACCEPT, UPGRADE_INSECURE_REQUESTS, USER_AGENT},
};
use thiserror::Error;

use crate::calendar::is_weekday;

pub const DEFAULT_URL_TEMPLATE: &str =
    "https://links.sgx.com/1.0.0/derivatives-historical/{id}/{archive}";

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("server returned HTTP {0}")]
    Status(u16),
    #[error("response body is empty")]
    EmptyBody,
    #[error("cannot write archive: {0}")]
    Io(#[from] io::Error),
}

/// SGX publishes one archive per weekday and numbers them sequentially.
/// Count the weekdays between `base_date` (with id `base_id`) and `date`.
pub fn publication_id(date: Date, base_date: Date, base_id: i64) -> i64 {
    if date >= base_date {
        let n = base_date
            .series(1.day())
            .skip(1)
            .take_while(|d| *d <= date)
            .filter(|d| is_weekday(*d))
            .count();
        base_id + n as i64
    } else {
        let n = date
            .series(1.day())
            .take_while(|d| *d < base_date)
            .filter(|d| is_weekday(*d))
            .count();
        base_id - n as i64
    }
}

/// Download URL with placeholders `{id}`, `{archive}`, `{yyyymmdd}` and
/// `{date}` (ISO format).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlTemplate(String);

impl UrlTemplate {
    pub fn new(template: impl Into<String>) -> UrlTemplate {
        UrlTemplate(template.into())
    }

    pub fn render(&self, date: Date, archive: &str, id: i64) -> String {
        self.0
            .replace("{id}", &id.to_string())
            .replace("{archive}", archive)
            .replace("{yyyymmdd}", &date.strftime("%Y%m%d").to_string())
            .replace("{date}", &date.to_string())
    }
}

impl Default for UrlTemplate {
    fn default() -> Self {
        UrlTemplate::new(DEFAULT_URL_TEMPLATE)
    }
}

pub trait ArchiveSource {
    /// Copy the body at `url` into `out`.  Returns the number of bytes
    /// written, an empty body is an error.
    fn download(&self, url: &str, out: &mut dyn Write) -> Result<u64, DownloadError>;
}

pub struct HttpArchiveSource {
    client: Client,
}

impl HttpArchiveSource {
    /// The timeout covers the whole request, reading the body included.
    pub fn new(timeout: Duration) -> Result<HttpArchiveSource, DownloadError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()?;
        Ok(HttpArchiveSource { client })
    }
}

impl ArchiveSource for HttpArchiveSource {
    fn download(&self, url: &str, out: &mut dyn Write) -> Result<u64, DownloadError> {
        let mut response = self
            .client
            .get(url)
            .header(USER_AGENT, "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36")
            .header(UPGRADE_INSECURE_REQUESTS, "1")
            .header(ACCEPT, "application/zip,application/octet-stream,*/*")
            .send()?;
        let status = response.status();
        if status.is_client_error() || status.is_server_error() {
            return Err(DownloadError::Status(status.as_u16()));
        }
        let n = response.copy_to(out)?;
        if n == 0 {
            return Err(DownloadError::EmptyBody);
        }
        Ok(n)
    }
}
