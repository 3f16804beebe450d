use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use jiff::civil::{date, Date, Time};
use thiserror::Error;

use crate::fetch::source::DEFAULT_URL_TEMPLATE;
use crate::utils::lib_retry::RetryPolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{name} must be set")]
    Missing { name: &'static str },
    #[error("invalid value {value:?} for {name}: {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
    #[error("failed to load env file {path}: {source}")]
    EnvFile {
        path: PathBuf,
        #[source]
        source: dotenvy::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackend {
    Local { root: PathBuf },
    /// Without a token the application default credentials are used.
    Gcs {
        bucket: String,
        token: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClickHouseSettings {
    pub url: String,
    pub user: Option<String>,
    pub password: Option<String>,
    pub database: Option<String>,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkKind {
    ClickHouse(ClickHouseSettings),
    DuckDb { path: PathBuf },
}

/// Everything both jobs need, read once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub url_template: String,
    /// SGX numbers its daily archives, `base_url_id` is the number of the
    /// archive published for `base_date`.
    pub base_date: Date,
    pub base_url_id: i64,
    pub archives: Vec<String>,
    pub today_cutoff: Option<Time>,
    pub download_timeout: Duration,
    pub stage_prefix: String,
    pub storage: StorageBackend,
    pub missed_files_path: PathBuf,
    pub log_file: Option<PathBuf>,
    pub temp_root: PathBuf,
    pub sink: SinkKind,
    pub insert_retry: RetryPolicy,
}

/// Load `.env/<env>.env` into the process environment if the file exists.
/// Returns the path that was loaded.
pub fn load_env_file(env: &str) -> Result<Option<PathBuf>, ConfigError> {
    let path = Path::new(".env").join(format!("{}.env", env));
    if !path.exists() {
        return Ok(None);
    }
    dotenvy::from_path(&path).map_err(|source| ConfigError::EnvFile {
        path: path.clone(),
        source,
    })?;
    Ok(Some(path))
}

struct Vars<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> Vars<F> {
    fn get(&self, name: &'static str) -> Option<String> {
        (self.lookup)(name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn require(&self, name: &'static str) -> Result<String, ConfigError> {
        self.get(name).ok_or(ConfigError::Missing { name })
    }

    fn parse<T>(&self, name: &'static str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(name) {
            None => Ok(None),
            Some(value) => value
                .parse::<T>()
                .map(Some)
                .map_err(|e| ConfigError::Invalid {
                    name,
                    reason: e.to_string(),
                    value,
                }),
        }
    }

    fn parse_or<T>(&self, name: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        Ok(self.parse(name)?.unwrap_or(default))
    }

    fn one_of(
        &self,
        name: &'static str,
        default: &'static str,
        allowed: &[&str],
    ) -> Result<String, ConfigError> {
        let value = self
            .get(name)
            .unwrap_or_else(|| default.to_string())
            .to_lowercase();
        if allowed.contains(&value.as_str()) {
            Ok(value)
        } else {
            Err(ConfigError::Invalid {
                name,
                value,
                reason: format!("expected one of {}", allowed.join(", ")),
            })
        }
    }
}

impl Settings {
    pub fn from_env() -> Result<Settings, ConfigError> {
        Settings::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Settings, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars { lookup };

        let archives: Vec<String> = vars
            .get("SGX_ARCHIVES")
            .unwrap_or_else(|| "WEBPXTICK_DT.zip".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if archives.is_empty() {
            return Err(ConfigError::Invalid {
                name: "SGX_ARCHIVES",
                value: String::new(),
                reason: "no archive names".to_string(),
            });
        }

        let timeout_secs: u64 = vars.parse_or("DOWNLOAD_TIMEOUT_SECS", 10)?;
        if timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                name: "DOWNLOAD_TIMEOUT_SECS",
                value: "0".to_string(),
                reason: "must be positive".to_string(),
            });
        }

        let storage = match vars
            .one_of("STORAGE_BACKEND", "local", &["local", "gcs"])?
            .as_str()
        {
            "gcs" => StorageBackend::Gcs {
                bucket: vars.require("GCS_BUCKET")?,
                token: vars.get("GCS_ACCESS_TOKEN"),
            },
            _ => StorageBackend::Local {
                root: PathBuf::from(
                    vars.get("LOCAL_STORE_ROOT")
                        .unwrap_or_else(|| "staging".to_string()),
                ),
            },
        };

        let sink = match vars
            .one_of("SINK", "clickhouse", &["clickhouse", "duckdb"])?
            .as_str()
        {
            "duckdb" => SinkKind::DuckDb {
                path: PathBuf::from(vars.require("DUCKDB_PATH")?),
            },
            _ => SinkKind::ClickHouse(ClickHouseSettings {
                url: vars
                    .get("CLICKHOUSE_URL")
                    .unwrap_or_else(|| "http://localhost:8123".to_string()),
                user: vars.get("CLICKHOUSE_USER"),
                password: vars.get("CLICKHOUSE_PASSWORD"),
                database: vars.get("CLICKHOUSE_DATABASE"),
                timeout: Duration::from_secs(vars.parse_or("CLICKHOUSE_TIMEOUT_SECS", 300)?),
            }),
        };

        let insert_retry = RetryPolicy::new(
            vars.parse_or("INSERT_MAX_ATTEMPTS", 3)?,
            Duration::from_millis(vars.parse_or("INSERT_INITIAL_WAIT_MS", 500)?),
            Duration::from_secs(10),
        );

        Ok(Settings {
            url_template: vars
                .get("SGX_URL_TEMPLATE")
                .unwrap_or_else(|| DEFAULT_URL_TEMPLATE.to_string()),
            base_date: vars.parse_or("SGX_BASE_DATE", date(2025, 3, 14))?,
            base_url_id: vars.parse_or("SGX_BASE_URL_ID", 5898)?,
            archives,
            today_cutoff: vars.parse("SGX_TODAY_CUTOFF")?,
            download_timeout: Duration::from_secs(timeout_secs),
            stage_prefix: vars
                .get("STAGE_PREFIX")
                .unwrap_or_else(|| "sgx-data".to_string())
                .trim_matches('/')
                .to_string(),
            storage,
            missed_files_path: PathBuf::from(
                vars.get("MISSED_FILES_PATH")
                    .unwrap_or_else(|| "missed_files.txt".to_string()),
            ),
            log_file: vars.get("LOG_FILE").map(PathBuf::from),
            temp_root: vars
                .get("TEMP_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(env::temp_dir),
            sink,
            insert_retry,
        })
    }
}
