//! Configuration types for tripdata-sync
//!
//! Every value the pipeline depends on lives in [`Config`] and is passed to the
//! orchestrator explicitly. All fields carry serde defaults matching the
//! reference deployment (yellow + green exports for 2019-2020, two workers,
//! five download attempts three seconds apart, 8 MiB chunks).

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Base URL of the public TLC trip-data release mirror
pub const DEFAULT_BASE_URL: &str = "https://github.com/DataTalksClub/nyc-tlc-data/releases/download";

/// Top-level configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Which files to transfer
    #[serde(default)]
    pub catalog: CatalogConfig,

    /// Local staging area
    #[serde(default)]
    pub staging: StagingConfig,

    /// Destination bucket and key layout
    #[serde(default)]
    pub destination: DestinationConfig,

    /// Worker pool and streaming settings
    #[serde(default)]
    pub transfer: TransferConfig,

    /// Retry policy for downloads
    #[serde(default)]
    pub retry: RetryConfig,

    /// Retry policy for uploads (single attempt unless configured)
    #[serde(default = "default_upload_retry")]
    pub upload_retry: RetryConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            catalog: CatalogConfig::default(),
            staging: StagingConfig::default(),
            destination: DestinationConfig::default(),
            transfer: TransferConfig::default(),
            retry: RetryConfig::default(),
            upload_retry: default_upload_retry(),
        }
    }
}

impl Config {
    /// Load configuration from a JSON file
    ///
    /// Missing sections and fields fall back to their defaults. The result is
    /// validated before it is returned.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| Error::Config {
            message: format!("cannot read {}: {}", path.display(), e),
            key: None,
        })?;
        let config: Config = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        let catalog = &self.catalog;
        if catalog.datasets.is_empty() {
            return Err(config_error("at least one dataset is required", "catalog.datasets"));
        }
        let mut seen = HashSet::new();
        for dataset in &catalog.datasets {
            if dataset.category.trim().is_empty() || dataset.category.contains('/') {
                return Err(config_error(
                    format!("invalid dataset category '{}'", dataset.category),
                    "catalog.datasets.category",
                ));
            }
            if !seen.insert(dataset.category.as_str()) {
                return Err(config_error(
                    format!("duplicate dataset category '{}'", dataset.category),
                    "catalog.datasets.category",
                ));
            }
            url::Url::parse(dataset.base_url()).map_err(|e| {
                config_error(
                    format!("invalid base URL for '{}': {}", dataset.category, e),
                    "catalog.datasets.base_url",
                )
            })?;
        }
        if catalog.years.is_empty() {
            return Err(config_error("at least one year is required", "catalog.years"));
        }
        if catalog.months.is_empty() {
            return Err(config_error("at least one month is required", "catalog.months"));
        }
        if let Some(month) = catalog.months.iter().find(|m| !(1..=12).contains(*m)) {
            return Err(config_error(
                format!("month {} is outside 1-12", month),
                "catalog.months",
            ));
        }

        if self.destination.bucket.trim().is_empty() {
            return Err(config_error("bucket name must not be empty", "destination.bucket"));
        }

        if self.transfer.workers == 0 {
            return Err(config_error("workers must be at least 1", "transfer.workers"));
        }
        if self.transfer.chunk_size == 0 {
            return Err(config_error(
                "chunk_size must be greater than zero",
                "transfer.chunk_size",
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(config_error(
                "max_attempts must be at least 1",
                "retry.max_attempts",
            ));
        }
        if self.upload_retry.max_attempts == 0 {
            return Err(config_error(
                "max_attempts must be at least 1",
                "upload_retry.max_attempts",
            ));
        }
        for (retry, key) in [
            (&self.retry, "retry.backoff_multiplier"),
            (&self.upload_retry, "upload_retry.backoff_multiplier"),
        ] {
            if !retry.backoff_multiplier.is_finite() || retry.backoff_multiplier < 0.0 {
                return Err(config_error(
                    "backoff_multiplier must be a non-negative number",
                    key,
                ));
            }
        }
        Ok(())
    }
}

fn config_error(message: impl Into<String>, key: &str) -> Error {
    Error::Config {
        message: message.into(),
        key: Some(key.to_string()),
    }
}

/// One dataset category and where its files are published
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetConfig {
    /// Category name; also the file-name prefix ("yellow" → `yellow_tripdata_...`)
    pub category: String,

    /// Release root; files are fetched from `{base_url}/{category}/{file_name}`
    #[serde(default)]
    pub base_url: Option<String>,
}

impl DatasetConfig {
    /// Dataset published under the default release root
    pub fn new(category: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            base_url: None,
        }
    }

    /// Dataset published under a custom release root
    pub fn with_base_url(category: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            base_url: Some(base_url.into()),
        }
    }

    /// Effective release root, without a trailing slash
    pub fn base_url(&self) -> &str {
        self.base_url
            .as_deref()
            .unwrap_or(DEFAULT_BASE_URL)
            .trim_end_matches('/')
    }
}

/// Parameter space the task catalog is generated from
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// Categories in processing order (default: yellow, green)
    #[serde(default = "default_datasets")]
    pub datasets: Vec<DatasetConfig>,

    /// Years to transfer (default: 2019, 2020)
    #[serde(default = "default_years")]
    pub years: Vec<i32>,

    /// Months to transfer, 1-12 (default: all)
    #[serde(default = "default_months")]
    pub months: Vec<u32>,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            datasets: default_datasets(),
            years: default_years(),
            months: default_months(),
        }
    }
}

/// Local staging area settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StagingConfig {
    /// Directory staged files are written to (default: "./nyc_taxi_csv_gz")
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,
}

impl Default for StagingConfig {
    fn default() -> Self {
        Self {
            download_dir: default_download_dir(),
        }
    }
}

/// How destination object keys are built from a task
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyLayout {
    /// `{prefix}/{category}/{file_name}` (default)
    #[default]
    ByCategory,
    /// `{prefix}/{file_name}`, for single-category catalogs
    Flat,
}

/// Destination bucket settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DestinationConfig {
    /// Bucket name; created if it does not exist
    #[serde(default = "default_bucket")]
    pub bucket: String,

    /// Key prefix (default: "nyc_taxi")
    #[serde(default = "default_prefix")]
    pub prefix: String,

    /// Key layout under the prefix
    #[serde(default)]
    pub key_layout: KeyLayout,

    /// Region (default: provider chain, falling back to "us-east-1")
    #[serde(default)]
    pub region: Option<String>,

    /// Custom S3-compatible endpoint (MinIO, R2, GCS interoperability, ...)
    #[serde(default)]
    pub endpoint_url: Option<String>,

    /// Shared credentials file; must exist when set
    #[serde(default)]
    pub credentials_file: Option<PathBuf>,

    /// Use path-style addressing (required by most self-hosted endpoints)
    #[serde(default)]
    pub force_path_style: bool,
}

impl Default for DestinationConfig {
    fn default() -> Self {
        Self {
            bucket: default_bucket(),
            prefix: default_prefix(),
            key_layout: KeyLayout::default(),
            region: None,
            endpoint_url: None,
            credentials_file: None,
            force_path_style: false,
        }
    }
}

/// Worker pool and streaming settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Workers per phase (default: 2)
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Maximum bytes held in one read/write buffer (default: 8 MiB)
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Timeout for each HTTP request (default: 120 seconds)
    #[serde(default = "default_request_timeout", with = "duration_serde")]
    pub request_timeout: Duration,

    /// User-Agent sent to the source; some mirrors reject library defaults
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            chunk_size: default_chunk_size(),
            request_timeout: default_request_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

/// Retry behavior for transient failures
///
/// The default is a fixed delay: `backoff_multiplier` 1.0 keeps every wait at
/// `initial_delay`. Every wait is capped at `max_delay`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts, including the first (default: 5)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay after the first failed attempt (default: 3 seconds)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between attempts (default: 3 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier applied to the delay after each failure (default: 1.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: false)
    #[serde(default)]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: false,
        }
    }
}

impl RetryConfig {
    /// Policy that never retries
    pub fn single_attempt() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }
}

fn default_datasets() -> Vec<DatasetConfig> {
    vec![DatasetConfig::new("yellow"), DatasetConfig::new("green")]
}

fn default_years() -> Vec<i32> {
    vec![2019, 2020]
}

fn default_months() -> Vec<u32> {
    (1..=12).collect()
}

fn default_download_dir() -> PathBuf {
    PathBuf::from("nyc_taxi_csv_gz")
}

fn default_bucket() -> String {
    "nyc-tlc-tripdata".to_string()
}

fn default_prefix() -> String {
    "nyc_taxi".to_string()
}

fn default_workers() -> usize {
    2
}

fn default_chunk_size() -> usize {
    8 * 1024 * 1024
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(120)
}

fn default_user_agent() -> String {
    "Mozilla/5.0".to_string()
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(3)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(3)
}

fn default_backoff_multiplier() -> f64 {
    1.0
}

fn default_upload_retry() -> RetryConfig {
    RetryConfig::single_attempt()
}

// Duration serialization helper (whole seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
