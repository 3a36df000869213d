//! Error types for tripdata-sync
//!
//! The taxonomy mirrors the two transfer phases:
//! - [`AttemptError`] describes why a single download attempt failed and is
//!   classified as transient or fatal by the retry loop
//! - [`DownloadError`] and [`UploadError`] are per-task failures that abort the run
//! - [`PrerequisiteError`] covers everything checked before transfers begin
//! - [`StoreError`] is what destination backends return

use crate::types::{FileTask, Phase};
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for tripdata-sync operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for tripdata-sync
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "transfer.workers")
        key: Option<String>,
    },

    /// A prerequisite for the run is missing
    #[error("prerequisite check failed: {0}")]
    Prerequisite(#[from] PrerequisiteError),

    /// A task failed in the download phase
    #[error("download error: {0}")]
    Download(#[from] DownloadError),

    /// A task failed in the upload phase
    #[error("upload error: {0}")]
    Upload(#[from] UploadError),

    /// Destination backend error outside a task (e.g. bucket lookup)
    #[error("object store error: {0}")]
    Store(#[from] StoreError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network error outside a download attempt (e.g. building the HTTP client)
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A pool worker stopped without reporting its task's result
    #[error("{phase} worker terminated unexpectedly: {reason}")]
    WorkerLost {
        /// Phase the worker belonged to
        phase: Phase,
        /// Panic message or join error
        reason: String,
    },
}

impl Error {
    /// Process exit code for this error
    ///
    /// `2` for problems detected before any transfer starts (configuration,
    /// prerequisites), `1` for everything else.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Config { .. } | Error::Prerequisite(_) | Error::Serialization(_) => 2,
            _ => 1,
        }
    }
}

/// Why a single download attempt failed
#[derive(Debug, Error)]
pub enum AttemptError {
    /// Source answered with a non-2xx status
    #[error("HTTP {status} from {url}")]
    Status {
        /// Response status code
        status: u16,
        /// Requested URL
        url: String,
    },

    /// Transport failure: connect, timeout, or body read
    #[error("request failed: {0}")]
    Network(#[from] reqwest::Error),

    /// No response or body data arrived within the request timeout
    #[error("no data received for {0:?}")]
    Stalled(std::time::Duration),

    /// The response body was written but produced an empty file
    #[error("downloaded file is empty")]
    EmptyBody,

    /// Writing the staging file failed
    #[error("staging write failed: {0}")]
    Staging(#[from] std::io::Error),
}

/// Download-phase failure for one task
#[derive(Debug, Error)]
pub enum DownloadError {
    /// Every attempt within the retry budget failed
    #[error("failed to download {task} after {attempts} attempts: {last_cause}")]
    RetryBudgetExhausted {
        /// The task that failed
        task: Box<FileTask>,
        /// Number of attempts made
        attempts: u32,
        /// Error from the final attempt
        #[source]
        last_cause: AttemptError,
    },

    /// An attempt failed with an error that retrying cannot fix
    #[error("failed to download {task} (attempt {attempts}): {cause}")]
    Fatal {
        /// The task that failed
        task: Box<FileTask>,
        /// Attempt on which the failure happened
        attempts: u32,
        /// The non-transient error
        #[source]
        cause: AttemptError,
    },
}

impl DownloadError {
    /// The task this error belongs to
    pub fn task(&self) -> &FileTask {
        match self {
            DownloadError::RetryBudgetExhausted { task, .. } | DownloadError::Fatal { task, .. } => {
                task
            }
        }
    }

    /// Number of attempts made before giving up
    pub fn attempts(&self) -> u32 {
        match self {
            DownloadError::RetryBudgetExhausted { attempts, .. }
            | DownloadError::Fatal { attempts, .. } => *attempts,
        }
    }
}

/// Upload-phase failure for one task
#[derive(Debug, Error)]
pub enum UploadError {
    /// Checking whether the destination object exists failed
    #[error("existence check for {key} failed: {source}")]
    ExistenceCheck {
        /// Destination object key
        key: String,
        /// Backend error
        #[source]
        source: StoreError,
    },

    /// Reading the staged file failed
    #[error("failed to read staged file {path}: {source}")]
    ReadArtifact {
        /// Staged file path
        path: PathBuf,
        /// I/O error
        #[source]
        source: std::io::Error,
    },

    /// Writing the destination object failed
    #[error("failed to write {key}: {source}")]
    DestinationWrite {
        /// Destination object key
        key: String,
        /// Backend error
        #[source]
        source: StoreError,
    },
}

/// Failure detected before any transfer work begins
#[derive(Debug, Error)]
pub enum PrerequisiteError {
    /// Configured credentials file does not exist
    #[error("missing credentials file: {0}")]
    MissingCredentials(PathBuf),

    /// Bucket exists but belongs to someone else or denies access
    #[error("bucket '{0}' exists but is not accessible; choose another bucket name")]
    BucketForbidden(String),

    /// Bucket lookup or creation failed
    #[error("bucket '{bucket}' is unavailable: {source}")]
    BucketUnavailable {
        /// Bucket name
        bucket: String,
        /// Backend error
        #[source]
        source: StoreError,
    },

    /// Staging directory could not be created
    #[error("cannot prepare staging directory {path}: {source}")]
    StagingDirectory {
        /// Staging directory path
        path: PathBuf,
        /// I/O error
        #[source]
        source: std::io::Error,
    },

    /// Chunks are smaller than the destination accepts for multipart parts
    #[error("chunk size {chunk_size} is below the {minimum}-byte multipart part minimum")]
    ChunkSizeTooSmall {
        /// Configured `transfer.chunk_size`
        chunk_size: usize,
        /// Smallest part the destination accepts
        minimum: usize,
    },
}

/// Error returned by destination backends
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// Bucket or object does not exist
    #[error("{0} not found")]
    NotFound(String),

    /// Access denied
    #[error("access to {0} is forbidden")]
    Forbidden(String),

    /// Any other backend failure
    #[error("{0}")]
    Backend(String),
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Period;

    fn sample_task() -> FileTask {
        FileTask {
            category: "yellow".into(),
            period: Period::new(2019, 3),
            remote_url: "https://example.com/yellow/yellow_tripdata_2019-03.csv.gz".into(),
            file_name: "yellow_tripdata_2019-03.csv.gz".into(),
            remote_key: "nyc_taxi/yellow/yellow_tripdata_2019-03.csv.gz".into(),
        }
    }

    #[test]
    fn exhausted_download_names_task_and_last_cause() {
        let err = DownloadError::RetryBudgetExhausted {
            task: Box::new(sample_task()),
            attempts: 5,
            last_cause: AttemptError::Status {
                status: 500,
                url: "https://example.com/x".into(),
            },
        };
        let msg = err.to_string();
        assert!(msg.contains("yellow_tripdata_2019-03.csv.gz"), "{msg}");
        assert!(msg.contains("5 attempts"), "{msg}");
        assert!(msg.contains("HTTP 500"), "{msg}");
        assert_eq!(err.attempts(), 5);
        assert_eq!(err.task().period, Period::new(2019, 3));
    }

    #[test]
    fn config_and_prerequisite_errors_exit_with_two() {
        let config = Error::Config {
            message: "workers must be at least 1".into(),
            key: Some("transfer.workers".into()),
        };
        assert_eq!(config.exit_code(), 2);

        let prereq: Error = PrerequisiteError::BucketForbidden("taken".into()).into();
        assert_eq!(prereq.exit_code(), 2);
    }

    #[test]
    fn transfer_errors_exit_with_one() {
        let err: Error = UploadError::DestinationWrite {
            key: "nyc_taxi/yellow/a.csv.gz".into(),
            source: StoreError::Backend("connection reset".into()),
        }
        .into();
        assert_eq!(err.exit_code(), 1);
        assert!(err.to_string().starts_with("upload error: failed to write"));
    }

    #[test]
    fn forbidden_bucket_message_suggests_renaming() {
        let err = PrerequisiteError::BucketForbidden("dezoomcamp".into());
        assert_eq!(
            err.to_string(),
            "bucket 'dezoomcamp' exists but is not accessible; choose another bucket name"
        );
    }
}
