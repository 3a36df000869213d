//! Downloader: fetches one task's source file into the staging area
//!
//! A task whose staged file already exists with a non-zero size is skipped
//! without touching the network. Otherwise the file is streamed with a
//! per-read timeout and retried according to [`RetryConfig`]; see
//! [`retry`](crate::retry) for which failures count as transient.

use crate::config::{Config, RetryConfig};
use crate::error::{AttemptError, DownloadError, Result};
use crate::retry::{RetryFailure, with_retry};
use crate::staging::LocalStore;
use crate::types::{Event, FileTask, LocalArtifact, TransferOutcome};
use std::time::Duration;
use tokio::sync::broadcast;

/// Result of a resolved download
#[derive(Clone, Debug)]
pub struct Fetched {
    /// The staged file
    pub artifact: LocalArtifact,
    /// `Skipped` when the file was already staged
    pub outcome: TransferOutcome,
    /// Attempts made (0 when skipped)
    pub attempts: u32,
}

/// Fetches source files into a [`LocalStore`]
#[derive(Clone)]
pub struct Downloader {
    client: reqwest::Client,
    store: LocalStore,
    retry: RetryConfig,
    chunk_size: usize,
    read_timeout: Duration,
    event_tx: Option<broadcast::Sender<Event>>,
}

impl Downloader {
    /// Build a downloader from the transfer and retry settings
    ///
    /// The HTTP client carries the configured User-Agent; some mirrors refuse
    /// requests with a library default.
    pub fn new(config: &Config, store: LocalStore) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.transfer.request_timeout)
            .user_agent(config.transfer.user_agent.clone())
            .build()?;

        Ok(Self {
            client,
            store,
            retry: config.retry.clone(),
            chunk_size: config.transfer.chunk_size,
            read_timeout: config.transfer.request_timeout,
            event_tx: None,
        })
    }

    /// Publish retry and completion events on `event_tx`
    pub fn with_events(mut self, event_tx: broadcast::Sender<Event>) -> Self {
        self.event_tx = Some(event_tx);
        self
    }

    /// Staging area this downloader writes into
    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    /// Download one task, or return the already staged file
    pub async fn fetch(&self, task: &FileTask) -> std::result::Result<Fetched, DownloadError> {
        if let Some(artifact) = self.store.existing(task).await {
            tracing::info!(
                file = %task.file_name,
                size_bytes = artifact.size_bytes,
                "[SKIP] already staged"
            );
            self.emit(Event::Downloaded {
                file: task.file_name.clone(),
                size_bytes: artifact.size_bytes,
                outcome: TransferOutcome::Skipped,
            });
            return Ok(Fetched {
                artifact,
                outcome: TransferOutcome::Skipped,
                attempts: 0,
            });
        }

        let result = with_retry(
            &self.retry,
            |attempt| self.attempt(task, attempt),
            |attempt, error| {
                self.emit(Event::DownloadRetrying {
                    file: task.file_name.clone(),
                    attempt,
                    error: error.to_string(),
                })
            },
        )
        .await;

        match result {
            Ok((artifact, attempts)) => {
                tracing::info!(
                    file = %task.file_name,
                    size_bytes = artifact.size_bytes,
                    attempts,
                    "Downloaded"
                );
                self.emit(Event::Downloaded {
                    file: task.file_name.clone(),
                    size_bytes: artifact.size_bytes,
                    outcome: TransferOutcome::Succeeded,
                });
                Ok(Fetched {
                    artifact,
                    outcome: TransferOutcome::Succeeded,
                    attempts,
                })
            }
            Err(failure) => {
                self.store.discard_partial(task).await;
                let exhausted = failure.exhausted();
                let RetryFailure { error, attempts } = failure;
                let task = Box::new(task.clone());
                Err(if exhausted {
                    DownloadError::RetryBudgetExhausted {
                        task,
                        attempts,
                        last_cause: error,
                    }
                } else {
                    DownloadError::Fatal {
                        task,
                        attempts,
                        cause: error,
                    }
                })
            }
        }
    }

    /// One streamed GET into the partial file
    async fn attempt(
        &self,
        task: &FileTask,
        attempt: u32,
    ) -> std::result::Result<LocalArtifact, AttemptError> {
        tracing::info!(
            file = %task.file_name,
            attempt,
            max_attempts = self.retry.max_attempts,
            "Downloading"
        );

        let mut response = tokio::time::timeout(
            self.read_timeout,
            self.client.get(task.remote_url.as_str()).send(),
        )
        .await
        .map_err(|_| AttemptError::Stalled(self.read_timeout))??;

        let status = response.status();
        if !status.is_success() {
            return Err(AttemptError::Status {
                status: status.as_u16(),
                url: task.remote_url.clone(),
            });
        }

        let mut staging = self.store.begin(task, self.chunk_size).await?;
        while let Some(chunk) = tokio::time::timeout(self.read_timeout, response.chunk())
            .await
            .map_err(|_| AttemptError::Stalled(self.read_timeout))??
        {
            staging.write(&chunk).await?;
        }
        tracing::debug!(
            file = %task.file_name,
            largest_write = staging.largest_write(),
            "Response body staged"
        );
        staging.commit().await
    }

    fn emit(&self, event: Event) {
        if let Some(tx) = &self.event_tx {
            // no subscribers is fine
            tx.send(event).ok();
        }
    }
}
