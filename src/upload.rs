//! Upload manager: pushes staged files into the destination bucket
//!
//! An object that already exists under the task's key is never rewritten;
//! presence alone counts as done. New objects are streamed from disk in reads
//! of at most `chunk_size` bytes.

use crate::config::{Config, RetryConfig};
use crate::error::UploadError;
use crate::retry::with_retry;
use crate::store::{BlobStore, BlobWriter};
use crate::types::{Event, FileTask, LocalArtifact, TransferOutcome};
use bytes::BytesMut;
use std::path::Path;
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tokio::sync::broadcast;

/// Writes staged artifacts to a [`BlobStore`]
#[derive(Clone)]
pub struct UploadManager {
    store: Arc<dyn BlobStore>,
    chunk_size: usize,
    retry: RetryConfig,
    event_tx: Option<broadcast::Sender<Event>>,
}

impl UploadManager {
    /// Upload into `store` using the transfer and upload retry settings
    pub fn new(store: Arc<dyn BlobStore>, config: &Config) -> Self {
        Self {
            store,
            chunk_size: config.transfer.chunk_size.max(1),
            retry: config.upload_retry.clone(),
            event_tx: None,
        }
    }

    /// Publish completion events on `event_tx`
    pub fn with_events(mut self, event_tx: broadcast::Sender<Event>) -> Self {
        self.event_tx = Some(event_tx);
        self
    }

    /// Upload one artifact unless its object already exists
    ///
    /// With the default single-attempt policy the first backend error is
    /// returned as is. With retries enabled the existence check runs again
    /// before every attempt.
    pub async fn push(
        &self,
        artifact: &LocalArtifact,
        task: &FileTask,
    ) -> Result<TransferOutcome, UploadError> {
        let (outcome, _) = with_retry(
            &self.retry,
            |_| self.push_once(artifact, task),
            |_, _| {},
        )
        .await
        .map_err(|failure| failure.error)?;

        self.emit(Event::Uploaded {
            key: task.remote_key.clone(),
            outcome,
        });
        Ok(outcome)
    }

    async fn push_once(
        &self,
        artifact: &LocalArtifact,
        task: &FileTask,
    ) -> Result<TransferOutcome, UploadError> {
        let key = task.remote_key.as_str();
        let exists = self
            .store
            .exists(key)
            .await
            .map_err(|source| UploadError::ExistenceCheck {
                key: key.to_string(),
                source,
            })?;
        if exists {
            tracing::info!(key, "[SKIP UPLOAD] object already present");
            return Ok(TransferOutcome::Skipped);
        }

        tracing::info!(file = %task.file_name, key, "Uploading");
        let mut file = File::open(&artifact.path)
            .await
            .map_err(|source| UploadError::ReadArtifact {
                path: artifact.path.clone(),
                source,
            })?;
        let mut writer = self
            .store
            .create(key)
            .await
            .map_err(|source| UploadError::DestinationWrite {
                key: key.to_string(),
                source,
            })?;

        if let Err(e) = self
            .stream(&mut file, writer.as_mut(), &artifact.path, key)
            .await
        {
            writer.abort().await;
            return Err(e);
        }
        writer
            .finish()
            .await
            .map_err(|source| UploadError::DestinationWrite {
                key: key.to_string(),
                source,
            })?;

        tracing::info!(
            bucket = self.store.bucket(),
            key,
            size_bytes = artifact.size_bytes,
            "Uploaded"
        );
        Ok(TransferOutcome::Succeeded)
    }

    /// Copy the file into the writer, one chunk per `put`
    async fn stream(
        &self,
        file: &mut File,
        writer: &mut dyn BlobWriter,
        path: &Path,
        key: &str,
    ) -> Result<(), UploadError> {
        loop {
            let mut buffer = BytesMut::zeroed(self.chunk_size);
            let mut filled = 0;
            while filled < self.chunk_size {
                let n = file.read(&mut buffer[filled..]).await.map_err(|source| {
                    UploadError::ReadArtifact {
                        path: path.to_path_buf(),
                        source,
                    }
                })?;
                if n == 0 {
                    break;
                }
                filled += n;
            }
            if filled == 0 {
                return Ok(());
            }

            buffer.truncate(filled);
            writer
                .put(buffer.freeze())
                .await
                .map_err(|source| UploadError::DestinationWrite {
                    key: key.to_string(),
                    source,
                })?;

            if filled < self.chunk_size {
                return Ok(());
            }
        }
    }

    fn emit(&self, event: Event) {
        if let Some(tx) = &self.event_tx {
            tx.send(event).ok();
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::store::MemoryBlobStore;
    use crate::types::Period;
    use std::time::Duration;

    fn task() -> FileTask {
        FileTask {
            category: "green".into(),
            period: Period::new(2020, 7),
            remote_url: "http://localhost/green/green_tripdata_2020-07.csv.gz".into(),
            file_name: "green_tripdata_2020-07.csv.gz".into(),
            remote_key: "nyc_taxi/green/green_tripdata_2020-07.csv.gz".into(),
        }
    }

    fn stage(dir: &tempfile::TempDir, content: &[u8]) -> LocalArtifact {
        let path = dir.path().join("green_tripdata_2020-07.csv.gz");
        std::fs::write(&path, content).unwrap();
        LocalArtifact {
            path,
            size_bytes: content.len() as u64,
        }
    }

    fn manager(store: &MemoryBlobStore, chunk_size: usize) -> UploadManager {
        let mut config = Config::default();
        config.transfer.chunk_size = chunk_size;
        UploadManager::new(Arc::new(store.clone()), &config)
    }

    #[tokio::test]
    async fn uploads_new_object() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = stage(&dir, b"lpep_pickup_datetime,lpep_dropoff_datetime\n");
        let store = MemoryBlobStore::new("trips");

        let outcome = manager(&store, 1024).push(&artifact, &task()).await.unwrap();

        assert_eq!(outcome, TransferOutcome::Succeeded);
        assert_eq!(
            store.object(&task().remote_key).unwrap().as_ref(),
            b"lpep_pickup_datetime,lpep_dropoff_datetime\n"
        );
        assert_eq!(store.writes_finished(), 1);
    }

    #[tokio::test]
    async fn existing_object_is_not_written() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = stage(&dir, b"new content");
        let store = MemoryBlobStore::new("trips");
        store.insert(&task().remote_key, "old content");

        let outcome = manager(&store, 1024).push(&artifact, &task()).await.unwrap();

        assert_eq!(outcome, TransferOutcome::Skipped);
        assert_eq!(store.writes_started(), 0, "no write calls");
        assert_eq!(
            store.object(&task().remote_key).unwrap().as_ref(),
            b"old content",
            "existing object is left untouched"
        );
    }

    #[tokio::test]
    async fn chunks_never_exceed_chunk_size() {
        let dir = tempfile::tempdir().unwrap();
        let content: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();
        let artifact = stage(&dir, &content);
        let store = MemoryBlobStore::new("trips");

        manager(&store, 64).push(&artifact, &task()).await.unwrap();

        let sizes = store.chunk_sizes();
        assert!(sizes.iter().all(|&s| s <= 64), "chunk sizes {sizes:?}");
        assert_eq!(sizes.len(), 16, "1000 bytes in 64-byte chunks");
        assert_eq!(store.object(&task().remote_key).unwrap().as_ref(), &content[..]);
    }

    #[tokio::test]
    async fn exact_multiple_of_chunk_size_sends_no_empty_chunk() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = stage(&dir, &[7u8; 128]);
        let store = MemoryBlobStore::new("trips");

        manager(&store, 64).push(&artifact, &task()).await.unwrap();
        assert_eq!(store.chunk_sizes(), vec![64, 64]);
    }

    #[tokio::test]
    async fn write_failure_is_fatal_by_default() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = stage(&dir, b"abc");
        let store = MemoryBlobStore::new("trips");
        store.fail_writes(&task().remote_key, 1);

        let err = manager(&store, 1024)
            .push(&artifact, &task())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            UploadError::DestinationWrite {
                source: StoreError::Backend(_),
                ..
            }
        ));
        assert_eq!(store.writes_started(), 1, "single attempt");
        assert_eq!(store.writes_aborted(), 1);
        assert!(store.object(&task().remote_key).is_none());
    }

    #[tokio::test]
    async fn upload_retry_recovers_from_backend_errors() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = stage(&dir, b"abc");
        let store = MemoryBlobStore::new("trips");
        store.fail_writes(&task().remote_key, 2);

        let mut config = Config::default();
        config.upload_retry = RetryConfig {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(1),
            backoff_multiplier: 1.0,
            jitter: false,
        };
        let outcome = UploadManager::new(Arc::new(store.clone()), &config)
            .push(&artifact, &task())
            .await
            .unwrap();

        assert_eq!(outcome, TransferOutcome::Succeeded);
        assert_eq!(store.writes_started(), 3);
        assert_eq!(store.exists_calls(), 3, "existence re-checked per attempt");
    }

    #[tokio::test]
    async fn missing_artifact_is_reported_as_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = LocalArtifact {
            path: dir.path().join("gone.csv.gz"),
            size_bytes: 10,
        };
        let store = MemoryBlobStore::new("trips");

        let err = manager(&store, 1024)
            .push(&artifact, &task())
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::ReadArtifact { .. }));
        assert_eq!(store.writes_started(), 0);
    }

    #[tokio::test]
    async fn emits_uploaded_event() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = stage(&dir, b"abc");
        let store = MemoryBlobStore::new("trips");
        let (tx, mut rx) = broadcast::channel(4);

        manager(&store, 1024)
            .with_events(tx)
            .push(&artifact, &task())
            .await
            .unwrap();

        match rx.try_recv().unwrap() {
            Event::Uploaded { key, outcome } => {
                assert_eq!(key, task().remote_key);
                assert_eq!(outcome, TransferOutcome::Succeeded);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
}
