//! Destination wrapper that checks the staging directory on every call

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tripdata_sync::{BlobStore, BlobWriter, MemoryBlobStore, ObjectRepository, StoreError};

/// Counts destination calls made while any expected file is not yet staged
pub struct StagingWitness {
    inner: MemoryBlobStore,
    expected: Vec<PathBuf>,
    early_calls: AtomicUsize,
}

impl StagingWitness {
    /// Wrap `inner`; every path in `expected` must exist before any call
    pub fn new(inner: MemoryBlobStore, expected: Vec<PathBuf>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            expected,
            early_calls: AtomicUsize::new(0),
        })
    }

    /// Calls made before every expected file was staged
    pub fn early_calls(&self) -> usize {
        self.early_calls.load(Ordering::SeqCst)
    }

    fn check(&self) {
        if self.expected.iter().any(|p| !p.is_file()) {
            self.early_calls.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl BlobStore for StagingWitness {
    fn bucket(&self) -> &str {
        self.inner.bucket()
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        self.check();
        self.inner.exists(key).await
    }

    async fn create(&self, key: &str) -> Result<Box<dyn BlobWriter>, StoreError> {
        self.check();
        self.inner.create(key).await
    }
}

/// Repository that always hands out the same witness
pub struct WitnessRepository(pub Arc<StagingWitness>);

#[async_trait]
impl ObjectRepository for WitnessRepository {
    async fn get(&self, _bucket: &str) -> Result<Arc<dyn BlobStore>, StoreError> {
        let store: Arc<dyn BlobStore> = self.0.clone();
        Ok(store)
    }

    async fn create(&self, bucket: &str) -> Result<Arc<dyn BlobStore>, StoreError> {
        self.get(bucket).await
    }
}
