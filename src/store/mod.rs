//! Destination object storage
//!
//! The pipeline only sees two traits:
//! - [`ObjectRepository`] resolves a bucket by name (`get` / `create`)
//! - [`BlobStore`] is one bucket: `exists` checks a key, `create` opens a
//!   [`BlobWriter`] that receives the object in chunks via `put`
//!
//! Implementations:
//! - [`S3Repository`] for S3-compatible services
//! - [`MemoryRepository`] keeps objects in process and records every call

mod memory;
mod s3;

pub use memory::{MemoryBlobStore, MemoryRepository};
pub use s3::{S3BlobStore, S3Repository};

use crate::error::{PrerequisiteError, StoreError};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;

/// Receives one object's content chunk by chunk
///
/// Exactly one of `finish` or `abort` is called at the end. An object becomes
/// visible through [`BlobStore::exists`] only after `finish` succeeds.
#[async_trait]
pub trait BlobWriter: Send {
    /// Append the next chunk
    async fn put(&mut self, chunk: Bytes) -> Result<(), StoreError>;

    /// Complete the object
    async fn finish(self: Box<Self>) -> Result<(), StoreError>;

    /// Discard everything written so far
    async fn abort(self: Box<Self>);
}

/// One destination bucket
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Bucket name, for logging
    fn bucket(&self) -> &str;

    /// Whether an object exists under `key`
    async fn exists(&self, key: &str) -> Result<bool, StoreError>;

    /// Start writing a new object under `key`
    async fn create(&self, key: &str) -> Result<Box<dyn BlobWriter>, StoreError>;
}

/// Resolves buckets by name
#[async_trait]
pub trait ObjectRepository: Send + Sync {
    /// Open an existing bucket
    ///
    /// Returns `StoreError::NotFound` if it does not exist and
    /// `StoreError::Forbidden` if it exists but is not accessible.
    async fn get(&self, bucket: &str) -> Result<Arc<dyn BlobStore>, StoreError>;

    /// Create a bucket and open it
    async fn create(&self, bucket: &str) -> Result<Arc<dyn BlobStore>, StoreError>;
}

/// Open `bucket`, creating it when it does not exist yet
pub async fn ensure_bucket(
    repository: &dyn ObjectRepository,
    bucket: &str,
) -> Result<Arc<dyn BlobStore>, PrerequisiteError> {
    match repository.get(bucket).await {
        Ok(store) => {
            tracing::info!(bucket, "Bucket exists");
            Ok(store)
        }
        Err(StoreError::NotFound(_)) => {
            let store = repository.create(bucket).await.map_err(|source| match source {
                StoreError::Forbidden(_) => PrerequisiteError::BucketForbidden(bucket.to_string()),
                source => PrerequisiteError::BucketUnavailable {
                    bucket: bucket.to_string(),
                    source,
                },
            })?;
            tracing::info!(bucket, "Created bucket");
            Ok(store)
        }
        Err(StoreError::Forbidden(_)) => {
            Err(PrerequisiteError::BucketForbidden(bucket.to_string()))
        }
        Err(source) => Err(PrerequisiteError::BucketUnavailable {
            bucket: bucket.to_string(),
            source,
        }),
    }
}
