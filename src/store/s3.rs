//! S3-compatible object store
//!
//! Works against AWS S3 and any service speaking the same API (MinIO, R2,
//! the GCS interoperability endpoint) through `endpoint_url`. Objects that fit
//! in one chunk go up with a single `PutObject`; larger ones use a multipart
//! upload with one part per chunk. S3 rejects non-final parts under 5 MiB, so
//! [`S3Repository::connect`] refuses a smaller `chunk_size`.

use super::{BlobStore, BlobWriter, ObjectRepository};
use crate::config::Config;
use crate::error::{PrerequisiteError, StoreError};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_config::profile::profile_file::{ProfileFileKind, ProfileFiles};
use aws_sdk_s3::Client;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{
    BucketLocationConstraint, CompletedMultipartUpload, CompletedPart, CreateBucketConfiguration,
};
use bytes::Bytes;
use std::sync::Arc;

const DEFAULT_REGION: &str = "us-east-1";

/// Smallest accepted size of a non-final multipart part
const MIN_PART_SIZE: usize = 5 * 1024 * 1024;

/// Buckets on an S3-compatible service
#[derive(Clone)]
pub struct S3Repository {
    client: Client,
    region: String,
}

impl S3Repository {
    /// Build a client from the destination settings
    ///
    /// Credentials come from the standard provider chain; a configured
    /// `credentials_file` is added to it and must exist. Fails when
    /// `transfer.chunk_size` is below the 5 MiB multipart part minimum.
    pub async fn connect(config: &Config) -> Result<Self, PrerequisiteError> {
        check_part_size(config.transfer.chunk_size)?;
        let config = &config.destination;
        let mut loader = aws_config::defaults(BehaviorVersion::latest());

        if let Some(path) = &config.credentials_file {
            if !path.is_file() {
                return Err(PrerequisiteError::MissingCredentials(path.clone()));
            }
            let files = ProfileFiles::builder()
                .with_file(ProfileFileKind::Credentials, path)
                .include_default_config_file(true)
                .build();
            loader = loader.profile_files(files);
        }
        if let Some(region) = &config.region {
            loader = loader.region(Region::new(region.clone()));
        }
        if let Some(endpoint) = &config.endpoint_url {
            loader = loader.endpoint_url(endpoint);
        }

        let shared = loader.load().await;
        let region = shared
            .region()
            .map(|r| r.as_ref().to_string())
            .unwrap_or_else(|| DEFAULT_REGION.to_string());

        let s3_config = aws_sdk_s3::config::Builder::from(&shared)
            .region(Region::new(region.clone()))
            .force_path_style(config.force_path_style)
            .build();

        tracing::info!(
            region = %region,
            endpoint = config.endpoint_url.as_deref().unwrap_or("default"),
            "S3 client configured"
        );

        Ok(Self {
            client: Client::from_conf(s3_config),
            region,
        })
    }

    fn store(&self, bucket: &str) -> Arc<dyn BlobStore> {
        Arc::new(S3BlobStore {
            client: self.client.clone(),
            bucket: bucket.to_string(),
        })
    }
}

#[async_trait]
impl ObjectRepository for S3Repository {
    async fn get(&self, bucket: &str) -> Result<Arc<dyn BlobStore>, StoreError> {
        match self.client.head_bucket().bucket(bucket).send().await {
            Ok(_) => Ok(self.store(bucket)),
            Err(err) => {
                let status = err.raw_response().map(|r| r.status().as_u16());
                match status {
                    Some(404) => Err(StoreError::NotFound(bucket.to_string())),
                    Some(403) => Err(StoreError::Forbidden(bucket.to_string())),
                    _ => Err(backend("head bucket", err)),
                }
            }
        }
    }

    async fn create(&self, bucket: &str) -> Result<Arc<dyn BlobStore>, StoreError> {
        let mut request = self.client.create_bucket().bucket(bucket);
        if self.region != DEFAULT_REGION {
            request = request.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(self.region.as_str()))
                    .build(),
            );
        }

        match request.send().await {
            Ok(_) => Ok(self.store(bucket)),
            Err(err) => {
                if err.raw_response().map(|r| r.status().as_u16()) == Some(403) {
                    return Err(StoreError::Forbidden(bucket.to_string()));
                }
                let service = err.into_service_error();
                if service.is_bucket_already_owned_by_you() {
                    Ok(self.store(bucket))
                } else if service.is_bucket_already_exists() {
                    Err(StoreError::Forbidden(bucket.to_string()))
                } else {
                    Err(backend("create bucket", service))
                }
            }
        }
    }
}

/// One S3 bucket
pub struct S3BlobStore {
    client: Client,
    bucket: String,
}

#[async_trait]
impl BlobStore for S3BlobStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let res = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await;

        match res {
            Ok(_) => Ok(true),
            Err(err) => {
                if err.raw_response().map(|r| r.status().as_u16()) == Some(403) {
                    return Err(StoreError::Forbidden(format!("{}/{}", self.bucket, key)));
                }
                let service = err.into_service_error();
                if service.is_not_found() {
                    Ok(false)
                } else {
                    Err(backend("head object", service))
                }
            }
        }
    }

    async fn create(&self, key: &str) -> Result<Box<dyn BlobWriter>, StoreError> {
        Ok(Box::new(S3Writer {
            client: self.client.clone(),
            bucket: self.bucket.clone(),
            key: key.to_string(),
            pending: None,
            upload_id: None,
            parts: Vec::new(),
        }))
    }
}

/// Holds back one chunk so the last one can be sent as the final part
struct S3Writer {
    client: Client,
    bucket: String,
    key: String,
    pending: Option<Bytes>,
    upload_id: Option<String>,
    parts: Vec<CompletedPart>,
}

impl S3Writer {
    async fn upload_id(&mut self) -> Result<String, StoreError> {
        if let Some(id) = &self.upload_id {
            return Ok(id.clone());
        }
        let created = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(&self.key)
            .send()
            .await
            .map_err(|e| backend("create multipart upload", e))?;
        let id = created
            .upload_id()
            .ok_or_else(|| StoreError::Backend("multipart upload returned no upload id".into()))?
            .to_string();
        self.upload_id = Some(id.clone());
        Ok(id)
    }

    async fn upload_part(&mut self, chunk: Bytes) -> Result<(), StoreError> {
        let upload_id = self.upload_id().await?;
        let part_number = i32::try_from(self.parts.len() + 1)
            .map_err(|_| StoreError::Backend("too many parts".into()))?;
        let uploaded = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(&self.key)
            .upload_id(upload_id)
            .part_number(part_number)
            .body(ByteStream::from(chunk))
            .send()
            .await
            .map_err(|e| backend("upload part", e))?;
        self.parts.push(
            CompletedPart::builder()
                .set_e_tag(uploaded.e_tag().map(str::to_string))
                .part_number(part_number)
                .build(),
        );
        Ok(())
    }
}

#[async_trait]
impl BlobWriter for S3Writer {
    async fn put(&mut self, chunk: Bytes) -> Result<(), StoreError> {
        if let Some(previous) = self.pending.replace(chunk) {
            self.upload_part(previous).await?;
        }
        Ok(())
    }

    async fn finish(self: Box<Self>) -> Result<(), StoreError> {
        let mut writer = *self;
        let last = writer.pending.take().unwrap_or_default();

        if writer.upload_id.is_none() {
            writer
                .client
                .put_object()
                .bucket(&writer.bucket)
                .key(&writer.key)
                .body(ByteStream::from(last))
                .send()
                .await
                .map_err(|e| backend("put object", e))?;
            return Ok(());
        }

        writer.upload_part(last).await?;
        let upload_id = writer.upload_id().await?;
        let parts = std::mem::take(&mut writer.parts);
        writer
            .client
            .complete_multipart_upload()
            .bucket(&writer.bucket)
            .key(&writer.key)
            .upload_id(upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build(),
            )
            .send()
            .await
            .map_err(|e| backend("complete multipart upload", e))?;
        Ok(())
    }

    async fn abort(self: Box<Self>) {
        let Some(upload_id) = &self.upload_id else {
            return;
        };
        if let Err(e) = self
            .client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(&self.key)
            .upload_id(upload_id)
            .send()
            .await
        {
            tracing::warn!(
                key = %self.key,
                error = %DisplayErrorContext(&e),
                "Failed to abort multipart upload"
            );
        }
    }
}

fn backend<E>(operation: &str, err: E) -> StoreError
where
    E: std::error::Error,
{
    StoreError::Backend(format!("{}: {}", operation, DisplayErrorContext(&err)))
}

fn check_part_size(chunk_size: usize) -> Result<(), PrerequisiteError> {
    if chunk_size < MIN_PART_SIZE {
        return Err(PrerequisiteError::ChunkSizeTooSmall {
            chunk_size,
            minimum: MIN_PART_SIZE,
        });
    }
    Ok(())
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn part_size_minimum_is_enforced() {
        assert!(check_part_size(MIN_PART_SIZE).is_ok());
        assert!(check_part_size(Config::default().transfer.chunk_size).is_ok());
        assert!(matches!(
            check_part_size(MIN_PART_SIZE - 1),
            Err(PrerequisiteError::ChunkSizeTooSmall { chunk_size, minimum })
                if chunk_size == MIN_PART_SIZE - 1 && minimum == MIN_PART_SIZE
        ));
    }

    #[tokio::test]
    async fn connect_rejects_small_chunks_before_building_a_client() {
        let mut config = Config::default();
        config.transfer.chunk_size = 64 * 1024;
        config.destination.credentials_file = Some("/nonexistent/credentials".into());

        let Err(err) = S3Repository::connect(&config).await else {
            panic!("64 KiB chunks must be rejected");
        };
        assert!(matches!(
            err,
            PrerequisiteError::ChunkSizeTooSmall { chunk_size: 65536, .. }
        ));
        assert_eq!(crate::Error::from(err).exit_code(), 2);
    }
}
