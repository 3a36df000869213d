//! In-process object store
//!
//! Objects live in a map behind a mutex. Every call is counted and the size of
//! every chunk received is recorded, which makes idempotence and chunking
//! observable in tests. Write failures can be injected per key.

use super::{BlobStore, BlobWriter, ObjectRepository};
use crate::error::StoreError;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

/// Buckets held in memory
#[derive(Clone, Default)]
pub struct MemoryRepository {
    inner: Arc<Mutex<RepositoryState>>,
}

#[derive(Default)]
struct RepositoryState {
    buckets: HashMap<String, MemoryBlobStore>,
    forbidden: HashSet<String>,
    created: usize,
}

impl MemoryRepository {
    /// Empty repository
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a bucket (or return the existing one) without counting it as created
    pub fn add_bucket(&self, name: &str) -> MemoryBlobStore {
        lock(&self.inner)
            .buckets
            .entry(name.to_string())
            .or_insert_with(|| MemoryBlobStore::new(name))
            .clone()
    }

    /// Make `name` look like a bucket owned by someone else
    pub fn forbid(&self, name: &str) {
        lock(&self.inner).forbidden.insert(name.to_string());
    }

    /// Handle on a bucket, if it exists
    pub fn bucket(&self, name: &str) -> Option<MemoryBlobStore> {
        lock(&self.inner).buckets.get(name).cloned()
    }

    /// Number of buckets created through [`ObjectRepository::create`]
    pub fn created_buckets(&self) -> usize {
        lock(&self.inner).created
    }
}

#[async_trait]
impl ObjectRepository for MemoryRepository {
    async fn get(&self, bucket: &str) -> Result<Arc<dyn BlobStore>, StoreError> {
        let state = lock(&self.inner);
        if state.forbidden.contains(bucket) {
            return Err(StoreError::Forbidden(bucket.to_string()));
        }
        match state.buckets.get(bucket) {
            Some(store) => Ok(Arc::new(store.clone())),
            None => Err(StoreError::NotFound(bucket.to_string())),
        }
    }

    async fn create(&self, bucket: &str) -> Result<Arc<dyn BlobStore>, StoreError> {
        let mut state = lock(&self.inner);
        if state.forbidden.contains(bucket) {
            return Err(StoreError::Forbidden(bucket.to_string()));
        }
        state.created += 1;
        let store = state
            .buckets
            .entry(bucket.to_string())
            .or_insert_with(|| MemoryBlobStore::new(bucket))
            .clone();
        Ok(Arc::new(store))
    }
}

/// One in-memory bucket; clones share state
#[derive(Clone)]
pub struct MemoryBlobStore {
    name: Arc<str>,
    inner: Arc<Mutex<BucketState>>,
}

#[derive(Default)]
struct BucketState {
    objects: BTreeMap<String, Bytes>,
    exists_calls: usize,
    writes_started: usize,
    writes_finished: usize,
    writes_aborted: usize,
    chunk_sizes: Vec<usize>,
    failing_writes: HashMap<String, u32>,
}

impl MemoryBlobStore {
    /// Empty bucket
    pub fn new(name: &str) -> Self {
        Self {
            name: Arc::from(name),
            inner: Arc::new(Mutex::new(BucketState::default())),
        }
    }

    /// Store an object directly, bypassing call accounting
    pub fn insert(&self, key: &str, content: impl Into<Bytes>) {
        lock(&self.inner)
            .objects
            .insert(key.to_string(), content.into());
    }

    /// Content of an object
    pub fn object(&self, key: &str) -> Option<Bytes> {
        lock(&self.inner).objects.get(key).cloned()
    }

    /// All object keys in order
    pub fn keys(&self) -> Vec<String> {
        lock(&self.inner).objects.keys().cloned().collect()
    }

    /// Number of `exists` calls
    pub fn exists_calls(&self) -> usize {
        lock(&self.inner).exists_calls
    }

    /// Number of writers opened with `create`
    pub fn writes_started(&self) -> usize {
        lock(&self.inner).writes_started
    }

    /// Number of writers that finished successfully
    pub fn writes_finished(&self) -> usize {
        lock(&self.inner).writes_finished
    }

    /// Number of writers that were aborted
    pub fn writes_aborted(&self) -> usize {
        lock(&self.inner).writes_aborted
    }

    /// Size of every chunk received by any writer
    pub fn chunk_sizes(&self) -> Vec<usize> {
        lock(&self.inner).chunk_sizes.clone()
    }

    /// Fail the next `times` chunk writes for `key` with a backend error
    pub fn fail_writes(&self, key: &str, times: u32) {
        lock(&self.inner)
            .failing_writes
            .insert(key.to_string(), times);
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    fn bucket(&self) -> &str {
        &self.name
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let mut state = lock(&self.inner);
        state.exists_calls += 1;
        Ok(state.objects.contains_key(key))
    }

    async fn create(&self, key: &str) -> Result<Box<dyn BlobWriter>, StoreError> {
        lock(&self.inner).writes_started += 1;
        Ok(Box::new(MemoryWriter {
            store: self.clone(),
            key: key.to_string(),
            content: Vec::new(),
        }))
    }
}

struct MemoryWriter {
    store: MemoryBlobStore,
    key: String,
    content: Vec<u8>,
}

#[async_trait]
impl BlobWriter for MemoryWriter {
    async fn put(&mut self, chunk: Bytes) -> Result<(), StoreError> {
        let mut state = lock(&self.store.inner);
        if let Some(remaining) = state.failing_writes.get_mut(&self.key)
            && *remaining > 0
        {
            *remaining -= 1;
            return Err(StoreError::Backend(format!(
                "injected write failure for {}",
                self.key
            )));
        }
        state.chunk_sizes.push(chunk.len());
        drop(state);
        self.content.extend_from_slice(&chunk);
        Ok(())
    }

    async fn finish(self: Box<Self>) -> Result<(), StoreError> {
        let MemoryWriter {
            store,
            key,
            content,
        } = *self;
        let mut state = lock(&store.inner);
        state.writes_finished += 1;
        state.objects.insert(key, Bytes::from(content));
        Ok(())
    }

    async fn abort(self: Box<Self>) {
        lock(&self.store.inner).writes_aborted += 1;
    }
}

// a panic while holding the lock leaves plain counters behind, still usable
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn object_is_visible_only_after_finish() {
        let store = MemoryBlobStore::new("b");
        let mut writer = store.create("k").await.unwrap();
        writer.put(Bytes::from_static(b"ab")).await.unwrap();
        assert!(!store.exists("k").await.unwrap());

        writer.finish().await.unwrap();
        assert!(store.exists("k").await.unwrap());
        assert_eq!(store.object("k").unwrap(), Bytes::from_static(b"ab"));
        assert_eq!(store.exists_calls(), 2);
    }

    #[tokio::test]
    async fn aborted_writer_leaves_no_object() {
        let store = MemoryBlobStore::new("b");
        let mut writer = store.create("k").await.unwrap();
        writer.put(Bytes::from_static(b"ab")).await.unwrap();
        writer.abort().await;

        assert!(store.object("k").is_none());
        assert_eq!(store.writes_aborted(), 1);
        assert_eq!(store.writes_finished(), 0);
    }

    #[tokio::test]
    async fn injected_failures_run_out() {
        let store = MemoryBlobStore::new("b");
        store.fail_writes("k", 1);

        let mut writer = store.create("k").await.unwrap();
        assert!(writer.put(Bytes::from_static(b"x")).await.is_err());
        assert!(writer.put(Bytes::from_static(b"x")).await.is_ok());
        assert_eq!(store.chunk_sizes(), vec![1]);
    }

    #[tokio::test]
    async fn clones_share_objects() {
        let repository = MemoryRepository::new();
        let handle = repository.add_bucket("b");
        let opened = repository.get("b").await.unwrap();

        let mut writer = opened.create("k").await.unwrap();
        writer.put(Bytes::from_static(b"z")).await.unwrap();
        writer.finish().await.unwrap();
        assert_eq!(handle.keys(), vec!["k".to_string()]);
    }

    #[tokio::test]
    async fn missing_bucket_is_not_found() {
        let repository = MemoryRepository::new();
        assert!(matches!(
            repository.get("nope").await,
            Err(StoreError::NotFound(_))
        ));
    }
}
