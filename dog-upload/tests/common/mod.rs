#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use dog_upload::{
    digest_hex, ArtifactRef, BlobStore, EventBus, MemoryBlobStore, MemoryEventBus,
    MemoryMetadataStore, MetadataStore, PublishError, SessionManifest, StoreError, UploadConfig,
    UploadCoordinator,
};

pub const TOPIC: &str = "upload-complete";

/// Deterministic payloads `part-0`, `part-1`, ...
pub fn payloads(n: usize) -> Vec<Vec<u8>> {
    (0..n).map(|i| format!("part-{i}").into_bytes()).collect()
}

pub fn manifest(session: &str, parts: &[Vec<u8>]) -> SessionManifest {
    SessionManifest::new(session, parts.iter().map(|p| digest_hex(p)))
}

/// Coordinator over in-memory collaborators, returning handles to inspect them
pub struct Harness {
    pub coordinator: Arc<UploadCoordinator>,
    pub metadata: MemoryMetadataStore,
    pub blobs: MemoryBlobStore,
    pub bus: MemoryEventBus,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_metadata(MemoryMetadataStore::new())
    }

    pub fn without_cas() -> Self {
        Self::with_metadata(MemoryMetadataStore::without_cas())
    }

    pub fn with_metadata(metadata: MemoryMetadataStore) -> Self {
        let blobs = MemoryBlobStore::new();
        let bus = MemoryEventBus::new();
        let coordinator = UploadCoordinator::new(
            metadata.clone(),
            DelayedBlobStore::new(blobs.clone(), Duration::from_millis(2)),
            bus.clone(),
            UploadConfig::default(),
        );
        Self {
            coordinator: Arc::new(coordinator),
            metadata,
            blobs,
            bus,
        }
    }

    pub fn notifications(&self) -> usize {
        self.bus.published_count(TOPIC)
    }
}

/// Blob store that sleeps before writing, to widen race windows
#[derive(Clone)]
pub struct DelayedBlobStore {
    inner: MemoryBlobStore,
    delay: Duration,
}

impl DelayedBlobStore {
    pub fn new(inner: MemoryBlobStore, delay: Duration) -> Self {
        Self { inner, delay }
    }
}

#[async_trait]
impl BlobStore for DelayedBlobStore {
    async fn put(&self, key: &str, bytes: Bytes, content_type: &str) -> Result<ArtifactRef, StoreError> {
        tokio::time::sleep(self.delay).await;
        self.inner.put(key, bytes, content_type).await
    }
}

/// Blob store that fails the first `failures` writes
#[derive(Clone)]
pub struct FailingBlobStore {
    inner: MemoryBlobStore,
    remaining: Arc<AtomicUsize>,
}

impl FailingBlobStore {
    pub fn new(inner: MemoryBlobStore, failures: usize) -> Self {
        Self {
            inner,
            remaining: Arc::new(AtomicUsize::new(failures)),
        }
    }
}

#[async_trait]
impl BlobStore for FailingBlobStore {
    async fn put(&self, key: &str, bytes: Bytes, content_type: &str) -> Result<ArtifactRef, StoreError> {
        let failing = self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(StoreError::Unavailable("minio down".to_string()));
        }
        self.inner.put(key, bytes, content_type).await
    }
}

/// Metadata store that can be switched off at runtime
#[derive(Clone)]
pub struct FlakyMetadataStore {
    inner: MemoryMetadataStore,
    down: Arc<std::sync::atomic::AtomicBool>,
}

impl FlakyMetadataStore {
    pub fn new(inner: MemoryMetadataStore) -> Self {
        Self {
            inner,
            down: Arc::new(std::sync::atomic::AtomicBool::new(false)),
        }
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.down.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("redis down".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl MetadataStore for FlakyMetadataStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.check()?;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
        self.check()?;
        self.inner.set(key, value).await
    }

    async fn compare_and_set(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        new: Vec<u8>,
    ) -> Result<bool, StoreError> {
        self.check()?;
        self.inner.compare_and_set(key, expected, new).await
    }
}

/// Metadata store whose `nth` compare-and-set (1-based) fails
#[derive(Clone)]
pub struct FailNthCasStore {
    inner: MemoryMetadataStore,
    nth: usize,
    calls: Arc<AtomicUsize>,
}

impl FailNthCasStore {
    pub fn new(inner: MemoryMetadataStore, nth: usize) -> Self {
        Self {
            inner,
            nth,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn cas_calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MetadataStore for FailNthCasStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
        self.inner.set(key, value).await
    }

    async fn compare_and_set(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        new: Vec<u8>,
    ) -> Result<bool, StoreError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call == self.nth {
            return Err(StoreError::Unavailable("redis down".to_string()));
        }
        self.inner.compare_and_set(key, expected, new).await
    }
}

/// Event bus that always fails
#[derive(Clone, Default)]
pub struct FailingEventBus {
    attempts: Arc<AtomicUsize>,
}

impl FailingEventBus {
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventBus for FailingEventBus {
    async fn publish(&self, _topic: &str, _key: &str, _message: Vec<u8>) -> Result<(), PublishError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(PublishError::Unavailable("kafka down".to_string()))
    }
}
