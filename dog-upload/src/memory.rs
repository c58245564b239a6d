use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use tokio::sync::broadcast;

use crate::{
    ArtifactRef, BlobStore, CompletionEvent, EventBus, MetadataStore, PublishError, StoreError,
};

/// In-memory metadata store for development and testing
#[derive(Clone)]
pub struct MemoryMetadataStore {
    entries: Arc<RwLock<HashMap<String, Vec<u8>>>>,
    cas: bool,
}

impl MemoryMetadataStore {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            cas: true,
        }
    }

    /// A store that reports no compare-and-set support, so callers must
    /// serialize updates themselves.
    pub fn without_cas() -> Self {
        Self {
            cas: false,
            ..Self::new()
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl Default for MemoryMetadataStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MetadataStore for MemoryMetadataStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.entries.read().get(key).cloned())
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
        self.entries.write().insert(key.to_string(), value);
        Ok(())
    }

    async fn compare_and_set(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        new: Vec<u8>,
    ) -> Result<bool, StoreError> {
        if !self.cas {
            return Err(StoreError::Unsupported);
        }
        let mut entries = self.entries.write();
        let current = entries.get(key).map(|v| v.as_slice());
        if current != expected {
            return Ok(false);
        }
        entries.insert(key.to_string(), new);
        Ok(true)
    }

    fn supports_cas(&self) -> bool {
        self.cas
    }
}

/// In-memory blob store that keeps every object and counts writes per key
#[derive(Clone, Default)]
pub struct MemoryBlobStore {
    objects: Arc<RwLock<HashMap<String, (Bytes, String)>>>,
    writes: Arc<RwLock<HashMap<String, usize>>>,
    bucket: Option<String>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bucket<S: Into<String>>(mut self, bucket: S) -> Self {
        self.bucket = Some(bucket.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<Bytes> {
        self.objects.read().get(key).map(|(bytes, _)| bytes.clone())
    }

    pub fn content_type(&self, key: &str) -> Option<String> {
        self.objects.read().get(key).map(|(_, ct)| ct.clone())
    }

    /// Number of writes ever made to `key`
    pub fn put_count(&self, key: &str) -> usize {
        self.writes.read().get(key).copied().unwrap_or(0)
    }

    /// Number of writes across all keys
    pub fn total_puts(&self) -> usize {
        self.writes.read().values().sum()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self.objects.read().keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(
        &self,
        key: &str,
        bytes: Bytes,
        content_type: &str,
    ) -> Result<ArtifactRef, StoreError> {
        let size = bytes.len() as u64;
        self.objects
            .write()
            .insert(key.to_string(), (bytes, content_type.to_string()));
        *self.writes.write().entry(key.to_string()).or_default() += 1;

        let mut artifact = ArtifactRef::new(key, size).with_content_type(content_type);
        if let Some(bucket) = &self.bucket {
            artifact = artifact.with_bucket(bucket.clone());
        }
        Ok(artifact)
    }
}

/// In-memory event bus: records keyed messages per topic and fans them out
/// to subscribers.
#[derive(Clone)]
pub struct MemoryEventBus {
    messages: Arc<RwLock<HashMap<String, Vec<(String, Vec<u8>)>>>>,
    broadcaster: broadcast::Sender<(String, Vec<u8>)>,
}

impl MemoryEventBus {
    pub fn new() -> Self {
        let (broadcaster, _) = broadcast::channel(1000);
        Self {
            messages: Arc::new(RwLock::new(HashMap::new())),
            broadcaster,
        }
    }

    /// Receive `(topic, message)` pairs published after this call
    pub fn subscribe(&self) -> broadcast::Receiver<(String, Vec<u8>)> {
        self.broadcaster.subscribe()
    }

    pub fn messages(&self, topic: &str) -> Vec<Vec<u8>> {
        self.messages
            .read()
            .get(topic)
            .map(|entries| entries.iter().map(|(_, m)| m.clone()).collect())
            .unwrap_or_default()
    }

    /// Message keys on `topic`, in publish order
    pub fn keys(&self, topic: &str) -> Vec<String> {
        self.messages
            .read()
            .get(topic)
            .map(|entries| entries.iter().map(|(k, _)| k.clone()).collect())
            .unwrap_or_default()
    }

    pub fn published_count(&self, topic: &str) -> usize {
        self.messages.read().get(topic).map(Vec::len).unwrap_or(0)
    }

    /// Messages on `topic` decoded as completion events; undecodable
    /// messages are skipped.
    pub fn completion_events(&self, topic: &str) -> Vec<CompletionEvent> {
        self.messages(topic)
            .iter()
            .filter_map(|m| serde_json::from_slice(m).ok())
            .collect()
    }
}

impl Default for MemoryEventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventBus for MemoryEventBus {
    async fn publish(&self, topic: &str, key: &str, message: Vec<u8>) -> Result<(), PublishError> {
        self.messages
            .write()
            .entry(topic.to_string())
            .or_default()
            .push((key.to_string(), message.clone()));
        let _ = self.broadcaster.send((topic.to_string(), message));
        Ok(())
    }
}
