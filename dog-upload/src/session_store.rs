use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;
use tracing::debug;

use crate::completion::check_completion;
use crate::{
    ArtifactRef, MetadataStore, PartHash, PartKeyStrategy, SessionId, SessionManifest,
    SessionState, StoreError, UploadConfig, UploadError, UploadResult,
};

/// Outcome of merging a part into a session
#[derive(Debug, Clone)]
pub struct RecordResult {
    pub state: SessionState,
    /// False when the hash was already present (another request won)
    pub newly_recorded: bool,
}

/// Outcome of trying to flip a session to `Complete`
#[derive(Debug, Clone)]
pub enum CompletionTransition {
    /// This caller flipped the flag and owns the notification
    Won(SessionState),
    /// Someone else already completed the session
    AlreadyComplete(SessionState),
    /// Parts are still missing
    NotReady(SessionState),
}

impl CompletionTransition {
    pub fn state(&self) -> &SessionState {
        match self {
            Self::Won(s) | Self::AlreadyComplete(s) | Self::NotReady(s) => s,
        }
    }

    pub fn into_state(self) -> SessionState {
        match self {
            Self::Won(s) | Self::AlreadyComplete(s) | Self::NotReady(s) => s,
        }
    }
}

/// Per-key async locks serializing writers inside one process.
/// Entries are weak so idle keys do not accumulate.
#[derive(Default)]
pub(crate) struct KeyLocks {
    locks: Mutex<HashMap<String, Weak<tokio::sync::Mutex<()>>>>,
}

impl KeyLocks {
    pub(crate) fn lock_for(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock();
        if let Some(lock) = locks.get(key).and_then(Weak::upgrade) {
            return lock;
        }
        locks.retain(|_, lock| lock.strong_count() > 0);
        let lock = Arc::new(tokio::sync::Mutex::new(()));
        locks.insert(key.to_string(), Arc::downgrade(&lock));
        lock
    }
}

/// Session bookkeeping on top of a [`MetadataStore`].
///
/// Every mutation of a session record is a single atomic read-modify-write.
/// Writers in one process take turns on a per-key lock; across processes
/// the record is swapped with compare-and-set when the backend supports it.
pub struct SessionStore {
    metadata: Arc<dyn MetadataStore>,
    keys: Arc<dyn PartKeyStrategy>,
    locks: KeyLocks,
    max_retries: u32,
    backoff: Duration,
}

impl SessionStore {
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        keys: Arc<dyn PartKeyStrategy>,
        config: &UploadConfig,
    ) -> Self {
        Self {
            metadata,
            keys,
            locks: KeyLocks::default(),
            max_retries: config.cas_max_retries,
            backoff: config.cas_backoff,
        }
    }

    /// Register a session. Write-once: registering the same id again with
    /// the same part set returns the stored record, a different part set
    /// is a conflict.
    pub async fn create_session(&self, manifest: SessionManifest) -> UploadResult<SessionState> {
        let fresh = SessionState::from_manifest(manifest)?;
        let key = self.keys.session_key(&fresh.session_id);
        let bytes = fresh.encode().map_err(UploadError::store)?;

        if !self.metadata.supports_cas() {
            let lock = self.locks.lock_for(&key);
            let _guard = lock.lock().await;
            if let Some(existing) = self.load(&key).await? {
                return Self::reconcile(fresh, existing);
            }
            self.metadata.set(&key, bytes).await.map_err(UploadError::store)?;
            return Ok(fresh);
        }

        if self
            .metadata
            .compare_and_set(&key, None, bytes)
            .await
            .map_err(UploadError::store)?
        {
            return Ok(fresh);
        }
        // records are never deleted by this crate, so a lost absent-only
        // write means a record is there now
        match self.load(&key).await? {
            Some(existing) => Self::reconcile(fresh, existing),
            None => Err(UploadError::store(StoreError::Contention { key, attempts: 1 })),
        }
    }

    pub async fn get_session(&self, id: &SessionId) -> UploadResult<SessionState> {
        let key = self.keys.session_key(id);
        self.load(&key)
            .await?
            .ok_or_else(|| UploadError::session_not_found(id.as_str()))
    }

    /// Atomically add `hash` with its artifact to the received set
    pub async fn record_part(
        &self,
        id: &SessionId,
        hash: &PartHash,
        artifact: ArtifactRef,
    ) -> UploadResult<RecordResult> {
        let (state, newly_recorded) = self
            .update(id, |state| state.record(hash.clone(), artifact.clone()))
            .await?;
        Ok(RecordResult {
            state,
            newly_recorded,
        })
    }

    /// Compare-and-set of the completion flag: flips it only if every
    /// expected part is present and the session is not complete yet.
    pub async fn mark_complete(&self, id: &SessionId) -> UploadResult<CompletionTransition> {
        let (state, won) = self
            .update(id, |state| check_completion(state) && state.mark_complete())
            .await?;
        Ok(if won {
            CompletionTransition::Won(state)
        } else if state.is_complete() {
            CompletionTransition::AlreadyComplete(state)
        } else {
            CompletionTransition::NotReady(state)
        })
    }

    fn reconcile(fresh: SessionState, existing: SessionState) -> UploadResult<SessionState> {
        if existing.same_manifest(&fresh) {
            debug!(session_id = %existing.session_id, "session already registered");
            Ok(existing)
        } else {
            Err(UploadError::SessionConflict {
                session_id: existing.session_id.to_string(),
            })
        }
    }

    async fn load(&self, key: &str) -> UploadResult<Option<SessionState>> {
        match self.metadata.get(key).await.map_err(UploadError::store)? {
            Some(bytes) => Ok(Some(SessionState::decode(&bytes).map_err(UploadError::store)?)),
            None => Ok(None),
        }
    }

    /// The single mutation primitive. `apply` edits the current state and
    /// returns whether it changed anything; unchanged states are not
    /// written back. Returns the resulting state and the change flag.
    ///
    /// Writers in this process queue on a per-key lock, so the
    /// compare-and-set loop only contends with other processes and
    /// `cas_max_retries` bounds cross-process conflicts alone.
    async fn update<F>(&self, id: &SessionId, mut apply: F) -> UploadResult<(SessionState, bool)>
    where
        F: FnMut(&mut SessionState) -> bool + Send,
    {
        let key = self.keys.session_key(id);
        let lock = self.locks.lock_for(&key);
        let _guard = lock.lock().await;

        if !self.metadata.supports_cas() {
            let mut state = self
                .load(&key)
                .await?
                .ok_or_else(|| UploadError::session_not_found(id.as_str()))?;
            if !apply(&mut state) {
                return Ok((state, false));
            }
            let next = state.encode().map_err(UploadError::store)?;
            self.metadata.set(&key, next).await.map_err(UploadError::store)?;
            return Ok((state, true));
        }

        for attempt in 0..=self.max_retries {
            let current = self
                .metadata
                .get(&key)
                .await
                .map_err(UploadError::store)?
                .ok_or_else(|| UploadError::session_not_found(id.as_str()))?;
            let mut state = SessionState::decode(&current).map_err(UploadError::store)?;
            if !apply(&mut state) {
                return Ok((state, false));
            }

            let next = state.encode().map_err(UploadError::store)?;
            if self
                .metadata
                .compare_and_set(&key, Some(&current), next)
                .await
                .map_err(UploadError::store)?
            {
                return Ok((state, true));
            }

            debug!(session_id = %id, attempt, "session update conflicted, retrying");
            tokio::time::sleep(self.retry_delay(attempt)).await;
        }

        Err(UploadError::store(StoreError::Contention {
            key,
            attempts: self.max_retries + 1,
        }))
    }

    fn retry_delay(&self, attempt: u32) -> Duration {
        let base = self.backoff.as_micros() as u64;
        let ceiling = base.saturating_mul(1u64 << attempt.min(6));
        Duration::from_micros(rand::thread_rng().gen_range(0..=ceiling))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verify::digest_hex;
    use crate::{DefaultPartKeyStrategy, MemoryMetadataStore, MetadataStore};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Loses the next `losses` swaps of an existing record, as if another
    /// process wrote first.
    struct RivalWriterStore {
        inner: MemoryMetadataStore,
        losses: AtomicU32,
    }

    #[async_trait]
    impl MetadataStore for RivalWriterStore {
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
            let lose = expected.is_some()
                && self
                    .losses
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok();
            if lose {
                return Ok(false);
            }
            self.inner.compare_and_set(key, expected, new).await
        }
    }

    fn rival_store(losses: u32, retries: u32) -> SessionStore {
        SessionStore::new(
            Arc::new(RivalWriterStore {
                inner: MemoryMetadataStore::new(),
                losses: AtomicU32::new(losses),
            }),
            Arc::new(DefaultPartKeyStrategy::default()),
            &UploadConfig::default().with_cas_retries(retries, Duration::from_micros(10)),
        )
    }

    fn store_over(metadata: MemoryMetadataStore) -> SessionStore {
        SessionStore::new(
            Arc::new(metadata),
            Arc::new(DefaultPartKeyStrategy::default()),
            &UploadConfig::default(),
        )
    }

    fn hash(bytes: &[u8]) -> PartHash {
        PartHash::parse(&digest_hex(bytes)).unwrap()
    }

    fn manifest(id: &str, parts: &[&[u8]]) -> SessionManifest {
        SessionManifest::new(id, parts.iter().map(|p| digest_hex(p)))
    }

    #[tokio::test]
    async fn test_get_unknown_session() {
        let store = store_over(MemoryMetadataStore::new());
        let err = store.get_session(&"nope".into()).await.unwrap_err();
        assert!(matches!(err, UploadError::SessionNotFound { .. }));
    }

    #[tokio::test]
    async fn test_create_is_write_once() {
        for metadata in [MemoryMetadataStore::new(), MemoryMetadataStore::without_cas()] {
            let store = store_over(metadata);
            let first = store.create_session(manifest("p", &[b"a", b"b"])).await.unwrap();

            // same part set, different order: idempotent
            let again = store.create_session(manifest("p", &[b"b", b"a"])).await.unwrap();
            assert_eq!(again, first);

            let err = store.create_session(manifest("p", &[b"c"])).await.unwrap_err();
            assert!(matches!(err, UploadError::SessionConflict { .. }));
        }
    }

    #[tokio::test]
    async fn test_record_part_and_complete() {
        for metadata in [MemoryMetadataStore::new(), MemoryMetadataStore::without_cas()] {
            let store = store_over(metadata);
            let id = SessionId::from("p");
            store.create_session(manifest("p", &[b"a", b"b"])).await.unwrap();

            let r = store
                .record_part(&id, &hash(b"a"), ArtifactRef::new("k-a", 1))
                .await
                .unwrap();
            assert!(r.newly_recorded);
            assert!(matches!(
                store.mark_complete(&id).await.unwrap(),
                CompletionTransition::NotReady(_)
            ));

            let r = store
                .record_part(&id, &hash(b"a"), ArtifactRef::new("k-a", 1))
                .await
                .unwrap();
            assert!(!r.newly_recorded);

            store
                .record_part(&id, &hash(b"b"), ArtifactRef::new("k-b", 1))
                .await
                .unwrap();
            assert!(matches!(
                store.mark_complete(&id).await.unwrap(),
                CompletionTransition::Won(_)
            ));
            assert!(matches!(
                store.mark_complete(&id).await.unwrap(),
                CompletionTransition::AlreadyComplete(_)
            ));

            let state = store.get_session(&id).await.unwrap();
            assert!(state.is_complete());
            assert_eq!(state.received_hashes.len(), 2);
        }
    }

    #[tokio::test]
    async fn test_update_of_missing_session() {
        let store = store_over(MemoryMetadataStore::new());
        let err = store
            .record_part(&"ghost".into(), &hash(b"a"), ArtifactRef::new("k", 1))
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::SessionNotFound { .. }));
    }

    #[tokio::test]
    async fn test_corrupt_record_is_store_failure() {
        let metadata = MemoryMetadataStore::new();
        metadata.set("upload:p", b"garbage".to_vec()).await.unwrap();
        let store = store_over(metadata);

        let err = store.get_session(&"p".into()).await.unwrap_err();
        assert!(matches!(err, UploadError::StoreFailure { .. }));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_records_are_not_lost() {
        let parts: Vec<Vec<u8>> = (0..32).map(|i| format!("part-{i}").into_bytes()).collect();

        for metadata in [MemoryMetadataStore::new(), MemoryMetadataStore::without_cas()] {
            let store = Arc::new(SessionStore::new(
                Arc::new(metadata),
                Arc::new(DefaultPartKeyStrategy::default()),
                &UploadConfig::default(),
            ));
            let id = SessionId::from("p");
            let refs: Vec<&[u8]> = parts.iter().map(|p| p.as_slice()).collect();
            store.create_session(manifest("p", &refs)).await.unwrap();

            let handles: Vec<_> = parts
                .iter()
                .map(|p| {
                    let store = store.clone();
                    let id = id.clone();
                    let h = hash(p);
                    tokio::spawn(async move {
                        store.record_part(&id, &h, ArtifactRef::new(h.short(), 1)).await
                    })
                })
                .collect();
            for handle in handles {
                handle.await.unwrap().unwrap();
            }

            let state = store.get_session(&id).await.unwrap();
            assert_eq!(state.received_hashes.len(), parts.len());
            assert_eq!(state.artifacts.len(), parts.len());
        }
    }

    #[tokio::test]
    async fn test_lost_swaps_are_retried() {
        let store = rival_store(3, 3);
        let id = SessionId::from("p");
        store.create_session(manifest("p", &[b"a"])).await.unwrap();

        let r = store
            .record_part(&id, &hash(b"a"), ArtifactRef::new("k-a", 1))
            .await
            .unwrap();
        assert!(r.newly_recorded);
        assert!(store.get_session(&id).await.unwrap().has_received(&hash(b"a")));
    }

    #[tokio::test]
    async fn test_exhausted_retries_are_contention() {
        let store = rival_store(u32::MAX, 3);
        let id = SessionId::from("p");
        store.create_session(manifest("p", &[b"a"])).await.unwrap();

        let err = store
            .record_part(&id, &hash(b"a"), ArtifactRef::new("k-a", 1))
            .await
            .unwrap_err();
        match &err {
            UploadError::StoreFailure {
                source: StoreError::Contention { key, attempts },
            } => {
                assert_eq!(key, "upload:p");
                assert_eq!(*attempts, 4);
            }
            other => panic!("expected contention, got {:?}", other),
        }
        assert!(err.is_retryable());
        assert!(store.get_session(&id).await.unwrap().received_hashes.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_heavy_fan_in_with_default_retries() {
        let parts: Vec<Vec<u8>> = (0..512).map(|i| format!("chunk-{i}").into_bytes()).collect();
        let store = Arc::new(store_over(MemoryMetadataStore::new()));
        let id = SessionId::from("p");
        let refs: Vec<&[u8]> = parts.iter().map(|p| p.as_slice()).collect();
        store.create_session(manifest("p", &refs)).await.unwrap();

        let mut set = tokio::task::JoinSet::new();
        for p in &parts {
            let store = store.clone();
            let id = id.clone();
            let h = hash(p);
            set.spawn(async move { store.record_part(&id, &h, ArtifactRef::new(h.short(), 1)).await });
        }
        while let Some(joined) = set.join_next().await {
            assert!(joined.unwrap().unwrap().newly_recorded);
        }

        let state = store.get_session(&id).await.unwrap();
        assert_eq!(state.received_hashes.len(), parts.len());
    }
}
