use std::sync::Arc;

use tracing::{debug, info};

use crate::session_store::{KeyLocks, SessionStore};
use crate::store::sniff_content_type;
use crate::verify::verify;
use crate::{
    BlobStore, Part, PartHash, PartKeyStrategy, SessionState, UploadConfig, UploadError,
    UploadResult,
};

/// What ingesting one part did to its session
#[derive(Debug, Clone)]
pub struct IngestStep {
    /// Session state after the part was merged (or found already present)
    pub state: SessionState,
    pub already_present: bool,
}

/// Validates parts against their session and persists new ones.
///
/// Each distinct hash is written to the blob store once: retransmissions
/// that find the hash recorded skip the write, and concurrent requests for
/// the same hash in this process wait on a shared in-flight guard.
pub struct PartIngestor {
    sessions: Arc<SessionStore>,
    blobs: Arc<dyn BlobStore>,
    keys: Arc<dyn PartKeyStrategy>,
    in_flight: KeyLocks,
    max_part_bytes: u64,
}

impl PartIngestor {
    pub fn new(
        sessions: Arc<SessionStore>,
        blobs: Arc<dyn BlobStore>,
        keys: Arc<dyn PartKeyStrategy>,
        config: &UploadConfig,
    ) -> Self {
        Self {
            sessions,
            blobs,
            keys,
            in_flight: KeyLocks::default(),
            max_part_bytes: config.max_part_bytes,
        }
    }

    pub async fn ingest(&self, part: Part) -> UploadResult<IngestStep> {
        if part.payload.len() as u64 > self.max_part_bytes {
            return Err(UploadError::invalid_part(format!(
                "payload of {} bytes exceeds the {} byte limit",
                part.payload.len(),
                self.max_part_bytes
            )));
        }

        let hash = verify(&part.payload, &part.declared_hash)?;

        let state = self.sessions.get_session(&part.session_id).await?;
        if !state.is_expected(&hash) {
            return Err(UploadError::UnknownPart {
                session_id: part.session_id.to_string(),
                hash: hash.to_string(),
            });
        }
        if state.has_received(&hash) {
            debug!(session_id = %part.session_id, hash = %hash.short(), "part already stored");
            return Ok(IngestStep {
                state,
                already_present: true,
            });
        }

        let guard_key = format!("{}\u{0}{}", part.session_id, hash);
        let lock = self.in_flight.lock_for(&guard_key);
        let _guard = lock.lock().await;

        // whoever held the guard before us may have stored it
        let state = self.sessions.get_session(&part.session_id).await?;
        if state.has_received(&hash) {
            debug!(session_id = %part.session_id, hash = %hash.short(), "part stored concurrently");
            return Ok(IngestStep {
                state,
                already_present: true,
            });
        }

        self.store(part, hash).await
    }

    async fn store(&self, part: Part, hash: PartHash) -> UploadResult<IngestStep> {
        let content_type = sniff_content_type(&part.payload);
        let key = self
            .keys
            .part_key(&part.session_id, part.ordinal, &hash, content_type);
        let size = part.payload.len();

        let artifact = self
            .blobs
            .put(&key, part.payload, content_type)
            .await
            .map_err(|source| UploadError::BlobWriteFailure {
                key: key.clone(),
                source,
            })?;

        let recorded = self
            .sessions
            .record_part(&part.session_id, &hash, artifact)
            .await?;

        if recorded.newly_recorded {
            info!(session_id = %part.session_id, hash = %hash.short(), %key, size, "stored part");
        } else {
            // another process recorded the hash between our read and write
            debug!(session_id = %part.session_id, hash = %hash.short(), "part recorded elsewhere");
        }

        Ok(IngestStep {
            state: recorded.state,
            already_present: !recorded.newly_recorded,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verify::digest_hex;
    use crate::{DefaultPartKeyStrategy, MemoryBlobStore, MemoryMetadataStore, SessionManifest};

    async fn setup(config: UploadConfig) -> (PartIngestor, MemoryBlobStore) {
        let keys: Arc<dyn PartKeyStrategy> = Arc::new(DefaultPartKeyStrategy::from_config(&config));
        let sessions = Arc::new(SessionStore::new(
            Arc::new(MemoryMetadataStore::new()),
            keys.clone(),
            &config,
        ));
        sessions
            .create_session(SessionManifest::new(
                "post-1",
                vec![digest_hex(b"one"), digest_hex(b"two")],
            ))
            .await
            .unwrap();
        let blobs = MemoryBlobStore::new();
        let ingestor = PartIngestor::new(sessions, Arc::new(blobs.clone()), keys, &config);
        (ingestor, blobs)
    }

    #[tokio::test]
    async fn test_stores_new_part_once() {
        let (ingestor, blobs) = setup(UploadConfig::default()).await;

        let part = Part::new("post-1", digest_hex(b"one"), &b"one"[..]).with_ordinal(0);
        let step = ingestor.ingest(part.clone()).await.unwrap();
        assert!(!step.already_present);
        assert_eq!(step.state.received_hashes.len(), 1);
        assert_eq!(blobs.total_puts(), 1);

        let step = ingestor.ingest(part).await.unwrap();
        assert!(step.already_present);
        assert_eq!(blobs.total_puts(), 1);
    }

    #[tokio::test]
    async fn test_uppercase_declared_hash_is_accepted() {
        let (ingestor, _) = setup(UploadConfig::default()).await;
        let declared = digest_hex(b"two").to_uppercase();

        let step = ingestor
            .ingest(Part::new("post-1", declared, &b"two"[..]))
            .await
            .unwrap();
        assert!(step.state.has_received(&PartHash::parse(&digest_hex(b"two")).unwrap()));
    }

    #[tokio::test]
    async fn test_rejects_unknown_and_oversized_parts() {
        let (ingestor, blobs) = setup(UploadConfig::default().with_max_part_bytes(4)).await;

        let err = ingestor
            .ingest(Part::new("post-1", digest_hex(b"six"), &b"six"[..]))
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::UnknownPart { .. }));

        let err = ingestor
            .ingest(Part::new("post-1", digest_hex(b"toolong"), &b"toolong"[..]))
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::InvalidPart { .. }));

        let err = ingestor
            .ingest(Part::new("post-2", digest_hex(b"one"), &b"one"[..]))
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::SessionNotFound { .. }));

        assert_eq!(blobs.total_puts(), 0);
    }
}
