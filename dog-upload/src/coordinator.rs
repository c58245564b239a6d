use std::sync::Arc;

use bytes::Bytes;
use tracing::{info, instrument, warn};

use crate::completion::CompletionDetector;
use crate::ingest::PartIngestor;
use crate::session_store::{CompletionTransition, SessionStore};
use crate::{
    BlobStore, DefaultPartKeyStrategy, EventBus, IngestOutcome, MetadataStore, Notifier, Part,
    PartKeyStrategy, SessionId, SessionManifest, SessionProgress, SessionState, UploadConfig,
    UploadResult,
};

/// Entry point for the request layer: registers sessions and ingests parts.
///
/// Each part runs verify, ingest, completion detection and, for the one
/// caller that completes the session, notification. All coordination
/// between concurrent requests goes through the session store.
pub struct UploadCoordinator {
    sessions: Arc<SessionStore>,
    ingestor: PartIngestor,
    detector: CompletionDetector,
    notifier: Notifier,
    config: UploadConfig,
}

impl UploadCoordinator {
    /// Create a coordinator with the default key strategy
    pub fn new<M, B, E>(metadata: M, blobs: B, bus: E, config: UploadConfig) -> Self
    where
        M: MetadataStore + 'static,
        B: BlobStore + 'static,
        E: EventBus + 'static,
    {
        let keys = DefaultPartKeyStrategy::from_config(&config);
        Self::with_key_strategy(metadata, blobs, bus, keys, config)
    }

    /// Create with custom key strategy
    pub fn with_key_strategy<M, B, E, K>(
        metadata: M,
        blobs: B,
        bus: E,
        keys: K,
        config: UploadConfig,
    ) -> Self
    where
        M: MetadataStore + 'static,
        B: BlobStore + 'static,
        E: EventBus + 'static,
        K: PartKeyStrategy + 'static,
    {
        Self::from_parts(Arc::new(metadata), Arc::new(blobs), Arc::new(bus), Arc::new(keys), config)
    }

    /// Create from shared handles, for services that hand the same
    /// connections to several components
    pub fn from_parts(
        metadata: Arc<dyn MetadataStore>,
        blobs: Arc<dyn BlobStore>,
        bus: Arc<dyn EventBus>,
        keys: Arc<dyn PartKeyStrategy>,
        config: UploadConfig,
    ) -> Self {
        let sessions = Arc::new(SessionStore::new(metadata, keys.clone(), &config));
        Self {
            ingestor: PartIngestor::new(sessions.clone(), blobs, keys, &config),
            detector: CompletionDetector::new(sessions.clone()),
            notifier: Notifier::new(bus, config.completion_topic.clone()),
            sessions,
            config,
        }
    }

    pub fn config(&self) -> &UploadConfig {
        &self.config
    }

    /// Register the intended parts of an upload before any bytes are sent
    #[instrument(skip(self, manifest), fields(session_id = %manifest.session_id, parts = manifest.expected_hashes.len()))]
    pub async fn register_session(&self, manifest: SessionManifest) -> UploadResult<SessionState> {
        let state = self.sessions.create_session(manifest).await?;
        info!("Registered upload {}", state.session_id);
        Ok(state)
    }

    /// Ingest one part without a declared ordinal
    pub async fn ingest_part<S, H, B>(
        &self,
        session_id: S,
        hash: H,
        payload: B,
    ) -> UploadResult<IngestOutcome>
    where
        S: Into<SessionId>,
        H: Into<String>,
        B: Into<Bytes>,
    {
        self.ingest(Part::new(session_id, hash, payload)).await
    }

    /// Ingest one part. Backend failures on the write path fail the call;
    /// resending the same part afterwards is safe.
    #[instrument(skip(self, part), fields(session_id = %part.session_id, ordinal = ?part.ordinal, size = part.payload.len()))]
    pub async fn ingest(&self, part: Part) -> UploadResult<IngestOutcome> {
        let step = self.ingestor.ingest(part).await?;
        let already_present = step.already_present;

        let (complete, notify_error) = match self.detector.settle(step.state).await? {
            CompletionTransition::Won(state) => (true, self.announce(&state).await),
            CompletionTransition::AlreadyComplete(_) => (true, None),
            CompletionTransition::NotReady(_) => (false, None),
        };

        Ok(IngestOutcome {
            accepted: true,
            already_present,
            complete,
            notify_error,
        })
    }

    pub async fn session(&self, session_id: &SessionId) -> UploadResult<SessionState> {
        self.sessions.get_session(session_id).await
    }

    /// Progress of an upload, for clients resuming an interrupted transfer
    pub async fn status(&self, session_id: &SessionId) -> UploadResult<SessionProgress> {
        Ok(self.sessions.get_session(session_id).await?.progress())
    }

    /// Publish the completion event. The session stays complete whatever
    /// happens here; a failure is returned as a warning message.
    async fn announce(&self, state: &SessionState) -> Option<String> {
        let event = state.completion_event(&self.config.event_kind)?;
        match self.notifier.notify(&event).await {
            Ok(()) => None,
            Err(e) => {
                warn!(session_id = %state.session_id, topic = %self.notifier.topic(), "completion event not published: {}", e);
                Some(e.to_string())
            }
        }
    }
}
