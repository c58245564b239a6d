use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::{
    ArtifactRef, CompletionEvent, PartHash, SessionId, SessionManifest, SessionProgress,
    SessionStatus, StoreError, UploadError, UploadResult,
};

/// Layout version of persisted session records
pub const SESSION_RECORD_VERSION: u32 = 1;

/// Persisted state of one upload session.
///
/// `expected_hashes` is fixed at registration. `received_hashes` and
/// `artifacts` only grow, and only with expected hashes. `status` moves
/// from `Open` to `Complete` once and never back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    pub version: u32,
    pub session_id: SessionId,
    pub expected_hashes: Vec<PartHash>,
    pub received_hashes: BTreeSet<PartHash>,
    pub artifacts: BTreeMap<PartHash, ArtifactRef>,
    pub status: SessionStatus,

    pub owner: Option<String>,
    pub caption: Option<String>,
    pub posted_at: Option<DateTime<Utc>>,
    pub object_hash: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Deserialize)]
struct RecordHeader {
    version: u32,
}

impl SessionState {
    /// Validate a manifest and build the initial `Open` state.
    /// Duplicate hashes are collapsed, first occurrence wins the position.
    pub fn from_manifest(manifest: SessionManifest) -> UploadResult<Self> {
        if manifest.session_id.as_str().trim().is_empty() {
            return Err(UploadError::invalid_manifest("session id is empty"));
        }
        if manifest.expected_hashes.is_empty() {
            return Err(UploadError::invalid_manifest("no part hashes declared"));
        }

        let mut seen = BTreeSet::new();
        let mut expected_hashes = Vec::with_capacity(manifest.expected_hashes.len());
        for raw in &manifest.expected_hashes {
            let hash = PartHash::parse(raw).ok_or_else(|| {
                UploadError::invalid_manifest(format!("not a sha-256 hex digest: {}", raw))
            })?;
            if seen.insert(hash.clone()) {
                expected_hashes.push(hash);
            }
        }

        let now = Utc::now();
        Ok(Self {
            version: SESSION_RECORD_VERSION,
            session_id: manifest.session_id,
            expected_hashes,
            received_hashes: BTreeSet::new(),
            artifacts: BTreeMap::new(),
            status: SessionStatus::Open,
            owner: manifest.owner,
            caption: manifest.caption,
            posted_at: manifest.posted_at,
            object_hash: manifest.object_hash,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn encode(&self) -> Result<Vec<u8>, StoreError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, StoreError> {
        let header: RecordHeader = serde_json::from_slice(bytes)?;
        if header.version != SESSION_RECORD_VERSION {
            return Err(StoreError::Corrupt(format!(
                "unsupported session record version {}",
                header.version
            )));
        }
        Ok(serde_json::from_slice(bytes)?)
    }

    pub fn is_expected(&self, hash: &PartHash) -> bool {
        self.expected_hashes.contains(hash)
    }

    pub fn has_received(&self, hash: &PartHash) -> bool {
        self.received_hashes.contains(hash)
    }

    pub fn is_complete(&self) -> bool {
        self.status.is_complete()
    }

    /// Expected hashes not yet received, in manifest order
    pub fn missing_hashes(&self) -> Vec<PartHash> {
        self.expected_hashes
            .iter()
            .filter(|h| !self.received_hashes.contains(*h))
            .cloned()
            .collect()
    }

    /// Whether two records were registered with the same part set
    pub fn same_manifest(&self, other: &SessionState) -> bool {
        let mine: BTreeSet<_> = self.expected_hashes.iter().collect();
        let theirs: BTreeSet<_> = other.expected_hashes.iter().collect();
        mine == theirs
    }

    /// Add a received part. Returns false (and changes nothing) when the
    /// hash was already recorded or is not part of the manifest.
    pub(crate) fn record(&mut self, hash: PartHash, artifact: ArtifactRef) -> bool {
        if !self.is_expected(&hash) || self.received_hashes.contains(&hash) {
            return false;
        }
        self.received_hashes.insert(hash.clone());
        self.artifacts.insert(hash, artifact);
        self.updated_at = Utc::now();
        true
    }

    /// Flip to `Complete`. Returns false if already complete.
    pub(crate) fn mark_complete(&mut self) -> bool {
        if self.is_complete() {
            return false;
        }
        let now = Utc::now();
        self.status = SessionStatus::Complete { completed_at: now };
        self.updated_at = now;
        true
    }

    pub fn progress(&self) -> SessionProgress {
        SessionProgress {
            session_id: self.session_id.clone(),
            expected: self.expected_hashes.len(),
            received: self.received_hashes.len(),
            missing: self.missing_hashes(),
            complete: self.is_complete(),
        }
    }

    /// Completion event for a `Complete` session; `None` while open.
    pub fn completion_event(&self, kind: &str) -> Option<CompletionEvent> {
        let SessionStatus::Complete { completed_at } = &self.status else {
            return None;
        };
        Some(CompletionEvent {
            session_id: self.session_id.clone(),
            kind: kind.to_string(),
            owner: self.owner.clone(),
            caption: self.caption.clone(),
            posted_at: self.posted_at,
            object_hash: self.object_hash.clone(),
            part_hashes: self.expected_hashes.clone(),
            artifacts: self
                .expected_hashes
                .iter()
                .filter_map(|h| self.artifacts.get(h).cloned())
                .collect(),
            completed_at: *completed_at,
        })
    }
}
