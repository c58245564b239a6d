use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of an upload session (the post identifier)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    /// Create from existing string
    pub fn from_string(id: String) -> Self {
        Self(id)
    }

    /// Get the inner string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for SessionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// SHA-256 content hash of a part, always stored as lowercase hex
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PartHash(String);

/// Length of a hex-encoded SHA-256 digest
pub const HASH_HEX_LEN: usize = 64;

impl PartHash {
    /// Parse a hex digest, case-insensitively. Returns `None` unless the
    /// input is exactly 64 hex characters, with nothing around them.
    pub fn parse(raw: &str) -> Option<Self> {
        if raw.len() != HASH_HEX_LEN || !raw.chars().all(|c| c.is_ascii_hexdigit()) {
            return None;
        }
        Some(Self(raw.to_ascii_lowercase()))
    }

    /// Get the lowercase hex string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form used in object keys and log lines
    pub fn short(&self) -> &str {
        &self.0[..12]
    }
}

impl fmt::Display for PartHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for PartHash {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value).ok_or_else(|| format!("not a sha-256 hex digest: {value}"))
    }
}

impl From<PartHash> for String {
    fn from(hash: PartHash) -> Self {
        hash.0
    }
}

/// Durable locator of a stored part, as returned by the blob store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub key: String,
    pub bucket: Option<String>,
    pub size_bytes: u64,
    pub content_type: String,
}

impl ArtifactRef {
    pub fn new<K: Into<String>>(key: K, size_bytes: u64) -> Self {
        Self {
            key: key.into(),
            bucket: None,
            size_bytes,
            content_type: "application/octet-stream".to_string(),
        }
    }

    pub fn with_bucket<S: Into<String>>(mut self, bucket: S) -> Self {
        self.bucket = Some(bucket.into());
        self
    }

    pub fn with_content_type<S: Into<String>>(mut self, content_type: S) -> Self {
        self.content_type = content_type.into();
        self
    }
}

/// One chunk of a multipart upload, owned by a single ingest call
#[derive(Debug, Clone)]
pub struct Part {
    pub session_id: SessionId,
    /// Declared position in the object. Only used to name the stored object.
    pub ordinal: Option<u32>,
    /// Hash as declared by the sender, unvalidated
    pub declared_hash: String,
    pub payload: Bytes,
}

impl Part {
    pub fn new<S, H, B>(session_id: S, declared_hash: H, payload: B) -> Self
    where
        S: Into<SessionId>,
        H: Into<String>,
        B: Into<Bytes>,
    {
        Self {
            session_id: session_id.into(),
            ordinal: None,
            declared_hash: declared_hash.into(),
            payload: payload.into(),
        }
    }

    pub fn with_ordinal(mut self, ordinal: u32) -> Self {
        self.ordinal = Some(ordinal);
        self
    }
}

/// Registration input: the intended parts of an upload plus the post
/// attributes that travel with the completion event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionManifest {
    pub session_id: SessionId,
    pub expected_hashes: Vec<String>,
    pub owner: Option<String>,
    pub caption: Option<String>,
    pub posted_at: Option<DateTime<Utc>>,
    /// Hash of the whole object, informational
    pub object_hash: Option<String>,
}

impl SessionManifest {
    pub fn new<S, I, H>(session_id: S, expected_hashes: I) -> Self
    where
        S: Into<SessionId>,
        I: IntoIterator<Item = H>,
        H: Into<String>,
    {
        Self {
            session_id: session_id.into(),
            expected_hashes: expected_hashes.into_iter().map(Into::into).collect(),
            owner: None,
            caption: None,
            posted_at: None,
            object_hash: None,
        }
    }

    pub fn with_owner<S: Into<String>>(mut self, owner: S) -> Self {
        self.owner = Some(owner.into());
        self
    }

    pub fn with_caption<S: Into<String>>(mut self, caption: S) -> Self {
        self.caption = Some(caption.into());
        self
    }

    pub fn with_posted_at(mut self, posted_at: DateTime<Utc>) -> Self {
        self.posted_at = Some(posted_at);
        self
    }

    pub fn with_object_hash<S: Into<String>>(mut self, hash: S) -> Self {
        self.object_hash = Some(hash.into());
        self
    }
}

/// Lifecycle of a session: `Open` until every expected part is present
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SessionStatus {
    Open,
    Complete { completed_at: DateTime<Utc> },
}

impl SessionStatus {
    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Complete { .. })
    }
}

/// Result of ingesting one part, reported to the request layer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestOutcome {
    pub accepted: bool,
    pub already_present: bool,
    pub complete: bool,
    /// Set when this call completed the session but the completion event
    /// could not be published.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notify_error: Option<String>,
}

/// Read-only view of upload progress, used by clients to resume
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionProgress {
    pub session_id: SessionId,
    pub expected: usize,
    pub received: usize,
    pub missing: Vec<PartHash>,
    pub complete: bool,
}

/// Event published exactly once when a session becomes complete
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionEvent {
    pub session_id: SessionId,
    /// Type tag of the uploaded object, e.g. "video"
    #[serde(rename = "type")]
    pub kind: String,
    pub owner: Option<String>,
    pub caption: Option<String>,
    pub posted_at: Option<DateTime<Utc>>,
    pub object_hash: Option<String>,
    pub part_hashes: Vec<PartHash>,
    pub artifacts: Vec<ArtifactRef>,
    pub completed_at: DateTime<Utc>,
}
