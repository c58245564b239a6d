use async_trait::async_trait;
use bytes::Bytes;

use crate::{ArtifactRef, PartHash, SessionId, StoreError, UploadConfig};

/// Durable storage for part payloads
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `bytes` under `key` and return where they landed
    async fn put(
        &self,
        key: &str,
        bytes: Bytes,
        content_type: &str,
    ) -> Result<ArtifactRef, StoreError>;
}

/// Key-value persistence backing the session store
#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError>;

    /// Replace the value at `key` with `new` only if it currently equals
    /// `expected`; `expected == None` means "only if absent". Returns
    /// whether the write happened.
    async fn compare_and_set(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        new: Vec<u8>,
    ) -> Result<bool, StoreError>;

    /// Stores without an atomic compare-and-set return false here; their
    /// updates are serialized per key by the session store instead.
    fn supports_cas(&self) -> bool {
        true
    }
}

/// Strategy for naming session records and stored parts
pub trait PartKeyStrategy: Send + Sync {
    /// Metadata store key of a session record
    fn session_key(&self, session_id: &SessionId) -> String;

    /// Object key of a stored part
    fn part_key(
        &self,
        session_id: &SessionId,
        ordinal: Option<u32>,
        hash: &PartHash,
        content_type: &str,
    ) -> String;
}

/// Default naming: `upload:{session}` records, `{session}_{ordinal}_{hash12}.{ext}` parts
#[derive(Debug, Clone)]
pub struct DefaultPartKeyStrategy {
    session_prefix: String,
    part_prefix: String,
}

impl DefaultPartKeyStrategy {
    pub fn new<S: Into<String>, P: Into<String>>(session_prefix: S, part_prefix: P) -> Self {
        Self {
            session_prefix: session_prefix.into(),
            part_prefix: part_prefix.into(),
        }
    }

    pub fn from_config(config: &UploadConfig) -> Self {
        Self::new(config.session_key_prefix.clone(), config.part_key_prefix.clone())
    }
}

impl Default for DefaultPartKeyStrategy {
    fn default() -> Self {
        Self::from_config(&UploadConfig::default())
    }
}

impl PartKeyStrategy for DefaultPartKeyStrategy {
    fn session_key(&self, session_id: &SessionId) -> String {
        format!("{}{}", self.session_prefix, session_id)
    }

    fn part_key(
        &self,
        session_id: &SessionId,
        ordinal: Option<u32>,
        hash: &PartHash,
        content_type: &str,
    ) -> String {
        let ext = extension_for(content_type);
        match ordinal {
            Some(n) => format!("{}{}_{}_{}.{}", self.part_prefix, session_id, n, hash.short(), ext),
            None => format!("{}{}_{}.{}", self.part_prefix, session_id, hash.short(), ext),
        }
    }
}

/// Detect the media type of a payload from its leading bytes. Only the
/// first part of a container carries a recognizable header; later parts
/// come back as `application/octet-stream`.
pub fn sniff_content_type(bytes: &[u8]) -> &'static str {
    if bytes.len() >= 12 && &bytes[4..8] == b"ftyp" {
        return if &bytes[8..12] == b"qt  " {
            "video/quicktime"
        } else {
            "video/mp4"
        };
    }
    if bytes.starts_with(&[0x1A, 0x45, 0xDF, 0xA3]) {
        return "video/webm";
    }
    if bytes.len() >= 12 && bytes.starts_with(b"RIFF") && &bytes[8..12] == b"AVI " {
        return "video/avi";
    }
    if bytes.starts_with(&[0x00, 0x00, 0x01, 0xBA]) {
        return "video/mpeg";
    }
    if bytes.len() > 188 && bytes[0] == 0x47 && bytes[188] == 0x47 {
        return "video/mp2t";
    }
    "application/octet-stream"
}

/// File extension used in object keys for a content type
pub fn extension_for(content_type: &str) -> &'static str {
    match content_type {
        "video/mp4" => "mp4",
        "video/quicktime" => "mov",
        "video/webm" => "webm",
        "video/avi" => "avi",
        "video/mpeg" => "mpg",
        "video/mp2t" => "ts",
        _ => "bin",
    }
}
