use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for upload operations
pub type UploadResult<T> = Result<T, UploadError>;

/// Errors that can occur while registering sessions or ingesting parts
#[derive(Error, Debug)]
pub enum UploadError {
    #[error("hash not matched: declared {declared}, computed {computed}")]
    HashMismatch { declared: String, computed: String },

    #[error("part {hash} does not belong to upload {session_id}, reupload")]
    UnknownPart { session_id: String, hash: String },

    #[error("upload metadata missing for {session_id}, register the upload first")]
    SessionNotFound { session_id: String },

    #[error("upload {session_id} is already registered with a different part manifest")]
    SessionConflict { session_id: String },

    #[error("invalid manifest: {reason}")]
    InvalidManifest { reason: String },

    #[error("invalid part: {reason}")]
    InvalidPart { reason: String },

    #[error("session store failure: {source}")]
    StoreFailure {
        #[source]
        source: StoreError,
    },

    #[error("blob write failed for {key}: {source}")]
    BlobWriteFailure {
        key: String,
        #[source]
        source: StoreError,
    },
}

/// Errors raised by the storage collaborators (blob store, metadata store)
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("operation not supported by this store")]
    Unsupported,

    #[error("corrupt record: {0}")]
    Corrupt(String),

    #[error("gave up after {attempts} conflicting updates of {key}")]
    Contention { key: String, attempts: u32 },

    #[error("backend error: {source}")]
    Backend {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl StoreError {
    /// Create a backend error from any error type
    pub fn backend<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Backend {
            source: Box::new(error),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Corrupt(err.to_string())
    }
}

/// Errors raised by the event bus collaborator. Never fails an ingest call;
/// the coordinator reports it through `IngestOutcome::notify_error`.
#[derive(Error, Debug)]
pub enum PublishError {
    #[error("event bus unavailable: {0}")]
    Unavailable(String),

    #[error("event encoding failed: {0}")]
    Encode(String),

    #[error("event bus error: {source}")]
    Backend {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl PublishError {
    pub fn backend<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Backend {
            source: Box::new(error),
        }
    }
}

/// Who has to act on an error: the uploader (fix input and resend) or the
/// server side (retry unchanged later).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSide {
    Client,
    Server,
}

/// Wire shape of an error at the edge of the request layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub side: ErrorSide,
    pub tag: String,
    pub message: String,
}

impl UploadError {
    pub fn session_not_found<S: Into<String>>(session_id: S) -> Self {
        Self::SessionNotFound {
            session_id: session_id.into(),
        }
    }

    pub fn invalid_manifest<S: Into<String>>(reason: S) -> Self {
        Self::InvalidManifest {
            reason: reason.into(),
        }
    }

    pub fn invalid_part<S: Into<String>>(reason: S) -> Self {
        Self::InvalidPart {
            reason: reason.into(),
        }
    }

    pub fn store(source: StoreError) -> Self {
        Self::StoreFailure { source }
    }

    pub fn side(&self) -> ErrorSide {
        match self {
            Self::HashMismatch { .. }
            | Self::UnknownPart { .. }
            | Self::SessionNotFound { .. }
            | Self::SessionConflict { .. }
            | Self::InvalidManifest { .. }
            | Self::InvalidPart { .. } => ErrorSide::Client,
            Self::StoreFailure { .. } | Self::BlobWriteFailure { .. } => ErrorSide::Server,
        }
    }

    /// Stable machine-readable tag
    pub fn tag(&self) -> &'static str {
        match self {
            Self::HashMismatch { .. } => "hash-mismatch",
            Self::UnknownPart { .. } => "unknown-part",
            Self::SessionNotFound { .. } => "session-not-found",
            Self::SessionConflict { .. } => "session-conflict",
            Self::InvalidManifest { .. } => "invalid-manifest",
            Self::InvalidPart { .. } => "invalid-part",
            Self::StoreFailure { .. } => "store-failure",
            Self::BlobWriteFailure { .. } => "blob-write-failure",
        }
    }

    /// HTTP-style status code for the request layer
    pub fn status_code(&self) -> u16 {
        match self {
            Self::HashMismatch { .. }
            | Self::UnknownPart { .. }
            | Self::InvalidManifest { .. }
            | Self::InvalidPart { .. } => 400,
            Self::SessionNotFound { .. } => 404,
            Self::SessionConflict { .. } => 409,
            Self::BlobWriteFailure { .. } => 502,
            Self::StoreFailure { .. } => 503,
        }
    }

    /// Whether resending the same request unchanged can succeed
    pub fn is_retryable(&self) -> bool {
        self.side() == ErrorSide::Server
    }

    pub fn to_body(&self) -> ErrorBody {
        ErrorBody {
            side: self.side(),
            tag: self.tag().to_string(),
            message: self.to_string(),
        }
    }
}
