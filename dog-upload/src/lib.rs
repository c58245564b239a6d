//! # dog-upload: Content-addressed multipart upload ingestion
//!
//! `dog-upload` accepts a large media object as an unordered stream of
//! SHA-256 addressed parts, possibly from several concurrent senders, and
//! decides exactly once when the whole object has arrived.
//!
//! ## Key Features
//!
//! - **Integrity first**: every part is hashed and compared with the hash the sender declared
//! - **Deduplicated storage**: one blob write per distinct part, however often it is resent
//! - **Atomic session updates**: compare-and-set with retry, or per-key locking for stores without CAS
//! - **Exactly-once completion**: a single caller wins the `Open -> Complete` edge and publishes the event
//! - **Pluggable backends**: in-memory stores built in; Redis, S3/MinIO and Kafka behind features
//!
//! ## Quick Start
//!
//! ```rust
//! use dog_upload::prelude::*;
//!
//! # #[tokio::main]
//! # async fn main() -> UploadResult<()> {
//! let bus = MemoryEventBus::new();
//! let uploads = UploadCoordinator::new(
//!     MemoryMetadataStore::new(),
//!     MemoryBlobStore::new(),
//!     bus.clone(),
//!     UploadConfig::default(),
//! );
//!
//! // 1. Register the intended parts before sending bytes
//! let parts: [&'static [u8]; 2] = [b"first half", b"second half"];
//! let hashes: Vec<String> = parts.iter().map(|p| digest_hex(p)).collect();
//! uploads
//!     .register_session(SessionManifest::new("post-42", hashes.clone()).with_owner("alice"))
//!     .await?;
//!
//! // 2. Send parts in any order
//! let outcome = uploads.ingest_part("post-42", hashes[1].clone(), parts[1]).await?;
//! assert!(!outcome.complete);
//! let outcome = uploads.ingest_part("post-42", hashes[0].clone(), parts[0]).await?;
//! assert!(outcome.complete);
//!
//! // 3. Exactly one completion event was published
//! assert_eq!(bus.published_count("upload-complete"), 1);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────┐
//! │  Request layer       │  ← HTTP/gRPC glue, not part of this crate
//! ├──────────────────────┤
//! │  UploadCoordinator   │  ← verify → ingest → detect → notify
//! ├──────────────────────┤
//! │  SessionStore        │  ← atomic record / complete
//! ├──────────────────────┤
//! │  MetadataStore  BlobStore  EventBus │
//! └──────────────────────┘
//! ```

pub mod completion;
mod config;
mod coordinator;
mod error;
pub mod ingest;
mod memory;
mod notify;
mod session;
pub mod session_store;
pub mod store;
mod types;
pub mod verify;

#[cfg(feature = "kafka")]
mod kafka;
#[cfg(feature = "redis")]
mod redis_store;
#[cfg(feature = "s3")]
mod s3_store;
#[cfg(feature = "tracing-basic")]
pub mod telemetry;

// Re-export main types for clean API
pub use completion::{check_completion, CompletionDetector};
pub use config::UploadConfig;
pub use coordinator::UploadCoordinator;
pub use error::{ErrorBody, ErrorSide, PublishError, StoreError, UploadError, UploadResult};
pub use ingest::{IngestStep, PartIngestor};
pub use memory::{MemoryBlobStore, MemoryEventBus, MemoryMetadataStore};
pub use notify::{EventBus, Notifier};
pub use session::{SessionState, SESSION_RECORD_VERSION};
pub use session_store::{CompletionTransition, RecordResult, SessionStore};
pub use store::{
    sniff_content_type, BlobStore, DefaultPartKeyStrategy, MetadataStore, PartKeyStrategy,
};
pub use types::{
    ArtifactRef, CompletionEvent, IngestOutcome, Part, PartHash, SessionId, SessionManifest,
    SessionProgress, SessionStatus, HASH_HEX_LEN,
};
pub use verify::{digest_hex, verify};

#[cfg(feature = "kafka")]
pub use config::KafkaConfig;
#[cfg(feature = "kafka")]
pub use kafka::KafkaEventBus;
#[cfg(feature = "redis")]
pub use config::RedisConfig;
#[cfg(feature = "redis")]
pub use redis_store::RedisMetadataStore;
#[cfg(feature = "s3")]
pub use config::S3Config;
#[cfg(feature = "s3")]
pub use s3_store::S3BlobStore;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        digest_hex, BlobStore, EventBus, IngestOutcome, MemoryBlobStore, MemoryEventBus,
        MemoryMetadataStore, MetadataStore, Part, SessionId, SessionManifest, UploadConfig,
        UploadCoordinator, UploadError, UploadResult,
    };
}
