use std::time::Duration;

/// Configuration for upload ingestion
#[derive(Debug, Clone)]
pub struct UploadConfig {
    /// Prefix of session record keys in the metadata store
    pub session_key_prefix: String,

    /// Prefix of stored part object keys
    pub part_key_prefix: String,

    /// Topic completion events are published to
    pub completion_topic: String,

    /// Type tag carried by completion events
    pub event_kind: String,

    /// Optimistic update attempts before giving up with a store failure
    pub cas_max_retries: u32,

    /// Base delay between optimistic update attempts (jittered)
    pub cas_backoff: Duration,

    /// Largest accepted part payload
    pub max_part_bytes: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            session_key_prefix: "upload:".to_string(),
            part_key_prefix: String::new(),
            completion_topic: "upload-complete".to_string(),
            event_kind: "video".to_string(),
            cas_max_retries: 16,
            cas_backoff: Duration::from_millis(5),
            max_part_bytes: 64 * 1024 * 1024, // 64MB
        }
    }
}

impl UploadConfig {
    /// Create a new config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Overlay values from environment variables named
    /// `{prefix}__SESSION_KEY_PREFIX`, `{prefix}__COMPLETION_TOPIC`, ...
    /// Unset or unparsable variables keep the default.
    pub fn from_env(prefix: &str) -> Self {
        Self::from_lookup(prefix, |key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup<F>(prefix: &str, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(&format!("{}__{}", prefix, name));
        let mut config = Self::default();

        if let Some(v) = var("SESSION_KEY_PREFIX") {
            config.session_key_prefix = v;
        }
        if let Some(v) = var("PART_KEY_PREFIX") {
            config.part_key_prefix = v;
        }
        if let Some(v) = var("COMPLETION_TOPIC") {
            config.completion_topic = v;
        }
        if let Some(v) = var("EVENT_KIND") {
            config.event_kind = v;
        }
        if let Some(v) = var("CAS_MAX_RETRIES").and_then(|v| v.parse().ok()) {
            config.cas_max_retries = v;
        }
        if let Some(ms) = var("CAS_BACKOFF_MS").and_then(|v| v.parse().ok()) {
            config.cas_backoff = Duration::from_millis(ms);
        }
        if let Some(v) = var("MAX_PART_BYTES").and_then(|v| v.parse().ok()) {
            config.max_part_bytes = v;
        }
        config
    }

    pub fn with_session_key_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.session_key_prefix = prefix.into();
        self
    }

    pub fn with_part_key_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.part_key_prefix = prefix.into();
        self
    }

    pub fn with_completion_topic<S: Into<String>>(mut self, topic: S) -> Self {
        self.completion_topic = topic.into();
        self
    }

    pub fn with_event_kind<S: Into<String>>(mut self, kind: S) -> Self {
        self.event_kind = kind.into();
        self
    }

    pub fn with_cas_retries(mut self, retries: u32, backoff: Duration) -> Self {
        self.cas_max_retries = retries;
        self.cas_backoff = backoff;
        self
    }

    pub fn with_max_part_bytes(mut self, bytes: u64) -> Self {
        self.max_part_bytes = bytes;
        self
    }
}

/// Connection settings for the Redis metadata store
#[cfg(feature = "redis")]
#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub address: String,
    pub password: Option<String>,
}

#[cfg(feature = "redis")]
impl RedisConfig {
    /// Reads `REDIS_ADDRESS` (default `127.0.0.1:6379`) and `REDIS_PASSWORD`
    pub fn from_env() -> Self {
        Self {
            address: std::env::var("REDIS_ADDRESS").unwrap_or_else(|_| "127.0.0.1:6379".to_string()),
            password: std::env::var("REDIS_PASSWORD").ok().filter(|p| !p.is_empty()),
        }
    }

    pub fn url(&self) -> String {
        match &self.password {
            Some(password) => format!("redis://:{}@{}/", password, self.address),
            None => format!("redis://{}/", self.address),
        }
    }
}

/// Settings for an S3-compatible part store (AWS S3, MinIO, RustFS)
#[cfg(feature = "s3")]
#[derive(Debug, Clone)]
pub struct S3Config {
    pub endpoint: Option<String>,
    pub region: String,
    pub bucket: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub force_path_style: bool,
}

#[cfg(feature = "s3")]
impl S3Config {
    /// Reads `MINIO_ADDRESS`, `MINIO_REGION`, `MINIO_VIDEO_BUCKET`,
    /// `MINIO_ACCESS_KEY_ID` and `MINIO_SECRET_KEY`.
    pub fn from_env() -> Result<Self, crate::StoreError> {
        let required = |key: &str| {
            std::env::var(key)
                .map_err(|_| crate::StoreError::Unavailable(format!("{} is not set", key)))
        };
        Ok(Self {
            endpoint: std::env::var("MINIO_ADDRESS").ok(),
            region: std::env::var("MINIO_REGION").unwrap_or_else(|_| "us-east-1".to_string()),
            bucket: required("MINIO_VIDEO_BUCKET")?,
            access_key_id: required("MINIO_ACCESS_KEY_ID")?,
            secret_access_key: required("MINIO_SECRET_KEY")?,
            force_path_style: true,
        })
    }
}

/// Settings for the Kafka completion-event producer
#[cfg(feature = "kafka")]
#[derive(Debug, Clone)]
pub struct KafkaConfig {
    pub brokers: String,
    pub message_timeout_ms: u64,
}

#[cfg(feature = "kafka")]
impl KafkaConfig {
    /// Reads `KAFKA_ADDRESS` (default `127.0.0.1:9092`)
    pub fn from_env() -> Self {
        Self {
            brokers: std::env::var("KAFKA_ADDRESS").unwrap_or_else(|_| "127.0.0.1:9092".to_string()),
            message_timeout_ms: 5_000,
        }
    }
}
