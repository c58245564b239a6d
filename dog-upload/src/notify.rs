use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::{CompletionEvent, PublishError};

/// Message bus the completion event is published to
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publish `message` on `topic`. Messages sharing a `key` belong to the
    /// same upload session.
    async fn publish(&self, topic: &str, key: &str, message: Vec<u8>) -> Result<(), PublishError>;
}

/// Publishes completion events. Delivery retries belong to the bus.
#[derive(Clone)]
pub struct Notifier {
    bus: Arc<dyn EventBus>,
    topic: String,
}

impl Notifier {
    pub fn new<S: Into<String>>(bus: Arc<dyn EventBus>, topic: S) -> Self {
        Self {
            bus,
            topic: topic.into(),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub async fn notify(&self, event: &CompletionEvent) -> Result<(), PublishError> {
        let message = serde_json::to_vec(event).map_err(|e| PublishError::Encode(e.to_string()))?;
        self.bus
            .publish(&self.topic, event.session_id.as_str(), message)
            .await?;
        info!(session_id = %event.session_id, topic = %self.topic, "published completion event");
        Ok(())
    }
}
