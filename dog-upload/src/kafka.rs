use std::time::Duration;

use async_trait::async_trait;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::ClientConfig;

use crate::{EventBus, KafkaConfig, PublishError};

/// Publishes completion events to Kafka. Delivery retries are left to the
/// producer (`message.timeout.ms`).
#[derive(Clone)]
pub struct KafkaEventBus {
    producer: FutureProducer,
}

impl KafkaEventBus {
    pub fn new(config: &KafkaConfig) -> Result<Self, PublishError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("message.timeout.ms", config.message_timeout_ms.to_string())
            .create()
            .map_err(PublishError::backend)?;
        Ok(Self { producer })
    }

    /// Connect using `KAFKA_ADDRESS`
    pub fn from_env() -> Result<Self, PublishError> {
        Self::new(&KafkaConfig::from_env())
    }
}

#[async_trait]
impl EventBus for KafkaEventBus {
    /// Keyed by session id, so one session's messages stay on one partition
    async fn publish(&self, topic: &str, key: &str, message: Vec<u8>) -> Result<(), PublishError> {
        let record = FutureRecord::to(topic).payload(&message).key(key);

        self.producer
            .send(record, Duration::from_secs(0))
            .await
            .map_err(|(err, _)| PublishError::backend(err))?;
        Ok(())
    }
}
