use async_trait::async_trait;
use common::domain::{DomainError, DomainResult, MessagePublisher, PublishReceipt};
use common::nats::JetStreamPublisher;
use std::sync::Arc;
use tracing::debug;

/// Publishes JSON payloads to JetStream, one subject per channel
pub struct NatsMessagePublisher {
    jetstream: Arc<dyn JetStreamPublisher>,
}

impl NatsMessagePublisher {
    pub fn new(jetstream: Arc<dyn JetStreamPublisher>) -> Self {
        Self { jetstream }
    }
}

#[async_trait]
impl MessagePublisher for NatsMessagePublisher {
    async fn publish(&self, channel: &str, payload: &serde_json::Value) -> DomainResult<PublishReceipt> {
        let bytes = serde_json::to_vec(payload)
            .map_err(|e| DomainError::PublishFailed(channel.to_string(), e.to_string()))?;
        let size_bytes = bytes.len();

        debug!(subject = %channel, size_bytes, "Publishing envelope");

        self.jetstream
            .publish(channel.to_string(), bytes.into())
            .await
            .map_err(|e| DomainError::PublishFailed(channel.to_string(), format!("{:#}", e)))?;

        Ok(PublishReceipt {
            channel: channel.to_string(),
            size_bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use common::nats::MockJetStreamPublisher;
    use serde_json::json;

    #[tokio::test]
    async fn test_publish_success() {
        // Arrange
        let mut mock_jetstream = MockJetStreamPublisher::new();
        mock_jetstream
            .expect_publish()
            .withf(|subject: &String, payload: &Bytes| {
                subject == "sigfox.types.store"
                    && serde_json::from_slice::<serde_json::Value>(payload).unwrap() == json!({ "device": "D1" })
            })
            .times(1)
            .returning(|_, _| Ok(()));
        let publisher = NatsMessagePublisher::new(Arc::new(mock_jetstream));

        // Act
        let receipt = publisher
            .publish("sigfox.types.store", &json!({ "device": "D1" }))
            .await
            .unwrap();

        // Assert
        assert_eq!(receipt.channel, "sigfox.types.store");
        assert_eq!(receipt.size_bytes, r#"{"device":"D1"}"#.len());
    }

    #[tokio::test]
    async fn test_publish_failure() {
        // Arrange
        let mut mock_jetstream = MockJetStreamPublisher::new();
        mock_jetstream
            .expect_publish()
            .times(1)
            .returning(|_, _| Err(anyhow::anyhow!("NATS publish failed")));
        let publisher = NatsMessagePublisher::new(Arc::new(mock_jetstream));

        // Act
        let result = publisher.publish("sigfox.types.store", &json!({})).await;

        // Assert
        assert!(matches!(result, Err(DomainError::PublishFailed(ref channel, _)) if channel == "sigfox.types.store"));
    }
}
