use crate::domain::result::DomainResult;
use async_trait::async_trait;

/// Acknowledgement of a successful publish
#[derive(Debug, Clone, PartialEq)]
pub struct PublishReceipt {
    pub channel: String,
    pub size_bytes: usize,
}

/// Sends a payload to a named channel
///
/// Implementations should:
/// - Serialize the payload as JSON
/// - Publish to the message broker under the channel name
/// - Return `DomainError::PublishFailed` when the broker rejects it
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait MessagePublisher: Send + Sync {
    async fn publish(&self, channel: &str, payload: &serde_json::Value) -> DomainResult<PublishReceipt>;
}
