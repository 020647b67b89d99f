use async_trait::async_trait;
use common::domain::{DomainError, DomainResult, LogEntry, LogSink};
use common::nats::JetStreamPublisher;
use std::sync::Arc;

/// Secondary sink that publishes each entry as JSON to `{subject}.{action}`
pub struct NatsLogSink {
    jetstream: Arc<dyn JetStreamPublisher>,
    subject: String,
}

impl NatsLogSink {
    pub fn new(jetstream: Arc<dyn JetStreamPublisher>, subject: String) -> Self {
        Self { jetstream, subject }
    }
}

#[async_trait]
impl LogSink for NatsLogSink {
    fn name(&self) -> String {
        format!("nats:{}", self.subject)
    }

    async fn write(&self, entry: &LogEntry) -> DomainResult<()> {
        let payload = serde_json::to_vec(entry).map_err(|e| DomainError::LogSinkFailed(e.to_string()))?;
        let subject = format!("{}.{}", self.subject, entry.record.action);

        self.jetstream
            .publish(subject, payload.into())
            .await
            .map_err(|e| DomainError::LogSinkFailed(format!("{:#}", e)))
    }
}
