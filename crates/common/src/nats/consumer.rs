use crate::nats::{JetStreamConsumer, PullConsumer};
use anyhow::{Context, Result};
use async_nats::jetstream::{self, Message};
use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Result of processing a batch of messages
/// Lists which message indices to acknowledge and which to reject
#[derive(Debug, PartialEq)]
pub struct ProcessingResult {
    pub ack: Vec<usize>,
    pub nak: Vec<(usize, Option<String>)>,
}

impl ProcessingResult {
    pub fn ack_all(count: usize) -> Self {
        Self {
            ack: (0..count).collect(),
            nak: Vec::new(),
        }
    }

    pub fn nak_all(count: usize, error: Option<String>) -> Self {
        Self {
            ack: Vec::new(),
            nak: (0..count).map(|i| (i, error.clone())).collect(),
        }
    }
}

/// Batch processor: receives the fetched messages, decides ack/nak per index
pub type BatchProcessor =
    Box<dyn Fn(&[Message]) -> BoxFuture<'static, Result<ProcessingResult>> + Send + Sync>;

/// Durable pull consumer that hands batches to a processor until cancelled
pub struct NatsConsumer {
    consumer: Box<dyn PullConsumer>,
    consumer_name: String,
    batch_size: usize,
    max_wait: Duration,
    processor: BatchProcessor,
}

impl NatsConsumer {
    pub async fn new(
        jetstream: Arc<dyn JetStreamConsumer>,
        stream_name: &str,
        consumer_name: &str,
        subject_filter: &str,
        batch_size: usize,
        max_wait_secs: u64,
        processor: BatchProcessor,
    ) -> Result<Self> {
        debug!(
            stream = stream_name,
            consumer = consumer_name,
            subject = subject_filter,
            "Creating JetStream consumer"
        );

        let config = jetstream::consumer::pull::Config {
            name: Some(consumer_name.to_string()),
            durable_name: Some(consumer_name.to_string()),
            filter_subject: subject_filter.to_string(),
            ack_policy: jetstream::consumer::AckPolicy::Explicit,
            ..Default::default()
        };

        let consumer = jetstream
            .create_consumer(config, stream_name)
            .await
            .context("Failed to create consumer")?;

        info!(
            stream = stream_name,
            consumer = consumer_name,
            "Consumer created successfully"
        );

        Ok(Self {
            consumer,
            consumer_name: consumer_name.to_string(),
            batch_size,
            max_wait: Duration::from_secs(max_wait_secs),
            processor,
        })
    }

    pub async fn run(&self, ctx: CancellationToken) -> Result<()> {
        info!(consumer = %self.consumer_name, "Starting consumer loop");

        loop {
            tokio::select! {
                biased;
                _ = ctx.cancelled() => {
                    info!(consumer = %self.consumer_name, "Received shutdown signal, stopping consumer");
                    break;
                }
                result = self.fetch_and_process_batch() => {
                    if let Err(e) = result {
                        error!(error = %e, consumer = %self.consumer_name, "Error processing batch");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }

        info!(consumer = %self.consumer_name, "Consumer stopped gracefully");
        Ok(())
    }

    async fn fetch_and_process_batch(&self) -> Result<()> {
        let messages = self
            .consumer
            .fetch_messages(self.batch_size, self.max_wait)
            .await?;

        if messages.is_empty() {
            debug!("No messages in batch");
            return Ok(());
        }

        debug!(message_count = messages.len(), "Received message batch");

        let processing_result = match (self.processor)(&messages).await {
            Ok(result) => result,
            Err(e) => {
                error!(error = %e, "Processor returned error, rejecting all messages");
                ProcessingResult::nak_all(messages.len(), Some(e.to_string()))
            }
        };

        for idx in processing_result.ack {
            match messages.get(idx) {
                Some(msg) => {
                    if let Err(e) = msg.ack().await {
                        error!(error = %e, message_index = idx, "Failed to acknowledge message");
                    }
                }
                None => {
                    warn!(message_index = idx, batch_size = messages.len(), "Invalid ack index");
                }
            }
        }

        for (idx, reason) in processing_result.nak {
            match messages.get(idx) {
                Some(msg) => {
                    warn!(
                        message_index = idx,
                        subject = %msg.subject,
                        reason = reason.as_deref().unwrap_or("unspecified"),
                        "Rejecting message"
                    );
                    if let Err(e) = msg.ack_with(jetstream::AckKind::Nak(None)).await {
                        error!(error = %e, message_index = idx, "Failed to reject message");
                    }
                }
                None => {
                    warn!(message_index = idx, batch_size = messages.len(), "Invalid nak index");
                }
            }
        }

        Ok(())
    }
}
