use crate::nats::trace_context::trace_headers;
use crate::nats::traits::{JetStreamConsumer, JetStreamPublisher, PullConsumer};
use anyhow::{Context, Result};
use async_nats::jetstream::{self, consumer::pull, stream::Config as StreamConfig};
use async_trait::async_trait;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Connection name reported to the NATS server
const CLIENT_NAME: &str = "sigroute";

/// Process-wide NATS connection shared by every stage worker
pub struct NatsClient {
    client: async_nats::Client,
    jetstream: jetstream::Context,
}

/// Stream holding every pipeline channel under `channel_prefix`
pub fn pipeline_stream_config(stream_name: &str, channel_prefix: &str) -> StreamConfig {
    StreamConfig {
        name: stream_name.to_string(),
        subjects: vec![format!("{}.>", channel_prefix)],
        description: Some(format!("sigroute envelopes under {}", channel_prefix)),
        ..Default::default()
    }
}

impl NatsClient {
    pub async fn connect(url: &str, timeout: Duration) -> Result<Self> {
        info!(url = %url, timeout_ms = timeout.as_millis(), "connecting to NATS");

        let client = async_nats::ConnectOptions::new()
            .name(CLIENT_NAME)
            .connection_timeout(timeout)
            .connect(url)
            .await
            .with_context(|| format!("cannot reach NATS at {}", url))?;
        let jetstream = jetstream::new(client.clone());

        info!(url = %url, "NATS connected");
        Ok(Self { client, jetstream })
    }

    /// Create the pipeline stream unless it already exists
    ///
    /// An existing stream is left as configured.
    pub async fn ensure_stream(&self, stream_name: &str, channel_prefix: &str) -> Result<()> {
        if self.jetstream.get_stream(stream_name).await.is_ok() {
            debug!(stream = %stream_name, "pipeline stream present");
            return Ok(());
        }

        self.jetstream
            .create_stream(pipeline_stream_config(stream_name, channel_prefix))
            .await
            .with_context(|| format!("cannot create stream {}", stream_name))?;
        info!(stream = %stream_name, subjects = %format!("{}.>", channel_prefix), "pipeline stream created");
        Ok(())
    }

    pub fn create_consumer_client(&self) -> Arc<dyn JetStreamConsumer> {
        Arc::new(StreamConsumers {
            jetstream: self.jetstream.clone(),
        })
    }

    pub fn create_publisher_client(&self) -> Arc<dyn JetStreamPublisher> {
        Arc::new(StreamPublisher {
            jetstream: self.jetstream.clone(),
        })
    }

    /// Flush buffered publishes; the connection closes on drop
    pub async fn close(self) {
        if let Err(e) = self.client.flush().await {
            warn!(error = %e, "NATS flush on close failed");
        }
        info!("NATS connection closed");
    }
}

/// Creates durable pull consumers on the pipeline stream
struct StreamConsumers {
    jetstream: jetstream::Context,
}

#[async_trait]
impl JetStreamConsumer for StreamConsumers {
    async fn create_consumer(&self, config: pull::Config, stream_name: &str) -> Result<Box<dyn PullConsumer>> {
        let durable = config.durable_name.clone().unwrap_or_default();
        let consumer = self
            .jetstream
            .create_consumer_on_stream(config, stream_name)
            .await
            .with_context(|| format!("cannot create consumer {} on {}", durable, stream_name))?;

        Ok(Box::new(StagePullConsumer { consumer }))
    }
}

struct StagePullConsumer {
    consumer: jetstream::consumer::PullConsumer,
}

#[async_trait]
impl PullConsumer for StagePullConsumer {
    async fn fetch_messages(&self, max_messages: usize, expires: Duration) -> Result<Vec<jetstream::Message>> {
        let batch = self
            .consumer
            .fetch()
            .max_messages(max_messages)
            .expires(expires)
            .messages()
            .await
            .context("batch fetch failed")?;

        // A broken delivery is skipped; JetStream redelivers it after ack_wait
        Ok(batch
            .filter_map(|delivery| async move {
                delivery
                    .map_err(|e| warn!(error = %e, "skipping broken delivery"))
                    .ok()
            })
            .collect()
            .await)
    }
}

/// Publishes with the current trace context in the headers, waiting for the stream ack
struct StreamPublisher {
    jetstream: jetstream::Context,
}

#[async_trait]
impl JetStreamPublisher for StreamPublisher {
    #[instrument(skip(self, payload), fields(subject = %subject, payload_size = payload.len()))]
    async fn publish(&self, subject: String, payload: bytes::Bytes) -> Result<()> {
        let ack = self
            .jetstream
            .publish_with_headers(subject.clone(), trace_headers(), payload)
            .await
            .with_context(|| format!("publish to {} rejected", subject))?;

        ack.await.with_context(|| format!("no stream ack for {}", subject))?;
        Ok(())
    }
}
