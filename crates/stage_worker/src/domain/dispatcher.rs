use crate::domain::{to_log_value, update_history, Logger, StagePublisher};
use async_trait::async_trait;
use chrono::Utc;
use common::domain::{DomainError, DomainResult, Envelope, MessagePublisher, PublishReceipt, RequestContext};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Device value that republishes to the broadcast channel without
/// overwriting the envelope's own device
pub const BROADCAST_DEVICE: &str = "all";

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Root of every channel name, e.g. `sigfox`
    pub channel_prefix: String,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            channel_prefix: "sigfox".to_string(),
        }
    }
}

/// Channel for a publish: per device, else per stage, else the missing-device channel
pub fn channel_name(prefix: &str, device: Option<&str>, stage: Option<&str>) -> String {
    match (device, stage) {
        (Some(device), _) => format!("{}.devices.{}", prefix, device),
        (None, Some(stage)) => format!("{}.types.{}", prefix, stage),
        (None, None) => format!("{}.devices.missing_device", prefix),
    }
}

/// Decides the next hop of an envelope and republishes it
pub struct Dispatcher {
    config: DispatcherConfig,
    publisher: Arc<dyn MessagePublisher>,
    logger: Arc<Logger>,
}

impl Dispatcher {
    pub fn new(config: DispatcherConfig, publisher: Arc<dyn MessagePublisher>, logger: Arc<Logger>) -> Self {
        Self {
            config,
            publisher,
            logger,
        }
    }

    /// Record the hop and forward the envelope to the head of its route
    ///
    /// An envelope already dispatched in this invocation comes back as is.
    /// An empty route ends the pipeline: the hop is recorded, nothing is
    /// published. Publish failures are logged and the attempted envelope is
    /// returned all the same.
    #[instrument(skip_all, fields(stage = %ctx.stage_name, route_len = envelope.route.len()))]
    pub async fn dispatch(&self, ctx: &RequestContext, envelope: &Envelope) -> Envelope {
        if envelope.is_dispatched {
            debug!("envelope already dispatched, skipping");
            return envelope.clone();
        }

        let recorded = update_history(ctx, envelope, Utc::now());

        let Some(next) = recorded.advance_route() else {
            self.logger
                .log(ctx, "no_route", json!({ "result": to_log_value(&recorded) }))
                .await;
            return recorded;
        };

        let outcome = self
            .publish_message(ctx, &next, None, next.stage_type.as_deref())
            .await;

        let dispatched = Envelope {
            is_dispatched: true,
            ..next
        };

        match outcome {
            Ok(receipt) => {
                self.logger
                    .log(
                        ctx,
                        "dispatch",
                        json!({
                            "channel": receipt.channel,
                            "size": receipt.size_bytes,
                            "result": to_log_value(&dispatched),
                        }),
                    )
                    .await;
            }
            Err(e) => {
                self.logger
                    .log(
                        ctx,
                        "dispatch",
                        json!({ "error": e.to_string(), "envelope": to_log_value(&dispatched) }),
                    )
                    .await;
            }
        }

        dispatched
    }

    /// Publish `envelope` to the channel picked by `device` or `stage`
    ///
    /// A concrete device replaces the envelope's device; `BROADCAST_DEVICE`
    /// keeps it. With `options.unpackBody` only the body is published.
    pub async fn publish_message(
        &self,
        ctx: &RequestContext,
        envelope: &Envelope,
        device: Option<&str>,
        stage: Option<&str>,
    ) -> DomainResult<PublishReceipt> {
        let channel = channel_name(&self.config.channel_prefix, device, stage);

        let mut outgoing = envelope.undispatched();
        if let Some(device) = device.filter(|d| *d != BROADCAST_DEVICE) {
            outgoing.device = Some(device.to_string());
        }
        if let Some(stage) = stage {
            outgoing.stage_type = Some(stage.to_string());
        }

        let payload = if outgoing.unpack_body() {
            outgoing.body
        } else {
            serde_json::to_value(&outgoing)
                .map_err(|e| DomainError::PublishFailed(channel.clone(), e.to_string()))?
        };

        debug!(
            channel = %channel,
            trace_id = %ctx.trace_id(),
            "publishing envelope"
        );

        self.publisher.publish(&channel, &payload).await
    }
}

#[async_trait]
impl StagePublisher for Dispatcher {
    async fn publish(
        &self,
        ctx: &RequestContext,
        envelope: &Envelope,
        device: Option<&str>,
        stage: Option<&str>,
    ) -> DomainResult<PublishReceipt> {
        let result = self.publish_message(ctx, envelope, device, stage).await;
        let parameters = match &result {
            Ok(receipt) => json!({ "channel": receipt.channel, "size": receipt.size_bytes }),
            Err(e) => json!({ "error": e.to_string(), "device": device, "stage": stage }),
        };
        self.logger.log(ctx, "publish", parameters).await;
        result
    }
}
