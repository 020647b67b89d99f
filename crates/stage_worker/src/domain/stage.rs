use async_trait::async_trait;
use common::domain::{DomainResult, Envelope, PublishReceipt, RequestContext};

/// Publishing capability handed to a running stage
///
/// Lets a task fan an envelope out to a device channel (or the broadcast
/// device `"all"`) or to another stage, outside the route. A task that has
/// already forwarded the envelope itself returns it with `is_dispatched` set
/// and the route is left alone.
#[async_trait]
pub trait StagePublisher: Send + Sync {
    /// Publish `envelope` to the device channel when `device` is given,
    /// else to the channel of `stage`
    async fn publish(
        &self,
        ctx: &RequestContext,
        envelope: &Envelope,
        device: Option<&str>,
        stage: Option<&str>,
    ) -> DomainResult<PublishReceipt>;
}

/// Pluggable processing step
///
/// Implementations receive the decoded envelope and return the envelope to
/// forward. They must not rely on the input being mutated; whatever is
/// returned is what the dispatcher sees.
#[async_trait]
pub trait Stage: Send + Sync {
    /// Stage name, also the channel suffix this stage consumes from
    fn name(&self) -> &str;

    async fn process(
        &self,
        ctx: &RequestContext,
        publisher: &dyn StagePublisher,
        device: Option<&str>,
        body: &serde_json::Value,
        envelope: &Envelope,
    ) -> anyhow::Result<Envelope>;
}

/// Stage that forwards the envelope untouched
#[derive(Debug, Clone)]
pub struct ForwardStage {
    name: String,
}

impl ForwardStage {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl Stage for ForwardStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn process(
        &self,
        _ctx: &RequestContext,
        _publisher: &dyn StagePublisher,
        _device: Option<&str>,
        _body: &serde_json::Value,
        envelope: &Envelope,
    ) -> anyhow::Result<Envelope> {
        Ok(envelope.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    struct NoPublish;

    #[async_trait]
    impl StagePublisher for NoPublish {
        async fn publish(
            &self,
            _ctx: &RequestContext,
            _envelope: &Envelope,
            _device: Option<&str>,
            _stage: Option<&str>,
        ) -> DomainResult<PublishReceipt> {
            panic!("forward stage must not publish");
        }
    }

    #[tokio::test]
    async fn test_forward_stage_returns_input() {
        let stage = ForwardStage::new("route");
        let ctx = RequestContext::new("route", "sigfox.types.route", Utc::now());
        let envelope = Envelope {
            device: Some("D1".to_string()),
            route: vec!["store".to_string()],
            ..Default::default()
        };

        let result = stage
            .process(&ctx, &NoPublish, envelope.device.as_deref(), &envelope.body, &envelope)
            .await
            .unwrap();

        assert_eq!(stage.name(), "route");
        assert_eq!(result, envelope);
    }
}
