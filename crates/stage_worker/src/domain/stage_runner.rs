use crate::domain::{to_log_value, Dispatcher, Logger, Stage, StagePublisher};
use common::domain::{DomainError, Envelope, RequestContext};
use futures::FutureExt;
use serde_json::json;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::warn;

/// Outcome of one stage execution
#[derive(Debug)]
pub struct StageRun {
    /// Envelope after dispatch
    pub envelope: Envelope,
    /// Task failure, kept for the top-level `end` record
    pub error: Option<DomainError>,
}

/// Runs a stage task, then always hands the envelope to the dispatcher
pub struct StageRunner {
    dispatcher: Arc<Dispatcher>,
    logger: Arc<Logger>,
}

impl StageRunner {
    pub fn new(dispatcher: Arc<Dispatcher>, logger: Arc<Logger>) -> Self {
        Self { dispatcher, logger }
    }

    /// Invoke `stage` and dispatch its result
    ///
    /// The triggering event is not passed separately: `ctx` already carries
    /// its id, source channel and caller identity. The stage gets the
    /// dispatcher as its `StagePublisher`.
    ///
    /// A failing (or panicking) task does not stop dispatch: the input
    /// envelope is forwarded instead and the error is returned in
    /// `StageRun::error`.
    pub async fn run(
        &self,
        ctx: &RequestContext,
        stage: &dyn Stage,
        device: Option<&str>,
        body: &serde_json::Value,
        envelope: &Envelope,
    ) -> StageRun {
        let publisher: &dyn StagePublisher = self.dispatcher.as_ref();
        let task = AssertUnwindSafe(stage.process(ctx, publisher, device, body, envelope)).catch_unwind();

        let (processed, error) = match task.await {
            Ok(Ok(updated)) => {
                self.logger
                    .log(ctx, "task", json!({ "result": to_log_value(&updated) }))
                    .await;
                (updated, None)
            }
            Ok(Err(e)) => {
                let error = DomainError::StageFailed(stage.name().to_string(), format!("{:#}", e));
                self.log_failure(ctx, &error, envelope).await;
                (envelope.clone(), Some(error))
            }
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "task panicked".to_string());
                let error = DomainError::StageFailed(stage.name().to_string(), message);
                self.log_failure(ctx, &error, envelope).await;
                (envelope.clone(), Some(error))
            }
        };

        let envelope = self.dispatcher.dispatch(ctx, &processed).await;

        StageRun { envelope, error }
    }

    async fn log_failure(&self, ctx: &RequestContext, error: &DomainError, envelope: &Envelope) {
        warn!(stage = %ctx.stage_name, error = %error, "stage task failed, forwarding input envelope");
        self.logger
            .log(
                ctx,
                "task",
                json!({ "error": error.to_string(), "envelope": to_log_value(envelope) }),
            )
            .await;
    }
}
