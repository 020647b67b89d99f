use crate::domain::{to_log_value, Logger, Stage, StageRunner};
use chrono::Utc;
use common::domain::{Envelope, InboundEvent, ProcessedCheck, RequestContext};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// How an invocation ended, as seen by the transport
///
/// Every variant means the message may be acknowledged; failures are only
/// recorded in the log trail.
#[derive(Debug, Clone, PartialEq)]
pub enum InvocationOutcome {
    /// Envelope handed to its next stage (or already dispatched by the task);
    /// a failed publish shows up only in the `dispatch` record
    Completed(Envelope),
    /// Route exhausted, nothing published
    Terminated(Envelope),
    /// Message already processed
    Skipped,
    /// Decoding or the stage task failed; `envelope` is the last known state
    Failed {
        error: String,
        envelope: Option<Envelope>,
    },
}

/// Top-level entry for one stage: decode, dedup, run, dispatch, log
pub struct StagePipeline {
    stage: Arc<dyn Stage>,
    runner: StageRunner,
    logger: Arc<Logger>,
    processed_check: Arc<dyn ProcessedCheck>,
}

impl StagePipeline {
    pub fn new(
        stage: Arc<dyn Stage>,
        runner: StageRunner,
        logger: Arc<Logger>,
        processed_check: Arc<dyn ProcessedCheck>,
    ) -> Self {
        Self {
            stage,
            runner,
            logger,
            processed_check,
        }
    }

    pub fn stage_name(&self) -> &str {
        self.stage.name()
    }

    /// Handle one inbound event; never fails
    #[instrument(skip_all, fields(stage = %self.stage.name(), event_id = %event.event_id))]
    pub async fn handle(&self, event: &InboundEvent) -> InvocationOutcome {
        let ctx = RequestContext::from_event(self.stage.name(), event, Utc::now());

        let envelope = match event.decode_envelope() {
            Ok(envelope) => envelope.undispatched(),
            Err(e) => {
                warn!(error = %e, source = %event.resource, "dropping undecodable event");
                self.logger
                    .log(&ctx, "start", json!({ "event": to_log_value(event) }))
                    .await;
                self.logger.log(&ctx, "end", json!({ "error": e.to_string() })).await;
                return InvocationOutcome::Failed {
                    error: e.to_string(),
                    envelope: None,
                };
            }
        };

        self.logger
            .log(
                &ctx,
                "start",
                json!({
                    "device": envelope.device,
                    "body": envelope.body,
                    "event": to_log_value(event),
                }),
            )
            .await;

        if self.is_processed(&ctx, &envelope).await {
            self.logger
                .log(&ctx, "skip", json!({ "device": envelope.device, "eventId": event.event_id }))
                .await;
            self.logger.log(&ctx, "end", json!({ "result": "skipped" })).await;
            return InvocationOutcome::Skipped;
        }

        let run = self
            .runner
            .run(
                &ctx,
                self.stage.as_ref(),
                envelope.device.as_deref(),
                &envelope.body,
                &envelope,
            )
            .await;

        match run.error {
            None => {
                self.logger
                    .log(&ctx, "end", json!({ "result": to_log_value(&run.envelope) }))
                    .await;
                info!(
                    trace_id = %ctx.trace_id(),
                    next = run.envelope.stage_type.as_deref().unwrap_or(""),
                    dispatched = run.envelope.is_dispatched,
                    "invocation complete"
                );
                if run.envelope.is_dispatched {
                    InvocationOutcome::Completed(run.envelope)
                } else {
                    InvocationOutcome::Terminated(run.envelope)
                }
            }
            Some(error) => {
                self.logger
                    .log(
                        &ctx,
                        "end",
                        json!({ "error": error.to_string(), "result": to_log_value(&run.envelope) }),
                    )
                    .await;
                InvocationOutcome::Failed {
                    error: error.to_string(),
                    envelope: Some(run.envelope),
                }
            }
        }
    }

    async fn is_processed(&self, ctx: &RequestContext, envelope: &Envelope) -> bool {
        match self.processed_check.is_processed(ctx, envelope).await {
            Ok(processed) => processed,
            Err(e) => {
                warn!(error = %e, "processed check failed, continuing");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Dispatcher, DispatcherConfig, ForwardStage, LoggerConfig};
    use common::domain::{
        DomainError, LogEntry, MockLogSink, MockMessagePublisher, MockProcessedCheck, NeverProcessed,
        PublishReceipt,
    };
    use std::sync::Mutex;

    fn pipeline(
        publisher: MockMessagePublisher,
        check: Arc<dyn ProcessedCheck>,
        entries: Arc<Mutex<Vec<LogEntry>>>,
    ) -> StagePipeline {
        let mut sink = MockLogSink::new();
        sink.expect_write().returning(move |entry| {
            entries.lock().unwrap().push(entry.clone());
            Ok(())
        });
        let logger = Arc::new(Logger::new(LoggerConfig::default(), Arc::new(sink), Vec::new()));
        let dispatcher = Arc::new(Dispatcher::new(
            DispatcherConfig::default(),
            Arc::new(publisher),
            Arc::clone(&logger),
        ));
        StagePipeline::new(
            Arc::new(ForwardStage::new("decode")),
            StageRunner::new(dispatcher, Arc::clone(&logger)),
            logger,
            check,
        )
    }

    fn event(payload: serde_json::Value) -> InboundEvent {
        InboundEvent::from_payload(
            &serde_json::to_vec(&payload).unwrap(),
            "sigfox.types.decode",
            "17",
            "2024-03-01T10:00:00Z",
        )
    }

    fn actions(entries: &Arc<Mutex<Vec<LogEntry>>>) -> Vec<String> {
        entries
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.record.action.clone())
            .collect()
    }

    #[tokio::test]
    async fn test_forwards_to_next_stage() {
        // Arrange
        let mut publisher = MockMessagePublisher::new();
        publisher
            .expect_publish()
            .withf(|channel, payload| channel == "sigfox.types.store" && payload["device"] == "D1")
            .times(1)
            .returning(|channel, _| {
                Ok(PublishReceipt {
                    channel: channel.to_string(),
                    size_bytes: 1,
                })
            });
        let entries = Arc::new(Mutex::new(Vec::new()));
        let pipeline = pipeline(publisher, Arc::new(NeverProcessed), Arc::clone(&entries));

        // Act
        let outcome = pipeline
            .handle(&event(json!({ "device": "D1", "route": ["store"], "history": [] })))
            .await;

        // Assert
        let InvocationOutcome::Completed(envelope) = outcome else {
            panic!("expected Completed, got {:?}", outcome);
        };
        assert_eq!(envelope.stage_type.as_deref(), Some("store"));
        assert!(envelope.route.is_empty());
        assert_eq!(envelope.history.len(), 1);
        assert_eq!(envelope.history[0].source, "sigfox.types.decode");
        assert_eq!(actions(&entries), vec!["start", "task", "dispatch", "end"]);

        let trace_ids: Vec<String> = entries
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.record.trace_id.clone())
            .collect();
        assert!(trace_ids.windows(2).all(|w| w[0] == w[1]));
    }

    #[tokio::test]
    async fn test_inherited_dispatch_flag_is_cleared() {
        let mut publisher = MockMessagePublisher::new();
        publisher.expect_publish().times(1).returning(|channel, _| {
            Ok(PublishReceipt {
                channel: channel.to_string(),
                size_bytes: 1,
            })
        });
        let entries = Arc::new(Mutex::new(Vec::new()));
        let pipeline = pipeline(publisher, Arc::new(NeverProcessed), entries);

        let outcome = pipeline
            .handle(&event(json!({ "device": "D1", "route": ["store"], "isDispatched": true })))
            .await;

        assert!(matches!(outcome, InvocationOutcome::Completed(_)));
    }

    #[tokio::test]
    async fn test_publish_failure_still_completes() {
        // Arrange
        let mut publisher = MockMessagePublisher::new();
        publisher.expect_publish().times(1).returning(|channel, _| {
            Err(DomainError::PublishFailed(channel.to_string(), "broker down".to_string()))
        });
        let entries = Arc::new(Mutex::new(Vec::new()));
        let pipeline = pipeline(publisher, Arc::new(NeverProcessed), Arc::clone(&entries));

        // Act
        let outcome = pipeline.handle(&event(json!({ "route": ["store"] }))).await;

        // Assert
        assert!(matches!(outcome, InvocationOutcome::Completed(ref e) if e.is_dispatched));
        let entries = entries.lock().unwrap();
        let dispatch = entries.iter().find(|e| e.record.action == "dispatch").unwrap();
        assert_eq!(dispatch.severity, common::domain::Severity::Error);
    }

    #[tokio::test]
    async fn test_empty_route_terminates() {
        let mut publisher = MockMessagePublisher::new();
        publisher.expect_publish().times(0);
        let entries = Arc::new(Mutex::new(Vec::new()));
        let pipeline = pipeline(publisher, Arc::new(NeverProcessed), Arc::clone(&entries));

        let outcome = pipeline
            .handle(&event(json!({ "device": "D1", "type": "store", "route": [] })))
            .await;

        assert!(matches!(outcome, InvocationOutcome::Terminated(ref e) if e.history.len() == 1));
        assert_eq!(actions(&entries), vec!["start", "task", "no_route", "end"]);
    }

    #[tokio::test]
    async fn test_already_processed_is_skipped() {
        // Arrange
        let mut publisher = MockMessagePublisher::new();
        publisher.expect_publish().times(0);
        let mut check = MockProcessedCheck::new();
        check.expect_is_processed().times(1).returning(|_, _| Ok(true));
        let entries = Arc::new(Mutex::new(Vec::new()));
        let pipeline = pipeline(publisher, Arc::new(check), Arc::clone(&entries));

        // Act
        let outcome = pipeline.handle(&event(json!({ "route": ["store"] }))).await;

        // Assert
        assert_eq!(outcome, InvocationOutcome::Skipped);
        assert_eq!(actions(&entries), vec!["start", "skip", "end"]);
    }

    #[tokio::test]
    async fn test_processed_check_failure_fails_open() {
        let mut publisher = MockMessagePublisher::new();
        publisher.expect_publish().times(1).returning(|channel, _| {
            Ok(PublishReceipt {
                channel: channel.to_string(),
                size_bytes: 1,
            })
        });
        let mut check = MockProcessedCheck::new();
        check
            .expect_is_processed()
            .returning(|_, _| Err(DomainError::ProcessedCheckFailed("store offline".to_string())));
        let entries = Arc::new(Mutex::new(Vec::new()));
        let pipeline = pipeline(publisher, Arc::new(check), entries);

        let outcome = pipeline.handle(&event(json!({ "route": ["store"] }))).await;

        assert!(matches!(outcome, InvocationOutcome::Completed(_)));
    }

    #[tokio::test]
    async fn test_undecodable_event_is_recorded_not_raised() {
        // Arrange
        let mut publisher = MockMessagePublisher::new();
        publisher.expect_publish().times(0);
        let entries = Arc::new(Mutex::new(Vec::new()));
        let pipeline = pipeline(publisher, Arc::new(NeverProcessed), Arc::clone(&entries));
        let mut bad = event(json!({}));
        bad.data.data = "not base64!".to_string();

        // Act
        let outcome = pipeline.handle(&bad).await;

        // Assert
        assert!(matches!(outcome, InvocationOutcome::Failed { envelope: None, .. }));
        assert_eq!(actions(&entries), vec!["start", "end"]);
        let entries = entries.lock().unwrap();
        assert_eq!(entries[0].severity, common::domain::Severity::Debug);
        assert_eq!(entries[1].severity, common::domain::Severity::Error);
    }
}
