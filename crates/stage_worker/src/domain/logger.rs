use crate::domain::strip_nulls;
use async_trait::async_trait;
use chrono::Utc;
use common::domain::{DomainResult, LogEntry, LogRecord, LogSink, RequestContext, Severity};
use futures::future::join_all;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Target of the developer console echo, filterable like any other target
pub const CONSOLE_TARGET: &str = "sigroute::console";

/// Logger settings, fixed at construction
#[derive(Debug, Clone, Default)]
pub struct LoggerConfig {
    /// Labels attached to every entry (stage, deployment, ...)
    pub resource_labels: BTreeMap<String, String>,
    /// Also emit a readable one-line echo on `CONSOLE_TARGET` (local development)
    pub console_echo: bool,
}

/// Structured pipeline logger
///
/// Every record carries the request's trace id and elapsed time. Parameters
/// are stripped of nulls and depth-limited. Sink failures are reported as
/// diagnostics and never reach the caller.
pub struct Logger {
    config: LoggerConfig,
    primary: Arc<dyn LogSink>,
    secondary: Vec<Arc<dyn LogSink>>,
}

impl Logger {
    pub fn new(config: LoggerConfig, primary: Arc<dyn LogSink>, secondary: Vec<Arc<dyn LogSink>>) -> Self {
        Self {
            config,
            primary,
            secondary,
        }
    }

    /// Record `action` for this request
    ///
    /// Returns `parameters.error` (or `err`) when present, else
    /// `parameters.result`, else `None`.
    pub async fn log(&self, ctx: &RequestContext, action: &str, parameters: Value) -> Option<Value> {
        let now = Utc::now();
        let parameters = strip_nulls(&parameters);
        let severity = if error_of(&parameters).is_some() {
            Severity::Error
        } else {
            Severity::Debug
        };

        let entry = LogEntry {
            severity,
            resource_labels: self.config.resource_labels.clone(),
            record: LogRecord {
                timestamp: now,
                starttime: ctx.starttime,
                trace_id: ctx.trace_id().to_string(),
                duration: ctx.elapsed_secs(now),
                user_id: ctx.user_id.clone(),
                company_id: ctx.company_id.clone(),
                masked_token: ctx.masked_token(),
                action: action.to_string(),
                parameters,
            },
        };

        let writes = self.secondary.iter().map(|sink| {
            let entry = &entry;
            async move { sink.write(entry).await.map_err(|e| (sink.name(), e)) }
        });
        for result in join_all(writes).await {
            if let Err((name, e)) = result {
                warn!(sink = %name, action = %action, error = %e, "secondary log sink failed");
            }
        }

        if let Err(e) = self.primary.write(&entry).await {
            warn!(sink = %self.primary.name(), action = %action, error = %e, "primary log sink failed");
        }

        if self.config.console_echo {
            info!(target: CONSOLE_TARGET, "{}", console_line(&entry));
        }

        error_of(&entry.record.parameters)
            .or_else(|| entry.record.parameters.get("result"))
            .cloned()
    }
}

fn error_of(parameters: &Value) -> Option<&Value> {
    parameters.get("error").or_else(|| parameters.get("err"))
}

/// One-line rendering for the developer console
pub fn console_line(entry: &LogEntry) -> String {
    let record = &entry.record;
    let severity = match entry.severity {
        Severity::Error => "ERROR",
        Severity::Debug => "DEBUG",
    };
    format!(
        "{} [{}] {:>5.1}s {} {}",
        severity, record.trace_id, record.duration, record.action, record.parameters
    )
}

/// Primary sink that turns entries into `tracing` events
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogSink;

#[async_trait]
impl LogSink for TracingLogSink {
    fn name(&self) -> String {
        "tracing".to_string()
    }

    async fn write(&self, entry: &LogEntry) -> DomainResult<()> {
        let record = &entry.record;
        match entry.severity {
            Severity::Error => error!(
                trace_id = %record.trace_id,
                action = %record.action,
                duration = record.duration,
                parameters = %record.parameters,
                "pipeline"
            ),
            Severity::Debug => debug!(
                trace_id = %record.trace_id,
                action = %record.action,
                duration = record.duration,
                parameters = %record.parameters,
                "pipeline"
            ),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::domain::{DomainError, MockLogSink};
    use serde_json::json;

    fn ctx() -> RequestContext {
        RequestContext::new("decode", "sigfox.types.decode", Utc::now())
    }

    fn quiet_primary() -> Arc<dyn LogSink> {
        Arc::new(TracingLogSink)
    }

    #[tokio::test]
    async fn test_returns_error_before_result() {
        let logger = Logger::new(LoggerConfig::default(), quiet_primary(), Vec::new());

        let returned = logger
            .log(&ctx(), "task", json!({ "error": "boom", "result": 1 }))
            .await;

        assert_eq!(returned, Some(json!("boom")));
    }

    #[tokio::test]
    async fn test_returns_err_alias_and_result() {
        let logger = Logger::new(LoggerConfig::default(), quiet_primary(), Vec::new());

        assert_eq!(
            logger.log(&ctx(), "task", json!({ "err": "bad" })).await,
            Some(json!("bad"))
        );
        assert_eq!(
            logger.log(&ctx(), "task", json!({ "result": { "ok": true } })).await,
            Some(json!({ "ok": true }))
        );
        assert_eq!(logger.log(&ctx(), "start", json!({ "device": "D1" })).await, None);
    }

    #[tokio::test]
    async fn test_null_error_is_not_an_error() {
        // Arrange
        let mut primary = MockLogSink::new();
        primary
            .expect_write()
            .withf(|entry| entry.severity == Severity::Debug && entry.record.parameters == json!({ "result": 2 }))
            .times(1)
            .returning(|_| Ok(()));
        let logger = Logger::new(LoggerConfig::default(), Arc::new(primary), Vec::new());

        // Act
        let returned = logger.log(&ctx(), "task", json!({ "error": null, "result": 2 })).await;

        // Assert
        assert_eq!(returned, Some(json!(2)));
    }

    #[tokio::test]
    async fn test_severity_and_labels_reach_primary() {
        // Arrange
        let mut primary = MockLogSink::new();
        primary
            .expect_write()
            .withf(|entry| {
                entry.severity == Severity::Error
                    && entry.record.action == "dispatch"
                    && entry.resource_labels.get("function_name").map(String::as_str) == Some("decode")
            })
            .times(1)
            .returning(|_| Ok(()));
        let config = LoggerConfig {
            resource_labels: BTreeMap::from([("function_name".to_string(), "decode".to_string())]),
            console_echo: false,
        };
        let logger = Logger::new(config, Arc::new(primary), Vec::new());

        // Act
        logger.log(&ctx(), "dispatch", json!({ "error": "publish failed" })).await;
    }

    #[tokio::test]
    async fn test_sink_failures_are_swallowed() {
        // Arrange
        let mut failing = MockLogSink::new();
        failing.expect_name().return_const("failing".to_string());
        failing
            .expect_write()
            .times(1)
            .returning(|_| Err(DomainError::LogSinkFailed("unreachable".to_string())));

        let mut healthy = MockLogSink::new();
        healthy.expect_write().times(1).returning(|_| Ok(()));

        let mut primary = MockLogSink::new();
        primary.expect_name().return_const("primary".to_string());
        primary
            .expect_write()
            .times(1)
            .returning(|_| Err(DomainError::LogSinkFailed("down".to_string())));

        let logger = Logger::new(
            LoggerConfig::default(),
            Arc::new(primary),
            vec![Arc::new(failing), Arc::new(healthy)],
        );

        // Act
        let returned = logger.log(&ctx(), "end", json!({ "result": "done" })).await;

        // Assert
        assert_eq!(returned, Some(json!("done")));
    }

    #[tokio::test]
    async fn test_trace_id_shared_across_calls() {
        // Arrange
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let captured = Arc::clone(&seen);
        let mut primary = MockLogSink::new();
        primary.expect_write().times(2).returning(move |entry| {
            captured.lock().unwrap().push(entry.record.trace_id.clone());
            Ok(())
        });
        let logger = Logger::new(LoggerConfig::default(), Arc::new(primary), Vec::new());
        let ctx = ctx();

        // Act
        logger.log(&ctx, "start", json!({})).await;
        logger.log(&ctx, "end", json!({})).await;

        // Assert
        let ids = seen.lock().unwrap();
        assert_eq!(ids.len(), 2);
        assert_eq!(ids[0], ids[1]);
        assert_eq!(ids[0], ctx.trace_id());
    }

    mod console {
        use super::*;
        use std::sync::Mutex;
        use tracing::field::{Field, Visit};
        use tracing::Subscriber;
        use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

        struct EchoRecorder {
            lines: Arc<Mutex<Vec<String>>>,
        }

        impl<S: Subscriber> Layer<S> for EchoRecorder {
            fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
                if event.metadata().target() == CONSOLE_TARGET {
                    let mut message = MessageField::default();
                    event.record(&mut message);
                    self.lines.lock().unwrap().push(message.0);
                }
            }
        }

        #[derive(Default)]
        struct MessageField(String);

        impl Visit for MessageField {
            fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
                if field.name() == "message" {
                    self.0 = format!("{:?}", value);
                }
            }
        }

        async fn echoed_lines(console_echo: bool) -> Vec<String> {
            let lines = Arc::new(Mutex::new(Vec::new()));
            let subscriber = tracing_subscriber::registry().with(EchoRecorder {
                lines: Arc::clone(&lines),
            });
            let _guard = tracing::subscriber::set_default(subscriber);

            let config = LoggerConfig {
                console_echo,
                ..LoggerConfig::default()
            };
            let logger = Logger::new(config, quiet_primary(), Vec::new());
            let ctx = ctx().with_trace_id("0709-abc");
            logger.log(&ctx, "dispatch", json!({ "error": "broker down" })).await;

            let lines = lines.lock().unwrap().clone();
            lines
        }

        #[tokio::test]
        async fn test_console_echo_emits_readable_line() {
            let lines = echoed_lines(true).await;

            assert_eq!(lines.len(), 1);
            assert!(lines[0].starts_with("ERROR [0709-abc]"));
            assert!(lines[0].contains(r#"dispatch {"error":"broker down"}"#));
        }

        #[tokio::test]
        async fn test_no_echo_when_disabled() {
            assert!(echoed_lines(false).await.is_empty());
        }
    }

    #[test]
    fn test_console_line() {
        let now = Utc::now();
        let entry = LogEntry {
            severity: Severity::Debug,
            resource_labels: BTreeMap::new(),
            record: LogRecord {
                timestamp: now,
                starttime: now,
                trace_id: "0709-abc".to_string(),
                duration: 1.5,
                user_id: None,
                company_id: None,
                masked_token: None,
                action: "start".to_string(),
                parameters: json!({ "device": "D1" }),
            },
        };

        assert_eq!(console_line(&entry), r#"DEBUG [0709-abc]   1.5s start {"device":"D1"}"#);
    }
}
