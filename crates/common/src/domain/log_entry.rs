use crate::domain::result::DomainResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Debug,
    Error,
}

/// Normalized pipeline log record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogRecord {
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub starttime: DateTime<Utc>,
    pub trace_id: String,
    /// Seconds since `starttime`, floored to 0.1s
    pub duration: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub company_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub masked_token: Option<String>,
    pub action: String,
    pub parameters: serde_json::Value,
}

/// Record as handed to a sink, tagged with severity and resource labels
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub severity: Severity,
    pub resource_labels: BTreeMap<String, String>,
    #[serde(flatten)]
    pub record: LogRecord,
}

/// Destination for pipeline log entries
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait LogSink: Send + Sync {
    /// Short name used when reporting sink failures
    fn name(&self) -> String;

    async fn write(&self, entry: &LogEntry) -> DomainResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_entry_serializes_flat() {
        let now = Utc::now();
        let entry = LogEntry {
            severity: Severity::Error,
            resource_labels: BTreeMap::from([("function_name".to_string(), "decode".to_string())]),
            record: LogRecord {
                timestamp: now,
                starttime: now,
                trace_id: "0709-abc".to_string(),
                duration: 0.3,
                user_id: None,
                company_id: None,
                masked_token: None,
                action: "dispatch".to_string(),
                parameters: json!({ "error": "boom" }),
            },
        };

        let value = serde_json::to_value(&entry).unwrap();

        assert_eq!(value["severity"], json!("ERROR"));
        assert_eq!(value["resourceLabels"]["function_name"], json!("decode"));
        assert_eq!(value["traceId"], json!("0709-abc"));
        assert_eq!(value["action"], json!("dispatch"));
        assert!(value.get("userId").is_none());
    }
}
