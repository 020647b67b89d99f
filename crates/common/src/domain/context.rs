use crate::domain::{InboundEvent, ATTR_COMPANY_ID, ATTR_TOKEN, ATTR_USER_ID};
use chrono::{DateTime, Local, Utc};
use std::sync::{Arc, OnceLock};

/// Per-invocation state, rebuilt from the inbound event on every hop
///
/// Never persisted and never shared between invocations. The trace id is
/// derived lazily on first use and stays fixed for the life of the context;
/// clones share it.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub starttime: DateTime<Utc>,
    /// Stage executing this invocation
    pub stage_name: String,
    /// Channel the triggering message arrived on
    pub source: String,
    pub event_id: String,
    pub user_id: Option<String>,
    pub company_id: Option<String>,
    pub token: Option<String>,
    trace_id: Arc<OnceLock<String>>,
}

impl RequestContext {
    pub fn new(stage_name: impl Into<String>, source: impl Into<String>, starttime: DateTime<Utc>) -> Self {
        Self {
            starttime,
            stage_name: stage_name.into(),
            source: source.into(),
            event_id: String::new(),
            user_id: None,
            company_id: None,
            token: None,
            trace_id: Arc::new(OnceLock::new()),
        }
    }

    pub fn from_event(stage_name: impl Into<String>, event: &InboundEvent, starttime: DateTime<Utc>) -> Self {
        let attribute = |key: &str| event.attribute(key).map(str::to_string);
        Self {
            event_id: event.event_id.clone(),
            user_id: attribute(ATTR_USER_ID),
            company_id: attribute(ATTR_COMPANY_ID),
            token: attribute(ATTR_TOKEN),
            ..Self::new(stage_name, event.resource.clone(), starttime)
        }
    }

    pub fn with_trace_id(self, trace_id: impl Into<String>) -> Self {
        Self {
            trace_id: Arc::new(OnceLock::from(trace_id.into())),
            ..self
        }
    }

    /// Trace id for this request, generated on first call
    pub fn trace_id(&self) -> &str {
        self.trace_id
            .get_or_init(|| create_trace_id(self.starttime.with_timezone(&Local)))
    }

    /// Seconds since `starttime`, floored to 0.1s
    pub fn elapsed_secs(&self, now: DateTime<Utc>) -> f64 {
        floor_tenths(now - self.starttime)
    }

    /// Token with everything but the last four characters hidden
    pub fn masked_token(&self) -> Option<String> {
        self.token.as_deref().map(mask_token)
    }
}

/// Sortable, unique correlation id: local `mmss` prefix plus a random suffix
pub fn create_trace_id(now: DateTime<Local>) -> String {
    format!("{}-{}", now.format("%M%S"), uuid::Uuid::new_v4().simple())
}

/// Seconds in `delta`, truncated down to one decimal
///
/// Negative spans (clock skew between hosts) clamp to zero.
pub fn floor_tenths(delta: chrono::TimeDelta) -> f64 {
    let tenths = delta.num_milliseconds().max(0) / 100;
    tenths as f64 / 10.0
}

fn mask_token(token: &str) -> String {
    let chars: Vec<char> = token.chars().collect();
    let visible = chars.len().saturating_sub(4);
    chars
        .iter()
        .enumerate()
        .map(|(i, c)| if i < visible { '*' } else { *c })
        .collect()
}
