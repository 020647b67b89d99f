use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Routed unit of work carried between stages
///
/// All pipeline state travels inside the envelope: the remaining route,
/// the hop history and the payload for the current stage. Operations on
/// the envelope never mutate it in place, they return an updated clone.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Originating end device
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,

    /// Current or last-assigned stage name
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub stage_type: Option<String>,

    /// Opaque payload for the current stage
    #[serde(default)]
    pub body: serde_json::Value,

    /// Stages still to visit, consumed front-to-back
    #[serde(default)]
    pub route: Vec<String>,

    /// Hop records, earliest first
    #[serde(default)]
    pub history: Vec<HopRecord>,

    /// Set once the envelope has been forwarded in the current invocation
    #[serde(rename = "isDispatched", default, skip_serializing_if = "is_false")]
    pub is_dispatched: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<EnvelopeOptions>,

    /// Top-level fields added by stages that the core does not interpret
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnvelopeOptions {
    /// Publish `body` as the message root instead of the whole envelope
    #[serde(rename = "unpackBody", default)]
    pub unpack_body: bool,
}

/// One completed hop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HopRecord {
    /// Invocation start of the stage that produced this record
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,

    /// Moment the record was appended
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub end: DateTime<Utc>,

    /// Seconds spent in the stage, floored to 0.1s
    pub duration: f64,

    /// Seconds between the previous hop's end and this hop's start, floored to 0.1s
    pub latency: f64,

    /// Channel or path the invocation was triggered from
    #[serde(default)]
    pub source: String,

    /// Stage that executed the hop
    #[serde(rename = "function", default)]
    pub stage_name: String,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl Envelope {
    /// Whether no further hops remain
    pub fn is_terminal(&self) -> bool {
        self.route.is_empty()
    }

    pub fn unpack_body(&self) -> bool {
        self.options.as_ref().is_some_and(|o| o.unpack_body)
    }

    /// Clone with the next route element promoted to `type`
    ///
    /// Returns `None` when the route is empty.
    pub fn advance_route(&self) -> Option<Envelope> {
        let (next, rest) = self.route.split_first()?;
        Some(Envelope {
            stage_type: Some(next.clone()),
            route: rest.to_vec(),
            ..self.clone()
        })
    }

    /// Clone with the dispatch guard cleared
    pub fn undispatched(&self) -> Envelope {
        Envelope {
            is_dispatched: false,
            ..self.clone()
        }
    }
}
