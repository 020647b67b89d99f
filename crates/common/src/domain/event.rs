use crate::domain::{DomainError, DomainResult, Envelope};
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Attribute carrying the calling user's id
pub const ATTR_USER_ID: &str = "userId";
/// Attribute carrying the calling company's id
pub const ATTR_COMPANY_ID: &str = "companyId";
/// Attribute carrying the caller's access token
pub const ATTR_TOKEN: &str = "token";

/// Wire shape of a triggering message
///
/// `data.data` holds the base64-encoded JSON envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundEvent {
    pub data: EventData,
    /// Channel the message was delivered on
    pub resource: String,
    #[serde(rename = "eventId")]
    pub event_id: String,
    pub timestamp: String,
    /// Transport metadata (caller identity), absent on most messages
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventData {
    pub data: String,
}

impl InboundEvent {
    /// Wrap a raw JSON payload the way the transport delivers it
    pub fn from_payload(
        payload: &[u8],
        resource: impl Into<String>,
        event_id: impl Into<String>,
        timestamp: impl Into<String>,
    ) -> Self {
        Self {
            data: EventData {
                data: STANDARD.encode(payload),
            },
            resource: resource.into(),
            event_id: event_id.into(),
            timestamp: timestamp.into(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attributes(self, attributes: BTreeMap<String, String>) -> Self {
        Self { attributes, ..self }
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    /// Decode the carried envelope
    pub fn decode_envelope(&self) -> DomainResult<Envelope> {
        let bytes = STANDARD
            .decode(self.data.data.trim())
            .map_err(|e| DomainError::EnvelopeDecode(format!("invalid base64: {}", e)))?;

        serde_json::from_slice(&bytes)
            .map_err(|e| DomainError::EnvelopeDecode(format!("invalid envelope JSON: {}", e)))
    }
}
