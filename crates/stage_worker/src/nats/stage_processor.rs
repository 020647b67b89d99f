use crate::domain::{InvocationOutcome, StagePipeline};
use async_nats::jetstream::Message;
use async_nats::HeaderMap;
use chrono::Utc;
use common::domain::{InboundEvent, ATTR_COMPANY_ID, ATTR_TOKEN, ATTR_USER_ID};
use common::nats::{message_span, BatchProcessor, ProcessingResult};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn, Instrument};

/// Message headers carrying caller identity, with the event attribute each maps to
const CALLER_HEADERS: [(&str, &str); 3] = [
    ("Sigroute-User-Id", ATTR_USER_ID),
    ("Sigroute-Company-Id", ATTR_COMPANY_ID),
    ("Sigroute-Token", ATTR_TOKEN),
];

/// Event attributes taken from the caller identity headers
fn caller_attributes(headers: Option<&HeaderMap>) -> BTreeMap<String, String> {
    let Some(headers) = headers else {
        return BTreeMap::new();
    };
    CALLER_HEADERS
        .iter()
        .filter_map(|(header, attribute)| {
            headers
                .get(*header)
                .map(|value| value.as_str().trim())
                .filter(|value| !value.is_empty())
                .map(|value| (attribute.to_string(), value.to_string()))
        })
        .collect()
}

/// Owned copy of what the pipeline needs from a JetStream message
struct Delivery {
    subject: String,
    payload: Vec<u8>,
    event_id: String,
    headers: Option<HeaderMap>,
}

impl Delivery {
    fn from_message(msg: &Message) -> Self {
        let event_id = msg
            .info()
            .map(|info| info.stream_sequence.to_string())
            .unwrap_or_else(|_| uuid::Uuid::new_v4().to_string());

        Self {
            subject: msg.subject.to_string(),
            payload: msg.payload.to_vec(),
            event_id,
            headers: msg.headers.clone(),
        }
    }

    fn into_event(self) -> (InboundEvent, Option<HeaderMap>) {
        let event = InboundEvent::from_payload(
            &self.payload,
            self.subject,
            self.event_id,
            Utc::now().to_rfc3339(),
        )
        .with_attributes(caller_attributes(self.headers.as_ref()));
        (event, self.headers)
    }
}

/// Create a BatchProcessor that feeds each message through the stage pipeline
///
/// Every message is acknowledged whatever the outcome: failures are
/// already in the log trail and redelivery would only repeat them.
pub fn create_stage_processor(pipeline: Arc<StagePipeline>) -> BatchProcessor {
    Box::new(move |messages: &[Message]| {
        let pipeline = Arc::clone(&pipeline);
        let deliveries: Vec<Delivery> = messages.iter().map(Delivery::from_message).collect();

        Box::pin(async move {
            let count = deliveries.len();

            for (idx, delivery) in deliveries.into_iter().enumerate() {
                let (event, headers) = delivery.into_event();
                let span = message_span(pipeline.stage_name(), &event.resource, headers.as_ref());

                match pipeline.handle(&event).instrument(span).await {
                    InvocationOutcome::Failed { error, .. } => {
                        warn!(index = idx, event_id = %event.event_id, error = %error, "invocation failed, acknowledging");
                    }
                    outcome => {
                        debug!(index = idx, event_id = %event.event_id, outcome = outcome_kind(&outcome), "invocation finished");
                    }
                }
            }

            Ok(ProcessingResult::ack_all(count))
        })
    })
}

fn outcome_kind(outcome: &InvocationOutcome) -> &'static str {
    match outcome {
        InvocationOutcome::Completed(_) => "completed",
        InvocationOutcome::Terminated(_) => "terminated",
        InvocationOutcome::Skipped => "skipped",
        InvocationOutcome::Failed { .. } => "failed",
    }
}
