use async_nats::HeaderMap;
use opentelemetry::{
    global,
    propagation::{Extractor, Injector},
};
use tracing::Span;
use tracing_opentelemetry::OpenTelemetrySpanExt;

const TRACEPARENT: &str = "traceparent";
const TRACESTATE: &str = "tracestate";

struct HeaderInjector<'a>(&'a mut HeaderMap);

impl Injector for HeaderInjector<'_> {
    fn set(&mut self, key: &str, value: String) {
        self.0.insert(key, value.as_str());
    }
}

struct HeaderExtractor<'a>(&'a HeaderMap);

impl Extractor for HeaderExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(|v| v.as_str())
    }

    fn keys(&self) -> Vec<&str> {
        vec![TRACEPARENT, TRACESTATE]
    }
}

/// Headers carrying the current span's W3C trace context
///
/// Empty when no propagator has been installed (OTEL disabled).
pub fn trace_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    global::get_text_map_propagator(|propagator| {
        let ctx = Span::current().context();
        propagator.inject_context(&ctx, &mut HeaderInjector(&mut headers));
    });
    headers
}

/// Span for one delivered message, parented on the publisher's trace when
/// the message carries trace headers
pub fn message_span(stage: &str, subject: &str, headers: Option<&HeaderMap>) -> Span {
    let span = tracing::info_span!("stage_message", stage = %stage, subject = %subject);
    if let Some(headers) = headers {
        let parent = global::get_text_map_propagator(|propagator| {
            propagator.extract(&HeaderExtractor(headers))
        });
        span.set_parent(parent);
    }
    span
}
