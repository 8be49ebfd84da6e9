//! W3C trace-context plumbing for the trace middleware.
//!
//! The server binary installs the global TraceContext + Baggage propagators;
//! this module only adapts `http::HeaderMap` to the OpenTelemetry
//! extractor/injector interfaces and wires extracted contexts onto spans.

use http::{HeaderMap, HeaderName, HeaderValue};
use opentelemetry::propagation::{Extractor, Injector};
use opentelemetry::{Context, global};
use tracing::Span;
use tracing_opentelemetry::OpenTelemetrySpanExt;

struct HeadersExtractor<'a>(&'a HeaderMap);

impl Extractor for HeadersExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|v| v.to_str().ok())
    }

    fn keys(&self) -> Vec<&str> {
        self.0.keys().map(http::HeaderName::as_str).collect()
    }
}

struct HeadersInjector<'a>(&'a mut HeaderMap);

impl Injector for HeadersInjector<'_> {
    fn set(&mut self, key: &str, value: String) {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(key.as_bytes()),
            HeaderValue::from_str(&value),
        ) {
            self.0.insert(name, value);
        }
    }
}

/// Parse the trace id out of a `traceparent` value
/// (`00-{trace_id}-{span_id}-{flags}`).
#[must_use]
pub fn parse_trace_id(traceparent: &str) -> Option<&str> {
    let mut parts = traceparent.split('-');
    if parts.next() != Some("00") {
        return None;
    }
    let trace_id = parts.next()?;
    parts.next()?;
    parts.next()?;
    (trace_id.len() == 32).then_some(trace_id)
}

/// Adopt the inbound W3C context as the parent of `span`.
pub fn set_parent_from_headers(span: &Span, headers: &HeaderMap) {
    let parent = global::get_text_map_propagator(|p| p.extract(&HeadersExtractor(headers)));
    span.set_parent(parent);

    if let Some(traceparent) = headers.get(crate::headers::TRACEPARENT)
        && let Some(trace_id) = traceparent.to_str().ok().and_then(parse_trace_id)
    {
        span.record("trace_id", trace_id);
    }
}

/// Inject the current context into outbound headers.
pub fn inject_current_context(headers: &mut HeaderMap) {
    let cx = Context::current();
    global::get_text_map_propagator(|p| p.inject_context(&cx, &mut HeadersInjector(headers)));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_traceparent() {
        let tp = "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01";
        assert_eq!(
            parse_trace_id(tp),
            Some("4bf92f3577b34da6a3ce929d0e0e4736")
        );
    }

    #[test]
    fn rejects_malformed_traceparent() {
        assert_eq!(parse_trace_id(""), None);
        assert_eq!(parse_trace_id("01-abc-def-00"), None);
        assert_eq!(parse_trace_id("00-short-def-00"), None);
    }
}
