//! Request tracking.
//!
//! Guarantees `Request-Id` and `Correlation-Id` exist, mirrors both onto the
//! response, and materializes the [`RequestContext`] every later stage reads.
//! The context's cancellation token is armed with a drop guard: when the
//! request future is dropped (client disconnect, timeout), everything still
//! holding the token observes the cancellation.

use std::time::{Duration, Instant};

use axum::extract::Request;
use axum::middleware::Next;
use axum::response::Response;
use http::HeaderValue;
use uuid::Uuid;

use crate::context::RequestContext;
use crate::headers;
use crate::otel::parse_trace_id;

#[derive(Debug, Clone, Default)]
pub struct TrackingState {
    /// Per-request deadline, normally the server write timeout.
    pub request_timeout: Option<Duration>,
}

fn header_or_uuid(req: &Request, name: &http::HeaderName) -> String {
    req.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map_or_else(|| Uuid::new_v4().to_string(), str::to_owned)
}

pub async fn track_request(state: TrackingState, mut req: Request, next: Next) -> Response {
    let request_id = header_or_uuid(&req, &headers::REQUEST_ID);
    let correlation_id = header_or_uuid(&req, &headers::CORRELATION_ID);

    let mut ctx = RequestContext::new(&request_id, &correlation_id);
    if let Some(timeout) = state.request_timeout {
        ctx = ctx.with_deadline(Instant::now() + timeout);
    }
    if let Some(trace_id) = req
        .headers()
        .get(&headers::TRACEPARENT)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_trace_id)
    {
        ctx = ctx.with_trace_id(trace_id);
    }

    let cancel_on_drop = ctx.cancellation.clone().drop_guard();

    // Downstream stages and handlers see the normalized headers.
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        req.headers_mut().insert(headers::REQUEST_ID, value);
    }
    if let Ok(value) = HeaderValue::from_str(&correlation_id) {
        req.headers_mut().insert(headers::CORRELATION_ID, value);
    }
    req.extensions_mut().insert(ctx);

    let mut res = next.run(req).await;
    drop(cancel_on_drop);

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        res.headers_mut().insert(headers::REQUEST_ID, value);
    }
    if let Ok(value) = HeaderValue::from_str(&correlation_id) {
        res.headers_mut().insert(headers::CORRELATION_ID, value);
    }
    res
}
