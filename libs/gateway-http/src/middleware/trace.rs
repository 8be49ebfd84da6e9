//! Per-request trace span.
//!
//! Opens one `http_request` span per request, adopts the inbound W3C context
//! (TraceContext + Baggage propagators are installed by the binary) and
//! records status and latency on the way out.

use std::time::Instant;

use axum::extract::Request;
use axum::middleware::Next;
use axum::response::Response;
use tracing::Instrument;
use tracing::field::Empty;

use crate::context::RequestContext;
use crate::otel;

pub async fn trace_requests(req: Request, next: Next) -> Response {
    let (request_id, correlation_id) = RequestContext::from_extensions(req.extensions())
        .map_or_else(
            || (String::from("n/a"), String::from("n/a")),
            |ctx| (ctx.request_id.to_string(), ctx.correlation_id.to_string()),
        );

    let span = tracing::info_span!(
        "http_request",
        method = %req.method(),
        uri = %req.uri().path(),
        version = ?req.version(),
        request_id = %request_id,
        correlation_id = %correlation_id,
        trace_id = Empty,
        status = Empty,
        latency_ms = Empty,
        "http.method" = %req.method(),
        "http.target" = %req.uri().path(),
        "http.scheme" = req.uri().scheme_str().unwrap_or("http"),
    );
    otel::set_parent_from_headers(&span, req.headers());

    let start = Instant::now();
    let res = next.run(req).instrument(span.clone()).await;

    span.record("status", res.status().as_u16());
    span.record(
        "latency_ms",
        u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
    );
    res
}

#[cfg(test)]
mod tests {
    use axum::Router;
    use axum::body::Body;
    use axum::routing::get;
    use http::Request;
    use tower::ServiceExt;

    use super::*;

    #[tokio::test]
    async fn spans_do_not_disturb_the_response() {
        let app = Router::new()
            .route("/v1/devices", get(|| async { "[]" }))
            .layer(axum::middleware::from_fn(trace_requests));

        let res = app
            .oneshot(
                Request::get("/v1/devices")
                    .header(
                        "traceparent",
                        "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01",
                    )
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), http::StatusCode::OK);
    }
}
