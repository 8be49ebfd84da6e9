//! Prometheus metrics for the HTTP pipeline.
//!
//! Counters and histograms are labeled with method, matched route template
//! and status code. The matched template (not the raw path) keeps label
//! cardinality bounded. Rendered at `/metrics` in text exposition format.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{MatchedPath, Request};
use axum::middleware::Next;
use axum::response::Response;
use http::header;
use http_body::Body as _;
use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};

const SIZE_BUCKETS: &[f64] = &[
    256.0, 1024.0, 4096.0, 16384.0, 65536.0, 262_144.0, 1_048_576.0,
];

pub struct HttpMetrics {
    registry: Registry,
    requests_total: IntCounterVec,
    duration_seconds: HistogramVec,
    request_size_bytes: HistogramVec,
    response_size_bytes: HistogramVec,
}

impl HttpMetrics {
    /// Register the gateway's HTTP metrics in a fresh registry.
    ///
    /// # Errors
    /// Returns the prometheus error when registration fails (duplicate
    /// collector names).
    pub fn new(prefix: &str) -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let requests_total = IntCounterVec::new(
            Opts::new(
                format!("{prefix}_http_requests_total"),
                "Total HTTP requests handled",
            ),
            &["method", "path", "status"],
        )?;
        let duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                format!("{prefix}_http_request_duration_seconds"),
                "HTTP request latency in seconds",
            ),
            &["method", "path", "status"],
        )?;
        let request_size_bytes = HistogramVec::new(
            HistogramOpts::new(
                format!("{prefix}_http_request_size_bytes"),
                "Inbound request body size",
            )
            .buckets(SIZE_BUCKETS.to_vec()),
            &["method", "path"],
        )?;
        let response_size_bytes = HistogramVec::new(
            HistogramOpts::new(
                format!("{prefix}_http_response_size_bytes"),
                "Outbound response body size",
            )
            .buckets(SIZE_BUCKETS.to_vec()),
            &["method", "path", "status"],
        )?;

        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(duration_seconds.clone()))?;
        registry.register(Box::new(request_size_bytes.clone()))?;
        registry.register(Box::new(response_size_bytes.clone()))?;

        Ok(Self {
            registry,
            requests_total,
            duration_seconds,
            request_size_bytes,
            response_size_bytes,
        })
    }

    /// Render the registry in Prometheus text format.
    #[must_use]
    pub fn render(&self) -> String {
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        if encoder.encode(&self.registry.gather(), &mut buf).is_err() {
            return String::new();
        }
        String::from_utf8(buf).unwrap_or_default()
    }
}

pub async fn track_metrics(metrics: Arc<HttpMetrics>, req: Request, next: Next) -> Response {
    let method = req.method().as_str().to_owned();
    let path = req
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| req.uri().path().to_owned(), |p| p.as_str().to_owned());

    let request_size = req
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(0);

    let start = Instant::now();
    let res = next.run(req).await;

    let status = res.status().as_u16().to_string();
    let elapsed = start.elapsed().as_secs_f64();
    let response_size = res.body().size_hint().exact().unwrap_or(0);

    metrics
        .requests_total
        .with_label_values(&[&method, &path, &status])
        .inc();
    metrics
        .duration_seconds
        .with_label_values(&[&method, &path, &status])
        .observe(elapsed);
    #[allow(clippy::cast_precision_loss)]
    metrics
        .request_size_bytes
        .with_label_values(&[&method, &path])
        .observe(request_size as f64);
    #[allow(clippy::cast_precision_loss)]
    metrics
        .response_size_bytes
        .with_label_values(&[&method, &path, &status])
        .observe(response_size as f64);

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
    async fn records_labeled_counters_and_histograms() {
        let metrics = Arc::new(HttpMetrics::new("devgw").unwrap());
        let app = Router::new()
            .route("/v1/devices/{id}", get(|| async { "device" }))
            .layer(axum::middleware::from_fn({
                let metrics = metrics.clone();
                move |req, next| track_metrics(metrics.clone(), req, next)
            }));

        for id in ["a", "b"] {
            let res = app
                .clone()
                .oneshot(
                    Request::get(format!("/v1/devices/{id}"))
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(res.status(), http::StatusCode::OK);
        }

        let rendered = metrics.render();
        assert!(rendered.contains("devgw_http_requests_total"));
        // Both requests share the matched-route label.
        assert!(rendered.contains("path=\"/v1/devices/{id}\""));
        assert!(rendered.contains("status=\"200\""));
        assert!(rendered.contains("devgw_http_request_duration_seconds"));
    }
}
