//! Pipeline assembly and the HTTP server.
//!
//! The middleware order is load-bearing and mirrors the policy chain:
//!
//! client IP → deadline → request tracking → security headers → CORS →
//! panic recovery → schema/auth validation → rate limit → idempotency →
//! deprecation → compression → conditional GET → health filter →
//! access log → metrics → trace → handler.
//!
//! Layers are applied innermost-first below, so read the `.layer(...)` calls
//! bottom-up to see the runtime order.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context as _;
use axum::middleware::from_fn;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use devices_module::api::{self, ApiDoc};
use devices_module::rpc::DevicesRpc;
use gateway_http::middleware::access_log::{HealthFilterState, access_log, filter_health};
use gateway_http::middleware::client_ip::derive_client_ip;
use gateway_http::middleware::compression::{CompressionState, compress_response};
use gateway_http::middleware::conditional::conditional_get;
use gateway_http::middleware::cors::{CorsState, handle_cors};
use gateway_http::middleware::deprecation::{DeprecationState, signal_deprecation};
use gateway_http::middleware::metrics::{HttpMetrics, track_metrics};
use gateway_http::middleware::recovery::recover_panics;
use gateway_http::middleware::request_tracking::{TrackingState, track_request};
use gateway_http::middleware::security_headers::set_security_headers;
use gateway_http::middleware::trace::trace_requests;
use gateway_http::middleware::validation::{ValidationState, validate_request};
use gateway_idempotency::{IdempotencyState, enforce_idempotency};
use gateway_kv::KeyValueStore;
use gateway_ratelimit::{RateLimitState, limit_requests};
use http::StatusCode;
use axum::extract::DefaultBodyLimit;
use tokio_util::sync::CancellationToken;
use tower_http::timeout::TimeoutLayer;
use utoipa::OpenApi as _;

use crate::config::AppConfig;

/// Everything the pipeline needs, wired by `main` (or a test harness).
pub struct Dependencies {
    pub store: Arc<dyn KeyValueStore>,
    pub devices: Arc<dyn DevicesRpc>,
    pub metrics: Arc<HttpMetrics>,
}

/// Build the fully layered router.
///
/// # Errors
/// Returns an error when route registration or middleware state building
/// fails (conflicting templates, invalid header names).
pub fn build_router(cfg: &AppConfig, deps: &Dependencies) -> anyhow::Result<Router> {
    let validation = ValidationState::new(
        Arc::new(api::route_table().context("building the route table")?),
        cfg.server.max_body_bytes,
    );
    let tracking = TrackingState {
        request_timeout: Some(cfg.server.write_timeout),
    };
    let cors = CorsState::new(&cfg.cors);
    let security = cfg.security_headers.clone();
    let rate_limit = RateLimitState::new(&cfg.rate_limit, deps.store.clone());
    let idempotency = IdempotencyState::new(&cfg.idempotency, deps.store.clone());
    let compression = CompressionState::new(&cfg.compression);
    let health_filter = HealthFilterState::new(&cfg.health);
    let metrics = deps.metrics.clone();

    let readyz_store = deps.store.clone();
    let openapi_doc = ApiDoc::openapi();
    let metrics_for_endpoint = deps.metrics.clone();

    let mut router = Router::new()
        .merge(api::router(deps.devices.clone()))
        .route("/healthz", get(|| async { "ok" }))
        .route(
            "/readyz",
            get(move || {
                let store = readyz_store.clone();
                async move {
                    match store.ping().await {
                        Ok(()) => (StatusCode::OK, "ready").into_response(),
                        Err(err) => {
                            (StatusCode::SERVICE_UNAVAILABLE, err.to_string()).into_response()
                        }
                    }
                }
            }),
        )
        .route(
            "/metrics",
            get(move || {
                let metrics = metrics_for_endpoint.clone();
                async move { metrics.render() }
            }),
        )
        .route(
            "/openapi.json",
            get(move || {
                let doc = openapi_doc.clone();
                async move { Json(doc) }
            }),
        );

    // Innermost first; runtime order is the reverse of this list.
    router = router
        .layer(from_fn(trace_requests))
        .layer(from_fn(move |req, next| {
            track_metrics(metrics.clone(), req, next)
        }))
        .layer(from_fn(access_log))
        .layer(from_fn(move |req, next| {
            filter_health(health_filter.clone(), req, next)
        }))
        .layer(from_fn(conditional_get))
        .layer(from_fn(move |req, next| {
            compress_response(compression.clone(), req, next)
        }));

    if cfg.deprecation.enabled {
        let deprecation = DeprecationState::new(&cfg.deprecation);
        router = router.layer(from_fn(move |req, next| {
            signal_deprecation(deprecation.clone(), req, next)
        }));
    }

    let mut router = router
        .layer(from_fn(move |req, next| {
            enforce_idempotency(idempotency.clone(), req, next)
        }))
        .layer(from_fn(move |req, next| {
            limit_requests(rate_limit.clone(), req, next)
        }))
        .layer(from_fn(move |req, next| {
            validate_request(validation.clone(), req, next)
        }))
        .layer(from_fn(recover_panics));

    if cfg.cors.enabled {
        router = router.layer(from_fn(move |req, next| handle_cors(cors.clone(), req, next)));
    }

    let router = router
        .layer(from_fn(move |req, next| {
            set_security_headers(security.clone(), req, next)
        }))
        .layer(from_fn(move |req, next| {
            track_request(tracking.clone(), req, next)
        }))
        .layer(TimeoutLayer::new(cfg.server.write_timeout))
        .layer(DefaultBodyLimit::max(cfg.server.max_body_bytes))
        .layer(from_fn(derive_client_ip));

    Ok(router)
}

/// Serve until the cancellation token fires.
///
/// # Errors
/// Returns an error when binding or serving fails.
pub async fn serve(
    cfg: &AppConfig,
    deps: &Dependencies,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let router = build_router(cfg, deps)?;
    let addr: SocketAddr = format!("{}:{}", cfg.server.host, cfg.server.port)
        .parse()
        .context("parsing the bind address")?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!(%addr, "devices gateway listening");

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move { shutdown.cancelled().await })
    .await
    .context("serving HTTP")
}
