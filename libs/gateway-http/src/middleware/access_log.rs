//! Health filter and access log.
//!
//! The health filter runs just before the access log and tags health-check
//! traffic so the logger skips it. One structured record is emitted per
//! remaining request; the level follows the response status (5xx → error,
//! 4xx → warn, otherwise info).

use std::sync::Arc;
use std::time::Instant;

use axum::extract::Request;
use axum::middleware::Next;
use axum::response::Response;
use http::header;
use http_body::Body as _;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::context::ClientIp;

/// Marker extension: this request must not produce an access-log record.
#[derive(Debug, Clone, Copy)]
pub struct NonLoggable;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HealthFilterConfig {
    #[serde(default = "default_health_paths")]
    pub paths: Vec<String>,
}

fn default_health_paths() -> Vec<String> {
    vec!["/healthz".to_owned(), "/readyz".to_owned()]
}

impl Default for HealthFilterConfig {
    fn default() -> Self {
        Self {
            paths: default_health_paths(),
        }
    }
}

#[derive(Clone)]
pub struct HealthFilterState {
    paths: Arc<Vec<String>>,
}

impl HealthFilterState {
    #[must_use]
    pub fn new(cfg: &HealthFilterConfig) -> Self {
        Self {
            paths: Arc::new(cfg.paths.clone()),
        }
    }
}

pub async fn filter_health(state: HealthFilterState, mut req: Request, next: Next) -> Response {
    if state.paths.iter().any(|p| p == req.uri().path()) {
        req.extensions_mut().insert(NonLoggable);
    }
    next.run(req).await
}

fn header_str(req: &Request, name: header::HeaderName) -> Option<String> {
    req.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
}

pub async fn access_log(req: Request, next: Next) -> Response {
    if req.extensions().get::<NonLoggable>().is_some() {
        return next.run(req).await;
    }

    let method = req.method().clone();
    let path = req.uri().path().to_owned();
    let query = req.uri().query().map(str::to_owned);
    let protocol = format!("{:?}", req.version());
    let host = header_str(&req, header::HOST);
    let user_agent = header_str(&req, header::USER_AGENT);
    let referer = header_str(&req, header::REFERER);
    let remote = req
        .extensions()
        .get::<ClientIp>()
        .copied()
        .unwrap_or(ClientIp(None));

    let start = Instant::now();
    let res = next.run(req).await;

    let status = res.status().as_u16();
    let bytes = res.body().size_hint().exact().unwrap_or(0);
    let duration_ms = start.elapsed().as_millis();

    macro_rules! emit {
        ($level:ident) => {
            $level!(
                target: "access",
                method = %method,
                path = %path,
                query = query.as_deref().unwrap_or(""),
                remote = %remote,
                user_agent = user_agent.as_deref().unwrap_or(""),
                referer = referer.as_deref().unwrap_or(""),
                protocol = %protocol,
                host = host.as_deref().unwrap_or(""),
                status,
                bytes,
                duration_ms = u64::try_from(duration_ms).unwrap_or(u64::MAX),
                "request completed"
            )
        };
    }

    if status >= 500 {
        emit!(error);
    } else if status >= 400 {
        emit!(warn);
    } else {
        emit!(info);
    }

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
    async fn health_paths_are_tagged_non_loggable() {
        let state = HealthFilterState::new(&HealthFilterConfig::default());
        let app = Router::new()
            .route(
                "/healthz",
                get(|req: axum::extract::Request| async move {
                    if req.extensions().get::<NonLoggable>().is_some() {
                        "tagged"
                    } else {
                        "untagged"
                    }
                }),
            )
            .route(
                "/v1/devices",
                get(|req: axum::extract::Request| async move {
                    if req.extensions().get::<NonLoggable>().is_some() {
                        "tagged"
                    } else {
                        "untagged"
                    }
                }),
            )
            .layer(axum::middleware::from_fn(move |req, next| {
                filter_health(state.clone(), req, next)
            }));

        let res = app
            .clone()
            .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = axum::body::to_bytes(res.into_body(), 64).await.unwrap();
        assert_eq!(&body[..], b"tagged");

        let res = app
            .oneshot(Request::get("/v1/devices").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = axum::body::to_bytes(res.into_body(), 64).await.unwrap();
        assert_eq!(&body[..], b"untagged");
    }

    #[tokio::test]
    async fn access_log_passes_responses_through() {
        let app = Router::new()
            .route("/v1/devices", get(|| async { "[]" }))
            .layer(axum::middleware::from_fn(access_log));

        let res = app
            .oneshot(Request::get("/v1/devices?page=2").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), http::StatusCode::OK);
    }
}
