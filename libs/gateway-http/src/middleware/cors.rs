//! CORS stage.
//!
//! Only engages when the request carries an `Origin` header. The origin is
//! echoed back iff it is allowed; preflight `OPTIONS` requests are answered
//! directly with 204 and the fixed allow lists.

use axum::extract::Request;
use axum::middleware::Next;
use axum::response::Response;
use http::{HeaderValue, Method, StatusCode, header};
use serde::{Deserialize, Serialize};
use tracing::warn;

const ALLOW_METHODS: &str = "GET, POST, PUT, PATCH, DELETE, OPTIONS, HEAD";
const ALLOW_HEADERS: &str = "Authorization, Content-Type, Request-Id, Correlation-Id, \
     API-Version, If-Match, If-None-Match, traceparent, tracestate, Idempotency-Key";
const EXPOSE_HEADERS: &str = "Request-Id, Correlation-Id, RateLimit-Limit, \
     RateLimit-Remaining, RateLimit-Reset, ETag, Location";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CorsConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,

    #[serde(default)]
    pub allow_credentials: bool,

    #[serde(default = "default_max_age_seconds")]
    pub max_age_seconds: u64,
}

fn default_allowed_origins() -> Vec<String> {
    vec!["*".to_owned()]
}

fn default_max_age_seconds() -> u64 {
    86_400
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            allowed_origins: default_allowed_origins(),
            allow_credentials: false,
            max_age_seconds: default_max_age_seconds(),
        }
    }
}

#[derive(Clone)]
pub struct CorsState {
    allowed_origins: Vec<String>,
    wildcard: bool,
    allow_credentials: bool,
    max_age: HeaderValue,
}

impl CorsState {
    /// Build the CORS state from config.
    ///
    /// # Panics
    ///
    /// Panics if `allow_credentials` is `true` while `allowed_origins`
    /// contains `"*"`. The CORS specification forbids the combination —
    /// browsers reject such responses, so it signals a misconfiguration.
    #[must_use]
    pub fn new(cfg: &CorsConfig) -> Self {
        let wildcard = cfg.allowed_origins.iter().any(|o| o == "*");
        assert!(
            !(wildcard && cfg.allow_credentials),
            "CORS misconfiguration: allowed_origins=['*'] cannot be combined with \
             allow_credentials=true"
        );

        if wildcard {
            warn!(
                "CORS allows any origin; set explicit allowed_origins for production deployments"
            );
        }

        Self {
            allowed_origins: cfg.allowed_origins.clone(),
            wildcard,
            allow_credentials: cfg.allow_credentials,
            max_age: HeaderValue::from_str(&cfg.max_age_seconds.to_string())
                .unwrap_or_else(|_| HeaderValue::from_static("86400")),
        }
    }

    fn origin_allowed(&self, origin: &str) -> bool {
        self.wildcard || self.allowed_origins.iter().any(|o| o == origin)
    }

    fn apply(&self, headers: &mut http::HeaderMap, origin: &HeaderValue) {
        headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin.clone());
        headers.insert(
            header::ACCESS_CONTROL_EXPOSE_HEADERS,
            HeaderValue::from_static(EXPOSE_HEADERS),
        );
        headers.append(header::VARY, HeaderValue::from_static("Origin"));
        if self.allow_credentials {
            headers.insert(
                header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
                HeaderValue::from_static("true"),
            );
        }
    }
}

pub async fn handle_cors(state: CorsState, req: Request, next: Next) -> Response {
    let Some(origin) = req.headers().get(header::ORIGIN).cloned() else {
        return next.run(req).await;
    };

    let allowed = origin
        .to_str()
        .is_ok_and(|o| state.origin_allowed(o));

    if req.method() == Method::OPTIONS {
        let mut res = Response::new(axum::body::Body::empty());
        *res.status_mut() = StatusCode::NO_CONTENT;
        if allowed {
            state.apply(res.headers_mut(), &origin);
            res.headers_mut().insert(
                header::ACCESS_CONTROL_ALLOW_METHODS,
                HeaderValue::from_static(ALLOW_METHODS),
            );
            res.headers_mut().insert(
                header::ACCESS_CONTROL_ALLOW_HEADERS,
                HeaderValue::from_static(ALLOW_HEADERS),
            );
            res.headers_mut()
                .insert(header::ACCESS_CONTROL_MAX_AGE, state.max_age.clone());
        }
        return res;
    }

    let mut res = next.run(req).await;
    if allowed {
        state.apply(res.headers_mut(), &origin);
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

    fn app(cfg: CorsConfig) -> Router {
        let state = CorsState::new(&cfg);
        Router::new()
            .route("/v1/devices", get(|| async { "[]" }))
            .layer(axum::middleware::from_fn(move |req, next| {
                handle_cors(state.clone(), req, next)
            }))
    }

    #[tokio::test]
    async fn ignores_requests_without_origin() {
        let res = app(CorsConfig::default())
            .oneshot(Request::get("/v1/devices").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert!(!res.headers().contains_key("access-control-allow-origin"));
    }

    #[tokio::test]
    async fn answers_preflight_with_204_and_fixed_lists() {
        let res = app(CorsConfig::default())
            .oneshot(
                Request::builder()
                    .method(Method::OPTIONS)
                    .uri("/v1/devices")
                    .header("Origin", "https://example.com")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(res.status(), StatusCode::NO_CONTENT);
        let h = res.headers();
        assert_eq!(h["access-control-allow-origin"], "https://example.com");
        assert_eq!(h["access-control-allow-methods"], ALLOW_METHODS);
        assert_eq!(h["access-control-max-age"], "86400");
        assert!(h["access-control-allow-headers"]
            .to_str()
            .unwrap()
            .contains("Idempotency-Key"));
    }

    #[tokio::test]
    async fn echoes_only_allowed_origins() {
        let cfg = CorsConfig {
            enabled: true,
            allowed_origins: vec!["https://ok.example".to_owned()],
            allow_credentials: true,
            max_age_seconds: 60,
        };

        let res = app(cfg.clone())
            .oneshot(
                Request::get("/v1/devices")
                    .header("Origin", "https://ok.example")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(
            res.headers()["access-control-allow-origin"],
            "https://ok.example"
        );
        assert_eq!(res.headers()["access-control-allow-credentials"], "true");

        let res = app(cfg)
            .oneshot(
                Request::get("/v1/devices")
                    .header("Origin", "https://evil.example")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert!(!res.headers().contains_key("access-control-allow-origin"));
    }

    #[test]
    #[should_panic(expected = "CORS misconfiguration")]
    fn rejects_wildcard_with_credentials() {
        let cfg = CorsConfig {
            allow_credentials: true,
            ..CorsConfig::default()
        };
        let _ = CorsState::new(&cfg);
    }
}
