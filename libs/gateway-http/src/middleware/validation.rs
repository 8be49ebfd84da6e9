//! Schema and auth-format validation.
//!
//! Requests are matched against the gateway's route table (built from the
//! loaded API description). Unmatched routes are rejected with 404, body
//! violations with 400, and security-scheme violations with 401. The bearer
//! check is a *format* check only — `v4.`-prefixed tokens are accepted and
//! cryptographic verification stays with the upstream identity provider.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::Request;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use http::{Method, header};
use sha2::{Digest, Sha256};

use crate::context::RequestContext;
use crate::problem::Problem;

pub use matchit::InsertError;

const BEARER_PREFIX: &str = "Bearer ";
const TOKEN_FORMAT_PREFIX: &str = "v4.";

/// One operation in the loaded API description.
#[derive(Debug, Clone)]
pub struct RouteSpec {
    pub method: Method,
    pub path: String,
    pub requires_auth: bool,
    /// Content types accepted for the request body. Empty means the
    /// operation takes no body.
    pub accepts: Vec<String>,
    pub requires_body: bool,
}

impl RouteSpec {
    #[must_use]
    pub fn new(method: Method, path: &str) -> Self {
        Self {
            method,
            path: path.to_owned(),
            requires_auth: false,
            accepts: Vec::new(),
            requires_body: false,
        }
    }

    #[must_use]
    pub fn authenticated(mut self) -> Self {
        self.requires_auth = true;
        self
    }

    #[must_use]
    pub fn json_body(mut self) -> Self {
        self.accepts = vec!["application/json".to_owned()];
        self.requires_body = true;
        self
    }
}

/// Route table over matchit routers, one per method.
#[derive(Default)]
pub struct RouteTable {
    routers: HashMap<Method, matchit::Router<usize>>,
    specs: Vec<RouteSpec>,
}

impl RouteTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an operation.
    ///
    /// # Errors
    /// Returns the matchit error when the path template conflicts with an
    /// already registered one.
    pub fn route(mut self, spec: RouteSpec) -> Result<Self, matchit::InsertError> {
        let index = self.specs.len();
        self.routers
            .entry(spec.method.clone())
            .or_default()
            .insert(&spec.path, index)?;
        self.specs.push(spec);
        Ok(self)
    }

    #[must_use]
    pub fn find(&self, method: &Method, path: &str) -> Option<&RouteSpec> {
        let router = self.routers.get(method)?;
        let matched = router.at(path).ok()?;
        self.specs.get(*matched.value)
    }
}

#[derive(Clone)]
pub struct ValidationState {
    pub table: Arc<RouteTable>,
    pub max_body_bytes: usize,
    /// Only paths under this prefix are validated; everything else (health,
    /// metrics, docs) is outside the API description.
    pub api_prefix: String,
}

impl ValidationState {
    #[must_use]
    pub fn new(table: Arc<RouteTable>, max_body_bytes: usize) -> Self {
        Self {
            table,
            max_body_bytes,
            api_prefix: "/v1".to_owned(),
        }
    }
}

fn essence(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// Pseudonymous subject for a format-valid token. Real identity comes from
/// the external verifier; the gateway only needs a stable per-token subject
/// for rate limiting.
fn subject_of(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    hex::encode(&digest[..8])
}

fn check_bearer(req: &Request) -> Result<String, Problem> {
    let value = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| Problem::unauthorized("missing bearer token"))?;

    let token = value
        .strip_prefix(BEARER_PREFIX)
        .ok_or_else(|| Problem::unauthorized("authorization scheme must be Bearer"))?;

    let format_valid = token
        .strip_prefix(TOKEN_FORMAT_PREFIX)
        .is_some_and(|rest| !rest.is_empty());
    if !format_valid {
        return Err(Problem::unauthorized("malformed bearer token"));
    }

    Ok(subject_of(token))
}

pub async fn validate_request(state: ValidationState, req: Request, next: Next) -> Response {
    if !req.uri().path().starts_with(&state.api_prefix) {
        return next.run(req).await;
    }

    let Some(spec) = state.table.find(req.method(), req.uri().path()) else {
        return Problem::not_found("route not found").into_response();
    };

    let subject = if spec.requires_auth {
        match check_bearer(&req) {
            Ok(subject) => Some(subject),
            Err(problem) => return problem.into_response(),
        }
    } else {
        None
    };

    let accepts = spec.accepts.clone();
    let requires_body = spec.requires_body;

    let (mut parts, body) = req.into_parts();

    if let Some(subject) = subject
        && let Some(ctx) = RequestContext::from_extensions(&parts.extensions).cloned()
    {
        parts.extensions.insert(ctx.with_subject(&subject));
    }

    // Operations without a declared body pass through unbuffered.
    if accepts.is_empty() {
        return next.run(Request::from_parts(parts, body)).await;
    }

    let bytes = match axum::body::to_bytes(body, state.max_body_bytes).await {
        Ok(bytes) => bytes,
        Err(_) => return Problem::validation("request body too large or unreadable").into_response(),
    };

    if bytes.is_empty() {
        if requires_body {
            return Problem::validation("request body is required").into_response();
        }
        return next.run(Request::from_parts(parts, axum::body::Body::empty())).await;
    }

    let content_type = parts
        .headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(essence)
        .unwrap_or_default();

    if !accepts.iter().any(|a| *a == content_type) {
        return Problem::validation(format!(
            "unsupported content type {content_type:?}"
        ))
        .into_response();
    }

    if (content_type == "application/json" || content_type.ends_with("+json"))
        && serde_json::from_slice::<serde_json::Value>(&bytes).is_err()
    {
        return Problem::validation("request body is not valid JSON").into_response();
    }

    next.run(Request::from_parts(parts, axum::body::Body::from(bytes)))
        .await
}

#[cfg(test)]
mod tests {
    use axum::Router;
    use axum::body::Body;
    use axum::routing::{get, post};
    use http::{Request, StatusCode};
    use tower::ServiceExt;

    use super::*;
    use crate::middleware::request_tracking::{TrackingState, track_request};

    fn table() -> Arc<RouteTable> {
        Arc::new(
            RouteTable::new()
                .route(RouteSpec::new(Method::GET, "/v1/devices/{id}").authenticated())
                .unwrap()
                .route(
                    RouteSpec::new(Method::POST, "/v1/devices")
                        .authenticated()
                        .json_body(),
                )
                .unwrap(),
        )
    }

    fn app() -> Router {
        let state = ValidationState::new(table(), 1 << 20);
        Router::new()
            .route("/v1/devices/{id}", get(|| async { "device" }))
            .route("/v1/devices", post(|body: String| async move { body }))
            .layer(axum::middleware::from_fn(move |req, next| {
                validate_request(state.clone(), req, next)
            }))
            .layer(axum::middleware::from_fn(|req, next| {
                track_request(TrackingState::default(), req, next)
            }))
    }

    fn bearer() -> &'static str {
        "Bearer v4.public.eyJzdWIiOiJkZXYifQ"
    }

    #[tokio::test]
    async fn unmatched_routes_get_404() {
        let res = app()
            .oneshot(Request::get("/v1/unknown").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn missing_token_gets_401() {
        let res = app()
            .oneshot(Request::get("/v1/devices/42").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

        let body = axum::body::to_bytes(res.into_body(), 4096).await.unwrap();
        let doc: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(doc["code"], "UNAUTHORIZED");
    }

    #[tokio::test]
    async fn wrong_token_format_gets_401() {
        for auth in ["Bearer not-paseto", "Bearer v4.", "Basic dXNlcjpwdw=="] {
            let res = app()
                .oneshot(
                    Request::get("/v1/devices/42")
                        .header("Authorization", auth)
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(res.status(), StatusCode::UNAUTHORIZED, "auth: {auth}");
        }
    }

    #[tokio::test]
    async fn format_valid_token_passes() {
        let res = app()
            .oneshot(
                Request::get("/v1/devices/42")
                    .header("Authorization", bearer())
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn invalid_json_body_gets_400() {
        let res = app()
            .oneshot(
                Request::post("/v1/devices")
                    .header("Authorization", bearer())
                    .header("Content-Type", "application/json")
                    .body(Body::from("{not json"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn wrong_content_type_gets_400() {
        let res = app()
            .oneshot(
                Request::post("/v1/devices")
                    .header("Authorization", bearer())
                    .header("Content-Type", "text/plain")
                    .body(Body::from("hello"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn valid_body_reaches_the_handler() {
        let res = app()
            .oneshot(
                Request::post("/v1/devices")
                    .header("Authorization", bearer())
                    .header("Content-Type", "application/json; charset=utf-8")
                    .body(Body::from(r#"{"name":"n"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let body = axum::body::to_bytes(res.into_body(), 4096).await.unwrap();
        assert_eq!(&body[..], br#"{"name":"n"}"#);
    }
}
