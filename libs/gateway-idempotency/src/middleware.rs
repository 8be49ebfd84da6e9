//! Idempotency middleware.
//!
//! Protocol per request, given storage key K derived from
//! (method, path, client key):
//!
//! 1. cache read on K — hit replays the captured response, handler untouched;
//! 2. lock `K:lock` via SET-if-absent — contention answers 409
//!    `REQUEST_IN_PROGRESS` without waiting;
//! 3. the handler runs through a buffering recorder;
//! 4. a 2xx outcome is persisted under K;
//! 5. the lock is always released, best-effort.
//!
//! Store failures follow `graceful_degraded`: pass through unprotected, or
//! fail closed with 503 `CACHE_UNAVAILABLE`.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::Request;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use gateway_http::context::RequestContext;
use gateway_http::problem::{Problem, codes};
use gateway_kv::KeyValueStore;
use http::{HeaderName, HeaderValue, Method, StatusCode};
use tracing::warn;

use crate::engine::{CachedResponse, IdempotencyEngine};
use crate::key::{storage_key, validate_key};
use crate::IdempotencyConfig;

#[derive(Clone)]
pub struct IdempotencyState {
    enabled: bool,
    engine: Arc<IdempotencyEngine>,
    methods: Arc<Vec<Method>>,
    header_name: HeaderName,
    replayed_header: HeaderName,
    graceful_degraded: bool,
}

impl IdempotencyState {
    /// Build the middleware state.
    ///
    /// # Panics
    /// Panics when the configured header names are not valid HTTP header
    /// names; this is a configuration error caught at startup.
    #[must_use]
    pub fn new(cfg: &IdempotencyConfig, store: Arc<dyn KeyValueStore>) -> Self {
        let methods = cfg
            .required_methods
            .iter()
            .filter_map(|m| m.to_uppercase().parse::<Method>().ok())
            .collect::<Vec<_>>();

        Self {
            enabled: cfg.enabled,
            engine: Arc::new(IdempotencyEngine::new(store, cfg)),
            methods: Arc::new(methods),
            header_name: HeaderName::from_bytes(cfg.header_name.as_bytes())
                .expect("idempotency.header_name is not a valid header name"),
            replayed_header: HeaderName::from_bytes(cfg.replayed_header.as_bytes())
                .expect("idempotency.replayed_header is not a valid header name"),
            graceful_degraded: cfg.graceful_degraded,
        }
    }
}

fn replay(state: &IdempotencyState, cached: CachedResponse) -> Response {
    let mut res = Response::new(Body::from(cached.body));
    *res.status_mut() =
        StatusCode::from_u16(cached.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    for (name, value) in &cached.headers {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            // First value per name wins, matching what was captured.
            if !res.headers().contains_key(&name) {
                res.headers_mut().insert(name, value);
            }
        }
    }
    res.headers_mut()
        .insert(state.replayed_header.clone(), HeaderValue::from_static("true"));
    res
}

fn capture_headers(res: &Response) -> Vec<(String, String)> {
    res.headers()
        .keys()
        .filter_map(|name| {
            let value = res.headers().get(name)?.to_str().ok()?;
            Some((name.as_str().to_owned(), value.to_owned()))
        })
        .collect()
}

fn store_failure(state: &IdempotencyState) -> Option<Response> {
    if state.graceful_degraded {
        None
    } else {
        Some(
            Problem::service_unavailable(
                codes::CACHE_UNAVAILABLE,
                "idempotency cache is unavailable",
            )
            .into_response(),
        )
    }
}

pub async fn enforce_idempotency(state: IdempotencyState, mut req: Request, next: Next) -> Response {
    if !state.enabled || !state.methods.contains(req.method()) {
        return next.run(req).await;
    }
    let Some(client_key) = req
        .headers()
        .get(&state.header_name)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_owned)
    else {
        return next.run(req).await;
    };

    if let Err(err) = validate_key(&client_key) {
        return Problem::new(
            StatusCode::BAD_REQUEST,
            codes::INVALID_IDEMPOTENCY_KEY,
            err.to_string(),
        )
        .into_response();
    }

    let key = storage_key(req.method().as_str(), req.uri().path(), &client_key);

    match state.engine.lookup(&key).await {
        Ok(Some(cached)) => return replay(&state, cached),
        Ok(None) => {}
        Err(err) => {
            warn!(%err, "idempotency cache read failed");
            if let Some(res) = store_failure(&state) {
                return res;
            }
            return next.run(req).await;
        }
    }

    match state.engine.try_lock(&key).await {
        Ok(true) => {}
        Ok(false) => {
            return Problem::conflict(
                codes::REQUEST_IN_PROGRESS,
                "a request with this idempotency key is already in progress",
            )
            .into_response();
        }
        Err(err) => {
            warn!(%err, "idempotency lock acquire failed");
            if let Some(res) = store_failure(&state) {
                return res;
            }
            return next.run(req).await;
        }
    }

    if let Some(ctx) = RequestContext::from_extensions(req.extensions()).cloned() {
        req.extensions_mut()
            .insert(ctx.with_idempotency_key(&client_key));
    }

    // Buffering recorder: the handler's response is captured in full so a
    // successful outcome can be persisted and later replayed byte-identically.
    let res = next.run(req).await;
    let (parts, body) = res.into_parts();
    let bytes = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!(%err, "failed to buffer response for idempotency capture");
            state.engine.unlock(&key).await;
            return Response::from_parts(parts, Body::empty());
        }
    };
    let res = Response::from_parts(parts, Body::from(bytes.clone()));

    if res.status().is_success() {
        let cached = CachedResponse {
            status: res.status().as_u16(),
            headers: capture_headers(&res),
            body: bytes.to_vec(),
            created_at: Utc::now(),
        };
        if let Err(err) = state.engine.persist(&key, &cached).await {
            warn!(%err, "failed to persist idempotent response");
        }
    }

    state.engine.unlock(&key).await;
    res
}
