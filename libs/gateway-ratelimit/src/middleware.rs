//! Rate-limit middleware.

use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};

use axum::extract::Request;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use gateway_http::context::{ClientIp, RequestContext};
use gateway_http::headers;
use gateway_http::problem::{Problem, codes};
use gateway_kv::KeyValueStore;
use http::{HeaderValue, StatusCode, header};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::gcra::{Decision, GcraLimiter};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RateLimitConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: u32,

    #[serde(default = "default_burst_size")]
    pub burst_size: u32,

    #[serde(default = "default_enabled")]
    pub enable_ip_limiting: bool,

    #[serde(default)]
    pub enable_user_limiting: bool,

    /// Prefix matches that bypass the limiter entirely.
    #[serde(default = "default_skip_paths")]
    pub skip_paths: Vec<String>,

    /// Pass through instead of failing closed when the store is down.
    #[serde(default = "default_enabled")]
    pub graceful_degraded: bool,
}

fn default_enabled() -> bool {
    true
}

fn default_requests_per_second() -> u32 {
    10
}

fn default_burst_size() -> u32 {
    20
}

fn default_skip_paths() -> Vec<String> {
    vec!["/healthz".to_owned(), "/readyz".to_owned()]
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            requests_per_second: default_requests_per_second(),
            burst_size: default_burst_size(),
            enable_ip_limiting: true,
            enable_user_limiting: false,
            skip_paths: default_skip_paths(),
            graceful_degraded: true,
        }
    }
}

#[derive(Clone)]
pub struct RateLimitState {
    enabled: bool,
    limiter: Arc<GcraLimiter>,
    by_ip: bool,
    by_user: bool,
    skip_paths: Arc<Vec<String>>,
    graceful_degraded: bool,
}

impl RateLimitState {
    #[must_use]
    pub fn new(cfg: &RateLimitConfig, store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            enabled: cfg.enabled,
            limiter: Arc::new(GcraLimiter::new(
                store,
                cfg.requests_per_second,
                cfg.burst_size,
            )),
            by_ip: cfg.enable_ip_limiting,
            by_user: cfg.enable_user_limiting,
            skip_paths: Arc::new(cfg.skip_paths.clone()),
            graceful_degraded: cfg.graceful_degraded,
        }
    }

    fn skipped(&self, path: &str) -> bool {
        self.skip_paths.iter().any(|p| path.starts_with(p))
    }

    /// Key composition: `ip:<ip>|user:<sub>` when both dimensions are on,
    /// one part when only one is, a shared global cell otherwise.
    fn key_for(&self, req: &Request) -> String {
        let ip = self.by_ip.then(|| {
            req.extensions()
                .get::<ClientIp>()
                .copied()
                .unwrap_or(ClientIp(None))
                .to_string()
        });
        let user = self.by_user.then(|| {
            RequestContext::from_extensions(req.extensions())
                .and_then(|ctx| ctx.subject.as_deref().map(str::to_owned))
                .unwrap_or_else(|| "anonymous".to_owned())
        });

        match (ip, user) {
            (Some(ip), Some(user)) => format!("ip:{ip}|user:{user}"),
            (Some(ip), None) => format!("ip:{ip}"),
            (None, Some(user)) => format!("user:{user}"),
            (None, None) => "global".to_owned(),
        }
    }
}

fn apply_headers(headers_mut: &mut http::HeaderMap, decision: &Decision) {
    let reset_unix = decision
        .reset_at
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs();

    if let Ok(v) = HeaderValue::from_str(&decision.limit.to_string()) {
        headers_mut.insert(headers::RATELIMIT_LIMIT, v);
    }
    if let Ok(v) = HeaderValue::from_str(&decision.remaining.to_string()) {
        headers_mut.insert(headers::RATELIMIT_REMAINING, v);
    }
    if let Ok(v) = HeaderValue::from_str(&reset_unix.to_string()) {
        headers_mut.insert(headers::RATELIMIT_RESET, v);
    }
}

/// Seconds a refused caller should wait, never less than one.
fn retry_after_secs(retry_after: Duration) -> u64 {
    let secs = retry_after.as_secs_f64().ceil();
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let secs = secs as u64;
    secs.max(1)
}

pub async fn limit_requests(state: RateLimitState, req: Request, next: Next) -> Response {
    if !state.enabled || state.skipped(req.uri().path()) {
        return next.run(req).await;
    }

    let key = state.key_for(&req);
    let decision = match state.limiter.check(&key).await {
        Ok(decision) => decision,
        Err(err) => {
            if state.graceful_degraded {
                warn!(%err, key, "rate-limit store unavailable, passing through");
                return next.run(req).await;
            }
            return Problem::service_unavailable(
                codes::RATE_LIMITER_UNAVAILABLE,
                "rate limiter is unavailable",
            )
            .into_response();
        }
    };

    if !decision.allowed {
        let mut res = Problem::new(
            StatusCode::TOO_MANY_REQUESTS,
            codes::RATE_LIMIT_EXCEEDED,
            "rate limit exceeded, slow down",
        )
        .into_response();
        apply_headers(res.headers_mut(), &decision);
        let secs = retry_after_secs(decision.retry_after.unwrap_or_default());
        if let Ok(v) = HeaderValue::from_str(&secs.to_string()) {
            res.headers_mut().insert(header::RETRY_AFTER, v);
        }
        return res;
    }

    let mut res = next.run(req).await;
    apply_headers(res.headers_mut(), &decision);
    res
}
