//! Header names the gateway reads and writes.

use http::HeaderName;

pub const REQUEST_ID: HeaderName = HeaderName::from_static("request-id");
pub const CORRELATION_ID: HeaderName = HeaderName::from_static("correlation-id");
pub const API_VERSION: HeaderName = HeaderName::from_static("api-version");

pub const IDEMPOTENCY_KEY: HeaderName = HeaderName::from_static("idempotency-key");
pub const IDEMPOTENT_REPLAYED: HeaderName = HeaderName::from_static("idempotent-replayed");

pub const RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("ratelimit-limit");
pub const RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("ratelimit-remaining");
pub const RATELIMIT_RESET: HeaderName = HeaderName::from_static("ratelimit-reset");

pub const DEPRECATION: HeaderName = HeaderName::from_static("deprecation");
pub const SUNSET: HeaderName = HeaderName::from_static("sunset");

pub const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
pub const X_REAL_IP: HeaderName = HeaderName::from_static("x-real-ip");

pub const TRACEPARENT: HeaderName = HeaderName::from_static("traceparent");
