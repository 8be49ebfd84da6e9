//! Security response headers.

use axum::extract::Request;
use axum::middleware::Next;
use axum::response::Response;
use http::HeaderValue;
use http::header;
use serde::{Deserialize, Serialize};

use crate::headers;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SecurityHeadersConfig {
    /// Value of the `API-Version` header stamped on every response.
    #[serde(default = "default_api_version")]
    pub api_version: String,

    #[serde(default = "default_hsts")]
    pub strict_transport_security: String,

    #[serde(default = "default_csp")]
    pub content_security_policy: String,
}

fn default_api_version() -> String {
    "v1".to_owned()
}

fn default_hsts() -> String {
    "max-age=63072000; includeSubDomains".to_owned()
}

fn default_csp() -> String {
    "default-src 'none'; frame-ancestors 'none'".to_owned()
}

impl Default for SecurityHeadersConfig {
    fn default() -> Self {
        Self {
            api_version: default_api_version(),
            strict_transport_security: default_hsts(),
            content_security_policy: default_csp(),
        }
    }
}

pub async fn set_security_headers(
    cfg: SecurityHeadersConfig,
    req: Request,
    next: Next,
) -> Response {
    let mut res = next.run(req).await;
    let h = res.headers_mut();

    h.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    h.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    h.insert(
        header::REFERRER_POLICY,
        HeaderValue::from_static("no-referrer"),
    );
    h.insert(
        http::HeaderName::from_static("permissions-policy"),
        HeaderValue::from_static("camera=(), microphone=(), geolocation=()"),
    );
    if let Ok(v) = HeaderValue::from_str(&cfg.strict_transport_security) {
        h.insert(header::STRICT_TRANSPORT_SECURITY, v);
    }
    if let Ok(v) = HeaderValue::from_str(&cfg.content_security_policy) {
        h.insert(header::CONTENT_SECURITY_POLICY, v);
    }
    if let Ok(v) = HeaderValue::from_str(&cfg.api_version) {
        h.insert(headers::API_VERSION, v);
    }

    res
}
