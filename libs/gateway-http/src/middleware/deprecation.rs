//! Deprecation signaling.
//!
//! When enabled the stage stamps `Deprecation: true`, `Sunset` (RFC 1123,
//! parsed from the configured RFC 3339 date) and a `successor-version` link
//! on every response. A sunset date that does not parse drops only the
//! `Sunset` header; the other two are still set.

use axum::extract::Request;
use axum::middleware::Next;
use axum::response::Response;
use chrono::{DateTime, Utc};
use http::{HeaderValue, header};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::headers;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct DeprecationConfig {
    #[serde(default)]
    pub enabled: bool,

    /// RFC 3339 date after which the deprecated surface disappears.
    #[serde(default)]
    pub sunset_date: Option<String>,

    /// Path of the successor version, advertised via a `Link` header.
    #[serde(default)]
    pub successor_path: Option<String>,
}

#[derive(Clone, Default)]
pub struct DeprecationState {
    sunset: Option<HeaderValue>,
    link: Option<HeaderValue>,
}

impl DeprecationState {
    #[must_use]
    pub fn new(cfg: &DeprecationConfig) -> Self {
        let sunset = cfg.sunset_date.as_deref().and_then(|raw| {
            match DateTime::parse_from_rfc3339(raw) {
                Ok(ts) => {
                    let rfc1123 = ts
                        .with_timezone(&Utc)
                        .format("%a, %d %b %Y %H:%M:%S GMT")
                        .to_string();
                    HeaderValue::from_str(&rfc1123).ok()
                }
                Err(err) => {
                    warn!(sunset_date = raw, %err, "invalid sunset date, Sunset header disabled");
                    None
                }
            }
        });

        let link = cfg.successor_path.as_deref().and_then(|path| {
            HeaderValue::from_str(&format!("<{path}>; rel=\"successor-version\"")).ok()
        });

        Self { sunset, link }
    }
}

pub async fn signal_deprecation(state: DeprecationState, req: Request, next: Next) -> Response {
    let mut res = next.run(req).await;
    let h = res.headers_mut();

    h.insert(headers::DEPRECATION, HeaderValue::from_static("true"));
    if let Some(sunset) = &state.sunset {
        h.insert(headers::SUNSET, sunset.clone());
    }
    if let Some(link) = &state.link {
        h.insert(header::LINK, link.clone());
    }
    res
}
