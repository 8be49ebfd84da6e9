//! Conditional GET with strong ETags.
//!
//! Active for `GET` and `HEAD` only. The downstream response is buffered,
//! a strong ETag (16 hex digits of the 64-bit xxh3 of the uncompressed body)
//! is computed, and a matching `If-None-Match` short-circuits to 304 with no
//! body. The stage sits inside the compression stage, so the hash always
//! covers identity bytes.

use axum::body::Body;
use axum::extract::Request;
use axum::middleware::Next;
use axum::response::Response;
use http::{HeaderValue, Method, StatusCode, header};
use xxhash_rust::xxh3::xxh3_64;

/// Strong ETag for a body: 64-bit hash rendered as 16 hex digits.
#[must_use]
pub fn etag_of(body: &[u8]) -> String {
    format!("{:016x}", xxh3_64(body))
}

fn if_none_match_matches(header_value: &str, quoted_etag: &str) -> bool {
    if header_value.trim() == "*" {
        return true;
    }
    header_value.split(',').any(|entry| {
        let entry = entry.trim();
        entry == quoted_etag
            || entry
                .strip_prefix("W/")
                .is_some_and(|weak| weak == quoted_etag)
    })
}

pub async fn conditional_get(req: Request, next: Next) -> Response {
    if req.method() != Method::GET && req.method() != Method::HEAD {
        return next.run(req).await;
    }

    let if_none_match = req
        .headers()
        .get(header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);

    let res = next.run(req).await;
    if res.status() >= StatusCode::MULTIPLE_CHOICES {
        return res;
    }

    let (mut parts, body) = res.into_parts();
    let bytes = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(_) => return Response::from_parts(parts, Body::empty()),
    };

    let quoted = format!("\"{}\"", etag_of(&bytes));
    let etag_value =
        HeaderValue::from_str(&quoted).unwrap_or_else(|_| HeaderValue::from_static("\"\""));
    parts.headers.insert(header::ETAG, etag_value);

    let matched = if_none_match
        .as_deref()
        .is_some_and(|inm| if_none_match_matches(inm, &quoted));
    if matched {
        parts.status = StatusCode::NOT_MODIFIED;
        parts.headers.remove(header::CONTENT_LENGTH);
        return Response::from_parts(parts, Body::empty());
    }

    Response::from_parts(parts, Body::from(bytes))
}

#[cfg(test)]
mod tests {
    use axum::Router;
    use axum::routing::{get, post};
    use http::Request;
    use tower::ServiceExt;

    use super::*;

    fn app() -> Router {
        Router::new()
            .route("/doc", get(|| async { "stable body" }))
            .route("/doc", post(|| async { "created" }))
            .route(
                "/missing",
                get(|| async { (StatusCode::NOT_FOUND, "nope") }),
            )
            .layer(axum::middleware::from_fn(conditional_get))
    }

    async fn get_etag() -> String {
        let res = app()
            .oneshot(Request::get("/doc").body(Body::empty()).unwrap())
            .await
            .unwrap();
        res.headers()[header::ETAG].to_str().unwrap().to_owned()
    }

    #[test]
    fn etag_is_deterministic_and_body_sensitive() {
        assert_eq!(etag_of(b"abc"), etag_of(b"abc"));
        assert_ne!(etag_of(b"abc"), etag_of(b"abd"));
        assert_eq!(etag_of(b"abc").len(), 16);
    }

    #[tokio::test]
    async fn tags_successful_get_responses() {
        let etag = get_etag().await;
        assert!(etag.starts_with('"') && etag.ends_with('"'));
        assert_eq!(etag.len(), 18);
    }

    #[tokio::test]
    async fn matching_if_none_match_returns_304_without_body() {
        let etag = get_etag().await;
        let res = app()
            .oneshot(
                Request::get("/doc")
                    .header("If-None-Match", &etag)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(res.status(), StatusCode::NOT_MODIFIED);
        assert_eq!(res.headers()[header::ETAG].to_str().unwrap(), etag);
        let body = axum::body::to_bytes(res.into_body(), 1024).await.unwrap();
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn star_matches_any_representation() {
        let res = app()
            .oneshot(
                Request::get("/doc")
                    .header("If-None-Match", "*")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::NOT_MODIFIED);
    }

    #[tokio::test]
    async fn weak_comparison_matches() {
        let etag = get_etag().await;
        let res = app()
            .oneshot(
                Request::get("/doc")
                    .header("If-None-Match", format!("W/{etag}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::NOT_MODIFIED);
    }

    #[tokio::test]
    async fn non_matching_list_entry_returns_the_body() {
        let res = app()
            .oneshot(
                Request::get("/doc")
                    .header("If-None-Match", "\"0000000000000000\", \"ffffffffffffffff\"")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(res.status(), StatusCode::OK);
        let body = axum::body::to_bytes(res.into_body(), 1024).await.unwrap();
        assert_eq!(&body[..], b"stable body");
    }

    #[tokio::test]
    async fn non_get_methods_bypass_the_stage() {
        let res = app()
            .oneshot(Request::post("/doc").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert!(!res.headers().contains_key(header::ETAG));
    }

    #[tokio::test]
    async fn error_statuses_flush_unchanged() {
        let res = app()
            .oneshot(
                Request::get("/missing")
                    .header("If-None-Match", "*")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
        assert!(!res.headers().contains_key(header::ETAG));
    }
}
