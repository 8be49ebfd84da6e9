//! Observable middleware-order and cross-stage behavior of the assembled
//! pipeline.

mod common;

use axum::body::Body;
use http::{Method, Request, StatusCode};
use tower::ServiceExt;
use uuid::Uuid;

use common::{BEARER, authed_get, harness, read_json};

#[tokio::test]
async fn every_response_carries_tracking_and_security_headers() {
    let h = harness(|_| {});

    let res = h.router.oneshot(authed_get("/v1/devices")).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let headers = res.headers();
    assert!(Uuid::parse_str(headers["request-id"].to_str().unwrap()).is_ok());
    assert!(Uuid::parse_str(headers["correlation-id"].to_str().unwrap()).is_ok());
    assert_eq!(headers["x-content-type-options"], "nosniff");
    assert_eq!(headers["x-frame-options"], "DENY");
    assert_eq!(headers["api-version"], "v1");
    assert!(headers.contains_key("ratelimit-limit"));
    assert!(headers.contains_key("ratelimit-remaining"));
    assert!(headers.contains_key("ratelimit-reset"));
}

#[tokio::test]
async fn problem_responses_still_flow_through_the_outer_stages() {
    let h = harness(|_| {});

    // Unmatched route inside the API prefix: rejected by validation, yet the
    // outer stages (tracking, security headers) still decorate the response.
    let res = h
        .router
        .oneshot(authed_get("/v1/nope"))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    assert!(res.headers().contains_key("request-id"));
    assert_eq!(res.headers()["x-frame-options"], "DENY");

    let doc = read_json(res).await;
    assert_eq!(doc["code"], "NOT_FOUND");
}

#[tokio::test]
async fn validation_rejects_before_idempotency_takes_the_lock() {
    let h = harness(|_| {});

    let res = h
        .router
        .oneshot(
            Request::post("/v1/devices")
                .header("Idempotency-Key", "550e8400-e29b-41d4-a716-446655440001")
                .header("Content-Type", "application/json")
                .body(Body::from(r#"{"name":"n","brand":"b","state":"available"}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    // Validation sits outside the idempotency stage, so no lock or cache
    // entry may exist.
    use gateway_kv::KeyValueStore;
    let keys = h.store.scan("idempotency:", 10).await.unwrap();
    assert!(keys.is_empty(), "unexpected keys: {keys:?}");
}

#[tokio::test]
async fn inbound_ids_are_propagated_end_to_end() {
    let h = harness(|_| {});

    let res = h
        .router
        .oneshot(
            Request::get("/v1/devices")
                .header("Authorization", BEARER)
                .header("Request-Id", "req-pipeline-1")
                .header("Correlation-Id", "corr-pipeline-1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(res.headers()["request-id"], "req-pipeline-1");
    assert_eq!(res.headers()["correlation-id"], "corr-pipeline-1");
}

#[tokio::test]
async fn cors_preflight_short_circuits_with_204() {
    let h = harness(|cfg| cfg.cors.enabled = true);

    let res = h
        .router
        .oneshot(
            Request::builder()
                .method(Method::OPTIONS)
                .uri("/v1/devices")
                .header("Origin", "https://app.example.com")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::NO_CONTENT);
    let headers = res.headers();
    assert_eq!(
        headers["access-control-allow-origin"],
        "https://app.example.com"
    );
    assert!(
        headers["access-control-allow-headers"]
            .to_str()
            .unwrap()
            .contains("Idempotency-Key")
    );
    assert_eq!(headers["access-control-max-age"], "86400");
    // The security stage sits outside CORS and still stamps its headers.
    assert_eq!(headers["x-content-type-options"], "nosniff");
}

#[tokio::test]
async fn health_endpoints_skip_the_api_policies() {
    let h = harness(|cfg| {
        cfg.rate_limit.requests_per_second = 1;
        cfg.rate_limit.burst_size = 0;
    });

    // Far more requests than the limiter would admit for an API route.
    for _ in 0..10 {
        let res = h
            .router
            .clone()
            .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert!(!res.headers().contains_key("ratelimit-limit"));
    }
}

#[tokio::test]
async fn deprecation_headers_appear_when_enabled() {
    let h = harness(|cfg| {
        cfg.deprecation.enabled = true;
        cfg.deprecation.sunset_date = Some("2027-01-01T00:00:00Z".to_owned());
        cfg.deprecation.successor_path = Some("/v2".to_owned());
    });

    let res = h.router.oneshot(authed_get("/v1/devices")).await.unwrap();
    assert_eq!(res.headers()["deprecation"], "true");
    assert_eq!(res.headers()["sunset"], "Fri, 01 Jan 2027 00:00:00 GMT");
    assert_eq!(res.headers()["link"], "</v2>; rel=\"successor-version\"");
}

#[tokio::test]
async fn metrics_endpoint_renders_the_registry() {
    let h = harness(|_| {});

    let _ = h
        .router
        .clone()
        .oneshot(authed_get("/v1/devices"))
        .await
        .unwrap();
    let res = h
        .router
        .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::OK);
    let body = common::read_body(res).await;
    let text = String::from_utf8(body).unwrap();
    assert!(text.contains("test_http_requests_total"));
}

#[tokio::test]
async fn openapi_document_is_served() {
    let h = harness(|_| {});

    let res = h
        .router
        .oneshot(Request::get("/openapi.json").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let doc = read_json(res).await;
    assert!(doc["paths"]["/v1/devices"]["get"].is_object());
}
