//! Real client address derivation.
//!
//! Trusts `X-Forwarded-For` (first hop) and `X-Real-Ip` in that order, then
//! falls back to the socket peer address when the server registered
//! `ConnectInfo`.

use std::net::{IpAddr, SocketAddr};

use axum::extract::{ConnectInfo, Request};
use axum::middleware::Next;
use axum::response::Response;

use crate::context::ClientIp;
use crate::headers;

fn forwarded_ip(req: &Request) -> Option<IpAddr> {
    if let Some(list) = req.headers().get(&headers::X_FORWARDED_FOR)
        && let Ok(list) = list.to_str()
        && let Some(first) = list.split(',').next()
        && let Ok(ip) = first.trim().parse()
    {
        return Some(ip);
    }

    req.headers()
        .get(&headers::X_REAL_IP)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

pub async fn derive_client_ip(mut req: Request, next: Next) -> Response {
    let ip = forwarded_ip(&req).or_else(|| {
        req.extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip())
    });

    req.extensions_mut().insert(ClientIp(ip));
    next.run(req).await
}

#[cfg(test)]
mod tests {
    use axum::Router;
    use axum::body::Body;
    use axum::routing::get;
    use http::Request;
    use tower::ServiceExt;

    use super::*;

    fn app() -> Router {
        Router::new()
            .route(
                "/probe",
                get(|req: axum::extract::Request| async move {
                    req.extensions()
                        .get::<ClientIp>()
                        .map_or_else(|| "missing".to_owned(), ToString::to_string)
                }),
            )
            .layer(axum::middleware::from_fn(derive_client_ip))
    }

    #[tokio::test]
    async fn prefers_the_first_forwarded_hop() {
        let res = app()
            .oneshot(
                Request::get("/probe")
                    .header("X-Forwarded-For", "203.0.113.7, 10.0.0.1")
                    .header("X-Real-Ip", "198.51.100.9")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let body = axum::body::to_bytes(res.into_body(), 1024).await.unwrap();
        assert_eq!(&body[..], b"203.0.113.7");
    }

    #[tokio::test]
    async fn falls_back_to_x_real_ip() {
        let res = app()
            .oneshot(
                Request::get("/probe")
                    .header("X-Real-Ip", "198.51.100.9")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let body = axum::body::to_bytes(res.into_body(), 1024).await.unwrap();
        assert_eq!(&body[..], b"198.51.100.9");
    }

    #[tokio::test]
    async fn unknown_when_nothing_is_available() {
        let res = app()
            .oneshot(Request::get("/probe").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = axum::body::to_bytes(res.into_body(), 1024).await.unwrap();
        assert_eq!(&body[..], b"unknown");
    }
}
