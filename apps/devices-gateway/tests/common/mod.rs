//! Shared harness: the production pipeline over in-memory backends.
#![allow(dead_code)]

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use devices_gateway::config::AppConfig;
use devices_gateway::server::{Dependencies, build_router};
use devices_module::rpc::DevicesRpc;
use devices_module::testing::InMemoryDevices;
use gateway_http::middleware::metrics::HttpMetrics;
use gateway_kv::memory::MemoryStore;
use http::Request;

pub const BEARER: &str = "Bearer v4.public.eyJzdWIiOiJ0ZXN0ZXIifQ";

pub struct Harness {
    pub router: Router,
    pub rpc: Arc<InMemoryDevices>,
    pub store: Arc<MemoryStore>,
}

pub fn harness(mutate: impl FnOnce(&mut AppConfig)) -> Harness {
    let mut cfg = AppConfig::default();
    mutate(&mut cfg);

    let store = Arc::new(MemoryStore::new());
    let rpc = Arc::new(InMemoryDevices::new());
    let deps = Dependencies {
        store: store.clone(),
        devices: rpc.clone(),
        metrics: Arc::new(HttpMetrics::new("test").expect("metrics")),
    };

    Harness {
        router: build_router(&cfg, &deps).expect("router"),
        rpc,
        store,
    }
}

pub fn with_custom_rpc(
    mutate: impl FnOnce(&mut AppConfig),
    devices: Arc<dyn DevicesRpc>,
) -> Router {
    let mut cfg = AppConfig::default();
    mutate(&mut cfg);

    let deps = Dependencies {
        store: Arc::new(MemoryStore::new()),
        devices,
        metrics: Arc::new(HttpMetrics::new("test").expect("metrics")),
    };
    build_router(&cfg, &deps).expect("router")
}

pub fn authed_get(path: &str) -> Request<Body> {
    Request::get(path)
        .header("Authorization", BEARER)
        .body(Body::empty())
        .unwrap()
}

pub async fn read_body(res: axum::response::Response) -> Vec<u8> {
    axum::body::to_bytes(res.into_body(), 1 << 22)
        .await
        .unwrap()
        .to_vec()
}

pub async fn read_json(res: axum::response::Response) -> serde_json::Value {
    serde_json::from_slice(&read_body(res).await).unwrap()
}
