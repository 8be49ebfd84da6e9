#![forbid(unsafe_code)]

//! Distributed idempotency for mutating requests.
//!
//! A client-supplied `Idempotency-Key` turns a POST into a logical operation
//! that executes at most once per (method, path, key). The engine coordinates
//! replicas through the shared store: a short-lived lock guarantees a single
//! handler execution, and successful responses are cached and replayed
//! byte-identically with an `Idempotent-Replayed: true` marker.

mod engine;
mod key;
mod middleware;

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use engine::{CachedResponse, IdempotencyEngine};
pub use key::{KeyError, storage_key, validate_key};
pub use middleware::{IdempotencyState, enforce_idempotency};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IdempotencyConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// How long a cached response is replayable.
    #[serde(default = "default_cache_ttl", with = "gateway_util::humantime_serde")]
    pub cache_ttl: Duration,

    /// Upper bound on how long an in-flight request holds its lock.
    #[serde(default = "default_lock_ttl", with = "gateway_util::humantime_serde")]
    pub lock_ttl: Duration,

    /// Methods the engine engages for.
    #[serde(default = "default_required_methods")]
    pub required_methods: Vec<String>,

    #[serde(default = "default_header_name")]
    pub header_name: String,

    #[serde(default = "default_replayed_header")]
    pub replayed_header: String,

    /// Pass through instead of failing closed when the store is down.
    #[serde(default = "default_enabled")]
    pub graceful_degraded: bool,
}

fn default_enabled() -> bool {
    true
}

fn default_cache_ttl() -> Duration {
    Duration::from_secs(24 * 60 * 60)
}

fn default_lock_ttl() -> Duration {
    Duration::from_secs(30)
}

fn default_required_methods() -> Vec<String> {
    vec!["POST".to_owned()]
}

fn default_header_name() -> String {
    "Idempotency-Key".to_owned()
}

fn default_replayed_header() -> String {
    "Idempotent-Replayed".to_owned()
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cache_ttl: default_cache_ttl(),
            lock_ttl: default_lock_ttl(),
            required_methods: default_required_methods(),
            header_name: default_header_name(),
            replayed_header: default_replayed_header(),
            graceful_degraded: true,
        }
    }
}
