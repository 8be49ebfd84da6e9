#![forbid(unsafe_code)]

//! GCRA rate limiting over the shared key-value store.
//!
//! One int64 theoretical-arrival-time cell per key, updated with
//! compare-and-swap, makes rate decisions O(1) and linearizable per key
//! across gateway replicas. The axum middleware layers the standard
//! `RateLimit-*` headers on every admitted response and converts refusals
//! into 429 problem documents with `Retry-After`.

mod gcra;
mod middleware;

pub use gcra::{Decision, GcraLimiter};
pub use middleware::{RateLimitConfig, RateLimitState, limit_requests};
