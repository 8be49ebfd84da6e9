//! The middleware leaves of the pipeline.
//!
//! Each stage is an `axum::middleware::from_fn`-style async function plus its
//! config/state types. Stage order is load-bearing and owned by the server
//! binary; see the pipeline assembly there.

pub mod access_log;
pub mod client_ip;
pub mod compression;
pub mod conditional;
pub mod cors;
pub mod deprecation;
pub mod metrics;
pub mod recovery;
pub mod request_tracking;
pub mod security_headers;
pub mod trace;
pub mod validation;
