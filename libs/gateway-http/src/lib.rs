#![forbid(unsafe_code)]

//! HTTP pipeline building blocks for the devices gateway.
//!
//! This crate holds the middleware leaves of the request pipeline (tracking,
//! security headers, CORS, panic recovery, validation, deprecation,
//! compression, conditional GET, access log, metrics, tracing) together with
//! the shared request context and the problem-document error shape. The
//! composed pipeline — including the rate-limit and idempotency stages from
//! their own crates — is assembled by the server binary.

pub mod context;
pub mod headers;
pub mod middleware;
pub mod otel;
pub mod problem;

pub use context::{ClientIp, RequestContext};
pub use problem::{Problem, codes};
