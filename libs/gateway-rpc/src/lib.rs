#![forbid(unsafe_code)]

//! Outbound RPC adapter.
//!
//! Every admitted gateway request that reaches a use-case turns into a unary
//! gRPC call executed through [`adapter::RpcAdapter::call_unary`]:
//! request metadata is stamped from the request context (correlation id,
//! request id, idempotency key), the named circuit breaker guards the whole
//! attempt sequence, transient statuses are retried with jittered
//! exponential backoff, and each attempt runs under its own timeout.

pub mod adapter;
pub mod client;
pub mod error;

pub use adapter::RpcAdapter;
pub use client::GrpcClientConfig;
pub use error::RpcError;
