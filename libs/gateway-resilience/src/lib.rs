#![forbid(unsafe_code)]

//! Resilience primitives for outbound calls.
//!
//! [`CircuitBreaker`] guards a downstream dependency with the classic
//! closed / open / half-open state machine; [`BackoffPolicy`] produces
//! exponential, jittered retry delays. Both are pure in-process primitives —
//! the retry loop that consumes them lives in the RPC adapter.

mod backoff;
mod breaker;

pub use backoff::BackoffPolicy;
pub use breaker::{BreakerError, BreakerState, CircuitBreaker, CircuitBreakerConfig};
