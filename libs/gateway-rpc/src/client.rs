//! gRPC transport configuration.
//!
//! Transport-level concerns only: endpoint, timeouts, HTTP/2 keepalive.
//! Retries, breaker and metadata live in [`crate::adapter`].

use std::time::Duration;

use gateway_resilience::{BackoffPolicy, CircuitBreakerConfig};
use serde::{Deserialize, Serialize};
use tonic::transport::{Channel, Endpoint};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GrpcClientConfig {
    /// Downstream endpoint, e.g. `http://devices-svc:50051`.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_connect_timeout", with = "gateway_util::humantime_serde")]
    pub connect_timeout: Duration,

    /// Per-call timeout. Zero disables the per-call deadline.
    #[serde(default = "default_call_timeout", with = "gateway_util::humantime_serde")]
    pub call_timeout: Duration,

    /// Retry attempts on top of the initial call.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default)]
    pub backoff: BackoffPolicy,

    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
}

fn default_endpoint() -> String {
    "http://127.0.0.1:50051".to_owned()
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_call_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_max_retries() -> u32 {
    3
}

impl Default for GrpcClientConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            connect_timeout: default_connect_timeout(),
            call_timeout: default_call_timeout(),
            max_retries: default_max_retries(),
            backoff: BackoffPolicy::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }
}

fn build_endpoint(cfg: &GrpcClientConfig) -> Result<Endpoint, tonic::transport::Error> {
    let endpoint = Endpoint::from_shared(cfg.endpoint.clone())?
        .connect_timeout(cfg.connect_timeout)
        .tcp_keepalive(Some(Duration::from_secs(30)))
        .http2_keep_alive_interval(Duration::from_secs(30))
        .keep_alive_timeout(Duration::from_secs(10))
        .keep_alive_while_idle(true);
    Ok(endpoint)
}

/// Open a lazily connecting channel with the configured transport stack.
///
/// The gateway boots regardless of downstream availability; the readiness
/// probe and the circuit breaker report the channel's actual health.
///
/// # Errors
/// Returns the transport error when the endpoint URI is invalid.
pub fn open_channel(cfg: &GrpcClientConfig) -> Result<Channel, tonic::transport::Error> {
    let endpoint = build_endpoint(cfg)?;
    tracing::info!(
        endpoint = %cfg.endpoint,
        connect_timeout_ms = u64::try_from(cfg.connect_timeout.as_millis()).unwrap_or(u64::MAX),
        call_timeout_ms = u64::try_from(cfg.call_timeout.as_millis()).unwrap_or(u64::MAX),
        "opening gRPC channel"
    );
    Ok(endpoint.connect_lazy())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lazy_channel_opens_without_a_listener() {
        let cfg = GrpcClientConfig::default();
        assert!(open_channel(&cfg).is_ok());
    }

    #[test]
    fn invalid_endpoint_is_rejected() {
        let cfg = GrpcClientConfig {
            endpoint: "not a uri".to_owned(),
            ..GrpcClientConfig::default()
        };
        assert!(open_channel(&cfg).is_err());
    }
}
