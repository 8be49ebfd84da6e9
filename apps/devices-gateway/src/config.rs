//! Effective gateway configuration.
//!
//! Defaults → YAML file → `DEVGW_*` environment variables, merged with
//! figment. Nested keys use `__` in the environment
//! (`DEVGW_SERVER__PORT=9090`).

use std::path::Path;
use std::time::Duration;

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Yaml};
use gateway_http::middleware::access_log::HealthFilterConfig;
use gateway_http::middleware::compression::CompressionConfig;
use gateway_http::middleware::cors::CorsConfig;
use gateway_http::middleware::deprecation::DeprecationConfig;
use gateway_http::middleware::security_headers::SecurityHeadersConfig;
use gateway_idempotency::IdempotencyConfig;
use gateway_ratelimit::RateLimitConfig;
use gateway_rpc::GrpcClientConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub store: StoreConfig,
    pub security_headers: SecurityHeadersConfig,
    pub cors: CorsConfig,
    pub health: HealthFilterConfig,
    pub idempotency: IdempotencyConfig,
    pub rate_limit: RateLimitConfig,
    pub compression: CompressionConfig,
    pub deprecation: DeprecationConfig,
    /// Downstream devices service.
    pub devices: GrpcClientConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,

    #[serde(with = "gateway_util::humantime_serde")]
    pub read_timeout: Duration,

    /// Also the per-request deadline carried on the request context.
    #[serde(with = "gateway_util::humantime_serde")]
    pub write_timeout: Duration,

    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_owned(),
            port: 8080,
            read_timeout: Duration::from_secs(10),
            write_timeout: Duration::from_secs(30),
            max_body_bytes: 1 << 20,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Json,
    Text,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TelemetryConfig {
    pub log_level: String,
    pub log_format: LogFormat,
    pub metrics_prefix: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_owned(),
            log_format: LogFormat::Json,
            metrics_prefix: "devices_gateway".to_owned(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    Memory,
    Redis,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub redis_url: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            redis_url: "redis://127.0.0.1:6379".to_owned(),
        }
    }
}

/// Load the effective configuration.
///
/// # Errors
/// Returns the figment error when the file or environment contain invalid
/// or unknown keys.
pub fn load(path: Option<&Path>) -> Result<AppConfig, figment::Error> {
    let mut figment = Figment::from(Serialized::defaults(AppConfig::default()));
    if let Some(path) = path {
        figment = figment.merge(Yaml::file(path));
    }
    figment
        .merge(Env::prefixed("DEVGW_").split("__"))
        .extract()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_contract() {
        let cfg = AppConfig::default();

        assert_eq!(cfg.server.port, 8080);
        assert_eq!(cfg.server.write_timeout, Duration::from_secs(30));
        assert_eq!(cfg.idempotency.cache_ttl, Duration::from_secs(24 * 3600));
        assert_eq!(cfg.idempotency.lock_ttl, Duration::from_secs(30));
        assert_eq!(cfg.idempotency.required_methods, vec!["POST".to_owned()]);
        assert_eq!(cfg.rate_limit.requests_per_second, 10);
        assert_eq!(cfg.rate_limit.burst_size, 20);
        assert_eq!(cfg.compression.min_size, 1024);
        assert_eq!(cfg.devices.max_retries, 3);
        assert_eq!(cfg.store.backend, StoreBackend::Memory);
    }

    #[test]
    fn yaml_and_defaults_merge() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "gateway.yaml",
                r"
server:
  port: 9090
rate_limit:
  requests_per_second: 50
",
            )?;
            let cfg = load(Some(Path::new("gateway.yaml"))).expect("load");
            assert_eq!(cfg.server.port, 9090);
            assert_eq!(cfg.rate_limit.requests_per_second, 50);
            // Untouched sections keep their defaults.
            assert_eq!(cfg.rate_limit.burst_size, 20);
            assert_eq!(cfg.server.host, "0.0.0.0");
            Ok(())
        });
    }

    #[test]
    fn environment_overrides_win() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("DEVGW_SERVER__PORT", "7070");
            jail.set_env("DEVGW_STORE__BACKEND", "redis");
            let cfg = load(None).expect("load");
            assert_eq!(cfg.server.port, 7070);
            assert_eq!(cfg.store.backend, StoreBackend::Redis);
            Ok(())
        });
    }
}
