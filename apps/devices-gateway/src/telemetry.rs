//! Logging and trace-context plumbing for the binary.

use anyhow::Context as _;
use opentelemetry::global;
use opentelemetry_sdk::propagation::{BaggagePropagator, TraceContextPropagator};
use tracing_subscriber::EnvFilter;

use crate::config::{LogFormat, TelemetryConfig};

fn level_for(cfg: &TelemetryConfig, verbosity: u8) -> String {
    match verbosity {
        0 => cfg.log_level.clone(),
        1 => "info".to_owned(),
        2 => "debug".to_owned(),
        _ => "trace".to_owned(),
    }
}

/// Install the tracing subscriber and the W3C propagators
/// (TraceContext + Baggage).
///
/// # Errors
/// Returns an error when a global subscriber is already set.
pub fn init(cfg: &TelemetryConfig, verbosity: u8) -> anyhow::Result<()> {
    global::set_text_map_propagator(
        opentelemetry::propagation::TextMapCompositePropagator::new(vec![
            Box::new(TraceContextPropagator::new()),
            Box::new(BaggagePropagator::new()),
        ]),
    );

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level_for(cfg, verbosity)));

    match cfg.log_format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .flatten_event(true)
            .with_env_filter(filter)
            .try_init(),
        LogFormat::Text => tracing_subscriber::fmt()
            .compact()
            .with_env_filter(filter)
            .try_init(),
    }
    .map_err(|err| anyhow::anyhow!(err))
    .context("installing the tracing subscriber")
}
