use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use devices_module::rpc::GrpcDevices;
use gateway_http::middleware::metrics::HttpMetrics;
use gateway_kv::KeyValueStore;
use gateway_kv::memory::MemoryStore;
use gateway_kv::redis::RedisStore;
use gateway_rpc::RpcAdapter;
use gateway_rpc::client::open_channel;
use tokio_util::sync::CancellationToken;

use devices_gateway::config::{self, AppConfig, StoreBackend};
use devices_gateway::server::{self, Dependencies};
use devices_gateway::telemetry;

/// Devices Gateway - HTTP front door for the devices RPC service
#[derive(Parser)]
#[command(name = "devices-gateway")]
#[command(about = "Devices Gateway - HTTP front door for the devices RPC service")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port override for the HTTP server (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Print effective configuration (JSON) and exit
    #[arg(long)]
    print_config: bool,

    /// Log verbosity level (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the server
    Run,
    /// Validate configuration and exit
    Check,
}

async fn build_store(cfg: &AppConfig) -> Result<Arc<dyn KeyValueStore>> {
    let store: Arc<dyn KeyValueStore> = match cfg.store.backend {
        StoreBackend::Memory => Arc::new(MemoryStore::new()),
        StoreBackend::Redis => Arc::new(
            RedisStore::connect(&cfg.store.redis_url)
                .await
                .context("connecting to the redis store")?,
        ),
    };

    // The coordination primitives are load-bearing: a store that cannot
    // provide them must keep the gateway from booting.
    store
        .ping()
        .await
        .context("verifying the store's atomic primitives")?;
    Ok(store)
}

async fn run(cfg: AppConfig) -> Result<()> {
    let store = build_store(&cfg).await?;

    let channel = open_channel(&cfg.devices).context("opening the devices channel")?;
    let adapter = Arc::new(RpcAdapter::new("devices", &cfg.devices));
    let devices = Arc::new(GrpcDevices::new(channel, adapter));

    let metrics = Arc::new(
        HttpMetrics::new(&cfg.telemetry.metrics_prefix).context("registering HTTP metrics")?,
    );

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        tracing::info!("shutdown signal received");
        signal_token.cancel();
    });

    let deps = Dependencies {
        store,
        devices,
        metrics,
    };
    server::serve(&cfg, &deps, shutdown).await
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => tracing::warn!(%err, "cannot listen for SIGTERM"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut cfg = config::load(cli.config.as_deref()).context("loading configuration")?;
    if let Some(port) = cli.port {
        cfg.server.port = port;
    }

    if cli.print_config {
        println!("{}", serde_json::to_string_pretty(&cfg)?);
        return Ok(());
    }

    match cli.command {
        Some(Commands::Check) => {
            println!("configuration OK");
            Ok(())
        }
        Some(Commands::Run) | None => {
            telemetry::init(&cfg.telemetry, cli.verbose)?;
            run(cfg).await
        }
    }
}
