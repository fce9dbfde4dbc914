//! Tessel coordinator entry point

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use keeper::{CoordinationStore, RemoteStore};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use coordinator::api::HttpApi;
use coordinator::{Config, Coordinator, HttpShardRpc};

/// Tessel coordinator
#[derive(Parser, Debug)]
#[command(name = "coordinator")]
#[command(about = "Routing and rebalancing coordinator of a Tessel cluster")]
struct Args {
    /// Configuration file (YAML)
    #[arg(short, long)]
    config: Option<String>,

    /// HTTP listen address
    #[arg(long)]
    http_addr: Option<String>,

    /// Keeper service URLs, comma separated
    #[arg(long, value_delimiter = ',')]
    keeper_addrs: Vec<String>,

    /// Instance id written into the leader node
    #[arg(long)]
    instance_id: Option<String>,

    /// Disable the hotspot rebalancer
    #[arg(long)]
    no_rebalance: bool,

    /// Log level
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    if let Some(addr) = args.http_addr {
        config.network.http_addr = addr;
    }
    if !args.keeper_addrs.is_empty() {
        config.keeper.addrs = args.keeper_addrs;
    }
    if let Some(id) = args.instance_id {
        config.coordinator.instance_id = id;
    }
    if args.no_rebalance {
        config.rebalance.enabled = false;
    }
    if let Some(level) = args.log_level {
        config.log.level = level;
    }
    config.validate()?;
    // fix the id once so the leader node and migration locks agree
    config.coordinator.instance_id = config.instance_id();

    let level = match config.log.level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting Tessel coordinator...");
    info!("  Instance: {}", config.coordinator.instance_id);
    info!("  HTTP API: {}", config.network.http_addr);
    info!("  Keeper: {}", config.keeper.addrs.join(", "));

    let store: Arc<dyn CoordinationStore> = RemoteStore::connect(config.keeper.clone()).await?;
    let rpc = Arc::new(HttpShardRpc::new(
        Duration::from_millis(config.shard_client.request_timeout_ms),
        Duration::from_millis(config.shard_client.connect_timeout_ms),
    )?);

    let coordinator = Arc::new(Coordinator::new(&config, store, rpc));
    let _watcher = coordinator.clone().start().await?;
    let _rebalancer = if config.rebalance.enabled {
        info!("Rebalancer every {:?}", config.rebalance.interval());
        Some(coordinator.start_rebalancer(config.rebalance.interval()))
    } else {
        info!("Rebalancer disabled");
        None
    };

    let app = HttpApi::new(coordinator.clone()).router();
    let listener = tokio::net::TcpListener::bind(&config.network.http_addr).await?;
    info!("HTTP API listening on {}", config.network.http_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    info!("Shutting down");
    coordinator.shutdown().await;
    Ok(())
}
