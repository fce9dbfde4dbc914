//! Tessel shard node entry point

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use keeper::{CoordinationStore, RemoteStore};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use tessel::api::HttpApi;
use tessel::{Config, HttpPeerClient, ShardNode, SqliteEngine};

/// Tessel shard node
#[derive(Parser, Debug)]
#[command(name = "tessel")]
#[command(about = "Shard node of a Tessel sharded SQL cluster")]
struct Args {
    /// Configuration file (YAML)
    #[arg(short, long)]
    config: Option<String>,

    /// HTTP listen address
    #[arg(long)]
    http_addr: Option<String>,

    /// Address advertised to peers and the coordinator
    #[arg(long)]
    advertise_addr: Option<String>,

    /// Keeper service URLs, comma separated
    #[arg(long, value_delimiter = ',')]
    keeper_addrs: Vec<String>,

    /// SQLite database path
    #[arg(long)]
    db_path: Option<String>,

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
    if let Some(addr) = args.advertise_addr {
        config.node.advertise_addr = addr;
    }
    if !args.keeper_addrs.is_empty() {
        config.keeper.addrs = args.keeper_addrs;
    }
    if let Some(path) = args.db_path {
        config.database.path = path.into();
    }
    if let Some(level) = args.log_level {
        config.log.level = level;
    }
    config.validate()?;

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

    info!("Starting Tessel shard node...");
    info!("  Advertise: {}", config.node.advertise_addr);
    info!("  HTTP: {}", config.network.http_addr);
    info!("  Keeper: {}", config.keeper.addrs.join(", "));
    info!("  Database: {}", config.database.path.display());

    let store: Arc<dyn CoordinationStore> = RemoteStore::connect(config.keeper.clone()).await?;
    let engine = Arc::new(SqliteEngine::open(&config.database.path)?);
    let peers = Arc::new(HttpPeerClient::new(
        Duration::from_millis(config.replication.peer_timeout_ms),
        Duration::from_millis(config.replication.peer_connect_timeout_ms),
    )?);

    let node = Arc::new(ShardNode::new(&config, store, engine, peers));
    let (outcome, _watcher) = node.clone().start().await?;
    info!("Membership: {:?}", outcome);

    let app = HttpApi::new(node.clone()).router();
    let listener = tokio::net::TcpListener::bind(&config.network.http_addr).await?;
    info!("HTTP API listening on {}", config.network.http_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    info!("Shutting down");
    node.shutdown().await;
    Ok(())
}
