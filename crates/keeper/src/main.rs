//! Keeper coordination service entry point

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use keeper::api::HttpApi;
use keeper::Keeper;

/// Keeper - coordination store for a Tessel cluster
#[derive(Parser, Debug)]
#[command(name = "keeper")]
#[command(about = "Hierarchical coordination store with ephemeral nodes and watches")]
struct Args {
    /// HTTP listen address
    #[arg(long, default_value = "0.0.0.0:2181")]
    http_addr: String,

    /// Session TTL when the client does not ask for one (ms)
    #[arg(long, default_value = "6000")]
    default_ttl_ms: u64,

    /// Lease reaper interval (ms)
    #[arg(long, default_value = "500")]
    reap_interval_ms: u64,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let keeper = Arc::new(Keeper::new(Duration::from_millis(args.default_ttl_ms)));
    let _reaper = keeper
        .clone()
        .start_reaper(Duration::from_millis(args.reap_interval_ms));

    let app = HttpApi::new(keeper).router();
    let listener = tokio::net::TcpListener::bind(&args.http_addr).await?;
    info!("Keeper listening on {}", args.http_addr);
    axum::serve(listener, app).await?;

    Ok(())
}
