use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::sync::mpsc;
use topomap::{
    actors::{BroadcastHandle, WatcherHandle},
    api::{ApiConfig, ApiState, spawn_api_server},
    config::{Config, read_config_file},
    probe::ping::PingProber,
    status::StatusCache,
    store::TopologyStore,
};
use tracing::{info, level_filters::LevelFilter, trace, warn};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

/// Queue between the change watcher and the broadcaster
const CHANGE_QUEUE_SIZE: usize = 256;

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Config file
    #[arg(short)]
    file: Option<String>,
}

fn init() {
    let filter = filter::Targets::new().with_targets(vec![
        ("topomap", LevelFilter::TRACE),
        ("topomap_hub", LevelFilter::TRACE),
        ("tower_http", LevelFilter::DEBUG),
    ]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init();
    let args = Args::parse();
    trace!("started with args: {args:?}");

    let config = match &args.file {
        Some(path) => read_config_file(path)?,
        None => Config::default(),
    }
    .with_env_overrides();

    let bind_addr: SocketAddr = config
        .bind_addr
        .parse()
        .with_context(|| format!("invalid bind address {}", config.bind_addr))?;

    let store = TopologyStore::open(&config.data_dir).await?;
    info!(
        "serving {} properties from {}",
        store.len().await,
        config.data_dir.display()
    );

    let probe = &config.probe;
    let prober = PingProber::new(probe.count, probe.timeout(), probe.workers);
    let status = StatusCache::new(Arc::new(prober), config.cache_ttl());

    let (event_tx, event_rx) = mpsc::channel(CHANGE_QUEUE_SIZE);
    let broadcaster = BroadcastHandle::spawn(event_rx);
    let watcher = WatcherHandle::spawn(
        config.data_dir.clone(),
        store.clone(),
        event_tx,
        &config.watcher,
    )
    .await?;

    if config.auth_token.is_none() {
        warn!("no auth token configured, the API is open to anyone who can reach it");
    }

    let api_config = ApiConfig {
        bind_addr,
        auth_token: config.auth_token.clone(),
        enable_cors: true,
    };
    let addr = spawn_api_server(api_config, ApiState::new(store, status, broadcaster.clone()))
        .await?;
    info!("hub ready on {addr}");

    tokio::signal::ctrl_c().await?;
    info!("shutting down");

    watcher.shutdown().await.ok();
    broadcaster.shutdown().await.ok();

    Ok(())
}
