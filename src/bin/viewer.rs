//! Headless topology viewer
//!
//! Mirrors every property from the hub, follows its change stream, polls health
//! for the addresses on the open map and keeps a local copy for offline starts.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio::sync::mpsc;
use topomap::client::{
    BackendClient, ClientTopologyModel, LocalMirror, PollerHandle, config::Config,
    websocket::{SyncClient, SyncEvent},
};
use tracing::{debug, error, info, level_filters::LevelFilter, warn};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "topomap-viewer")]
#[command(about = "Headless client for the topology hub", long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Hub URL (overrides config file)
    #[arg(short, long, value_name = "URL")]
    url: Option<String>,

    /// API authentication token (overrides config file)
    #[arg(short, long, value_name = "TOKEN")]
    token: Option<String>,

    /// Property to open (defaults to the first one)
    #[arg(short, long, value_name = "ID")]
    property: Option<String>,
}

fn init() {
    let filter = filter::Targets::new().with_targets(vec![
        ("topomap", LevelFilter::DEBUG),
        ("topomap_viewer", LevelFilter::TRACE),
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

/// Fill the model from the hub, or from the mirror when the hub is unreachable
async fn bootstrap(
    model: &mut ClientTopologyModel,
    backend: &BackendClient,
    mirror: &LocalMirror,
) -> Result<()> {
    let snapshot = match backend.list_properties().await {
        Ok(snapshot) => snapshot,
        Err(e) => {
            warn!("hub unreachable ({e:#}), loading local mirror");
            mirror.load().await?
        }
    };

    let skipped = model.load_index(snapshot);
    if skipped > 0 {
        warn!("skipped {skipped} invalid properties");
    }
    info!("loaded {} properties", model.properties().count());
    Ok(())
}

fn open_initial(model: &mut ClientTopologyModel, wanted: Option<&str>) {
    if model.active().is_some() {
        return;
    }

    let id = match wanted {
        Some(id) => Some(id.to_string()),
        None => model.properties().next().map(|p| p.id.clone()),
    };
    if let Some(id) = id {
        if model.open(&id) {
            info!("opened property {id}");
        } else {
            warn!("property {id} not found");
        }
    }
}

async fn save_mirror(model: &ClientTopologyModel, mirror: &LocalMirror) {
    if let Err(e) = mirror.save(&model.snapshot()).await {
        error!("failed to save local mirror: {e:#}");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init();
    let args = Args::parse();

    let mut config = Config::load(args.config.as_deref())?;
    if let Some(url) = args.url {
        config.api_url = url;
    }
    if let Some(token) = args.token {
        config.api_token = Some(token);
    }
    debug!("viewer config: {config:?}");

    let backend = BackendClient::new(&config.api_url, config.api_token.clone());
    let mirror = LocalMirror::new(config.mirror_path());
    let mut model = ClientTopologyModel::new(config.image_size());

    bootstrap(&mut model, &backend, &mirror).await?;
    open_initial(&mut model, args.property.as_deref());

    let mut sync_rx = SyncClient::new(&config.api_url, config.api_token.clone()).connect();

    let (update_tx, mut update_rx) = mpsc::channel(64);
    let poller = PollerHandle::spawn(
        Arc::new(backend.clone()),
        config.poll_interval(),
        update_tx,
    );
    poller.set_addresses(model.visible_addresses());

    let mut autosave = tokio::time::interval(config.autosave_interval());
    autosave.tick().await;

    loop {
        tokio::select! {
            event = sync_rx.recv() => {
                match event {
                    Some(SyncEvent::Connected) => {
                        if let Err(e) = bootstrap(&mut model, &backend, &mirror).await {
                            error!("re-sync failed: {e:#}");
                        }
                        open_initial(&mut model, args.property.as_deref());
                    }
                    Some(SyncEvent::Message(text)) => {
                        if let Err(e) = model.apply_remote_text(&text) {
                            warn!("ignoring change message: {e}");
                        }
                    }
                    Some(SyncEvent::Disconnected) => {
                        warn!("change stream lost, keeping local state");
                    }
                    None => {
                        error!("change stream task ended");
                        break;
                    }
                }
                poller.set_addresses(model.visible_addresses());
            }

            Some(update) = update_rx.recv() => {
                debug!("{} is {}", update.address, update.record.status);
                model.record_health(&update.address, update.record);
            }

            _ = autosave.tick() => {
                save_mirror(&model, &mirror).await;
            }

            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                break;
            }
        }
    }

    save_mirror(&model, &mirror).await;
    poller.shutdown().await.ok();

    Ok(())
}
