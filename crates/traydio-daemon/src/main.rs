mod art;
mod backend;
mod controller;
mod mpv;
mod socket;
mod tracker;
mod watcher;

use tokio::sync::{broadcast, mpsc, watch};
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use traydio_core::config::Config;
use traydio_core::metadata::Metadata;
use traydio_core::platform;
use traydio_core::protocol::{PlaybackState, StateSnapshot};
use traydio_core::station::{Station, StationStore};

/// Callbacks out of the core, fanned out to every connected presentation
/// client by the control socket.
#[derive(Debug, Clone)]
pub enum Notification {
    StateChanged {
        state: PlaybackState,
        now_playing: Option<Station>,
    },
    MetadataChanged(Metadata),
    UserError {
        title: String,
        message: String,
    },
    Notify(String),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let data_dir = platform::data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let log_path = data_dir.join("traydiod.log");

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,traydiod=debug")),
        )
        .init();

    info!("Log file: {:?}", log_path);

    let config = Config::load()?;
    info!("Config loaded from: {:?}", Config::config_path());

    let store = StationStore::new(config.stations.file.clone());
    store.ensure_backing()?;
    let stations = match store.load() {
        Ok(stations) => stations,
        Err(e) => {
            // A corrupt list is not fatal; the empty state is a presentation
            // concern, and the next external write reloads everything.
            warn!("could not read station list, starting empty: {}", e);
            Vec::new()
        }
    };
    info!("loaded {} stations from {:?}", stations.len(), store.path());

    // All external inputs funnel into the controller loop through one channel.
    let (event_tx, event_rx) = mpsc::channel::<controller::ControllerEvent>(256);
    let (notify_tx, _) = broadcast::channel::<Notification>(100);
    let (snapshot_tx, snapshot_rx) = watch::channel(StateSnapshot::default());

    let art = art::ArtFetcher::new(platform::cache_dir().join("art"))?;
    let factory = mpv::MpvFactory::new();

    let playback_controller = controller::PlaybackController::new(
        factory,
        store,
        stations,
        &config,
        art,
        event_tx.clone(),
        notify_tx.clone(),
        snapshot_tx,
    );

    let _socket_handle = socket::start_server(
        config.control.bind_address.clone(),
        config.control.port,
        snapshot_rx,
        notify_tx.clone(),
        event_tx.clone(),
    );

    let _watcher_handle = watcher::start(config.stations.file.clone(), event_tx.clone());

    // ctrl-c runs the controller's cleanup path so the backend pipeline is
    // forced idle before the process exits.
    let shutdown_tx = event_tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = shutdown_tx
                .send(controller::ControllerEvent::Shutdown)
                .await;
        }
    });

    info!("daemon initialised, running event loop");
    playback_controller.run(event_rx).await?;

    Ok(())
}
