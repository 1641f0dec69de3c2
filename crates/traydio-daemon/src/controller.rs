/// PlaybackController — single-owner event loop for all mutable playback
/// state.
///
/// Every task that wants to affect playback sends a `ControllerEvent` into
/// this loop: the control socket forwards client commands, the backend
/// forwarder delivers pipeline events, the metadata ticker delivers poll
/// ticks.  The controller owns the backend, the station-list view, and the
/// metadata tracker exclusively; no other task touches them, so no locks
/// guard them.
///
/// After each observable change the controller publishes a full
/// `StateSnapshot` on a watch channel (consumed by the control socket for
/// `Hello`/`State` frames) and fires the matching `Notification` broadcast.
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info, warn};

use traydio_core::config::Config;
use traydio_core::protocol::{Command, PlaybackState, StateSnapshot};
use traydio_core::station::{Station, StationStore};

use crate::art::ArtFetcher;
use crate::backend::{BackendEvent, BackendFactory, MediaBackend};
use crate::tracker::MetadataTracker;
use crate::Notification;

/// All inputs into the controller loop.
#[derive(Debug)]
pub enum ControllerEvent {
    /// A command from the presentation layer.
    Command(Command),
    /// Pushed backend event (forwarded from the backend's channel).
    Backend(BackendEvent),
    /// Metadata ticker fired; the payload is the session generation the
    /// ticker was started under.
    PollTick(u64),
    /// Shutdown requested.
    Shutdown,
}

pub struct PlaybackController<F: BackendFactory> {
    factory: F,
    /// `None` until the first play request; built once, reused after.
    backend: Option<F::Backend>,
    store: StationStore,
    stations: Vec<Station>,
    playback: PlaybackState,
    now_playing: Option<Station>,
    tracker: MetadataTracker,
    /// True between issuing `load` and the backend's `Loaded` acknowledgment.
    /// Tag traffic in that window belongs to the interrupted stream and is
    /// discarded.
    awaiting_load: bool,
    show_metadata: bool,
    poll_interval: Duration,
    art: ArtFetcher,
    event_tx: mpsc::Sender<ControllerEvent>,
    notify_tx: broadcast::Sender<Notification>,
    snapshot_tx: watch::Sender<StateSnapshot>,
}

impl<F: BackendFactory> PlaybackController<F> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        factory: F,
        store: StationStore,
        stations: Vec<Station>,
        config: &Config,
        art: ArtFetcher,
        event_tx: mpsc::Sender<ControllerEvent>,
        notify_tx: broadcast::Sender<Notification>,
        snapshot_tx: watch::Sender<StateSnapshot>,
    ) -> Self {
        let controller = Self {
            factory,
            backend: None,
            store,
            stations,
            playback: PlaybackState::Stopped,
            now_playing: None,
            tracker: MetadataTracker::new(),
            awaiting_load: false,
            show_metadata: config.metadata.show,
            poll_interval: Duration::from_secs(config.metadata.poll_interval_secs.max(1)),
            art,
            event_tx,
            notify_tx,
            snapshot_tx,
        };
        // Seed the published snapshot so clients connecting before the first
        // command still get a meaningful Hello.  Nothing has changed yet, so
        // no notification fires.
        controller.snapshot_tx.send_replace(StateSnapshot {
            stations: controller.stations.clone(),
            playback: controller.playback,
            now_playing: controller.now_playing.clone(),
            metadata: controller.tracker.snapshot().clone(),
        });
        controller
    }

    /// Run the event loop.  Returns when a `Shutdown` event arrives or the
    /// event channel closes.
    pub async fn run(mut self, mut event_rx: mpsc::Receiver<ControllerEvent>) -> anyhow::Result<()> {
        info!("controller: starting event loop");

        loop {
            match event_rx.recv().await {
                None => {
                    info!("controller: event channel closed, shutting down");
                    break;
                }
                Some(ControllerEvent::Shutdown) => {
                    info!("controller: shutdown requested");
                    break;
                }
                Some(ControllerEvent::Command(cmd)) => {
                    debug!("controller: command {:?}", cmd);
                    self.handle_command(cmd).await;
                }
                Some(ControllerEvent::Backend(event)) => {
                    self.handle_backend_event(event).await;
                }
                Some(ControllerEvent::PollTick(generation)) => {
                    self.handle_poll_tick(generation).await;
                }
            }
        }

        self.cleanup().await;
        Ok(())
    }

    // ── command handlers ──────────────────────────────────────────────────────

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Play { station } => self.handle_play(station).await,
            Command::Toggle => self.handle_toggle().await,
            Command::Stop => self.transition_to_stopped().await,
            Command::SetStations { stations } => {
                info!("controller: station list replaced ({} entries)", stations.len());
                self.stations = stations;
                self.publish_state();
            }
            Command::GetState => self.publish_state(),
        }
    }

    async fn handle_play(&mut self, station: Station) {
        if station.url.trim().is_empty() {
            self.user_error(
                "Playback error",
                format!("{} has no stream URL", station.display_name()),
            );
            return;
        }

        // Backend operations run before any observable state change, so a
        // failed play leaves the previous state fully intact.
        if self.backend.is_none() {
            match self.create_backend().await {
                Ok(backend) => self.backend = Some(backend),
                Err(e) => {
                    self.user_error(
                        "Playback error",
                        format!("Could not start the media backend: {e:#}"),
                    );
                    return;
                }
            }
        }
        let load_result = match self.backend.as_mut() {
            Some(backend) => backend.load(&station.url).await,
            None => return,
        };
        if let Err(e) = load_result {
            self.user_error(
                "Playback error",
                format!("Could not play {}: {e:#}", station.display_name()),
            );
            return;
        }
        let play_result = match self.backend.as_mut() {
            Some(backend) => backend.play().await,
            None => return,
        };
        if let Err(e) = play_result {
            self.user_error(
                "Playback error",
                format!("Could not play {}: {e:#}", station.display_name()),
            );
            return;
        }

        // Committed: the transition is now observable.
        self.awaiting_load = true;
        self.tracker.stop_polling();
        self.tracker.reset();

        if let Err(e) = self.store.record_played(&station.uuid) {
            // The station keeps playing even when history can't be recorded.
            warn!("failed to record playback history: {}", e);
        }
        if let Some(favicon) = &station.favicon {
            self.art.prefetch(favicon);
        }

        info!("controller: playing {}", station.display_name());
        self.now_playing = Some(station.clone());
        self.playback = PlaybackState::Playing;
        if self.show_metadata {
            self.tracker
                .start_polling(self.poll_interval, self.event_tx.clone());
        }
        self.publish_state();
        self.notice(format!("Playing {}", station.display_name()));
    }

    async fn handle_toggle(&mut self) {
        // No-op while stopped or before the backend exists.
        if self.playback == PlaybackState::Stopped {
            return;
        }
        let Some(backend) = self.backend.as_mut() else {
            return;
        };
        match self.playback {
            PlaybackState::Playing => {
                if let Err(e) = backend.pause().await {
                    warn!("pause request failed: {e:#}");
                    return;
                }
                self.playback = PlaybackState::Paused;
            }
            PlaybackState::Paused => {
                if let Err(e) = backend.play().await {
                    warn!("resume request failed: {e:#}");
                    return;
                }
                self.playback = PlaybackState::Playing;
            }
            PlaybackState::Stopped => return,
        }
        self.publish_state();
    }

    async fn transition_to_stopped(&mut self) {
        self.tracker.stop_polling();
        self.tracker.reset();
        self.awaiting_load = false;
        if let Some(backend) = self.backend.as_mut() {
            if let Err(e) = backend.stop().await {
                // Teardown continues regardless.
                warn!("stop request failed: {e:#}");
            }
        }

        let changed = self.playback != PlaybackState::Stopped || self.now_playing.is_some();
        self.playback = PlaybackState::Stopped;
        self.now_playing = None;
        if changed {
            info!("controller: stopped");
            self.publish_state();
            self.publish_metadata();
        }
    }

    // ── backend events ────────────────────────────────────────────────────────

    async fn handle_backend_event(&mut self, event: BackendEvent) {
        match event {
            BackendEvent::Loaded => {
                self.awaiting_load = false;
            }
            BackendEvent::Tag(tags) => {
                if self.awaiting_load {
                    debug!("controller: dropping tag update from interrupted stream");
                    return;
                }
                if self.playback == PlaybackState::Stopped {
                    return;
                }
                if self.tracker.ingest(&tags) {
                    self.prefetch_album_art();
                    self.publish_metadata();
                }
            }
            BackendEvent::Error(message) => {
                if self.playback == PlaybackState::Stopped {
                    // Stray event from an already torn-down session.
                    return;
                }
                let body = if message.trim().is_empty() {
                    "Could not play the selected station.".to_string()
                } else {
                    message
                };
                self.user_error("Playback error", body);
                self.transition_to_stopped().await;
            }
            BackendEvent::EndOfStream => {
                if self.playback == PlaybackState::Stopped {
                    return;
                }
                info!("controller: end of stream");
                self.transition_to_stopped().await;
            }
        }
    }

    async fn handle_poll_tick(&mut self, generation: u64) {
        // Stale ticks (previous session) and ticks during a source switch are
        // dropped; the non-empty-merge rule makes late data harmless anyway.
        if generation != self.tracker.generation()
            || self.playback == PlaybackState::Stopped
            || self.awaiting_load
        {
            return;
        }
        let Some(backend) = self.backend.as_mut() else {
            return;
        };
        match backend.query_tags().await {
            Ok(Some(tags)) => {
                if self.tracker.ingest(&tags) {
                    self.prefetch_album_art();
                    self.publish_metadata();
                }
            }
            Ok(None) => {}
            Err(e) => debug!("tag query failed: {e:#}"),
        }
    }

    // ── helpers ───────────────────────────────────────────────────────────────

    async fn create_backend(&mut self) -> anyhow::Result<F::Backend> {
        // Single forwarder task per backend instance; the factory receives the
        // only sender, so exactly one event subscription ever exists.
        let (backend_tx, mut backend_rx) = mpsc::channel::<BackendEvent>(64);
        let core_tx = self.event_tx.clone();
        tokio::spawn(async move {
            while let Some(event) = backend_rx.recv().await {
                if core_tx.send(ControllerEvent::Backend(event)).await.is_err() {
                    break;
                }
            }
        });
        self.factory.create(backend_tx).await
    }

    fn prefetch_album_art(&self) {
        if let Some(art_url) = &self.tracker.snapshot().album_art {
            self.art.prefetch(art_url);
        }
    }

    fn publish_state(&self) {
        let snapshot = StateSnapshot {
            stations: self.stations.clone(),
            playback: self.playback,
            now_playing: self.now_playing.clone(),
            metadata: self.tracker.snapshot().clone(),
        };
        self.snapshot_tx.send_replace(snapshot);
        let _ = self.notify_tx.send(Notification::StateChanged {
            state: self.playback,
            now_playing: self.now_playing.clone(),
        });
    }

    fn publish_metadata(&self) {
        let metadata = self.tracker.snapshot().clone();
        self.snapshot_tx
            .send_modify(|snapshot| snapshot.metadata = metadata.clone());
        let _ = self.notify_tx.send(Notification::MetadataChanged(metadata));
    }

    fn user_error(&self, title: &str, message: impl Into<String>) {
        let message = message.into();
        warn!("{}: {}", title, message);
        let _ = self.notify_tx.send(Notification::UserError {
            title: title.to_string(),
            message,
        });
    }

    fn notice(&self, message: String) {
        let _ = self.notify_tx.send(Notification::Notify(message));
    }

    async fn cleanup(&mut self) {
        info!("controller: cleanup");
        self.tracker.stop_polling();
        if let Some(mut backend) = self.backend.take() {
            if let Err(e) = backend.shutdown().await {
                warn!("backend teardown failed: {e:#}");
            }
        }
    }
}
