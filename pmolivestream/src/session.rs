//! Stream playback session
//!
//! [`StreamSession`] is the composition root. It spawns a single tokio task
//! (the actor) which owns the [`PlaybackController`], the current endpoint,
//! the metadata, the logo state and everything spawned for the current
//! stream. Every input reaches the actor as a message:
//!
//! - user commands, from the [`StreamSession`] handle
//! - media events, from the media element, on a channel the controller
//!   replaces at every load
//! - probe results, timer expiries and metadata updates, from helper tasks
//!
//! Helper tasks tag their messages with the stream generation. When the
//! stream changes the generation is bumped and the per-stream
//! [`CancellationToken`] is cancelled, so late messages of the old stream
//! are dropped without touching the new one.
//!
//! After each reaction the actor publishes a [`SessionSnapshot`] on a
//! `watch` channel.
//!
//! # Example
//!
//! ```no_run
//! use pmolivestream::media::{HttpMediaElement, NullSink};
//! use pmolivestream::session::{SessionServices, SessionSettings, StreamRequest, StreamSession};
//!
//! # #[tokio::main]
//! # async fn main() -> pmolivestream::Result<()> {
//! let settings = SessionSettings::default();
//! let services = SessionServices::http(&settings)?;
//! let session = StreamSession::start(
//!     HttpMediaElement::new(NullSink::new()),
//!     StreamRequest::new("http://radio.example.com:8000/live"),
//!     services,
//!     settings,
//! );
//!
//! session.toggle_play_pause()?;
//! let mut updates = session.subscribe();
//! while updates.changed().await.is_ok() {
//!     println!("{}", updates.borrow().status_text);
//! }
//! # Ok(())
//! # }
//! ```

use crate::controller::{
    Effect, PlaybackController, PlaybackState, RetryBudget, TimerId, TimerRequest, VolumeState,
    DEFAULT_MAX_RETRIES,
};
use crate::endpoint::{resolve, stats_url, ProxyStrategy, StreamEndpoint};
use crate::error::{Error, Result};
use crate::health::{HealthProbe, HealthState, HttpHealthProbe, DEFAULT_PROBE_TIMEOUT_SECS};
use crate::media::http::DEFAULT_STALL_TIMEOUT_SECS;
use crate::media::{MediaElement, MediaEventReceiver};
use crate::metadata::{
    HttpStatsClient, Metadata, MetadataPoller, PollerHandle, StatsSource,
    DEFAULT_POLL_INTERVAL_SECS, DEFAULT_STATS_TIMEOUT_SECS,
};
use reqwest::Client;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

// ============================================================================
// Inputs and settings
// ============================================================================

/// What the surrounding application asks the session to play
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamRequest {
    pub stream_url: String,
    pub logo_url: Option<String>,
    /// The hosting page is served over HTTPS
    pub secure_context: bool,
}

impl StreamRequest {
    pub fn new(stream_url: impl Into<String>) -> Self {
        Self {
            stream_url: stream_url.into(),
            logo_url: None,
            secure_context: false,
        }
    }

    pub fn with_logo(mut self, logo_url: impl Into<String>) -> Self {
        self.logo_url = Some(logo_url.into());
        self
    }

    pub fn secure(mut self, secure_context: bool) -> Self {
        self.secure_context = secure_context;
        self
    }
}

/// Tunables of a session
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSettings {
    pub proxy: ProxyStrategy,
    pub probe_timeout: Duration,
    pub poll_interval: Duration,
    pub max_retries: u32,
    /// Silence after which the HTTP media element reports `waiting`
    pub stall_timeout: Duration,
    pub user_agent: Option<String>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            proxy: ProxyStrategy::default(),
            probe_timeout: Duration::from_secs(DEFAULT_PROBE_TIMEOUT_SECS),
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            max_retries: DEFAULT_MAX_RETRIES,
            stall_timeout: Duration::from_secs(DEFAULT_STALL_TIMEOUT_SECS),
            user_agent: None,
        }
    }
}

impl SessionSettings {
    /// Build the HTTP client shared by the probe, the stats client and the
    /// media element
    pub fn http_client(&self) -> Result<Client> {
        let mut builder = Client::builder();
        if let Some(agent) = &self.user_agent {
            builder = builder.user_agent(agent.as_str());
        }
        Ok(builder.build()?)
    }
}

/// Network collaborators of a session
#[derive(Clone)]
pub struct SessionServices {
    pub prober: Arc<dyn HealthProbe>,
    pub stats: Arc<dyn StatsSource>,
}

impl SessionServices {
    /// reqwest-backed probe and stats client
    pub fn http(settings: &SessionSettings) -> Result<Self> {
        let client = settings.http_client()?;
        Ok(Self {
            prober: Arc::new(HttpHealthProbe::with_client(
                client.clone(),
                settings.probe_timeout,
            )),
            stats: Arc::new(HttpStatsClient::with_client(
                client,
                Duration::from_secs(DEFAULT_STATS_TIMEOUT_SECS),
            )),
        })
    }
}

/// Observable state of a session
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct SessionSnapshot {
    pub playback_state: PlaybackState,
    pub health: HealthState,
    pub status_text: String,
    /// Displayed volume (0 while muted)
    pub volume: f32,
    pub muted: bool,
    pub metadata: Metadata,
    pub endpoint: Option<StreamEndpoint>,
    /// Logo to display; `None` once the view reported a load failure
    pub logo_url: Option<String>,
    pub retry: RetryBudget,
    pub retry_available: bool,
}

// ============================================================================
// Handle
// ============================================================================

enum Command {
    TogglePlayPause,
    SetVolume(f32),
    ToggleMute,
    RetryNow,
    ChangeStream(StreamRequest),
    ReportLogoError,
    Shutdown(oneshot::Sender<()>),
}

/// Handle on a running session
///
/// Dropping every handle shuts the session down.
pub struct StreamSession {
    commands: mpsc::UnboundedSender<Command>,
    snapshot: watch::Receiver<SessionSnapshot>,
}

impl StreamSession {
    /// Start a session playing `request` on `media`
    ///
    /// Must be called from within a tokio runtime. The stream is attached,
    /// probed and polled for metadata right away; playback itself starts on
    /// the first [`toggle_play_pause`](Self::toggle_play_pause).
    pub fn start<M: MediaElement>(
        media: M,
        request: StreamRequest,
        services: SessionServices,
        settings: SessionSettings,
    ) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(SessionSnapshot::default());

        let actor = SessionActor::new(media, request, services, settings, snapshot_tx);
        tokio::spawn(actor.run(command_rx));

        Self {
            commands: command_tx,
            snapshot: snapshot_rx,
        }
    }

    /// Latest published snapshot
    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Receiver notified on every snapshot change
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.clone()
    }

    pub fn toggle_play_pause(&self) -> Result<()> {
        self.send(Command::TogglePlayPause)
    }

    /// Set the volume; values outside `[0, 1]` are clamped
    pub fn set_volume(&self, volume: f32) -> Result<()> {
        self.send(Command::SetVolume(volume))
    }

    pub fn toggle_mute(&self) -> Result<()> {
        self.send(Command::ToggleMute)
    }

    /// Reset the retry budget, re-probe and reload
    pub fn retry_now(&self) -> Result<()> {
        self.send(Command::RetryNow)
    }

    /// Switch to another stream (or only another logo)
    pub fn change_stream(&self, request: StreamRequest) -> Result<()> {
        self.send(Command::ChangeStream(request))
    }

    /// The view failed to load the logo; hide it until the logo changes
    pub fn report_logo_error(&self) -> Result<()> {
        self.send(Command::ReportLogoError)
    }

    /// Stop playback and release every per-stream task
    ///
    /// Resolves once the session task has stopped. The last snapshot
    /// (state `Idle`) stays readable.
    pub async fn shutdown(&self) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(Command::Shutdown(reply_tx))?;
        reply_rx.await.map_err(|_| Error::SessionClosed)
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| Error::SessionClosed)
    }
}

// ============================================================================
// Actor
// ============================================================================

/// Messages from helper tasks, tagged with the stream generation
#[derive(Debug)]
enum Internal {
    ProbeFinished { generation: u64, health: HealthState },
    TimerFired { generation: u64, id: TimerId },
    Metadata { generation: u64, metadata: Metadata },
}

struct SessionActor<M: MediaElement> {
    settings: SessionSettings,
    services: SessionServices,
    request: StreamRequest,
    controller: Option<PlaybackController<M>>,
    generation: u64,
    stream_token: CancellationToken,
    poller: Option<PollerHandle>,
    timers: HashMap<TimerId, JoinHandle<()>>,
    metadata: Metadata,
    logo_failed: bool,
    media_events: MediaEventReceiver,
    internal_tx: mpsc::UnboundedSender<Internal>,
    internal_rx: mpsc::UnboundedReceiver<Internal>,
    snapshot: watch::Sender<SessionSnapshot>,
}

impl<M: MediaElement> SessionActor<M> {
    fn new(
        media: M,
        request: StreamRequest,
        services: SessionServices,
        settings: SessionSettings,
        snapshot: watch::Sender<SessionSnapshot>,
    ) -> Self {
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let (_, media_events) = mpsc::unbounded_channel();

        let mut actor = Self {
            settings,
            services,
            request,
            controller: None,
            generation: 0,
            stream_token: CancellationToken::new(),
            poller: None,
            timers: HashMap::new(),
            metadata: Metadata::loading(),
            logo_failed: false,
            media_events,
            internal_tx,
            internal_rx,
            snapshot,
        };

        actor.open_stream(media, VolumeState::default());
        actor.publish();
        actor
    }

    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Shutdown(reply)) => {
                        self.stop();
                        let _ = reply.send(());
                        break;
                    }
                    Some(command) => self.handle_command(command),
                    None => {
                        self.stop();
                        break;
                    }
                },
                Some(event) = self.media_events.recv() => {
                    self.drive(|controller| controller.on_media_event(event));
                }
                Some(message) = self.internal_rx.recv() => self.handle_internal(message),
            }

            self.publish();
        }

        self.publish();
        info!(url = %self.request.stream_url, "Session stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::TogglePlayPause => self.drive(|c| c.toggle_play_pause()),
            Command::SetVolume(volume) => self.drive(|c| c.set_volume(volume)),
            Command::ToggleMute => self.drive(|c| c.toggle_mute()),
            Command::RetryNow => self.drive(|c| c.retry_now()),
            Command::ChangeStream(request) => self.change_stream(request),
            Command::ReportLogoError => {
                debug!(logo = ?self.request.logo_url, "Logo failed to load");
                self.logo_failed = true;
            }
            // handled by the run loop
            Command::Shutdown(_) => {}
        }
    }

    fn handle_internal(&mut self, message: Internal) {
        match message {
            Internal::ProbeFinished { generation, health } if generation == self.generation => {
                debug!(?health, "Probe finished");
                self.drive(|c| c.on_probe_result(health));
            }
            Internal::TimerFired { generation, id } if generation == self.generation => {
                self.timers.remove(&id);
                self.drive(|c| c.on_timer(id));
            }
            Internal::Metadata {
                generation,
                metadata,
            } if generation == self.generation => {
                self.metadata = metadata;
            }
            stale => debug!(?stale, "Dropping message of a previous stream"),
        }
    }

    fn change_stream(&mut self, request: StreamRequest) {
        let same_stream = request.stream_url == self.request.stream_url
            && request.secure_context == self.request.secure_context;

        if same_stream {
            if request.logo_url != self.request.logo_url {
                self.logo_failed = false;
            }
            self.request = request;
            return;
        }

        info!(from = %self.request.stream_url, to = %request.stream_url, "Changing stream");
        self.request = request;
        if let Some((media, volume)) = self.close_stream() {
            self.open_stream(media, volume);
        }
    }

    /// Attach a fresh controller for the current request
    fn open_stream(&mut self, media: M, volume: VolumeState) {
        self.generation += 1;
        self.stream_token = CancellationToken::new();
        self.metadata = Metadata::loading();
        self.logo_failed = false;

        let endpoint = resolve(
            &self.request.stream_url,
            self.request.secure_context,
            &self.settings.proxy,
        );

        let (mut controller, effects) =
            PlaybackController::attach(media, endpoint, volume, self.settings.max_retries);
        if let Some(events) = controller.take_events() {
            self.media_events = events;
        }
        self.controller = Some(controller);

        self.start_poller();
        self.apply(effects);
    }

    /// Cancel everything spawned for the current stream and release the
    /// media element
    fn close_stream(&mut self) -> Option<(M, VolumeState)> {
        self.release_tasks();
        self.controller.take().map(PlaybackController::detach)
    }

    fn stop(&mut self) {
        self.drive(|c| c.stop());
        self.release_tasks();
    }

    fn release_tasks(&mut self) {
        self.stream_token.cancel();
        if let Some(poller) = self.poller.take() {
            poller.cancel();
        }
        for (_, timer) in self.timers.drain() {
            timer.abort();
        }
    }

    fn start_poller(&mut self) {
        let stats = match stats_url(&self.request.stream_url) {
            Ok(url) => url,
            Err(e) => {
                warn!(url = %self.request.stream_url, error = %e, "No stats endpoint for stream");
                return;
            }
        };

        // same mixed-content rule as the stream itself
        let stats = resolve(&stats, self.request.secure_context, &self.settings.proxy)
            .effective_url()
            .to_string();

        let tx = self.internal_tx.clone();
        let generation = self.generation;
        self.poller = Some(MetadataPoller::start(
            stats,
            self.services.stats.clone(),
            self.settings.poll_interval,
            move |metadata| {
                let _ = tx.send(Internal::Metadata {
                    generation,
                    metadata,
                });
            },
        ));
    }

    fn drive<F>(&mut self, reaction: F)
    where
        F: FnOnce(&mut PlaybackController<M>) -> Vec<Effect>,
    {
        let Some(controller) = self.controller.as_mut() else {
            return;
        };
        let effects = reaction(controller);
        // a reload swaps the event channel; queued events of the old load
        // are dropped with it
        if let Some(events) = controller.take_events() {
            self.media_events = events;
        }
        self.apply(effects);
    }

    fn apply(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Schedule(request) => self.arm_timer(request),
                Effect::CancelTimer(id) => {
                    if let Some(timer) = self.timers.remove(&id) {
                        timer.abort();
                    }
                }
                Effect::Probe => self.spawn_probe(),
            }
        }
    }

    fn arm_timer(&mut self, request: TimerRequest) {
        debug!(id = request.id.0, kind = ?request.kind, delay = ?request.delay, "Arming timer");

        let tx = self.internal_tx.clone();
        let token = self.stream_token.clone();
        let generation = self.generation;

        let task = tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(request.delay) => {
                    let _ = tx.send(Internal::TimerFired { generation, id: request.id });
                }
            }
        });

        if let Some(previous) = self.timers.insert(request.id, task) {
            previous.abort();
        }
    }

    fn spawn_probe(&mut self) {
        let Some(url) = self
            .controller
            .as_ref()
            .map(|c| c.endpoint().effective_url().to_string())
        else {
            return;
        };

        let prober = self.services.prober.clone();
        let tx = self.internal_tx.clone();
        let token = self.stream_token.clone();
        let generation = self.generation;

        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                health = prober.probe(&url) => {
                    let _ = tx.send(Internal::ProbeFinished { generation, health });
                }
            }
        });
    }

    fn current_snapshot(&self) -> SessionSnapshot {
        let logo_url = if self.logo_failed {
            None
        } else {
            self.request.logo_url.clone()
        };

        match &self.controller {
            Some(c) => {
                let volume = c.volume();
                SessionSnapshot {
                    playback_state: c.state(),
                    health: c.health(),
                    status_text: c.status_text(),
                    volume: volume.volume,
                    muted: volume.muted,
                    metadata: self.metadata.clone(),
                    endpoint: Some(c.endpoint().clone()),
                    logo_url,
                    retry: c.retry(),
                    retry_available: c.retry_available(),
                }
            }
            None => SessionSnapshot {
                metadata: self.metadata.clone(),
                logo_url,
                ..SessionSnapshot::default()
            },
        }
    }

    fn publish(&self) {
        let next = self.current_snapshot();
        self.snapshot.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builder() {
        let request = StreamRequest::new("http://a.example/live")
            .with_logo("https://a.example/logo.png")
            .secure(true);
        assert_eq!(request.stream_url, "http://a.example/live");
        assert_eq!(request.logo_url.as_deref(), Some("https://a.example/logo.png"));
        assert!(request.secure_context);
    }

    #[test]
    fn test_default_settings() {
        let settings = SessionSettings::default();
        assert_eq!(settings.max_retries, 3);
        assert_eq!(settings.probe_timeout, Duration::from_secs(5));
        assert_eq!(settings.poll_interval, Duration::from_secs(10));
        assert_eq!(settings.proxy, ProxyStrategy::default());
    }

    #[test]
    fn test_http_client_with_user_agent() {
        let settings = SessionSettings {
            user_agent: Some("PMOLive/0.1".to_string()),
            ..SessionSettings::default()
        };
        assert!(settings.http_client().is_ok());
        assert!(SessionServices::http(&settings).is_ok());
    }
}
