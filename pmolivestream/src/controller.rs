//! Playback state machine
//!
//! [`PlaybackController`] owns the media element of one stream and decides
//! what to do with every input the session feeds it: user commands, media
//! events, probe results and timer expiries. It never sleeps and never
//! touches the network itself; anything that needs time or I/O is returned
//! to the caller as an [`Effect`].
//!
//! Retry policy: a network failure schedules a reload after
//! `2 s × (attempts + 1)` and counts one attempt, up to `max` attempts.
//! After that the controller stays in [`PlaybackState::Errored`] until the
//! user retries manually or the stream changes.
//!
//! Every load subscribes the element to a fresh event channel, so events
//! still queued from an aborted transfer never reach the new source. The
//! owner collects the new receiver with [`PlaybackController::take_events`].

use crate::endpoint::StreamEndpoint;
use crate::health::HealthState;
use crate::media::{MediaElement, MediaError, MediaErrorKind, MediaEvent, MediaEventReceiver};
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Default number of automatic reloads after a network failure
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Base delay of the automatic retry backoff
pub const RETRY_BASE_DELAY: Duration = Duration::from_secs(2);

/// Per-attempt delay before a user play on an unreachable stream
pub const USER_PLAY_DELAY: Duration = Duration::from_secs(1);

/// Volume below which an unmute falls back to [`UNMUTE_FALLBACK_VOLUME`]
pub const UNMUTE_MIN_VOLUME: f32 = 0.05;

/// Volume restored by an unmute when the saved volume is (nearly) silent
pub const UNMUTE_FALLBACK_VOLUME: f32 = 0.5;

/// Suffix appended to error statuses when the stream goes through the proxy
pub const PROXY_NOTICE: &str = " Using secure proxy for HTTP stream.";

// ============================================================================
// State types
// ============================================================================

/// Playback state of the current stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    /// Session stopped
    #[default]
    Idle,
    Loading,
    Playing,
    Paused,
    Buffering,
    Errored,
}

/// Automatic retry counter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RetryBudget {
    pub attempts: u32,
    pub max: u32,
}

impl RetryBudget {
    pub fn new(max: u32) -> Self {
        Self { attempts: 0, max }
    }

    /// Whether another automatic retry is allowed
    pub fn can_retry(&self) -> bool {
        self.attempts < self.max
    }
}

impl Default for RetryBudget {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETRIES)
    }
}

/// Volume as shown to the user
///
/// `volume` reads 0 while muted; `last_unmuted_volume` is what the last user
/// mute saved.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct VolumeState {
    pub volume: f32,
    pub muted: bool,
    pub last_unmuted_volume: f32,
}

impl Default for VolumeState {
    fn default() -> Self {
        Self {
            volume: 1.0,
            muted: false,
            last_unmuted_volume: 1.0,
        }
    }
}

impl VolumeState {
    /// Volume to restore on unmute
    pub fn unmute_target(&self) -> f32 {
        if self.last_unmuted_volume > UNMUTE_MIN_VOLUME {
            self.last_unmuted_volume
        } else {
            UNMUTE_FALLBACK_VOLUME
        }
    }
}

/// What the status line says, most specific cause first
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ready,
    Loading,
    Playing,
    Paused,
    Buffering,
    /// Probe says the endpoint is unreachable
    Unavailable,
    /// Manual retry or delayed user play in progress
    RetryingConnection,
    /// Automatic reload in progress
    Reconnecting { attempt: u32, max: u32 },
    /// Network failure, automatic reload scheduled
    NetworkError { retry_in_secs: u64, attempt: u32, max: u32 },
    /// Network failure, no automatic reload left
    RetriesExhausted,
    FormatNotSupported,
    SourceNotSupported,
    Aborted,
    UnknownError,
    Stopped,
}

impl Status {
    /// Statuses reporting a failure
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            Status::Unavailable
                | Status::NetworkError { .. }
                | Status::RetriesExhausted
                | Status::FormatNotSupported
                | Status::SourceNotSupported
                | Status::Aborted
                | Status::UnknownError
        )
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Ready => write!(f, "Ready"),
            Status::Loading => write!(f, "Loading…"),
            Status::Playing => write!(f, "Playing"),
            Status::Paused => write!(f, "Paused"),
            Status::Buffering => write!(f, "Buffering…"),
            Status::Unavailable => write!(f, "Stream unavailable - trying to connect…"),
            Status::RetryingConnection => write!(f, "Retrying connection…"),
            Status::Reconnecting { attempt, max } => {
                write!(f, "Reconnecting (attempt {}/{})…", attempt, max)
            }
            Status::NetworkError {
                retry_in_secs,
                attempt,
                max,
            } => write!(
                f,
                "Network error - unable to connect to stream. Retrying in {}s (attempt {}/{}).",
                retry_in_secs, attempt, max
            ),
            Status::RetriesExhausted => write!(
                f,
                "Network error - unable to connect to stream. Press retry to reconnect."
            ),
            Status::FormatNotSupported => write!(f, "Stream format not supported."),
            Status::SourceNotSupported => write!(f, "Stream source not supported."),
            Status::Aborted => write!(f, "Playback aborted."),
            Status::UnknownError => write!(f, "Unknown audio error occurred."),
            Status::Stopped => write!(f, "Stopped"),
        }
    }
}

// ============================================================================
// Effects
// ============================================================================

/// Identifier of a timer requested by the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(pub u64);

/// What happens when a timer fires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// Automatic reload after a network failure
    Reload,
    /// Deferred user play on an unreachable stream
    DelayedPlay,
}

/// Timer the session must arm
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerRequest {
    pub id: TimerId,
    pub kind: TimerKind,
    pub delay: Duration,
}

/// Work the session performs on the controller's behalf
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    /// Arm a timer and call [`PlaybackController::on_timer`] when it fires
    Schedule(TimerRequest),
    /// Disarm a previously scheduled timer
    CancelTimer(TimerId),
    /// Probe the effective URL and report through
    /// [`PlaybackController::on_probe_result`]
    Probe,
}

// ============================================================================
// Controller
// ============================================================================

/// State machine driving one media element for one stream
pub struct PlaybackController<M: MediaElement> {
    media: M,
    endpoint: StreamEndpoint,
    state: PlaybackState,
    health: HealthState,
    status: Status,
    retry: RetryBudget,
    volume: VolumeState,
    wants_playback: bool,
    pending: Option<(TimerId, TimerKind)>,
    next_timer: u64,
    events: Option<MediaEventReceiver>,
}

impl<M: MediaElement> PlaybackController<M> {
    /// Bind `media` to `endpoint` and start in `Loading`
    ///
    /// The event receiver of the first load is available through
    /// [`take_events`](Self::take_events). The returned effects ask for the
    /// initial health probe.
    pub fn attach(
        media: M,
        endpoint: StreamEndpoint,
        volume: VolumeState,
        max_retries: u32,
    ) -> (Self, Vec<Effect>) {
        info!(
            url = endpoint.raw_url(),
            proxied = endpoint.is_proxied(),
            "Attached stream"
        );

        let mut controller = Self {
            media,
            endpoint,
            state: PlaybackState::Loading,
            health: HealthState::Unknown,
            status: Status::Loading,
            retry: RetryBudget::new(max_retries),
            volume,
            wants_playback: false,
            pending: None,
            next_timer: 0,
            events: None,
        };

        controller.load_source();
        if volume.muted {
            controller.media.set_volume(volume.last_unmuted_volume);
        } else {
            controller.media.set_volume(volume.volume);
        }
        controller.media.set_muted(volume.muted);

        (controller, vec![Effect::Probe])
    }

    /// Receiver for the events of the latest load, if not yet taken
    ///
    /// Call after every reaction; once a new receiver is returned, the
    /// previous one only yields events of a superseded load.
    pub fn take_events(&mut self) -> Option<MediaEventReceiver> {
        self.events.take()
    }

    /// Release the media element, stopping playback
    pub fn detach(mut self) -> (M, VolumeState) {
        self.media.pause();
        (self.media, self.volume)
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn health(&self) -> HealthState {
        self.health
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn retry(&self) -> RetryBudget {
        self.retry
    }

    pub fn volume(&self) -> VolumeState {
        self.volume
    }

    pub fn endpoint(&self) -> &StreamEndpoint {
        &self.endpoint
    }

    /// Status line, with the proxy notice on failures of proxied streams
    pub fn status_text(&self) -> String {
        if self.status.is_error() && self.endpoint.is_proxied() {
            format!("{}{}", self.status, PROXY_NOTICE)
        } else {
            self.status.to_string()
        }
    }

    /// Whether the view should offer a manual retry
    pub fn retry_available(&self) -> bool {
        self.health == HealthState::Unhealthy || self.state == PlaybackState::Errored
    }

    // ------------------------------------------------------------------------
    // User commands
    // ------------------------------------------------------------------------

    /// Pause when playing (or about to), play otherwise
    pub fn toggle_play_pause(&mut self) -> Vec<Effect> {
        let active = matches!(self.state, PlaybackState::Playing | PlaybackState::Buffering)
            || (self.state == PlaybackState::Loading && self.wants_playback);

        if active {
            self.pause()
        } else {
            self.request_play()
        }
    }

    /// Set the volume, clamped to `[0, 1]`; a positive volume unmutes
    pub fn set_volume(&mut self, volume: f32) -> Vec<Effect> {
        let volume = if volume.is_nan() { 0.0 } else { volume.clamp(0.0, 1.0) };

        self.volume.volume = volume;
        self.media.set_volume(volume);

        if self.volume.muted && volume > 0.0 {
            self.volume.muted = false;
            self.media.set_muted(false);
        }

        Vec::new()
    }

    /// Mute saving the current volume, or unmute restoring it
    pub fn toggle_mute(&mut self) -> Vec<Effect> {
        if self.volume.muted {
            let restored = self.volume.unmute_target();
            self.volume.volume = restored;
            self.volume.muted = false;
            self.media.set_volume(restored);
            self.media.set_muted(false);
        } else {
            self.volume.last_unmuted_volume = self.volume.volume;
            self.volume.volume = 0.0;
            self.volume.muted = true;
            self.media.set_muted(true);
        }

        Vec::new()
    }

    /// Reset the retry budget and health, re-probe and reload
    pub fn retry_now(&mut self) -> Vec<Effect> {
        let mut effects = self.cancel_pending();

        info!(url = self.endpoint.raw_url(), "Manual retry");
        self.retry.attempts = 0;
        self.health = HealthState::Unknown;
        self.state = PlaybackState::Loading;
        self.status = Status::RetryingConnection;
        self.load_source();
        effects.push(Effect::Probe);

        if self.wants_playback {
            self.play_now(&mut effects);
        }

        effects
    }

    /// Stop everything; the controller ends in `Idle`
    pub fn stop(&mut self) -> Vec<Effect> {
        let effects = self.cancel_pending();
        self.media.pause();
        self.wants_playback = false;
        self.state = PlaybackState::Idle;
        self.status = Status::Stopped;
        effects
    }

    fn pause(&mut self) -> Vec<Effect> {
        let effects = self.cancel_pending();
        self.media.pause();
        self.wants_playback = false;
        self.state = PlaybackState::Paused;
        self.status = Status::Paused;
        effects
    }

    fn request_play(&mut self) -> Vec<Effect> {
        let mut effects = self.cancel_pending();
        self.wants_playback = true;
        self.state = PlaybackState::Loading;

        if self.health == HealthState::Unhealthy && self.retry.can_retry() {
            let delay = USER_PLAY_DELAY * self.retry.attempts;
            debug!(?delay, "Stream unreachable, deferring play");
            self.status = Status::RetryingConnection;
            effects.push(self.schedule(TimerKind::DelayedPlay, delay));
            return effects;
        }

        if self.status.is_error() {
            self.load_source();
        }
        self.status = Status::Loading;
        self.play_now(&mut effects);
        effects
    }

    // ------------------------------------------------------------------------
    // Inputs from the session
    // ------------------------------------------------------------------------

    /// React to an event of the media element
    pub fn on_media_event(&mut self, event: MediaEvent) -> Vec<Effect> {
        match event {
            MediaEvent::Playing => {
                let effects = self.cancel_pending();
                // audio flowing proves the endpoint is reachable
                self.health = HealthState::Healthy;
                self.state = PlaybackState::Playing;
                self.status = Status::Playing;
                effects
            }
            MediaEvent::Paused => {
                if matches!(self.state, PlaybackState::Playing | PlaybackState::Buffering) {
                    self.wants_playback = false;
                    self.state = PlaybackState::Paused;
                    self.status = Status::Paused;
                }
                Vec::new()
            }
            MediaEvent::Waiting => {
                if self.state == PlaybackState::Playing {
                    self.state = PlaybackState::Buffering;
                    self.status = Status::Buffering;
                }
                Vec::new()
            }
            MediaEvent::VolumeChanged { volume, muted } => {
                self.volume.muted = muted;
                self.volume.volume = if muted { 0.0 } else { volume.clamp(0.0, 1.0) };
                Vec::new()
            }
            MediaEvent::Error(error) => self.fail(error),
        }
    }

    /// React to a completed health probe
    ///
    /// A healthy answer does not override a network failure of the media
    /// element: health stays `Unhealthy` until audio flows again.
    pub fn on_probe_result(&mut self, health: HealthState) -> Vec<Effect> {
        if health == HealthState::Healthy && self.network_failed() {
            debug!(status = %self.status, "Ignoring healthy probe after network failure");
            return Vec::new();
        }
        self.health = health;

        match health {
            HealthState::Unhealthy => {
                if self.state == PlaybackState::Playing {
                    self.state = PlaybackState::Buffering;
                }
                if self.state != PlaybackState::Errored && self.state != PlaybackState::Idle {
                    self.status = Status::Unavailable;
                }
            }
            HealthState::Healthy => {
                let settled = matches!(
                    self.status,
                    Status::Unavailable | Status::Loading | Status::RetryingConnection
                );
                if settled {
                    self.status = match self.state {
                        PlaybackState::Loading if !self.wants_playback => Status::Ready,
                        PlaybackState::Loading => Status::Loading,
                        PlaybackState::Paused => Status::Paused,
                        PlaybackState::Buffering => Status::Buffering,
                        PlaybackState::Playing => Status::Playing,
                        _ => self.status,
                    };
                }
            }
            HealthState::Unknown => {}
        }

        Vec::new()
    }

    /// React to an expired timer; unknown or superseded ids are ignored
    pub fn on_timer(&mut self, id: TimerId) -> Vec<Effect> {
        let kind = match self.pending {
            Some((pending, kind)) if pending == id => kind,
            _ => return Vec::new(),
        };
        self.pending = None;

        let mut effects = Vec::new();
        self.load_source();
        self.state = PlaybackState::Loading;

        match kind {
            TimerKind::Reload => {
                info!(
                    attempt = self.retry.attempts,
                    max = self.retry.max,
                    "Reloading stream"
                );
                self.status = Status::Reconnecting {
                    attempt: self.retry.attempts,
                    max: self.retry.max,
                };
                if self.wants_playback {
                    self.play_now(&mut effects);
                }
            }
            TimerKind::DelayedPlay => {
                self.status = Status::Loading;
                self.play_now(&mut effects);
            }
        }

        effects
    }

    // ------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------

    fn load_source(&mut self) {
        let (tx, rx) = mpsc::unbounded_channel();
        self.media.subscribe(tx);
        self.media.load(self.endpoint.effective_url());
        self.events = Some(rx);
    }

    fn network_failed(&self) -> bool {
        self.state == PlaybackState::Errored
            && matches!(
                self.status,
                Status::NetworkError { .. } | Status::RetriesExhausted
            )
    }

    fn play_now(&mut self, effects: &mut Vec<Effect>) {
        if let Err(error) = self.media.play() {
            effects.extend(self.fail(error));
        }
    }

    fn fail(&mut self, error: MediaError) -> Vec<Effect> {
        let mut effects = self.cancel_pending();
        warn!(url = self.endpoint.raw_url(), %error, "Playback error");
        self.state = PlaybackState::Errored;

        self.status = match error.kind {
            MediaErrorKind::Network => {
                self.health = HealthState::Unhealthy;
                if self.retry.can_retry() {
                    let delay = RETRY_BASE_DELAY * (self.retry.attempts + 1);
                    self.retry.attempts += 1;
                    effects.push(self.schedule(TimerKind::Reload, delay));
                    Status::NetworkError {
                        retry_in_secs: delay.as_secs(),
                        attempt: self.retry.attempts,
                        max: self.retry.max,
                    }
                } else {
                    warn!(max = self.retry.max, "Automatic retries exhausted");
                    Status::RetriesExhausted
                }
            }
            MediaErrorKind::Decode => Status::FormatNotSupported,
            MediaErrorKind::SourceNotSupported => Status::SourceNotSupported,
            MediaErrorKind::Aborted => Status::Aborted,
            MediaErrorKind::Unknown => Status::UnknownError,
        };

        effects
    }

    fn schedule(&mut self, kind: TimerKind, delay: Duration) -> Effect {
        self.next_timer += 1;
        let id = TimerId(self.next_timer);
        self.pending = Some((id, kind));
        Effect::Schedule(TimerRequest { id, kind, delay })
    }

    fn cancel_pending(&mut self) -> Vec<Effect> {
        match self.pending.take() {
            Some((id, _)) => vec![Effect::CancelTimer(id)],
            None => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::{resolve, ProxyStrategy};
    use crate::media::{FakeMediaElement, FakeMediaHandle, MediaCall};
    use tokio::sync::mpsc::error::TryRecvError;

    const STREAM: &str = "http://radio.example.com:8000/live";

    struct Harness {
        controller: PlaybackController<FakeMediaElement>,
        media: FakeMediaHandle,
    }

    fn harness(secure: bool) -> (Harness, Vec<Effect>) {
        let (element, mut media) = FakeMediaElement::new();
        let endpoint = resolve(STREAM, secure, &ProxyStrategy::default());
        let (controller, effects) = PlaybackController::attach(
            element,
            endpoint,
            VolumeState::default(),
            DEFAULT_MAX_RETRIES,
        );
        media.drain_calls();
        (Harness { controller, media }, effects)
    }

    fn assert_consistent(controller: &PlaybackController<FakeMediaElement>) {
        let text = controller.status_text();
        match controller.health() {
            HealthState::Healthy => assert!(
                !text.contains("unable to connect") && !text.contains("unavailable"),
                "{} while {}",
                text,
                controller.health().label()
            ),
            HealthState::Unhealthy => assert!(
                !matches!(controller.status(), Status::Ready | Status::Playing),
                "{} while {}",
                text,
                controller.health().label()
            ),
            HealthState::Unknown => {}
        }
    }

    fn scheduled(effects: &[Effect]) -> Option<TimerRequest> {
        effects.iter().find_map(|e| match e {
            Effect::Schedule(request) => Some(*request),
            _ => None,
        })
    }

    fn network_error() -> MediaEvent {
        MediaEvent::Error(MediaError::network("connection reset"))
    }

    #[test]
    fn test_attach_loads_and_requests_probe() {
        let (element, mut media) = FakeMediaElement::new();
        let endpoint = resolve(STREAM, false, &ProxyStrategy::default());

        let (mut controller, effects) =
            PlaybackController::attach(element, endpoint, VolumeState::default(), 3);

        assert_eq!(effects, vec![Effect::Probe]);
        assert_eq!(controller.state(), PlaybackState::Loading);
        assert_eq!(controller.health(), HealthState::Unknown);
        assert_eq!(controller.status_text(), "Loading…");
        assert_eq!(
            media.drain_calls(),
            vec![
                MediaCall::Load(STREAM.to_string()),
                MediaCall::SetVolume(1.0),
                MediaCall::SetMuted(false),
            ]
        );
        assert!(controller.take_events().is_some());
        assert!(controller.take_events().is_none());
    }

    #[test]
    fn test_play_pause_cycle() {
        let (mut h, _) = harness(false);
        h.controller.on_probe_result(HealthState::Healthy);
        assert_eq!(h.controller.status(), Status::Ready);

        h.controller.toggle_play_pause();
        assert_eq!(h.media.drain_calls(), vec![MediaCall::Play]);
        assert_eq!(h.controller.state(), PlaybackState::Loading);

        h.controller.on_media_event(MediaEvent::Playing);
        assert_eq!(h.controller.state(), PlaybackState::Playing);
        assert_eq!(h.controller.status_text(), "Playing");

        h.controller.on_media_event(MediaEvent::Waiting);
        assert_eq!(h.controller.state(), PlaybackState::Buffering);
        assert_eq!(h.controller.status_text(), "Buffering…");

        h.controller.on_media_event(MediaEvent::Playing);
        h.controller.toggle_play_pause();
        assert_eq!(h.media.drain_calls(), vec![MediaCall::Pause]);
        assert_eq!(h.controller.state(), PlaybackState::Paused);
        assert_eq!(h.controller.status_text(), "Paused");

        // resume from pause plays without reloading
        h.controller.toggle_play_pause();
        assert_eq!(h.media.drain_calls(), vec![MediaCall::Play]);
    }

    #[test]
    fn test_toggle_while_starting_pauses() {
        let (mut h, _) = harness(false);
        h.controller.toggle_play_pause();
        h.controller.toggle_play_pause();
        assert_eq!(h.controller.state(), PlaybackState::Paused);
        assert_eq!(h.media.drain_calls(), vec![MediaCall::Play, MediaCall::Pause]);
    }

    #[test]
    fn test_external_pause_event() {
        let (mut h, _) = harness(false);
        h.controller.on_media_event(MediaEvent::Paused);
        assert_eq!(h.controller.state(), PlaybackState::Loading);

        h.controller.toggle_play_pause();
        h.controller.on_media_event(MediaEvent::Playing);
        h.controller.on_media_event(MediaEvent::Paused);
        assert_eq!(h.controller.state(), PlaybackState::Paused);
    }

    #[test]
    fn test_network_errors_retry_with_increasing_delays() {
        let (mut h, _) = harness(false);
        h.controller.toggle_play_pause();

        let mut delays = Vec::new();
        loop {
            let effects = h.controller.on_media_event(network_error());
            assert_eq!(h.controller.state(), PlaybackState::Errored);
            assert_eq!(h.controller.health(), HealthState::Unhealthy);
            match scheduled(&effects) {
                Some(request) => {
                    assert_eq!(request.kind, TimerKind::Reload);
                    delays.push(request.delay);
                    h.media.drain_calls();
                    h.controller.on_timer(request.id);
                    assert_eq!(
                        h.media.drain_calls(),
                        vec![MediaCall::Load(STREAM.to_string()), MediaCall::Play]
                    );
                }
                None => break,
            }
            assert!(delays.len() <= 3);
        }

        assert_eq!(
            delays,
            vec![
                Duration::from_secs(2),
                Duration::from_secs(4),
                Duration::from_secs(6)
            ]
        );
        assert_eq!(h.controller.retry().attempts, 3);
        assert_eq!(h.controller.status(), Status::RetriesExhausted);
        assert!(h.controller.retry_available());
    }

    #[test]
    fn test_network_error_status_text() {
        let (mut h, _) = harness(false);
        h.controller.toggle_play_pause();
        h.controller.on_media_event(network_error());
        assert_eq!(
            h.controller.status_text(),
            "Network error - unable to connect to stream. Retrying in 2s (attempt 1/3)."
        );
    }

    #[test]
    fn test_reload_timer_reports_reconnecting() {
        let (mut h, _) = harness(false);
        h.controller.toggle_play_pause();
        let effects = h.controller.on_media_event(network_error());
        let request = scheduled(&effects).unwrap();
        h.controller.on_timer(request.id);
        assert_eq!(h.controller.status_text(), "Reconnecting (attempt 1/3)…");
        assert_eq!(h.controller.state(), PlaybackState::Loading);
    }

    #[test]
    fn test_non_network_errors_are_terminal() {
        let cases = [
            (MediaErrorKind::Decode, "Stream format not supported."),
            (MediaErrorKind::SourceNotSupported, "Stream source not supported."),
            (MediaErrorKind::Aborted, "Playback aborted."),
            (MediaErrorKind::Unknown, "Unknown audio error occurred."),
        ];

        for (kind, text) in cases {
            let (mut h, _) = harness(false);
            h.controller.toggle_play_pause();
            let effects = h
                .controller
                .on_media_event(MediaEvent::Error(MediaError::new(kind, "boom")));
            assert!(scheduled(&effects).is_none(), "{:?}", kind);
            assert_eq!(h.controller.state(), PlaybackState::Errored);
            assert_eq!(h.controller.status_text(), text);
            assert_eq!(h.controller.retry().attempts, 0);
        }
    }

    #[test]
    fn test_proxy_notice_on_errors_only() {
        let (mut h, _) = harness(true);
        h.controller.toggle_play_pause();
        h.controller.on_media_event(MediaEvent::Playing);
        assert_eq!(h.controller.status_text(), "Playing");

        h.controller.on_media_event(MediaEvent::Error(MediaError::new(
            MediaErrorKind::Decode,
            "bad frame",
        )));
        assert_eq!(
            h.controller.status_text(),
            "Stream format not supported. Using secure proxy for HTTP stream."
        );
    }

    #[test]
    fn test_play_rejection_is_classified() {
        let (mut h, _) = harness(false);
        h.media.reject_next_play(MediaError::network("refused"));
        let effects = h.controller.toggle_play_pause();
        assert_eq!(h.controller.state(), PlaybackState::Errored);
        assert_eq!(scheduled(&effects).map(|r| r.delay), Some(Duration::from_secs(2)));
    }

    #[test]
    fn test_user_play_while_unhealthy_is_deferred() {
        let (mut h, _) = harness(false);
        h.controller.on_probe_result(HealthState::Unhealthy);
        assert_eq!(h.controller.status(), Status::Unavailable);
        assert!(h.controller.retry_available());

        let effects = h.controller.toggle_play_pause();
        let request = scheduled(&effects).unwrap();
        assert_eq!(request.kind, TimerKind::DelayedPlay);
        assert_eq!(request.delay, Duration::ZERO);
        assert!(h.media.drain_calls().is_empty());
        assert_eq!(h.controller.retry().attempts, 0);

        h.controller.on_timer(request.id);
        assert_eq!(
            h.media.drain_calls(),
            vec![MediaCall::Load(STREAM.to_string()), MediaCall::Play]
        );
    }

    #[test]
    fn test_stale_timer_ignored() {
        let (mut h, _) = harness(false);
        h.controller.toggle_play_pause();
        let effects = h.controller.on_media_event(network_error());
        let request = scheduled(&effects).unwrap();

        let effects = h.controller.retry_now();
        assert!(effects.contains(&Effect::CancelTimer(request.id)));
        assert!(effects.contains(&Effect::Probe));
        h.media.drain_calls();

        assert!(h.controller.on_timer(request.id).is_empty());
        assert!(h.media.drain_calls().is_empty());
    }

    #[test]
    fn test_retry_now_resets_budget() {
        let (mut h, _) = harness(false);
        h.controller.toggle_play_pause();
        h.controller.on_media_event(network_error());
        assert_eq!(h.controller.retry().attempts, 1);

        h.controller.retry_now();
        assert_eq!(h.controller.retry().attempts, 0);
        assert_eq!(h.controller.health(), HealthState::Unknown);
        assert_eq!(h.controller.state(), PlaybackState::Loading);
        assert_eq!(h.controller.status_text(), "Retrying connection…");
        assert!(h
            .media
            .drain_calls()
            .ends_with(&[MediaCall::Load(STREAM.to_string()), MediaCall::Play]));
    }

    #[test]
    fn test_unhealthy_probe_never_leaves_playing() {
        let (mut h, _) = harness(false);
        h.controller.toggle_play_pause();
        h.controller.on_media_event(MediaEvent::Playing);

        h.controller.on_probe_result(HealthState::Unhealthy);
        assert_eq!(h.controller.state(), PlaybackState::Buffering);
        assert_eq!(h.controller.status(), Status::Unavailable);

        // audio flowing again proves reachability
        h.controller.on_media_event(MediaEvent::Playing);
        assert_eq!(h.controller.state(), PlaybackState::Playing);
        assert_eq!(h.controller.health(), HealthState::Healthy);
    }

    #[test]
    fn test_healthy_probe_clears_unavailable() {
        let (mut h, _) = harness(false);
        h.controller.on_probe_result(HealthState::Unhealthy);
        h.controller.on_probe_result(HealthState::Healthy);
        assert_eq!(h.controller.status(), Status::Ready);
        assert!(!h.controller.retry_available());
    }

    #[test]
    fn test_late_healthy_probe_after_network_error() {
        let (mut h, _) = harness(false);
        h.controller.toggle_play_pause();
        h.controller.on_media_event(network_error());

        // HEAD answered after the element already failed
        h.controller.on_probe_result(HealthState::Healthy);
        assert_eq!(h.controller.health(), HealthState::Unhealthy);
        assert_eq!(h.controller.state(), PlaybackState::Errored);
        assert_eq!(
            h.controller.status_text(),
            "Network error - unable to connect to stream. Retrying in 2s (attempt 1/3)."
        );
        assert_consistent(&h.controller);

        h.controller.on_media_event(MediaEvent::Playing);
        assert_eq!(h.controller.health(), HealthState::Healthy);
        assert_consistent(&h.controller);
    }

    #[test]
    fn test_late_healthy_probe_after_retries_exhausted() {
        let (mut h, _) = harness(false);
        h.controller.toggle_play_pause();
        for _ in 0..=DEFAULT_MAX_RETRIES {
            h.controller.on_media_event(network_error());
        }
        assert_eq!(h.controller.status(), Status::RetriesExhausted);

        h.controller.on_probe_result(HealthState::Healthy);
        assert_eq!(h.controller.health(), HealthState::Unhealthy);
        assert_eq!(h.controller.status(), Status::RetriesExhausted);
        assert!(h.controller.retry_available());
        assert_consistent(&h.controller);
    }

    #[test]
    fn test_healthy_probe_after_manual_retry() {
        let (mut h, _) = harness(false);
        h.controller.toggle_play_pause();
        h.controller.on_media_event(network_error());
        h.controller.retry_now();

        h.controller.on_probe_result(HealthState::Healthy);
        assert_eq!(h.controller.health(), HealthState::Healthy);
        assert_eq!(h.controller.status(), Status::Loading);
        assert_consistent(&h.controller);
    }

    #[test]
    fn test_each_load_gets_fresh_event_channel() {
        let (mut h, _) = harness(false);
        let mut first = h.controller.take_events().unwrap();

        h.controller.toggle_play_pause();
        assert!(h.media.emit(network_error()));
        assert_eq!(first.try_recv().unwrap(), network_error());
        h.controller.on_media_event(network_error());
        assert!(h.controller.take_events().is_none());

        // manual retry reloads: the old receiver is cut off
        h.controller.retry_now();
        let mut second = h.controller.take_events().unwrap();
        assert!(h.media.emit(MediaEvent::Playing));
        assert_eq!(first.try_recv(), Err(TryRecvError::Disconnected));
        assert_eq!(second.try_recv().unwrap(), MediaEvent::Playing);
        assert_eq!(h.controller.retry().attempts, 0);
    }

    #[test]
    fn test_set_volume_clamps_and_unmutes() {
        let (mut h, _) = harness(false);
        h.controller.set_volume(1.5);
        assert_eq!(h.controller.volume().volume, 1.0);
        h.controller.set_volume(-2.0);
        assert_eq!(h.controller.volume().volume, 0.0);

        h.controller.toggle_mute();
        h.media.drain_calls();
        h.controller.set_volume(0.4);
        assert!(!h.controller.volume().muted);
        assert_eq!(
            h.media.drain_calls(),
            vec![MediaCall::SetVolume(0.4), MediaCall::SetMuted(false)]
        );
    }

    #[test]
    fn test_mute_roundtrip_restores_volume() {
        let (mut h, _) = harness(false);
        h.controller.set_volume(0.8);
        h.controller.toggle_mute();
        assert!(h.controller.volume().muted);
        assert_eq!(h.controller.volume().volume, 0.0);
        assert_eq!(h.controller.volume().last_unmuted_volume, 0.8);

        h.controller.toggle_mute();
        assert!(!h.controller.volume().muted);
        assert_eq!(h.controller.volume().volume, 0.8);
    }

    #[test]
    fn test_unmute_from_silence_restores_audible_volume() {
        for start in [0.0, 0.01, 0.05] {
            let (mut h, _) = harness(false);
            h.controller.set_volume(start);
            h.controller.toggle_mute();
            h.controller.toggle_mute();
            assert!(h.controller.volume().volume >= 0.5, "start {}", start);
            assert_eq!(h.media.volume(), h.controller.volume().volume);
            assert!(!h.media.muted());
        }
    }

    #[test]
    fn test_volume_change_event_updates_state() {
        let (mut h, _) = harness(false);
        h.controller.on_media_event(MediaEvent::VolumeChanged {
            volume: 0.3,
            muted: false,
        });
        assert_eq!(h.controller.volume().volume, 0.3);

        h.controller.on_media_event(MediaEvent::VolumeChanged {
            volume: 0.3,
            muted: true,
        });
        assert!(h.controller.volume().muted);
        assert_eq!(h.controller.volume().volume, 0.0);
    }

    #[test]
    fn test_stop_ends_idle() {
        let (mut h, _) = harness(false);
        h.controller.toggle_play_pause();
        h.controller.on_media_event(network_error());
        let effects = h.controller.stop();
        assert!(matches!(effects.as_slice(), [Effect::CancelTimer(_)]));
        assert_eq!(h.controller.state(), PlaybackState::Idle);
        assert_eq!(h.controller.status_text(), "Stopped");
    }
}
