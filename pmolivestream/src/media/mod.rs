//! Media subsystem capability
//!
//! The playback controller drives audio through the [`MediaElement`] trait,
//! modelled on an HTML audio element: `load`, `play`, `pause`, settable
//! volume and mute, and an ordered stream of [`MediaEvent`]s.
//!
//! Two adapters are provided:
//! - [`HttpMediaElement`]: fetches the stream over HTTP and hands the bytes
//!   to an [`AudioSink`] (decoding is the sink's business)
//! - [`FakeMediaElement`]: records commands and lets tests inject events

pub mod fake;
pub mod http;

pub use fake::{FakeMediaElement, FakeMediaHandle, MediaCall};
pub use http::{AudioSink, HttpMediaElement, NullSink, WriterSink};

use serde::Serialize;
use tokio::sync::mpsc;

/// Class of a media failure, mirroring `MediaError.code`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MediaErrorKind {
    /// Fetching was aborted on purpose
    Aborted,
    /// Connection failed or dropped
    Network,
    /// Data could not be decoded
    Decode,
    /// Source unusable (bad status, unsupported type, nothing loaded)
    SourceNotSupported,
    /// Anything else
    Unknown,
}

impl MediaErrorKind {
    /// Only network failures can be fixed by trying again
    pub fn is_retryable(&self) -> bool {
        matches!(self, MediaErrorKind::Network)
    }
}

/// A media failure with a diagnostic message
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind:?} media error: {message}")]
pub struct MediaError {
    pub kind: MediaErrorKind,
    pub message: String,
}

impl MediaError {
    pub fn new(kind: MediaErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(MediaErrorKind::Network, message)
    }
}

/// Events emitted by a media element, in emission order
#[derive(Debug, Clone, PartialEq)]
pub enum MediaEvent {
    /// Audio is flowing
    Playing,
    /// Playback paused
    Paused,
    /// Playback stalled waiting for data
    Waiting,
    /// Volume or mute changed on the element
    VolumeChanged { volume: f32, muted: bool },
    /// Playback failed
    Error(MediaError),
}

/// Channel on which a media element delivers its events
pub type MediaEventSender = mpsc::UnboundedSender<MediaEvent>;

/// Receiving side of [`MediaEventSender`]
pub type MediaEventReceiver = mpsc::UnboundedReceiver<MediaEvent>;

/// Handle on the platform's audio playback
///
/// `play` only reports an immediate rejection; actual start of playback is
/// signalled later by [`MediaEvent::Playing`] and failures by
/// [`MediaEvent::Error`].
pub trait MediaElement: Send + 'static {
    /// Route future events to `events`, replacing any previous subscriber
    fn subscribe(&mut self, events: MediaEventSender);

    /// Set the source and reset the element; does not start playback
    fn load(&mut self, url: &str);

    /// Start (or resume) playback of the loaded source
    fn play(&mut self) -> Result<(), MediaError>;

    /// Stop playback
    fn pause(&mut self);

    /// Set output volume in `[0, 1]`
    fn set_volume(&mut self, volume: f32);

    /// Mute or unmute output
    fn set_muted(&mut self, muted: bool);
}

impl<M: MediaElement + ?Sized> MediaElement for Box<M> {
    fn subscribe(&mut self, events: MediaEventSender) {
        (**self).subscribe(events)
    }

    fn load(&mut self, url: &str) {
        (**self).load(url)
    }

    fn play(&mut self) -> Result<(), MediaError> {
        (**self).play()
    }

    fn pause(&mut self) {
        (**self).pause()
    }

    fn set_volume(&mut self, volume: f32) {
        (**self).set_volume(volume)
    }

    fn set_muted(&mut self, muted: bool) {
        (**self).set_muted(muted)
    }
}
