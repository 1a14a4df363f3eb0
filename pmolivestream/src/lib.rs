//! Live stream playback session for PMOLive
//!
//! This crate plays Shoutcast/Icecast-style live streams against an
//! unreliable network: it decides how the stream URL must be rewritten for
//! a secure context, probes the endpoint, recovers from network failures
//! with a bounded retry policy and polls the server's stats document for
//! now-playing metadata.
//!
//! # Architecture
//!
//! - [`endpoint`]: pure URL resolution (proxy rewrite, stats URL)
//! - [`health`]: `HEAD` reachability probe
//! - [`metadata`]: periodic stats polling with graceful degradation
//! - [`media`]: the [`MediaElement`] capability, an HTTP adapter and a fake
//! - [`controller`]: the playback state machine
//! - [`session`]: the actor tying everything together
//!
//! The session owns all mutable state in a single tokio task; the view only
//! sends commands and reads [`SessionSnapshot`]s.
//!
//! # Example
//!
//! ```no_run
//! use pmolivestream::{
//!     HttpMediaElement, NullSink, SessionServices, SessionSettings, StreamRequest, StreamSession,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let settings = SessionSettings::default();
//!     let session = StreamSession::start(
//!         HttpMediaElement::new(NullSink::new()),
//!         StreamRequest::new("http://radio.example.com:8000/live").secure(true),
//!         SessionServices::http(&settings)?,
//!         settings,
//!     );
//!
//!     session.toggle_play_pause()?;
//!
//!     let mut updates = session.subscribe();
//!     updates.changed().await?;
//!     let snapshot = updates.borrow().clone();
//!     println!("{} - {}", snapshot.status_text, snapshot.metadata.song_title);
//!
//!     session.shutdown().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Configuration Extension
//!
//! With the `pmoconfig` feature (enabled by default), [`LiveStreamConfigExt`]
//! reads the session settings from the `sources.livestream` section of the
//! PMOLive configuration:
//!
//! ```no_run
//! use pmoconfig::get_config;
//! use pmolivestream::LiveStreamConfigExt;
//!
//! # fn main() -> anyhow::Result<()> {
//! let settings = get_config().livestream_settings()?;
//! println!("retrying {} times", settings.max_retries);
//! # Ok(())
//! # }
//! ```

pub mod controller;
pub mod endpoint;
pub mod error;
pub mod health;
pub mod media;
pub mod metadata;
pub mod session;

#[cfg(feature = "pmoconfig")]
pub mod config_ext;

pub use controller::{
    Effect, PlaybackController, PlaybackState, RetryBudget, Status, TimerId, TimerKind,
    TimerRequest, VolumeState,
};
pub use endpoint::{resolve, stats_url, ProxyStrategy, StreamEndpoint, FALLBACK_PROXIES};
pub use error::{Error, Result};
pub use health::{HealthProbe, HealthState, HttpHealthProbe};
pub use media::{
    AudioSink, FakeMediaElement, FakeMediaHandle, HttpMediaElement, MediaCall, MediaElement,
    MediaError, MediaErrorKind, MediaEvent, NullSink, WriterSink,
};
pub use metadata::{HttpStatsClient, Metadata, MetadataPoller, PollerHandle, StatsSource};
pub use session::{SessionServices, SessionSettings, SessionSnapshot, StreamRequest, StreamSession};

#[cfg(feature = "pmoconfig")]
pub use config_ext::LiveStreamConfigExt;
