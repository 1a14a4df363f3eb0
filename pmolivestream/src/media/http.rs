//! HTTP media element
//!
//! Fetches the stream body with reqwest and pushes every chunk into an
//! [`AudioSink`]. Decoding and output belong to the sink; this element only
//! turns the transfer into media events:
//!
//! - first chunk (or first chunk after a stall) → [`MediaEvent::Playing`]
//! - no data for `stall_timeout` while flowing → [`MediaEvent::Waiting`]
//! - connection failure, 5xx, end of body, long stall → `Network` error
//! - 4xx or a non-audio content type → `SourceNotSupported` error
//! - sink write failure → `Decode` error

use super::{MediaElement, MediaError, MediaErrorKind, MediaEvent, MediaEventSender};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Default time without data before the element reports `Waiting` (3 seconds)
pub const DEFAULT_STALL_TIMEOUT_SECS: u64 = 3;

/// Consecutive stall periods after which the transfer is considered dead
pub const MAX_STALL_PERIODS: u32 = 5;

/// Consumer of the raw stream bytes
#[async_trait]
pub trait AudioSink: Send + 'static {
    /// Consume one chunk of the stream
    async fn write(&mut self, chunk: Bytes) -> std::io::Result<()>;

    /// Output level changed
    fn set_volume(&mut self, _volume: f32, _muted: bool) {}
}

/// Sink copying the stream into any async writer (a file, a pipe to a decoder...)
#[derive(Debug)]
pub struct WriterSink<W> {
    writer: W,
}

impl<W> WriterSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

#[async_trait]
impl<W> AudioSink for WriterSink<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    async fn write(&mut self, chunk: Bytes) -> std::io::Result<()> {
        self.writer.write_all(&chunk).await?;
        self.writer.flush().await
    }
}

/// Sink discarding the stream, counting bytes
#[derive(Debug, Default)]
pub struct NullSink {
    received: u64,
}

impl NullSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes received so far
    pub fn received(&self) -> u64 {
        self.received
    }
}

#[async_trait]
impl AudioSink for NullSink {
    async fn write(&mut self, chunk: Bytes) -> std::io::Result<()> {
        self.received += chunk.len() as u64;
        Ok(())
    }
}

/// Whether a response content type can be fed to an audio decoder
fn is_playable_content_type(content_type: &str) -> bool {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    mime.starts_with("audio/")
        || mime.starts_with("video/")
        || mime == "application/ogg"
        || mime == "application/octet-stream"
}

/// A running body transfer
struct Transfer {
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl Transfer {
    fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    fn stop(self) {
        self.token.cancel();
        self.task.abort();
    }
}

/// Media element streaming over HTTP into an [`AudioSink`]
///
/// `play` spawns the transfer on the current tokio runtime.
pub struct HttpMediaElement<S: AudioSink> {
    client: Client,
    sink: Arc<Mutex<S>>,
    source: Option<String>,
    volume: f32,
    muted: bool,
    output: watch::Sender<(f32, bool)>,
    stall_timeout: Duration,
    events: Option<MediaEventSender>,
    transfer: Option<Transfer>,
}

impl<S: AudioSink> HttpMediaElement<S> {
    /// Create an element with its own HTTP client
    pub fn new(sink: S) -> Self {
        Self::with_client(
            Client::new(),
            sink,
            Duration::from_secs(DEFAULT_STALL_TIMEOUT_SECS),
        )
    }

    /// Create an element sharing an HTTP client
    pub fn with_client(client: Client, sink: S, stall_timeout: Duration) -> Self {
        let (output, _) = watch::channel((1.0, false));
        Self {
            client,
            sink: Arc::new(Mutex::new(sink)),
            source: None,
            volume: 1.0,
            muted: false,
            output,
            stall_timeout,
            events: None,
            transfer: None,
        }
    }

    /// Shared access to the sink
    pub fn sink(&self) -> Arc<Mutex<S>> {
        self.sink.clone()
    }

    fn emit(&self, event: MediaEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }

    fn stop_transfer(&mut self) -> bool {
        match self.transfer.take() {
            Some(transfer) => {
                let was_running = transfer.is_running();
                transfer.stop();
                was_running
            }
            None => false,
        }
    }

    fn publish_output(&self) {
        self.output.send_replace((self.volume, self.muted));
        self.emit(MediaEvent::VolumeChanged {
            volume: self.volume,
            muted: self.muted,
        });
    }
}

impl<S: AudioSink> MediaElement for HttpMediaElement<S> {
    fn subscribe(&mut self, events: MediaEventSender) {
        self.events = Some(events);
    }

    fn load(&mut self, url: &str) {
        self.stop_transfer();
        debug!(url, "Loading stream source");
        self.source = Some(url.to_string());
    }

    fn play(&mut self) -> Result<(), MediaError> {
        let Some(url) = self.source.clone() else {
            return Err(MediaError::new(
                MediaErrorKind::SourceNotSupported,
                "no source loaded",
            ));
        };

        if self.transfer.as_ref().is_some_and(Transfer::is_running) {
            return Ok(());
        }

        let token = CancellationToken::new();
        let job = TransferJob {
            client: self.client.clone(),
            url,
            sink: self.sink.clone(),
            output: self.output.subscribe(),
            stall_timeout: self.stall_timeout,
            events: self.events.clone(),
        };
        let task = tokio::spawn(job.run(token.clone()));
        self.transfer = Some(Transfer { token, task });
        Ok(())
    }

    fn pause(&mut self) {
        if self.stop_transfer() {
            self.emit(MediaEvent::Paused);
        }
    }

    fn set_volume(&mut self, volume: f32) {
        self.volume = volume.clamp(0.0, 1.0);
        self.publish_output();
    }

    fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
        self.publish_output();
    }
}

impl<S: AudioSink> Drop for HttpMediaElement<S> {
    fn drop(&mut self) {
        self.stop_transfer();
    }
}

/// State moved into the transfer task
struct TransferJob<S: AudioSink> {
    client: Client,
    url: String,
    sink: Arc<Mutex<S>>,
    output: watch::Receiver<(f32, bool)>,
    stall_timeout: Duration,
    events: Option<MediaEventSender>,
}

impl<S: AudioSink> TransferJob<S> {
    async fn run(mut self, token: CancellationToken) {
        let outcome = tokio::select! {
            _ = token.cancelled() => return,
            outcome = self.stream() => outcome,
        };

        if let Err(error) = outcome {
            if !token.is_cancelled() {
                warn!(url = %self.url, %error, "Stream transfer failed");
                self.emit(MediaEvent::Error(error));
            }
        }
    }

    fn emit(&self, event: MediaEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }

    async fn stream(&mut self) -> Result<(), MediaError> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| MediaError::network(e.to_string()))?;

        let status = response.status();
        if status.is_client_error() {
            return Err(MediaError::new(
                MediaErrorKind::SourceNotSupported,
                format!("server answered {}", status),
            ));
        }
        if !status.is_success() {
            return Err(MediaError::network(format!("server answered {}", status)));
        }

        if let Some(content_type) = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
        {
            if !is_playable_content_type(content_type) {
                return Err(MediaError::new(
                    MediaErrorKind::SourceNotSupported,
                    format!("unsupported content type {}", content_type),
                ));
            }
        }

        info!(url = %self.url, "Stream connected");

        let mut sink = self.sink.clone().lock_owned().await;
        let (volume, muted) = *self.output.borrow_and_update();
        sink.set_volume(volume, muted);

        let mut body = Box::pin(response.bytes_stream());
        let mut flowing = false;
        let mut stalls = 0u32;

        loop {
            match tokio::time::timeout(self.stall_timeout, body.next()).await {
                Err(_) => {
                    stalls += 1;
                    if stalls >= MAX_STALL_PERIODS {
                        return Err(MediaError::network("stream stalled"));
                    }
                    if flowing {
                        flowing = false;
                        self.emit(MediaEvent::Waiting);
                    }
                }
                Ok(None) => return Err(MediaError::network("stream ended")),
                Ok(Some(Err(e))) => return Err(MediaError::network(e.to_string())),
                Ok(Some(Ok(chunk))) => {
                    stalls = 0;
                    if self.output.has_changed().unwrap_or(false) {
                        let (volume, muted) = *self.output.borrow_and_update();
                        sink.set_volume(volume, muted);
                    }
                    sink.write(chunk)
                        .await
                        .map_err(|e| MediaError::new(MediaErrorKind::Decode, e.to_string()))?;
                    if !flowing {
                        flowing = true;
                        self.emit(MediaEvent::Playing);
                    }
                }
            }
        }
    }
}
