//! Now-playing metadata from the Shoutcast stats endpoint
//!
//! The poller fetches `{scheme}//{host}[:port]/stats?sid=1&json=1` once
//! immediately and then on a fixed interval. A failed fetch never stops the
//! loop: it produces a degraded [`Metadata`] whose title is replaced by
//! [`UNAVAILABLE_TITLE`] while the last known listener count is kept.
//!
//! # Example
//!
//! ```no_run
//! use pmolivestream::metadata::{HttpStatsClient, MetadataPoller};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let handle = MetadataPoller::start(
//!     "http://radio.example.com:8000/stats?sid=1&json=1".to_string(),
//!     Arc::new(HttpStatsClient::default()),
//!     Duration::from_secs(10),
//!     |metadata| println!("{} ({:?} listeners)", metadata.song_title, metadata.listener_count),
//! );
//!
//! tokio::time::sleep(Duration::from_secs(30)).await;
//! handle.cancel();
//! # }
//! ```

use crate::error::{Error, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Default delay between two stats fetches (10 seconds)
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 10;

/// Default timeout for a stats request (10 seconds)
pub const DEFAULT_STATS_TIMEOUT_SECS: u64 = 10;

/// Shortest accepted poll interval
pub const MIN_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Title shown when the stats endpoint could not be read
pub const UNAVAILABLE_TITLE: &str = "Metadata Unavailable";

/// Title shown before the first poll completes
pub const LOADING_TITLE: &str = "Loading...";

/// Title used when the server reports an empty song title
pub const UNKNOWN_SONG_TITLE: &str = "Unknown Song";

/// Now-playing information for the current stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Metadata {
    /// Current song title, or one of the sentinel titles
    pub song_title: String,
    /// Listener count as reported by the server
    pub listener_count: Option<String>,
}

impl Default for Metadata {
    fn default() -> Self {
        Self::loading()
    }
}

impl Metadata {
    /// Create metadata for a known song
    pub fn new(song_title: impl Into<String>, listener_count: Option<String>) -> Self {
        Self {
            song_title: song_title.into(),
            listener_count,
        }
    }

    /// Placeholder used until the first poll completes
    pub fn loading() -> Self {
        Self::new(LOADING_TITLE, None)
    }

    /// Degraded copy: title unavailable, listener count kept as-is
    pub fn degraded(&self) -> Self {
        Self {
            song_title: UNAVAILABLE_TITLE.to_string(),
            listener_count: self.listener_count.clone(),
        }
    }

    /// Whether the title is the "unavailable" sentinel
    pub fn is_unavailable(&self) -> bool {
        self.song_title == UNAVAILABLE_TITLE
    }
}

/// Listener count, which servers send either as a string or a number
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum ListenerCount {
    Text(String),
    Number(serde_json::Number),
}

impl ListenerCount {
    fn into_string(self) -> String {
        match self {
            ListenerCount::Text(s) => s,
            ListenerCount::Number(n) => n.to_string(),
        }
    }
}

/// Shoutcast `stats?json=1` document (only the fields we read)
#[derive(Debug, Clone, Deserialize)]
pub struct StatsDocument {
    songtitle: Option<String>,
    currentlisteners: Option<ListenerCount>,
}

impl StatsDocument {
    /// Parse a stats document from a JSON body
    pub fn from_slice(body: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(body)?)
    }

    /// Convert to metadata; missing fields are an error
    pub fn into_metadata(self) -> Result<Metadata> {
        let title = self
            .songtitle
            .ok_or_else(|| Error::malformed_stats("missing field `songtitle`"))?;
        let listeners = self
            .currentlisteners
            .ok_or_else(|| Error::malformed_stats("missing field `currentlisteners`"))?
            .into_string();

        let title = if title.trim().is_empty() {
            UNKNOWN_SONG_TITLE.to_string()
        } else {
            title
        };

        Ok(Metadata::new(title, Some(listeners)))
    }
}

/// Source of stats documents
#[async_trait]
pub trait StatsSource: Send + Sync {
    /// Fetch and parse the stats document at `url`
    async fn fetch(&self, url: &str) -> Result<Metadata>;
}

/// reqwest-based stats client
#[derive(Debug, Clone)]
pub struct HttpStatsClient {
    client: Client,
    timeout: Duration,
}

impl HttpStatsClient {
    /// Create a client sharing an existing HTTP client
    pub fn with_client(client: Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }
}

impl Default for HttpStatsClient {
    fn default() -> Self {
        Self::with_client(
            Client::new(),
            Duration::from_secs(DEFAULT_STATS_TIMEOUT_SECS),
        )
    }
}

#[async_trait]
impl StatsSource for HttpStatsClient {
    async fn fetch(&self, url: &str) -> Result<Metadata> {
        debug!(url, "Fetching stream stats");

        let response = self.client.get(url).timeout(self.timeout).send().await?;

        if !response.status().is_success() {
            return Err(Error::HttpStatus(response.status().as_u16()));
        }

        let body = response.bytes().await?;
        StatsDocument::from_slice(&body)?.into_metadata()
    }
}

/// Periodic stats fetcher
pub struct MetadataPoller;

impl MetadataPoller {
    /// Start polling `stats_url` and report every result to `on_update`
    ///
    /// Must be called from within a tokio runtime. Polling runs until the
    /// returned handle is cancelled or dropped.
    pub fn start<F>(
        stats_url: String,
        source: Arc<dyn StatsSource>,
        interval: Duration,
        on_update: F,
    ) -> PollerHandle
    where
        F: Fn(Metadata) + Send + 'static,
    {
        let token = CancellationToken::new();
        let interval = interval.max(MIN_POLL_INTERVAL);
        let task = tokio::spawn(Self::run(
            stats_url,
            source,
            interval,
            token.clone(),
            on_update,
        ));

        PollerHandle { token, task }
    }

    async fn run<F>(
        stats_url: String,
        source: Arc<dyn StatsSource>,
        interval: Duration,
        token: CancellationToken,
        on_update: F,
    ) where
        F: Fn(Metadata) + Send + 'static,
    {
        let mut last = Metadata::loading();
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let fetched = tokio::select! {
                _ = token.cancelled() => break,
                fetched = source.fetch(&stats_url) => fetched,
            };

            last = match fetched {
                Ok(metadata) => metadata,
                Err(e) => {
                    warn!(url = %stats_url, error = %e, "Failed to fetch stream metadata");
                    last.degraded()
                }
            };

            if token.is_cancelled() {
                break;
            }
            on_update(last.clone());
        }

        debug!(url = %stats_url, "Metadata poller stopped");
    }
}

/// Cancellation handle for a running [`MetadataPoller`]
///
/// Cancelling is synchronous and idempotent. Dropping the handle cancels.
#[derive(Debug)]
pub struct PollerHandle {
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl PollerHandle {
    /// Stop polling; late results are discarded
    pub fn cancel(&self) {
        self.token.cancel();
        self.task.abort();
    }

    /// Whether `cancel` has been called
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Drop for PollerHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tokio::sync::mpsc;
    use tokio::time::Instant;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Stats source replaying a fixed list of results, then repeating the last title
    struct ScriptedStats {
        results: Mutex<VecDeque<Result<Metadata>>>,
    }

    impl ScriptedStats {
        fn new(results: Vec<Result<Metadata>>) -> Arc<Self> {
            Arc::new(Self {
                results: Mutex::new(results.into()),
            })
        }
    }

    #[async_trait]
    impl StatsSource for ScriptedStats {
        async fn fetch(&self, _url: &str) -> Result<Metadata> {
            self.results
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(Error::HttpStatus(503)))
        }
    }

    #[test]
    fn test_parse_string_listeners() {
        let doc = StatsDocument::from_slice(
            br#"{"songtitle": "Track A", "currentlisteners": "12", "bitrate": "128"}"#,
        )
        .unwrap();
        assert_eq!(
            doc.into_metadata().unwrap(),
            Metadata::new("Track A", Some("12".to_string()))
        );
    }

    #[test]
    fn test_parse_numeric_listeners_and_empty_title() {
        let doc =
            StatsDocument::from_slice(br#"{"songtitle": "", "currentlisteners": 7}"#).unwrap();
        let metadata = doc.into_metadata().unwrap();
        assert_eq!(metadata.song_title, UNKNOWN_SONG_TITLE);
        assert_eq!(metadata.listener_count.as_deref(), Some("7"));
    }

    #[test]
    fn test_parse_missing_fields() {
        let doc = StatsDocument::from_slice(br#"{"currentlisteners": 7}"#).unwrap();
        assert!(matches!(
            doc.into_metadata(),
            Err(Error::MalformedStats(_))
        ));

        let doc = StatsDocument::from_slice(br#"{"songtitle": "x"}"#).unwrap();
        assert!(doc.into_metadata().is_err());

        assert!(StatsDocument::from_slice(b"<html>").is_err());
    }

    #[test]
    fn test_degraded_keeps_listeners() {
        let metadata = Metadata::new("Track A", Some("12".to_string()));
        let degraded = metadata.degraded();
        assert!(degraded.is_unavailable());
        assert_eq!(degraded.listener_count.as_deref(), Some("12"));
        assert_eq!(Metadata::loading().degraded().listener_count, None);
    }

    #[tokio::test]
    async fn test_http_stats_client() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/stats"))
            .and(query_param("sid", "1"))
            .and(query_param("json", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "songtitle": "Track A",
                "currentlisteners": "12"
            })))
            .mount(&server)
            .await;

        let client = HttpStatsClient::default();
        let url = format!("{}/stats?sid=1&json=1", server.uri());
        let metadata = client.fetch(&url).await.unwrap();
        assert_eq!(metadata, Metadata::new("Track A", Some("12".to_string())));
    }

    #[tokio::test]
    async fn test_http_stats_client_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let client = HttpStatsClient::default();
        let result = client.fetch(&format!("{}/stats?sid=1&json=1", server.uri())).await;
        assert!(matches!(result, Err(Error::HttpStatus(500))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_poller_immediate_then_interval() {
        let source = ScriptedStats::new(vec![
            Ok(Metadata::new("Track A", Some("12".to_string()))),
            Ok(Metadata::new("Track B", Some("13".to_string()))),
        ]);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let started = Instant::now();

        let handle = MetadataPoller::start(
            "http://x/stats?sid=1&json=1".to_string(),
            source,
            Duration::from_secs(10),
            move |m| {
                let _ = tx.send(m);
            },
        );

        let first = rx.recv().await.unwrap();
        assert_eq!(first.song_title, "Track A");
        assert!(started.elapsed() < Duration::from_secs(1));

        let second = rx.recv().await.unwrap();
        assert_eq!(second.song_title, "Track B");
        assert_eq!(started.elapsed().as_secs(), 10);

        handle.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_poller_failure_keeps_listeners_and_continues() {
        let source = ScriptedStats::new(vec![
            Ok(Metadata::new("Track A", Some("12".to_string()))),
            Err(Error::HttpStatus(500)),
            Ok(Metadata::new("Track C", Some("3".to_string()))),
        ]);
        let (tx, mut rx) = mpsc::unbounded_channel();

        let _handle = MetadataPoller::start(
            "http://x/stats?sid=1&json=1".to_string(),
            source,
            Duration::from_secs(10),
            move |m| {
                let _ = tx.send(m);
            },
        );

        assert_eq!(rx.recv().await.unwrap().song_title, "Track A");

        let degraded = rx.recv().await.unwrap();
        assert_eq!(degraded.song_title, UNAVAILABLE_TITLE);
        assert_eq!(degraded.listener_count.as_deref(), Some("12"));

        let recovered = rx.recv().await.unwrap();
        assert_eq!(recovered, Metadata::new("Track C", Some("3".to_string())));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_is_idempotent_and_stops_updates() {
        let source = ScriptedStats::new(vec![Ok(Metadata::new("Track A", None))]);
        let (tx, mut rx) = mpsc::unbounded_channel();

        let handle = MetadataPoller::start(
            "http://x/stats?sid=1&json=1".to_string(),
            source,
            Duration::from_secs(10),
            move |m| {
                let _ = tx.send(m);
            },
        );

        assert!(rx.recv().await.is_some());
        handle.cancel();
        handle.cancel();
        assert!(handle.is_cancelled());
        drop(handle);

        // the callback (and its sender) is dropped with the aborted task
        assert!(rx.recv().await.is_none());
    }
}
