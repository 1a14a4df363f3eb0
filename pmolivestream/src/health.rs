//! Stream reachability probing
//!
//! A probe is a cheap existence check (`HEAD`) against the effective stream
//! URL. It never fails: every error, timeout or non-success status folds
//! into [`HealthState::Unhealthy`].

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

/// Default probe timeout (5 seconds)
pub const DEFAULT_PROBE_TIMEOUT_SECS: u64 = 5;

/// Reachability of the stream endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    /// Not probed yet (or reset by a retry)
    #[default]
    Unknown,
    /// Endpoint answered
    Healthy,
    /// Endpoint unreachable or answered with an error
    Unhealthy,
}

impl HealthState {
    /// Label for the health indicator
    pub fn label(&self) -> &'static str {
        match self {
            HealthState::Unknown => "Checking...",
            HealthState::Healthy => "Connected",
            HealthState::Unhealthy => "Disconnected",
        }
    }
}

/// Reachability check
///
/// Implementations hold no state across calls, so probes may run
/// concurrently.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// Probe `url`; resolves to `Healthy` or `Unhealthy`
    async fn probe(&self, url: &str) -> HealthState;
}

/// `HEAD`-based probe over reqwest
#[derive(Debug, Clone)]
pub struct HttpHealthProbe {
    client: Client,
    timeout: Duration,
}

impl HttpHealthProbe {
    /// Create a probe with its own HTTP client
    pub fn new(timeout: Duration) -> Self {
        Self::with_client(Client::new(), timeout)
    }

    /// Create a probe sharing an existing HTTP client
    pub fn with_client(client: Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    /// Timeout applied to each probe
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl Default for HttpHealthProbe {
    fn default() -> Self {
        Self::new(Duration::from_secs(DEFAULT_PROBE_TIMEOUT_SECS))
    }
}

#[async_trait]
impl HealthProbe for HttpHealthProbe {
    async fn probe(&self, url: &str) -> HealthState {
        let request = self.client.head(url).timeout(self.timeout).send();

        match tokio::time::timeout(self.timeout, request).await {
            Ok(Ok(response)) if response.status().is_success() => HealthState::Healthy,
            Ok(Ok(response)) => {
                debug!(url, status = %response.status(), "Probe answered with an error status");
                HealthState::Unhealthy
            }
            Ok(Err(e)) => {
                debug!(url, error = %e, "Probe request failed");
                HealthState::Unhealthy
            }
            Err(_) => {
                debug!(url, timeout = ?self.timeout, "Probe timed out");
                HealthState::Unhealthy
            }
        }
    }
}
