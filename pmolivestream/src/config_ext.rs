//! Live stream settings stored in pmoconfig
//!
//! Everything lives under `sources.livestream`:
//!
//! | key | default |
//! |---|---|
//! | `proxy_base` | `https://api.allorigins.win/raw?url=` (empty = no proxy) |
//! | `probe_timeout_secs` | 5 |
//! | `poll_interval_secs` | 10 |
//! | `max_retries` | 3 |
//! | `stall_timeout_secs` | 3 |
//! | `user_agent` | none |
//!
//! Getters persist the default when the key is missing, so the generated
//! `config.yaml` documents every knob.
//!
//! # Example
//!
//! ```no_run
//! use pmoconfig::get_config;
//! use pmolivestream::LiveStreamConfigExt;
//!
//! # fn main() -> anyhow::Result<()> {
//! let config = get_config();
//! config.set_livestream_max_retries(5)?;
//! let settings = config.livestream_settings()?;
//! assert_eq!(settings.max_retries, 5);
//! # Ok(())
//! # }
//! ```

use crate::controller::DEFAULT_MAX_RETRIES;
use crate::endpoint::{ProxyStrategy, DEFAULT_PROXY_BASE};
use crate::health::DEFAULT_PROBE_TIMEOUT_SECS;
use crate::media::http::DEFAULT_STALL_TIMEOUT_SECS;
use crate::metadata::DEFAULT_POLL_INTERVAL_SECS;
use crate::session::SessionSettings;
use anyhow::Result;
use pmoconfig::Config;
use serde_yaml::Value;
use std::time::Duration;

const SECTION: [&str; 2] = ["sources", "livestream"];

fn key_path(key: &str) -> [&str; 3] {
    [SECTION[0], SECTION[1], key]
}

/// Extension trait exposing the live stream settings of a [`Config`]
pub trait LiveStreamConfigExt {
    // ========================================================================
    // Proxy
    // ========================================================================

    /// Proxy prefix for insecure streams; empty disables the rewrite
    fn get_livestream_proxy_base(&self) -> Result<String>;

    fn set_livestream_proxy_base(&self, base: &str) -> Result<()>;

    // ========================================================================
    // Timing and retries
    // ========================================================================

    fn get_livestream_probe_timeout_secs(&self) -> Result<u64>;

    fn set_livestream_probe_timeout_secs(&self, secs: u64) -> Result<()>;

    fn get_livestream_poll_interval_secs(&self) -> Result<u64>;

    fn set_livestream_poll_interval_secs(&self, secs: u64) -> Result<()>;

    fn get_livestream_max_retries(&self) -> Result<u32>;

    fn set_livestream_max_retries(&self, retries: u32) -> Result<()>;

    fn get_livestream_stall_timeout_secs(&self) -> Result<u64>;

    fn set_livestream_stall_timeout_secs(&self, secs: u64) -> Result<()>;

    // ========================================================================
    // HTTP
    // ========================================================================

    /// User agent sent by probes, stats requests and the media element
    fn get_livestream_user_agent(&self) -> Result<Option<String>>;

    fn set_livestream_user_agent(&self, agent: &str) -> Result<()>;

    /// All of the above as [`SessionSettings`]
    fn livestream_settings(&self) -> Result<SessionSettings>;
}

/// Read an unsigned integer, persisting `default` when missing or invalid
fn get_u64_or_init(config: &Config, key: &str, default: u64) -> Result<u64> {
    match config.get_value(&key_path(key)) {
        Ok(Value::Number(n)) if n.as_u64().is_some() => Ok(n.as_u64().unwrap_or(default)),
        _ => {
            config.set_value(&key_path(key), Value::from(default))?;
            Ok(default)
        }
    }
}

impl LiveStreamConfigExt for Config {
    fn get_livestream_proxy_base(&self) -> Result<String> {
        match self.get_value(&key_path("proxy_base")) {
            Ok(Value::String(s)) => Ok(s),
            // `proxy_base:` with no value disables the proxy
            Ok(Value::Null) => Ok(String::new()),
            _ => {
                self.set_livestream_proxy_base(DEFAULT_PROXY_BASE)?;
                Ok(DEFAULT_PROXY_BASE.to_string())
            }
        }
    }

    fn set_livestream_proxy_base(&self, base: &str) -> Result<()> {
        self.set_value(&key_path("proxy_base"), Value::from(base))
    }

    fn get_livestream_probe_timeout_secs(&self) -> Result<u64> {
        get_u64_or_init(self, "probe_timeout_secs", DEFAULT_PROBE_TIMEOUT_SECS)
    }

    fn set_livestream_probe_timeout_secs(&self, secs: u64) -> Result<()> {
        self.set_value(&key_path("probe_timeout_secs"), Value::from(secs))
    }

    fn get_livestream_poll_interval_secs(&self) -> Result<u64> {
        get_u64_or_init(self, "poll_interval_secs", DEFAULT_POLL_INTERVAL_SECS)
    }

    fn set_livestream_poll_interval_secs(&self, secs: u64) -> Result<()> {
        self.set_value(&key_path("poll_interval_secs"), Value::from(secs))
    }

    fn get_livestream_max_retries(&self) -> Result<u32> {
        let retries = get_u64_or_init(self, "max_retries", u64::from(DEFAULT_MAX_RETRIES))?;
        Ok(u32::try_from(retries).unwrap_or(u32::MAX))
    }

    fn set_livestream_max_retries(&self, retries: u32) -> Result<()> {
        self.set_value(&key_path("max_retries"), Value::from(retries))
    }

    fn get_livestream_stall_timeout_secs(&self) -> Result<u64> {
        get_u64_or_init(self, "stall_timeout_secs", DEFAULT_STALL_TIMEOUT_SECS)
    }

    fn set_livestream_stall_timeout_secs(&self, secs: u64) -> Result<()> {
        self.set_value(&key_path("stall_timeout_secs"), Value::from(secs))
    }

    fn get_livestream_user_agent(&self) -> Result<Option<String>> {
        match self.get_value(&key_path("user_agent")) {
            Ok(Value::String(s)) if !s.trim().is_empty() => Ok(Some(s)),
            _ => Ok(None),
        }
    }

    fn set_livestream_user_agent(&self, agent: &str) -> Result<()> {
        self.set_value(&key_path("user_agent"), Value::from(agent))
    }

    fn livestream_settings(&self) -> Result<SessionSettings> {
        let proxy_base = self.get_livestream_proxy_base()?;

        Ok(SessionSettings {
            proxy: ProxyStrategy::from_base(Some(&proxy_base)),
            probe_timeout: Duration::from_secs(self.get_livestream_probe_timeout_secs()?),
            poll_interval: Duration::from_secs(self.get_livestream_poll_interval_secs()?),
            max_retries: self.get_livestream_max_retries()?,
            stall_timeout: Duration::from_secs(self.get_livestream_stall_timeout_secs()?),
            user_agent: self.get_livestream_user_agent()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config(dir: &TempDir) -> Config {
        Config::load_config(dir.path().to_str().unwrap()).unwrap()
    }

    #[test]
    fn test_embedded_defaults() {
        let dir = TempDir::new().unwrap();
        let settings = config(&dir).livestream_settings().unwrap();

        assert_eq!(settings.proxy, ProxyStrategy::default());
        assert_eq!(settings.probe_timeout, Duration::from_secs(5));
        assert_eq!(settings.poll_interval, Duration::from_secs(10));
        assert_eq!(settings.max_retries, 3);
        assert_eq!(settings.stall_timeout, Duration::from_secs(3));
        assert_eq!(settings.user_agent.as_deref(), Some("PMOLive/0.1"));
    }

    #[test]
    fn test_empty_proxy_base_means_direct() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        config.set_livestream_proxy_base("").unwrap();

        let settings = config.livestream_settings().unwrap();
        assert_eq!(settings.proxy, ProxyStrategy::Direct);
    }

    #[test]
    fn test_setters_round_trip_through_file() {
        let dir = TempDir::new().unwrap();
        {
            let config = config(&dir);
            config.set_livestream_max_retries(5).unwrap();
            config.set_livestream_poll_interval_secs(30).unwrap();
            config.set_livestream_user_agent("Radio/2.0").unwrap();
        }

        let settings = config(&dir).livestream_settings().unwrap();
        assert_eq!(settings.max_retries, 5);
        assert_eq!(settings.poll_interval, Duration::from_secs(30));
        assert_eq!(settings.user_agent.as_deref(), Some("Radio/2.0"));
    }

    #[test]
    fn test_missing_keys_are_persisted() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("config.yaml"),
            "sources:\n  livestream:\n    max_retries: oops\n",
        )
        .unwrap();

        let config = config(&dir);
        assert_eq!(config.get_livestream_max_retries().unwrap(), 3);
        assert_eq!(
            config
                .get_value(&["sources", "livestream", "max_retries"])
                .unwrap(),
            Value::from(3u64)
        );
    }
}
