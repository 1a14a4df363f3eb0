//! Stream URL resolution
//!
//! Browser-style secure contexts refuse to load plain `http:` sub-resources.
//! When the hosting page is secure and the stream is not, the stream has to
//! be fetched through a proxy front-end that re-serves it over HTTPS.
//!
//! Everything in this module is a pure function of its inputs so the
//! resolution rules can be tested without a network.
//!
//! # Example
//!
//! ```
//! use pmolivestream::endpoint::{resolve, ProxyStrategy};
//!
//! let endpoint = resolve(
//!     "http://radio.example.com:8000/",
//!     true,
//!     &ProxyStrategy::default(),
//! );
//! assert!(endpoint.is_proxied());
//! assert_eq!(
//!     endpoint.effective_url(),
//!     "https://api.allorigins.win/raw?url=http%3A%2F%2Fradio.example.com%3A8000%2F"
//! );
//! ```

use crate::error::Result;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::Serialize;
use url::Url;

/// Default proxy front-end used for insecure streams on secure pages
pub const DEFAULT_PROXY_BASE: &str = "https://api.allorigins.win/raw?url=";

/// Alternative proxy front-ends, in order of preference.
///
/// Not cycled automatically: selection is deterministic and uses the
/// configured base only. The list is kept so a caller (or a future dynamic
/// selection) can pick another base when the default one is down.
pub const FALLBACK_PROXIES: &[&str] = &[
    "https://api.allorigins.win/raw?url=",
    "https://corsproxy.io/?",
];

/// Path and query of the Shoutcast stats document
pub const STATS_PATH: &str = "/stats?sid=1&json=1";

/// Characters left untouched by `encodeURIComponent`
const URI_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// How insecure URLs are made loadable from a secure context
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProxyStrategy {
    /// Never rewrite; insecure streams stay blocked on secure pages
    Direct,
    /// Prefix the percent-encoded URL with this proxy base
    FixedProxy(String),
}

impl Default for ProxyStrategy {
    fn default() -> Self {
        ProxyStrategy::FixedProxy(DEFAULT_PROXY_BASE.to_string())
    }
}

impl ProxyStrategy {
    /// Build a strategy from an optional proxy base (empty means direct)
    pub fn from_base(base: Option<&str>) -> Self {
        match base.map(str::trim) {
            Some(b) if !b.is_empty() => ProxyStrategy::FixedProxy(b.to_string()),
            _ => ProxyStrategy::Direct,
        }
    }

    /// Rewrite a URL through this strategy
    fn rewrite(&self, raw_url: &str) -> Option<String> {
        match self {
            ProxyStrategy::Direct => None,
            ProxyStrategy::FixedProxy(base) => Some(format!(
                "{}{}",
                base,
                utf8_percent_encode(raw_url, URI_COMPONENT)
            )),
        }
    }
}

/// A resolved stream location
///
/// Immutable: a new stream URL produces a new endpoint rather than
/// updating this one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamEndpoint {
    raw_url: String,
    effective_url: String,
    is_proxied: bool,
}

impl StreamEndpoint {
    /// URL as supplied by the caller
    pub fn raw_url(&self) -> &str {
        &self.raw_url
    }

    /// URL handed to the media element
    pub fn effective_url(&self) -> &str {
        &self.effective_url
    }

    /// Whether the effective URL goes through a proxy
    pub fn is_proxied(&self) -> bool {
        self.is_proxied
    }
}

/// Whether a URL uses the plain `http:` scheme
pub fn is_insecure(url: &str) -> bool {
    url.get(..5)
        .map(|scheme| scheme.eq_ignore_ascii_case("http:"))
        .unwrap_or(false)
}

/// Resolve the URL to hand to the media element
///
/// The URL is proxied only when the page is a secure context, the URL is
/// insecure and the strategy provides a proxy.
pub fn resolve(
    raw_url: &str,
    page_is_secure_context: bool,
    strategy: &ProxyStrategy,
) -> StreamEndpoint {
    let proxied = if page_is_secure_context && is_insecure(raw_url) {
        strategy.rewrite(raw_url)
    } else {
        None
    };

    match proxied {
        Some(effective_url) => StreamEndpoint {
            raw_url: raw_url.to_string(),
            effective_url,
            is_proxied: true,
        },
        None => StreamEndpoint {
            raw_url: raw_url.to_string(),
            effective_url: raw_url.to_string(),
            is_proxied: false,
        },
    }
}

/// Derive the Shoutcast stats endpoint from a stream URL
///
/// Keeps scheme, host and explicit port; drops path and query.
///
/// - `http://radio.example.com:8000/live` → `http://radio.example.com:8000/stats?sid=1&json=1`
/// - `https://radio.example.com/;stream.mp3` → `https://radio.example.com/stats?sid=1&json=1`
pub fn stats_url(raw_url: &str) -> Result<String> {
    let url = Url::parse(raw_url)?;
    let host = url.host_str().ok_or(url::ParseError::EmptyHost)?;

    Ok(match url.port() {
        Some(port) => format!("{}://{}:{}{}", url.scheme(), host, port, STATS_PATH),
        None => format!("{}://{}{}", url.scheme(), host, STATS_PATH),
    })
}
