//! Error types for the live stream session

/// Result type alias for live stream operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when driving a live stream session
///
/// Probe and metadata failures never surface through this type to the view
/// layer: they only degrade the matching piece of session state. These
/// variants are what the lower-level clients report before that folding.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON parsing failed
    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Server answered with a non-success status
    #[error("Server returned status {0}")]
    HttpStatus(u16),

    /// Stats document did not have the expected shape
    #[error("Malformed stats document: {0}")]
    MalformedStats(String),

    /// The session task is gone (shut down or panicked)
    #[error("Session is closed")]
    SessionClosed,

    /// Configuration error (from pmoconfig/anyhow)
    #[error("Configuration error: {0}")]
    Config(#[from] anyhow::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a generic error from a string
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Create a malformed stats error
    pub fn malformed_stats(msg: impl Into<String>) -> Self {
        Self::MalformedStats(msg.into())
    }
}
