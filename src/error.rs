use std::sync::Arc;

use thiserror::Error;

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced while configuring the client or synchronizing flag definitions.
///
/// Evaluation never returns these: `is_enabled` and `get_variant` are total and resolve every
/// failure to a safe default.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// A required configuration setting is missing or empty.
    #[error("missing required configuration: {0}")]
    MissingConfiguration(&'static str),

    /// The configured API URL cannot be parsed.
    #[error("invalid api_url configuration")]
    InvalidApiUrl(#[source] url::ParseError),

    /// A configured HTTP header name or value is not valid. Carries the header name.
    #[error("invalid http header: {0}")]
    InvalidHeader(String),

    /// The server rejected our credentials (401/403).
    #[error("unauthorized, api_key is likely invalid")]
    Unauthorized,

    /// The server answered with a status code we cannot use.
    #[error("unexpected response status {0}")]
    UnexpectedStatus(u16),

    /// A definitions payload (fetch response, backup or bootstrap) could not be parsed.
    #[error("error parsing feature definitions")]
    Parse(#[source] Arc<serde_json::Error>),

    /// `start_poller_thread()` was called while a poller is already attached to the client.
    #[error("poller thread already started")]
    PollerAlreadyStarted,

    /// Indicates that the poller thread panicked. This should normally never happen.
    #[error("poller thread panicked")]
    PollerThreadPanicked,

    /// An I/O error.
    #[error(transparent)]
    // std::io::Error is not clonable, so we're wrapping it in an Arc.
    Io(Arc<std::io::Error>),

    /// Network error.
    #[error(transparent)]
    Network(Arc<reqwest::Error>),
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(Arc::new(value))
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Self::Parse(Arc::new(value))
    }
}

impl From<reqwest::Error> for Error {
    fn from(value: reqwest::Error) -> Self {
        Error::Network(Arc::new(value.without_url()))
    }
}
