use thiserror::Error;

/// Top-level error type for the `hcwatch-api` crate.
///
/// Covers every failure mode of the API surface: authorization, transport,
/// response shape, and the event stream. `hcwatch-core` maps these into
/// watcher-level errors.
#[derive(Debug, Error)]
pub enum Error {
    // ── Authorization ───────────────────────────────────────────────
    /// The API rejected the bearer token (HTTP 401) and a refresh did not help.
    #[error("Authorization rejected -- re-authorization required")]
    Unauthorized,

    /// No token is available in the token store.
    #[error("No access token available -- run the authorization flow first")]
    TokenMissing,

    /// Exchanging or refreshing a token failed.
    #[error("Token request failed: {message}")]
    TokenRefresh { message: String },

    /// Reading or writing the token store failed.
    #[error("Token store error: {0}")]
    TokenStore(#[from] std::io::Error),

    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, reset, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Reading a response timed out. The only failure the request
    /// throttler retries.
    #[error("Read timed out: {0}")]
    ReadTimeout(String),

    /// TLS or client construction error.
    #[error("TLS error: {0}")]
    Tls(String),

    // ── Event stream ────────────────────────────────────────────────
    /// The event stream endpoint answered with a non-200 status.
    #[error("Event stream rejected (HTTP {status})")]
    StreamRejected { status: u16 },

    // ── Data ────────────────────────────────────────────────────────
    /// The response envelope did not have the expected shape.
    #[error("Unexpected response shape: keys {keys:?}")]
    UnexpectedShape { keys: Vec<String> },

    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },

    // ── Platform ────────────────────────────────────────────────────
    /// Operation not supported by the configured endpoints.
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(&'static str),
}

impl Error {
    /// Returns `true` if this error indicates the authorization expired
    /// and re-authorizing might resolve it.
    pub fn is_auth_expired(&self) -> bool {
        matches!(
            self,
            Self::Unauthorized | Self::TokenMissing | Self::TokenRefresh { .. }
        )
    }

    /// Returns `true` for the transient read-timeout class.
    pub fn is_read_timeout(&self) -> bool {
        match self {
            Self::ReadTimeout(_) => true,
            Self::Transport(e) => e.is_timeout(),
            _ => false,
        }
    }

    /// Returns `true` if the failure means "the connection went away":
    /// rejected stream, refused or reset connection, or body read error.
    pub fn is_connection_drop(&self) -> bool {
        match self {
            Self::StreamRejected { .. } | Self::ReadTimeout(_) => true,
            Self::Transport(e) => e.is_connect() || e.is_body() || e.is_request() || e.is_timeout(),
            _ => false,
        }
    }
}
