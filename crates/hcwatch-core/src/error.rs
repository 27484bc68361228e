// ── Core error types ──
//
// Errors surfaced by the watcher. Transport details are folded into a few
// domain variants by the `From<hcwatch_api::Error>` impl so consumers can
// tell "authorization expired" apart from "the vendor changed its contract".

use thiserror::Error;

use crate::event::{ApiError, EventError};

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Connection errors ────────────────────────────────────────────
    #[error("Cannot reach the appliance API: {reason}")]
    ConnectionFailed { reason: String },

    #[error("Authorization expired -- run `hcwatch authorize` again: {message}")]
    AuthorizationExpired { message: String },

    // ── Data errors ──────────────────────────────────────────────────
    #[error("Appliance not found: {id}")]
    ApplianceNotFound { id: String },

    #[error(transparent)]
    Event(#[from] EventError),

    /// The vendor answered with an error key this client does not classify.
    #[error("Appliance API error on {path}: {error}")]
    Rejected { path: String, error: ApiError },

    // ── API errors (wrapped, not exposed raw) ────────────────────────
    #[error("API error: {message}")]
    Api { message: String },

    // ── Sink errors ──────────────────────────────────────────────────
    #[error("Export failed: {message}")]
    Export { message: String },

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl CoreError {
    pub fn is_auth_expired(&self) -> bool {
        matches!(self, Self::AuthorizationExpired { .. })
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<hcwatch_api::Error> for CoreError {
    fn from(err: hcwatch_api::Error) -> Self {
        use hcwatch_api::Error as E;

        if err.is_auth_expired() {
            return CoreError::AuthorizationExpired {
                message: err.to_string(),
            };
        }
        match err {
            E::Transport(_) | E::ReadTimeout(_) | E::StreamRejected { .. } | E::Tls(_) => {
                CoreError::ConnectionFailed {
                    reason: err.to_string(),
                }
            }
            E::InvalidUrl(e) => CoreError::Config {
                message: format!("Invalid URL: {e}"),
            },
            E::TokenStore(e) => CoreError::Config {
                message: format!("Token store: {e}"),
            },
            other => CoreError::Api {
                message: other.to_string(),
            },
        }
    }
}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        CoreError::Export {
            message: err.to_string(),
        }
    }
}

impl From<std::io::Error> for CoreError {
    fn from(err: std::io::Error) -> Self {
        CoreError::Export {
            message: err.to_string(),
        }
    }
}
