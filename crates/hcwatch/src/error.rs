//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` into user-facing errors with
//! actionable help text and distinct exit codes.

use miette::Diagnostic;
use thiserror::Error;

use hcwatch_config::ConfigError;
use hcwatch_core::CoreError;

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const CONFIG: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const NOT_FOUND: i32 = 4;
    pub const CONNECTION: i32 = 7;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Authorization ────────────────────────────────────────────────
    #[error("Authorization expired or missing: {message}")]
    #[diagnostic(
        code(hcwatch::auth_expired),
        help(
            "Run: hcwatch authorize --profile {profile}\n\
             For simulator profiles: hcwatch login-simulator --profile {profile}"
        )
    )]
    AuthExpired { profile: String, message: String },

    #[error("No client secret configured for profile '{profile}'")]
    #[diagnostic(
        code(hcwatch::no_credentials),
        help(
            "Set client_secret_env in the profile, store the secret in the keyring\n\
             (service 'hcwatch', user '{profile}/client-secret'), or add client_secret."
        )
    )]
    NoCredentials { profile: String },

    // ── Resources ────────────────────────────────────────────────────
    #[error("Appliance '{id}' not found")]
    #[diagnostic(
        code(hcwatch::appliance_not_found),
        help("Check the haId in your profile or --appliance flag.")
    )]
    ApplianceNotFound { id: String },

    // ── Connection ───────────────────────────────────────────────────
    #[error("Could not reach the Home Connect API: {reason}")]
    #[diagnostic(
        code(hcwatch::connection_failed),
        help("Check your network connection and the api_host setting.")
    )]
    ConnectionFailed { reason: String },

    // ── Watcher / API ────────────────────────────────────────────────
    #[error("Watcher stopped: {message}")]
    #[diagnostic(code(hcwatch::watcher_failed))]
    WatcherFailed { message: String },

    #[error("{message}")]
    #[diagnostic(code(hcwatch::api_error))]
    Api { message: String },

    #[error("{message}")]
    #[diagnostic(code(hcwatch::export))]
    Export { message: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error("Profile '{name}' not found in configuration")]
    #[diagnostic(
        code(hcwatch::profile_not_found),
        help(
            "Available profiles: {available}\n\
             Config file: {path}"
        )
    )]
    ProfileNotFound {
        name: String,
        available: String,
        path: String,
    },

    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(hcwatch::validation))]
    Validation { field: String, reason: String },

    #[error("{message}")]
    #[diagnostic(code(hcwatch::config))]
    Config { message: String },

    // ── IO / Serialization ───────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Failed to encode output: {0}")]
    #[diagnostic(code(hcwatch::json))]
    Json(#[from] serde_json::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::AuthExpired { .. } | Self::NoCredentials { .. } => exit_code::AUTH,
            Self::ApplianceNotFound { .. } => exit_code::NOT_FOUND,
            Self::ConnectionFailed { .. } => exit_code::CONNECTION,
            Self::ProfileNotFound { .. } | Self::Validation { .. } | Self::Config { .. } => {
                exit_code::CONFIG
            }
            _ => exit_code::GENERAL,
        }
    }

    /// Attach the active profile name to a core error.
    pub fn from_core(err: CoreError, profile: &str) -> Self {
        match err {
            CoreError::AuthorizationExpired { message } => Self::AuthExpired {
                profile: profile.to_owned(),
                message,
            },
            other => other.into(),
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::ConnectionFailed { reason } => Self::ConnectionFailed { reason },
            CoreError::AuthorizationExpired { message } => Self::AuthExpired {
                profile: "default".into(),
                message,
            },
            CoreError::ApplianceNotFound { id } => Self::ApplianceNotFound { id },
            CoreError::Config { message } => Self::Config { message },
            CoreError::Export { message } => Self::Export { message },
            other @ (CoreError::Event(_) | CoreError::Rejected { .. } | CoreError::Api { .. }) => {
                Self::Api {
                    message: other.to_string(),
                }
            }
        }
    }
}

impl From<hcwatch_api::Error> for CliError {
    fn from(err: hcwatch_api::Error) -> Self {
        CoreError::from(err).into()
    }
}

// ── ConfigError → CliError mapping ───────────────────────────────────

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::NoCredentials { profile } => Self::NoCredentials { profile },
            ConfigError::Validation { field, reason } => Self::Validation { field, reason },
            ConfigError::UnknownProfile { name } => Self::ProfileNotFound {
                name,
                available: String::new(),
                path: String::new(),
            },
            ConfigError::Io(e) => Self::Io(e),
            other => Self::Config {
                message: other.to_string(),
            },
        }
    }
}
