//! Shared configuration for hcwatch.
//!
//! TOML profiles, client-secret resolution (env + keyring + plaintext),
//! platform path defaults, and translation to the runtime
//! `hcwatch_core::{ClientConfig, WatcherConfig}`. The core crate never
//! reads files; everything it needs is built here.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use hcwatch_api::{ClientCredentials, Deployment, Endpoints, ThrottleConfig, TransportConfig};
use hcwatch_core::{ClientConfig, WatcherConfig};

/// Keyring service name for stored client secrets.
pub const KEYRING_SERVICE: &str = "hcwatch";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("profile '{name}' not found in config")]
    UnknownProfile { name: String },

    #[error("no client secret configured for profile '{profile}'")]
    NoCredentials { profile: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Config {
    /// Profile used when none is named on the command line.
    pub default_profile: Option<String>,

    #[serde(default)]
    pub defaults: Defaults,

    #[serde(default)]
    pub profiles: HashMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("default".into()),
            defaults: Defaults::default(),
            profiles: HashMap::new(),
        }
    }
}

impl Config {
    /// Look up a profile by name, falling back to `default_profile`.
    pub fn profile(&self, name: Option<&str>) -> Result<(String, &Profile), ConfigError> {
        let name = name
            .or(self.default_profile.as_deref())
            .unwrap_or("default")
            .to_owned();
        let profile = self
            .profiles
            .get(&name)
            .ok_or_else(|| ConfigError::UnknownProfile { name: name.clone() })?;
        Ok((name, profile))
    }
}

/// Values shared by every profile unless the profile overrides them.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Defaults {
    /// Seconds between forced flushes of the JSONL sink.
    #[serde(default = "default_flush_interval")]
    pub flush_interval_secs: u64,

    /// Seconds to wait before reconnecting the event stream.
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_secs: u64,

    /// Seconds of stream silence before reconnecting.
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,

    /// Per-request timeout for polling requests.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            flush_interval_secs: default_flush_interval(),
            reconnect_delay_secs: default_reconnect_delay(),
            idle_timeout_secs: default_idle_timeout(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

fn default_flush_interval() -> u64 {
    300
}
fn default_reconnect_delay() -> u64 {
    120
}
fn default_idle_timeout() -> u64 {
    120
}
fn default_request_timeout() -> u64 {
    30
}

/// A named account profile.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Profile {
    /// Talk to the developer simulator instead of the production cloud.
    #[serde(default)]
    pub simulation: bool,

    /// Override the API host (e.g. a local mock). Defaults per deployment.
    pub api_host: Option<String>,

    pub client_id: String,

    /// Client secret (plaintext -- prefer keyring or env var).
    pub client_secret: Option<String>,

    /// Environment variable name containing the client secret.
    pub client_secret_env: Option<String>,

    #[serde(default = "default_redirect_uri")]
    pub redirect_uri: String,

    /// Where the OAuth token lives. Defaults under the data directory.
    pub token_path: Option<PathBuf>,

    /// Watch a single appliance instead of all of them.
    pub appliance: Option<String>,

    /// Directory for daily JSONL files.
    pub output_dir: Option<PathBuf>,

    /// SQLite database URL (e.g. `sqlite://events.db`).
    pub database: Option<String>,

    pub flush_interval_secs: Option<u64>,
    pub reconnect_delay_secs: Option<u64>,
    pub idle_timeout_secs: Option<u64>,
}

fn default_redirect_uri() -> String {
    "http://localhost:8000/code".into()
}

impl Profile {
    /// A profile with defaults for everything but the client id.
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            simulation: false,
            api_host: None,
            client_id: client_id.into(),
            client_secret: None,
            client_secret_env: None,
            redirect_uri: default_redirect_uri(),
            token_path: None,
            appliance: None,
            output_dir: None,
            database: None,
            flush_interval_secs: None,
            reconnect_delay_secs: None,
            idle_timeout_secs: None,
        }
    }

    pub fn endpoints(&self) -> Result<Endpoints, ConfigError> {
        let deployment = if self.simulation {
            Deployment::Simulator
        } else {
            Deployment::Production
        };
        match self.api_host {
            Some(ref host) => {
                Endpoints::for_host(deployment, host).map_err(|e| ConfigError::Validation {
                    field: "api_host".into(),
                    reason: e.to_string(),
                })
            }
            None if self.simulation => Ok(Endpoints::simulator()),
            None => Ok(Endpoints::production()),
        }
    }

    /// Token file for this profile: the configured path, or
    /// `<data dir>/<profile>/token.json` (`simulation_token.json` for the
    /// simulator, so the two never overwrite each other).
    pub fn token_path(&self, profile_name: &str) -> PathBuf {
        if let Some(ref path) = self.token_path {
            return path.clone();
        }
        let file = if self.simulation {
            "simulation_token.json"
        } else {
            "token.json"
        };
        data_dir().join(profile_name).join(file)
    }

    pub fn flush_interval(&self, defaults: &Defaults) -> Duration {
        Duration::from_secs(
            self.flush_interval_secs
                .unwrap_or(defaults.flush_interval_secs),
        )
    }
}

// ── Paths ───────────────────────────────────────────────────────────

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "hcwatch", "hcwatch")
}

fn home_fallback(parts: &[&str]) -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    for part in parts {
        p.push(part);
    }
    p
}

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    project_dirs().map_or_else(
        || home_fallback(&[".config", "hcwatch", "config.toml"]),
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

/// Directory for tokens and other state.
pub fn data_dir() -> PathBuf {
    project_dirs().map_or_else(
        || home_fallback(&[".local", "share", "hcwatch"]),
        |dirs| dirs.data_dir().to_path_buf(),
    )
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load from defaults, then `path` (if present), then `HCWATCH_*` env vars.
///
/// Nested keys use a double underscore:
/// `HCWATCH_DEFAULTS__FLUSH_INTERVAL_SECS=60`.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    debug!(path = %path.display(), "loading config");
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("HCWATCH_").split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<(), ConfigError> {
    save_config_to(cfg, &config_path())
}

pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Credential resolution ───────────────────────────────────────────

/// Resolve the client secret: named env var, then keyring, then plaintext.
///
/// Simulator profiles may run without a secret; they get an empty one.
pub fn resolve_client_secret(
    profile: &Profile,
    profile_name: &str,
) -> Result<SecretString, ConfigError> {
    // 1. Profile's client_secret_env → env var lookup
    if let Some(ref env_name) = profile.client_secret_env {
        if let Ok(val) = std::env::var(env_name) {
            return Ok(SecretString::from(val));
        }
    }

    // 2. System keyring
    if let Ok(entry) = keyring::Entry::new(KEYRING_SERVICE, &keyring_user(profile_name)) {
        if let Ok(secret) = entry.get_password() {
            return Ok(SecretString::from(secret));
        }
    }

    // 3. Plaintext in config
    if let Some(ref secret) = profile.client_secret {
        return Ok(SecretString::from(secret.clone()));
    }

    if profile.simulation {
        return Ok(SecretString::from(String::new()));
    }

    Err(ConfigError::NoCredentials {
        profile: profile_name.into(),
    })
}

/// Keyring account name for a profile's client secret.
pub fn keyring_user(profile_name: &str) -> String {
    format!("{profile_name}/client-secret")
}

/// Build the runtime client and watcher configuration for a profile.
pub fn profile_to_watcher_config(
    profile: &Profile,
    profile_name: &str,
    defaults: &Defaults,
) -> Result<(ClientConfig, WatcherConfig), ConfigError> {
    if profile.client_id.trim().is_empty() {
        return Err(ConfigError::Validation {
            field: "client_id".into(),
            reason: "must not be empty".into(),
        });
    }

    let client = ClientConfig {
        endpoints: profile.endpoints()?,
        credentials: ClientCredentials {
            client_id: profile.client_id.clone(),
            client_secret: resolve_client_secret(profile, profile_name)?,
            redirect_uri: profile.redirect_uri.clone(),
        },
        token_path: profile.token_path(profile_name),
        transport: TransportConfig {
            request_timeout: Duration::from_secs(defaults.request_timeout_secs),
            ..TransportConfig::default()
        },
    };

    let watcher = WatcherConfig {
        appliance: profile.appliance.clone(),
        idle_timeout: Duration::from_secs(
            profile
                .idle_timeout_secs
                .unwrap_or(defaults.idle_timeout_secs),
        ),
        reconnect_delay: Duration::from_secs(
            profile
                .reconnect_delay_secs
                .unwrap_or(defaults.reconnect_delay_secs),
        ),
        throttle: ThrottleConfig::default(),
        ..WatcherConfig::default()
    };

    Ok((client, watcher))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use figment::Jail;
    use pretty_assertions::assert_eq;
    use secrecy::ExposeSecret;

    use super::*;

    const SAMPLE: &str = r#"
default_profile = "home"

[defaults]
flush_interval_secs = 60

[profiles.home]
client_id = "abc"
client_secret = "plain"
appliance = "SIEMENS-123"
output_dir = "/var/lib/hcwatch"
reconnect_delay_secs = 30

[profiles.sim]
simulation = true
client_id = "sim-client"
"#;

    fn sample() -> Config {
        let mut config = None;
        Jail::expect_with(|jail| {
            jail.create_file("config.toml", SAMPLE)?;
            config = Some(load_config_from(Path::new("config.toml")).unwrap());
            Ok(())
        });
        config.unwrap()
    }

    #[test]
    fn loads_profiles_and_fills_defaults() {
        let config = sample();
        assert_eq!(config.default_profile.as_deref(), Some("home"));
        assert_eq!(config.defaults.flush_interval_secs, 60);
        assert_eq!(config.defaults.idle_timeout_secs, 120);

        let (name, home) = config.profile(None).unwrap();
        assert_eq!(name, "home");
        assert_eq!(home.redirect_uri, "http://localhost:8000/code");
        assert!(!home.simulation);
        assert_eq!(home.flush_interval(&config.defaults), Duration::from_secs(60));
    }

    #[test]
    fn missing_file_gives_defaults() {
        Jail::expect_with(|_| {
            let config = load_config_from(Path::new("nope.toml")).unwrap();
            assert_eq!(config, Config::default());
            Ok(())
        });
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn canonical_path_follows_xdg_config_home() {
        let config = sample();
        Jail::expect_with(|jail| {
            jail.set_env("XDG_CONFIG_HOME", jail.directory().join("xdg").display());
            assert_eq!(
                config_path(),
                jail.directory().join("xdg/hcwatch/config.toml")
            );

            save_config(&config).unwrap();
            assert_eq!(load_config().unwrap(), config);
            Ok(())
        });
    }

    #[test]
    fn environment_overrides_file() {
        Jail::expect_with(|jail| {
            jail.create_file("config.toml", SAMPLE)?;
            jail.set_env("HCWATCH_DEFAULT_PROFILE", "sim");
            jail.set_env("HCWATCH_DEFAULTS__IDLE_TIMEOUT_SECS", "45");
            let config = load_config_from(Path::new("config.toml")).unwrap();
            assert_eq!(config.default_profile.as_deref(), Some("sim"));
            assert_eq!(config.defaults.idle_timeout_secs, 45);
            Ok(())
        });
    }

    #[test]
    fn unknown_profile_is_an_error() {
        let err = sample().profile(Some("office")).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownProfile { ref name } if name == "office"));
    }

    #[test]
    fn builds_runtime_config() {
        let config = sample();
        let (name, home) = config.profile(Some("home")).unwrap();
        let (client, watcher) = profile_to_watcher_config(home, &name, &config.defaults).unwrap();

        assert_eq!(client.endpoints, Endpoints::production());
        assert_eq!(client.credentials.client_id, "abc");
        assert_eq!(client.credentials.client_secret.expose_secret(), "plain");
        assert!(client.token_path.ends_with("home/token.json"));
        assert_eq!(watcher.appliance.as_deref(), Some("SIEMENS-123"));
        assert_eq!(watcher.reconnect_delay, Duration::from_secs(30));
        assert_eq!(watcher.idle_timeout, Duration::from_secs(120));
    }

    #[test]
    fn simulator_profile_uses_simulator_endpoints_without_secret() {
        let config = sample();
        let (name, sim) = config.profile(Some("sim")).unwrap();
        let (client, _) = profile_to_watcher_config(sim, &name, &config.defaults).unwrap();

        assert_eq!(client.endpoints, Endpoints::simulator());
        assert!(client.endpoints.supports_automated_login());
        assert!(client.token_path.ends_with("sim/simulation_token.json"));
    }

    #[test]
    fn secret_env_var_wins_over_plaintext() {
        Jail::expect_with(|jail| {
            jail.set_env("HCWATCH_TEST_SECRET", "from-env");
            let profile = Profile {
                client_secret: Some("plain".into()),
                client_secret_env: Some("HCWATCH_TEST_SECRET".into()),
                ..Profile::new("abc")
            };
            let secret = resolve_client_secret(&profile, "hcwatch-test-env").unwrap();
            assert_eq!(secret.expose_secret(), "from-env");
            Ok(())
        });
    }

    #[test]
    fn production_profile_without_secret_is_rejected() {
        let profile = Profile {
            client_secret_env: Some("HCWATCH_TEST_UNSET_SECRET".into()),
            ..Profile::new("abc")
        };
        let err = resolve_client_secret(&profile, "hcwatch-test-none").unwrap_err();
        assert!(matches!(err, ConfigError::NoCredentials { .. }));
    }

    #[test]
    fn api_host_override_is_validated() {
        let profile = Profile {
            api_host: Some("not a url".into()),
            ..Profile::new("abc")
        };
        assert!(matches!(
            profile.endpoints(),
            Err(ConfigError::Validation { .. })
        ));

        let profile = Profile {
            api_host: Some("http://127.0.0.1:9000".into()),
            ..Profile::new("abc")
        };
        let endpoints = profile.endpoints().unwrap();
        assert_eq!(
            endpoints.appliances.as_str(),
            "http://127.0.0.1:9000/api/homeappliances"
        );
    }

    #[test]
    fn saved_config_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let config = sample();

        save_config_to(&config, &path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        let reloaded: Config = toml::from_str(&text).unwrap();
        assert_eq!(reloaded, config);
    }
}
