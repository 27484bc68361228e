//! Command dispatch: bridges CLI args -> profile -> core runtime.

pub mod authorize;
pub mod items;
pub mod load;
pub mod login_simulator;
pub mod watch;

use std::path::PathBuf;

use hcwatch_api::{FileTokenStore, OAuthClient, TokenStore};
use hcwatch_config::{ConfigError, Defaults, Profile};
use hcwatch_core::{ClientConfig, WatcherConfig};

use crate::cli::{Command, GlobalOpts};
use crate::error::CliError;

/// The profile selected by `--profile` (or the config default).
#[derive(Debug)]
pub struct ActiveProfile {
    pub name: String,
    pub profile: Profile,
    pub defaults: Defaults,
}

impl ActiveProfile {
    pub fn load(global: &GlobalOpts) -> Result<Self, CliError> {
        let (path, config) = match &global.config {
            Some(path) => (path.clone(), hcwatch_config::load_config_from(path)?),
            None => (hcwatch_config::config_path(), hcwatch_config::load_config()?),
        };

        match config.profile(global.profile.as_deref()) {
            Ok((name, profile)) => Ok(Self {
                name,
                profile: profile.clone(),
                defaults: config.defaults.clone(),
            }),
            Err(ConfigError::UnknownProfile { name }) => {
                let mut available: Vec<&str> = config.profiles.keys().map(String::as_str).collect();
                available.sort_unstable();
                let available = if available.is_empty() {
                    "(none)".to_owned()
                } else {
                    available.join(", ")
                };
                Err(CliError::ProfileNotFound {
                    name,
                    available,
                    path: path.display().to_string(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn runtime(&self) -> Result<(ClientConfig, WatcherConfig), CliError> {
        Ok(hcwatch_config::profile_to_watcher_config(
            &self.profile,
            &self.name,
            &self.defaults,
        )?)
    }

    pub fn token_path(&self) -> PathBuf {
        self.profile.token_path(&self.name)
    }

    pub fn oauth(&self) -> Result<OAuthClient, CliError> {
        let (client, _) = self.runtime()?;
        Ok(client.oauth()?)
    }

    /// Persist a freshly obtained token where the watcher will look for it.
    pub fn save_token(&self, token: &hcwatch_api::Token) -> Result<PathBuf, CliError> {
        let store = FileTokenStore::new(self.token_path());
        store.save(token)?;
        Ok(store.path().to_path_buf())
    }
}

/// Dispatch a profile-bound command to its handler.
pub async fn dispatch(cmd: Command, profile: &ActiveProfile) -> Result<(), CliError> {
    match cmd {
        Command::Watch(args) => watch::handle(args, profile).await,
        Command::Authorize(args) => authorize::handle(args, profile).await,
        Command::LoginSimulator(args) => login_simulator::handle(args, profile).await,
        // Handled before a profile is loaded
        Command::Load(_) | Command::Items(_) | Command::Completions(_) => unreachable!(),
    }
}
