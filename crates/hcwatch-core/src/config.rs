// ── Runtime watcher configuration ──
//
// These types describe how to reach the appliance API and how the watcher
// paces itself. They carry credentials and timing, but never touch config
// files. The CLI builds them from a profile and hands them in.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use hcwatch_api::{
    BearerAuth, ClientCredentials, Endpoints, FileTokenStore, HomeConnectClient, OAuthClient,
    ThrottleConfig, Transport, TransportConfig,
};

use crate::error::CoreError;
use crate::metrics::Metrics;
use crate::supervisor::TransportFactory;
use crate::trigger::DEFAULT_STALENESS;

/// Everything needed to build an authorized HTTP client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub endpoints: Endpoints,
    pub credentials: ClientCredentials,
    /// Where the OAuth token is persisted.
    pub token_path: PathBuf,
    pub transport: TransportConfig,
}

impl ClientConfig {
    pub fn oauth(&self) -> Result<OAuthClient, CoreError> {
        Ok(OAuthClient::new(
            self.endpoints.clone(),
            self.credentials.clone(),
            &self.transport,
        )?)
    }

    /// Build a fresh client. Each watcher generation gets its own.
    pub fn build_client(&self, metrics: Arc<dyn Metrics>) -> Result<HomeConnectClient, CoreError> {
        let store = Arc::new(FileTokenStore::new(self.token_path.clone()));
        let auth = BearerAuth::new(self.oauth()?, store)
            .with_refresh_hook(Arc::new(move || metrics.increment_token_refresh()));
        Ok(HomeConnectClient::new(
            self.endpoints.clone(),
            auth,
            &self.transport,
        )?)
    }

    /// Factory handing each supervisor generation its own client.
    pub fn transport_factory(&self, metrics: Arc<dyn Metrics>) -> TransportFactory {
        let config = self.clone();
        Arc::new(move || {
            let client = config.build_client(Arc::clone(&metrics))?;
            Ok(Arc::new(client) as Arc<dyn Transport>)
        })
    }
}

/// Watcher timing and scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatcherConfig {
    /// Watch a single appliance instead of the global stream.
    pub appliance: Option<String>,
    /// Reconnect when the stream is silent this long.
    pub idle_timeout: Duration,
    /// Wait this long before reconnecting.
    pub reconnect_delay: Duration,
    /// Minimum age before an `IfStale` follow-up repeats.
    pub staleness: Duration,
    pub throttle: ThrottleConfig,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            appliance: None,
            idle_timeout: Duration::from_secs(120),
            reconnect_delay: Duration::from_secs(120),
            staleness: DEFAULT_STALENESS,
            throttle: ThrottleConfig::default(),
        }
    }
}
