use url::Url;

use crate::error::Error;

const PRODUCTION_HOST: &str = "https://api.home-connect.com";
const SIMULATOR_HOST: &str = "https://simulator.home-connect.com";

/// Which Home Connect deployment the client talks to.
///
/// Marker enum (no data) -- the concrete URLs live in [`Endpoints`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deployment {
    /// The production cloud at `api.home-connect.com`.
    Production,
    /// The developer simulator at `simulator.home-connect.com`.
    Simulator,
}

/// The set of base URLs for one deployment.
///
/// Production and simulator differ only in these values plus the
/// simulator-only automated login, which is exposed as a capability
/// ([`supports_automated_login`](Self::supports_automated_login)) rather
/// than a different client type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub deployment: Deployment,
    /// Base of the appliance API, e.g. `https://api.home-connect.com/api/homeappliances`.
    pub appliances: Url,
    /// OAuth authorization page.
    pub authorize: Url,
    /// OAuth token endpoint (code exchange and refresh).
    pub token: Url,
}

impl Endpoints {
    /// Endpoints for the production cloud.
    pub fn production() -> Self {
        Self::for_host(Deployment::Production, PRODUCTION_HOST)
            .unwrap_or_else(|_| unreachable!("static production host is a valid URL"))
    }

    /// Endpoints for the developer simulator.
    pub fn simulator() -> Self {
        Self::for_host(Deployment::Simulator, SIMULATOR_HOST)
            .unwrap_or_else(|_| unreachable!("static simulator host is a valid URL"))
    }

    /// Build endpoints for an arbitrary host (used against mock servers).
    pub fn for_host(deployment: Deployment, host: &str) -> Result<Self, Error> {
        let base = host.trim_end_matches('/');
        Ok(Self {
            deployment,
            appliances: Url::parse(&format!("{base}/api/homeappliances"))?,
            authorize: Url::parse(&format!("{base}/security/oauth/authorize"))?,
            token: Url::parse(&format!("{base}/security/oauth/token"))?,
        })
    }

    /// Whether the deployment offers the scripted username/password login.
    pub fn supports_automated_login(&self) -> bool {
        self.deployment == Deployment::Simulator
    }

    /// The scripted login form, derived from the authorize URL.
    pub fn login(&self) -> Result<Url, Error> {
        Ok(Url::parse(&self.authorize.as_str().replace("authorize", "login"))?)
    }

    /// Resolve a path relative to the appliances base.
    ///
    /// `""` is the appliance list, `"/{id}/status"` a status request,
    /// `"/events"` the global event stream.
    pub fn url(&self, path: &str) -> Result<Url, Error> {
        let base = self.appliances.as_str().trim_end_matches('/');
        Ok(Url::parse(&format!("{base}{path}"))?)
    }

    /// The event stream URL, global or scoped to one appliance.
    pub fn events_path(appliance_id: Option<&str>) -> String {
        match appliance_id {
            Some(id) => format!("/{id}/events"),
            None => "/events".into(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn production_urls() {
        let e = Endpoints::production();
        assert_eq!(
            e.appliances.as_str(),
            "https://api.home-connect.com/api/homeappliances"
        );
        assert_eq!(
            e.token.as_str(),
            "https://api.home-connect.com/security/oauth/token"
        );
        assert!(!e.supports_automated_login());
    }

    #[test]
    fn simulator_supports_login() {
        let e = Endpoints::simulator();
        assert!(e.supports_automated_login());
        assert_eq!(
            e.login().unwrap().as_str(),
            "https://simulator.home-connect.com/security/oauth/login"
        );
    }

    #[test]
    fn relative_paths() {
        let e = Endpoints::production();
        assert_eq!(
            e.url("").unwrap().as_str(),
            "https://api.home-connect.com/api/homeappliances"
        );
        assert_eq!(
            e.url("/SIEMENS-1/programs/active").unwrap().as_str(),
            "https://api.home-connect.com/api/homeappliances/SIEMENS-1/programs/active"
        );
    }

    #[test]
    fn events_paths() {
        assert_eq!(Endpoints::events_path(None), "/events");
        assert_eq!(Endpoints::events_path(Some("A")), "/A/events");
    }
}
