// OAuth token handling.
//
// The watcher does not run the interactive authorization flow itself; it
// consumes a token persisted by a `TokenStore`, refreshes it when it is
// about to expire (or on the first 401), and writes the refreshed token
// back through the store.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use chrono::Utc;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use url::Url;

use crate::endpoints::Endpoints;
use crate::error::Error;
use crate::transport::TransportConfig;

/// Refresh this many seconds before the advertised expiry.
const EXPIRY_SKEW_SECS: i64 = 60;

/// Generic scopes requested by the scripted simulator login.
const SIMULATOR_SCOPE: &str = "IdentifyAppliance Monitor Control Settings";

// ── Token ───────────────────────────────────────────────────────────

/// A persisted OAuth token.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Token {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Unix timestamp (seconds) after which the access token is invalid.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .field("expires_at", &self.expires_at)
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

impl Token {
    /// Whether the token expires within the refresh skew window.
    pub fn is_expiring(&self) -> bool {
        self.expires_at
            .is_some_and(|at| at - EXPIRY_SKEW_SECS <= Utc::now().timestamp())
    }
}

/// Raw token endpoint response.
#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    scope: Option<String>,
}

impl TokenResponse {
    fn into_token(self, previous_refresh: Option<String>) -> Token {
        Token {
            access_token: self.access_token,
            refresh_token: self.refresh_token.or(previous_refresh),
            expires_at: self.expires_in.map(|secs| Utc::now().timestamp() + secs),
            token_type: self.token_type,
            scope: self.scope,
        }
    }
}

// ── TokenStore ──────────────────────────────────────────────────────

/// Persistence for the OAuth token.
pub trait TokenStore: Send + Sync {
    fn load(&self) -> Result<Option<Token>, Error>;
    fn save(&self, token: &Token) -> Result<(), Error>;
}

/// Stores the token as a JSON file.
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TokenStore for FileTokenStore {
    fn load(&self) -> Result<Option<Token>, Error> {
        if !self.path.is_file() {
            warn!(path = %self.path.display(), "token cache not found");
            return Ok(None);
        }
        info!(path = %self.path.display(), "loading token from disk");
        let raw = std::fs::read_to_string(&self.path)?;
        let token = serde_json::from_str(&raw).map_err(|e| Error::Deserialization {
            message: format!("invalid token file: {e}"),
            body: String::new(),
        })?;
        Ok(Some(token))
    }

    fn save(&self, token: &Token) -> Result<(), Error> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        info!(path = %self.path.display(), "saving token to disk");
        let raw = serde_json::to_string(token).map_err(|e| Error::Deserialization {
            message: format!("failed to encode token: {e}"),
            body: String::new(),
        })?;
        std::fs::write(&self.path, raw)?;
        Ok(())
    }
}

/// Keeps the token in memory only (tests, one-off runs).
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    token: StdMutex<Option<Token>>,
}

impl MemoryTokenStore {
    pub fn new(token: Option<Token>) -> Self {
        Self {
            token: StdMutex::new(token),
        }
    }
}

impl TokenStore for MemoryTokenStore {
    fn load(&self) -> Result<Option<Token>, Error> {
        Ok(self.token.lock().unwrap_or_else(PoisonError::into_inner).clone())
    }

    fn save(&self, token: &Token) -> Result<(), Error> {
        *self.token.lock().unwrap_or_else(PoisonError::into_inner) = Some(token.clone());
        Ok(())
    }
}

// ── OAuthClient ─────────────────────────────────────────────────────

/// Client registration for the OAuth endpoints.
#[derive(Debug, Clone)]
pub struct ClientCredentials {
    pub client_id: String,
    pub client_secret: SecretString,
    pub redirect_uri: String,
}

/// Talks to the OAuth endpoints of one deployment.
pub struct OAuthClient {
    http: reqwest::Client,
    endpoints: Endpoints,
    credentials: ClientCredentials,
}

impl OAuthClient {
    pub fn new(
        endpoints: Endpoints,
        credentials: ClientCredentials,
        transport: &TransportConfig,
    ) -> Result<Self, Error> {
        Ok(Self {
            http: transport.build_client()?,
            endpoints,
            credentials,
        })
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    /// The page a user visits to grant access.
    pub fn authorization_url(&self) -> Url {
        let mut url = self.endpoints.authorize.clone();
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.credentials.client_id)
            .append_pair("redirect_uri", &self.credentials.redirect_uri);
        url
    }

    /// Exchange an authorization code for a token.
    pub async fn exchange_code(&self, code: &str) -> Result<Token, Error> {
        debug!("exchanging authorization code");
        let form = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("client_id", self.credentials.client_id.as_str()),
            ("client_secret", self.credentials.client_secret.expose_secret()),
            ("redirect_uri", self.credentials.redirect_uri.as_str()),
        ];
        let resp = self.post_token(&form).await?;
        Ok(resp.into_token(None))
    }

    /// Trade the refresh token for a new access token.
    pub async fn refresh(&self, token: &Token) -> Result<Token, Error> {
        let Some(ref refresh_token) = token.refresh_token else {
            return Err(Error::TokenRefresh {
                message: "token has no refresh_token".into(),
            });
        };
        debug!("refreshing access token");
        let form = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token.as_str()),
            ("client_secret", self.credentials.client_secret.expose_secret()),
        ];
        let resp = self.post_token(&form).await?;
        Ok(resp.into_token(token.refresh_token.clone()))
    }

    /// Scripted username/password login, available on the simulator only.
    ///
    /// Submits the login form, approves the grant, and exchanges the code
    /// carried by the final redirect.
    pub async fn simulator_login(&self, username: &str, password: &str) -> Result<Token, Error> {
        if !self.endpoints.supports_automated_login() {
            return Err(Error::UnsupportedOperation(
                "automated login is only available on the simulator",
            ));
        }

        let session = TransportConfig::default()
            .with_cookie_jar()
            .without_redirects()
            .build_client()?;

        let login_url = self
            .authorization_url()
            .as_str()
            .replace("/authorize", "/login");
        let page = session
            .post(&login_url)
            .form(&[("email", username), ("password", password)])
            .send()
            .await?
            .text()
            .await?;

        let grant_path = find_grant_path(&page).ok_or_else(|| Error::TokenRefresh {
            message: "login page did not contain a grant form".into(),
        })?;
        let grant_url = self.endpoints.authorize.join(&grant_path)?;

        let approved = session
            .post(grant_url)
            .form(&[
                ("submit", "approve"),
                ("user", "email"),
                ("client_id", self.credentials.client_id.as_str()),
                ("scope", SIMULATOR_SCOPE),
                ("redirect_uri", self.credentials.redirect_uri.as_str()),
            ])
            .send()
            .await?;
        let next = redirect_target(&approved, &self.endpoints.authorize)?;

        let redirected = session.get(next).send().await?;
        let callback = redirect_target(&redirected, &self.endpoints.authorize)?;
        let code = callback
            .query_pairs()
            .find(|(k, _)| k == "code")
            .map(|(_, v)| v.into_owned())
            .ok_or_else(|| Error::TokenRefresh {
                message: "redirect did not carry an authorization code".into(),
            })?;

        self.exchange_code(&code).await
    }

    async fn post_token(&self, form: &[(&str, &str)]) -> Result<TokenResponse, Error> {
        let resp = self
            .http
            .post(self.endpoints.token.clone())
            .form(form)
            .send()
            .await?;
        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            let excerpt: String = body.chars().take(200).collect();
            return Err(Error::TokenRefresh {
                message: format!("HTTP {status}: {excerpt}"),
            });
        }
        serde_json::from_str(&body).map_err(|e| Error::Deserialization {
            message: format!("invalid token response: {e}"),
            body,
        })
    }
}

fn find_grant_path(page: &str) -> Option<String> {
    let start = page.find("/security/oauth/grant")?;
    let rest = &page[start..];
    let end = rest.find('"')?;
    Some(rest[..end].replace("&amp;", "&"))
}

fn redirect_target(resp: &reqwest::Response, base: &Url) -> Result<Url, Error> {
    let location = resp
        .headers()
        .get(reqwest::header::LOCATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| Error::TokenRefresh {
            message: format!("expected a redirect, got HTTP {}", resp.status()),
        })?;
    Ok(base.join(location)?)
}

// ── BearerAuth ──────────────────────────────────────────────────────

/// Hook invoked after every successful token refresh.
pub type RefreshHook = Arc<dyn Fn() + Send + Sync>;

/// Supplies a valid access token, refreshing and persisting as needed.
pub struct BearerAuth {
    oauth: OAuthClient,
    store: Arc<dyn TokenStore>,
    current: Mutex<Option<Token>>,
    on_refresh: Option<RefreshHook>,
}

impl BearerAuth {
    pub fn new(oauth: OAuthClient, store: Arc<dyn TokenStore>) -> Self {
        Self {
            oauth,
            store,
            current: Mutex::new(None),
            on_refresh: None,
        }
    }

    /// Register a hook called after each refresh (metrics).
    pub fn with_refresh_hook(mut self, hook: RefreshHook) -> Self {
        self.on_refresh = Some(hook);
        self
    }

    pub fn oauth(&self) -> &OAuthClient {
        &self.oauth
    }

    /// A currently valid access token.
    pub async fn access_token(&self) -> Result<String, Error> {
        let mut guard = self.current.lock().await;
        if guard.is_none() {
            *guard = self.store.load()?;
        }
        let Some(token) = guard.as_ref() else {
            return Err(Error::TokenMissing);
        };
        if token.is_expiring() && token.refresh_token.is_some() {
            let refreshed = self.refresh_locked(token).await?;
            let access = refreshed.access_token.clone();
            *guard = Some(refreshed);
            return Ok(access);
        }
        Ok(token.access_token.clone())
    }

    /// Called after a 401 with the token that was rejected.
    ///
    /// Refreshes unless the token was already replaced in the meantime.
    pub async fn refresh_after_rejection(&self, rejected: &str) -> Result<String, Error> {
        let mut guard = self.current.lock().await;
        let Some(token) = guard.as_ref() else {
            return Err(Error::TokenMissing);
        };
        if token.access_token != rejected {
            return Ok(token.access_token.clone());
        }
        if token.refresh_token.is_none() {
            return Err(Error::Unauthorized);
        }
        let refreshed = self.refresh_locked(token).await?;
        let access = refreshed.access_token.clone();
        *guard = Some(refreshed);
        Ok(access)
    }

    async fn refresh_locked(&self, token: &Token) -> Result<Token, Error> {
        let refreshed = self.oauth.refresh(token).await?;
        self.store.save(&refreshed)?;
        if let Some(ref hook) = self.on_refresh {
            hook();
        }
        info!("access token refreshed");
        Ok(refreshed)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn token(expires_at: Option<i64>) -> Token {
        Token {
            access_token: "abc".into(),
            refresh_token: Some("def".into()),
            expires_at,
            token_type: Some("Bearer".into()),
            scope: None,
        }
    }

    #[test]
    fn expiry_window() {
        let now = Utc::now().timestamp();
        assert!(token(Some(now + 10)).is_expiring());
        assert!(!token(Some(now + 3600)).is_expiring());
        assert!(!token(None).is_expiring());
    }

    #[test]
    fn debug_redacts_secrets() {
        let rendered = format!("{:?}", token(None));
        assert!(!rendered.contains("abc"));
        assert!(!rendered.contains("def"));
    }

    #[test]
    fn file_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTokenStore::new(dir.path().join("nested/token"));
        assert!(store.load().unwrap().is_none());

        store.save(&token(Some(42))).unwrap();
        assert_eq!(store.load().unwrap(), Some(token(Some(42))));
    }

    #[test]
    fn grant_path_is_extracted() {
        let page = r#"<form action="/security/oauth/grant?x=1&amp;y=2" method="post">"#;
        assert_eq!(
            find_grant_path(page).as_deref(),
            Some("/security/oauth/grant?x=1&y=2")
        );
        assert!(find_grant_path("<html></html>").is_none());
    }

    #[test]
    fn token_response_keeps_previous_refresh() {
        let resp: TokenResponse =
            serde_json::from_str(r#"{"access_token":"new","expires_in":3600}"#).unwrap();
        let token = resp.into_token(Some("old-refresh".into()));
        assert_eq!(token.refresh_token.as_deref(), Some("old-refresh"));
        assert!(token.expires_at.is_some());
    }

    #[tokio::test]
    async fn automated_login_unsupported_on_production() {
        let oauth = OAuthClient::new(
            Endpoints::production(),
            ClientCredentials {
                client_id: "id".into(),
                client_secret: SecretString::from("secret".to_string()),
                redirect_uri: "http://localhost/code".into(),
            },
            &TransportConfig::default(),
        )
        .unwrap();
        let result = oauth.simulator_login("user", "password").await;
        assert!(matches!(result, Err(Error::UnsupportedOperation(_))));
    }
}
