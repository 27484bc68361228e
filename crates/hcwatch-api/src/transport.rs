// Transport configuration and the injected HTTP capability.
//
// `TransportConfig` builds the shared `reqwest::Client`. The `Transport`
// trait is the seam between the watcher core and the network: the
// production implementation is `HomeConnectClient`, tests substitute a
// scripted fake.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::Stream;
use reqwest::cookie::Jar;

use crate::error::Error;

/// Raw bytes of an open event stream, as delivered by the network.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, Error>> + Send>>;

/// HTTP-with-bearer-auth capability consumed by the watcher.
///
/// Paths are relative to the appliances base URL (see
/// [`Endpoints::url`](crate::Endpoints::url)).
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send an authorized GET and return the decoded JSON body.
    ///
    /// Vendor error envelopes (`{"error": {...}}`) are returned as JSON even
    /// when the HTTP status is not 2xx -- they are data, not failures.
    async fn get_json(&self, path: &str) -> Result<serde_json::Value, Error>;

    /// Open the server-sent event stream at `path`.
    ///
    /// A non-200 answer is reported as [`Error::StreamRejected`].
    async fn open_stream(&self, path: &str) -> Result<ByteStream, Error>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn get_json(&self, path: &str) -> Result<serde_json::Value, Error> {
        (**self).get_json(path).await
    }

    async fn open_stream(&self, path: &str) -> Result<ByteStream, Error> {
        (**self).open_stream(path).await
    }
}

/// Shared transport configuration for building HTTP clients.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Timeout for a single polling request (not applied to the event stream).
    pub request_timeout: Duration,
    /// Timeout for establishing a TCP/TLS connection.
    pub connect_timeout: Duration,
    pub cookie_jar: Option<Arc<Jar>>,
    /// Follow redirects automatically. Disabled for the scripted login.
    pub follow_redirects: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            cookie_jar: None,
            follow_redirects: true,
        }
    }
}

impl TransportConfig {
    /// Build a `reqwest::Client` from this config.
    ///
    /// No total timeout is set on the client: the event stream is long-lived
    /// and bounded by the watcher's idle timer instead. Polling requests set
    /// [`request_timeout`](Self::request_timeout) per request.
    pub fn build_client(&self) -> Result<reqwest::Client, Error> {
        let mut builder = reqwest::Client::builder()
            .connect_timeout(self.connect_timeout)
            .user_agent(concat!("hcwatch/", env!("CARGO_PKG_VERSION")));

        if !self.follow_redirects {
            builder = builder.redirect(reqwest::redirect::Policy::none());
        }

        if let Some(ref jar) = self.cookie_jar {
            builder = builder.cookie_provider(Arc::clone(jar));
        }

        builder
            .build()
            .map_err(|e| Error::Tls(format!("failed to build HTTP client: {e}")))
    }

    /// Create a config with a fresh cookie jar (for the scripted login).
    pub fn with_cookie_jar(mut self) -> Self {
        self.cookie_jar = Some(Arc::new(Jar::default()));
        self
    }

    /// Create a config that does not follow redirects.
    pub fn without_redirects(mut self) -> Self {
        self.follow_redirects = false;
        self
    }
}
