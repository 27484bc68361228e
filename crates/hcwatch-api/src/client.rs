// Home Connect HTTP client
//
// Wraps `reqwest::Client` with bearer authorization, the vendor JSON media
// type, and the event-stream request. Implements `Transport` so the watcher
// core can be driven by it or by a scripted fake.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::TryStreamExt;
use reqwest::StatusCode;
use reqwest::header::ACCEPT;
use tracing::{debug, trace, warn};

use crate::auth::BearerAuth;
use crate::endpoints::Endpoints;
use crate::error::Error;
use crate::transport::{ByteStream, Transport, TransportConfig};

const JSON_MEDIA_TYPE: &str = "application/vnd.bsh.sdk.v1+json";
const EVENT_STREAM_MEDIA_TYPE: &str = "text/event-stream";

/// Authorized client for the appliance API.
pub struct HomeConnectClient {
    http: reqwest::Client,
    endpoints: Endpoints,
    auth: BearerAuth,
    request_timeout: Duration,
}

impl HomeConnectClient {
    pub fn new(
        endpoints: Endpoints,
        auth: BearerAuth,
        transport: &TransportConfig,
    ) -> Result<Self, Error> {
        Ok(Self {
            http: transport.build_client()?,
            endpoints,
            auth,
            request_timeout: transport.request_timeout,
        })
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    pub fn auth(&self) -> &BearerAuth {
        &self.auth
    }

    /// Send a GET, refreshing the token once if the server answers 401.
    async fn send_authorized(
        &self,
        path: &str,
        accept: &str,
        timeout: Option<Duration>,
    ) -> Result<reqwest::Response, Error> {
        let url = self.endpoints.url(path)?;
        let mut token = self.auth.access_token().await?;
        let mut refreshed = false;

        loop {
            debug!("GET {}", url);
            let mut builder = self
                .http
                .get(url.clone())
                .bearer_auth(&token)
                .header(ACCEPT, accept);
            if let Some(timeout) = timeout {
                builder = builder.timeout(timeout);
            }

            let resp = builder.send().await.map_err(map_transport)?;
            if resp.status() != StatusCode::UNAUTHORIZED {
                return Ok(resp);
            }
            if refreshed {
                warn!(path, "token rejected after refresh");
                return Err(Error::Unauthorized);
            }
            debug!(path, "401 received, refreshing token");
            token = self.auth.refresh_after_rejection(&token).await?;
            refreshed = true;
        }
    }
}

#[async_trait]
impl Transport for HomeConnectClient {
    async fn get_json(&self, path: &str) -> Result<serde_json::Value, Error> {
        let resp = self
            .send_authorized(path, JSON_MEDIA_TYPE, Some(self.request_timeout))
            .await?;
        let status = resp.status();
        let body = resp.text().await.map_err(map_transport)?;
        trace!(%status, len = body.len(), "response body received");

        serde_json::from_str(&body).map_err(|e| Error::Deserialization {
            message: format!("HTTP {status}: {e}"),
            body,
        })
    }

    async fn open_stream(&self, path: &str) -> Result<ByteStream, Error> {
        let resp = self
            .send_authorized(path, EVENT_STREAM_MEDIA_TYPE, None)
            .await?;
        let status = resp.status();
        if status != StatusCode::OK {
            return Err(Error::StreamRejected {
                status: status.as_u16(),
            });
        }
        debug!(path, "event stream open");
        Ok(Box::pin(resp.bytes_stream().map_err(map_transport)))
    }
}

/// Timeouts get their own variant so the throttler can recognise them.
fn map_transport(err: reqwest::Error) -> Error {
    if err.is_timeout() {
        Error::ReadTimeout(err.to_string())
    } else {
        Error::Transport(err)
    }
}
