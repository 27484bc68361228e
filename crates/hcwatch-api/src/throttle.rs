// Request pacing and retry for polling requests.
//
// Every attempt (including retries) waits the configured spacing first,
// which keeps the client under the vendor's request rate limit. Only read
// timeouts are retried; everything else is returned to the caller as-is.

use std::time::Duration;

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::Error;
use crate::transport::Transport;

/// Pacing and retry parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottleConfig {
    /// Delay inserted before every attempt.
    pub spacing: Duration,
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Extra delay between a timed-out attempt and the next one.
    pub retry_delay: Duration,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            spacing: Duration::from_millis(1500),
            max_attempts: 3,
            retry_delay: Duration::from_secs(1),
        }
    }
}

/// Issues paced, retried GETs through a [`Transport`].
#[derive(Debug, Clone, Default)]
pub struct RequestThrottler {
    config: ThrottleConfig,
}

impl RequestThrottler {
    pub fn new(config: ThrottleConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ThrottleConfig {
        &self.config
    }

    /// GET `path` and return its single-key response envelope.
    ///
    /// The returned map has exactly one entry, either `"data"` or `"error"`.
    /// Any other shape is [`Error::UnexpectedShape`].
    pub async fn get<T>(&self, transport: &T, path: &str) -> Result<Map<String, Value>, Error>
    where
        T: Transport + ?Sized,
    {
        let attempts = self.config.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            tokio::time::sleep(self.config.spacing).await;
            match transport.get_json(path).await {
                Ok(value) => return envelope(value),
                Err(e) if e.is_read_timeout() && attempt < attempts => {
                    warn!(path, attempt, "read timed out, retrying");
                    tokio::time::sleep(self.config.retry_delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    debug!(path, attempt, error = %e, "request failed");
                    return Err(e);
                }
            }
        }
    }
}

fn envelope(value: Value) -> Result<Map<String, Value>, Error> {
    match value {
        Value::Object(map) if map.len() == 1 => Ok(map),
        Value::Object(map) => Err(Error::UnexpectedShape {
            keys: map.keys().cloned().collect(),
        }),
        _ => Err(Error::UnexpectedShape { keys: Vec::new() }),
    }
}
