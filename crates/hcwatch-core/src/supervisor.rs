// ── Watcher supervisor ──
//
// Runs watcher generations into an exporter on a background task. A new
// generation (after re-authorization, say) cancels the previous task and
// drops its HTTP client before the next one starts.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::{Mutex as AsyncMutex, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use hcwatch_api::Transport;

use crate::config::WatcherConfig;
use crate::error::CoreError;
use crate::export::Exporter;
use crate::metrics::{Metrics, NoopMetrics};
use crate::watcher::Watcher;

/// Default event age after which a running watcher counts as stale.
pub const DEFAULT_HEALTH_THRESHOLD: Duration = Duration::from_secs(240);

/// Builds the transport for each new generation.
pub type TransportFactory = Arc<dyn Fn() -> Result<Arc<dyn Transport>, CoreError> + Send + Sync>;

/// Observable health of the supervised watcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatcherHealth {
    /// No generation started, or the last one was stopped.
    Idle,
    Running { last_event_age: Option<Duration> },
    /// Running, but no stream event within the threshold.
    Stale { last_event_age: Duration },
    /// Terminated because the authorization is no longer valid.
    Unauthorized,
    Failed(String),
}

impl WatcherHealth {
    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Running { .. })
    }
}

#[derive(Debug, Clone)]
enum Outcome {
    Stopped,
    Unauthorized,
    Failed(String),
}

struct Generation {
    id: u64,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
    last_event: watch::Receiver<Option<Instant>>,
    outcome: watch::Receiver<Option<Outcome>>,
}

/// Owns the running watcher generation.
pub struct Supervisor {
    factory: TransportFactory,
    config: WatcherConfig,
    exporter: Arc<dyn Exporter>,
    metrics: Arc<dyn Metrics>,
    health_threshold: Duration,
    current: AsyncMutex<Option<Generation>>,
    next_id: AtomicU64,
}

impl Supervisor {
    pub fn new(factory: TransportFactory, config: WatcherConfig, exporter: Arc<dyn Exporter>) -> Self {
        Self {
            factory,
            config,
            exporter,
            metrics: Arc::new(NoopMetrics),
            health_threshold: DEFAULT_HEALTH_THRESHOLD,
            current: AsyncMutex::new(None),
            next_id: AtomicU64::new(0),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_health_threshold(mut self, threshold: Duration) -> Self {
        self.health_threshold = threshold;
        self
    }

    /// Start a new generation, stopping the current one first.
    ///
    /// Returns the generation number.
    pub async fn start(&self) -> Result<u64, CoreError> {
        let mut current = self.current.lock().await;
        if let Some(previous) = current.take() {
            stop_generation(previous).await;
        }

        let transport = (self.factory)()?;
        let watcher =
            Watcher::new(transport, self.config.clone()).with_metrics(Arc::clone(&self.metrics));
        let last_event = watcher.subscribe_last_event();

        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let cancel = CancellationToken::new();
        let (outcome_tx, outcome) = watch::channel(None);

        let handle = tokio::spawn(drive(
            watcher,
            Arc::clone(&self.exporter),
            cancel.clone(),
            outcome_tx,
            id,
        ));

        info!(generation = id, "watcher generation started");
        *current = Some(Generation {
            id,
            cancel,
            handle,
            last_event,
            outcome,
        });
        Ok(id)
    }

    /// Stop the current generation, if any.
    pub async fn stop(&self) {
        if let Some(generation) = self.current.lock().await.take() {
            stop_generation(generation).await;
        }
    }

    /// Stop and close the exporter.
    pub async fn shutdown(&self) -> Result<(), CoreError> {
        self.stop().await;
        self.exporter.close().await
    }

    /// Wait for the current generation to finish on its own.
    pub async fn wait(&self) -> WatcherHealth {
        let outcome = self
            .current
            .lock()
            .await
            .as_ref()
            .map(|g| g.outcome.clone());
        if let Some(mut outcome) = outcome {
            if outcome.wait_for(Option::is_some).await.is_err() {
                warn!("watcher task ended without reporting an outcome");
            }
        }
        self.health().await
    }

    pub async fn generation(&self) -> Option<u64> {
        self.current.lock().await.as_ref().map(|g| g.id)
    }

    pub async fn health(&self) -> WatcherHealth {
        let current = self.current.lock().await;
        let Some(generation) = current.as_ref() else {
            return WatcherHealth::Idle;
        };

        let outcome = generation.outcome.borrow().clone();
        match outcome {
            Some(Outcome::Stopped) => return WatcherHealth::Idle,
            Some(Outcome::Unauthorized) => return WatcherHealth::Unauthorized,
            Some(Outcome::Failed(message)) => return WatcherHealth::Failed(message),
            None => {}
        }
        // The sender only goes away without a value when the task panicked.
        if generation.outcome.has_changed().is_err() || generation.handle.is_finished() {
            return WatcherHealth::Failed("watcher task panicked".into());
        }

        let last_event_age = generation.last_event.borrow().map(|at| at.elapsed());
        match last_event_age {
            Some(age) if age > self.health_threshold => WatcherHealth::Stale {
                last_event_age: age,
            },
            age => WatcherHealth::Running {
                last_event_age: age,
            },
        }
    }
}

async fn stop_generation(generation: Generation) {
    generation.cancel.cancel();
    if let Err(e) = generation.handle.await {
        warn!(generation = generation.id, error = %e, "watcher task panicked");
    }
    info!(generation = generation.id, "watcher generation stopped");
}

async fn drive(
    watcher: Watcher,
    exporter: Arc<dyn Exporter>,
    cancel: CancellationToken,
    outcome: watch::Sender<Option<Outcome>>,
    id: u64,
) {
    let stream = watcher.into_stream();
    tokio::pin!(stream);

    let result = loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break Outcome::Stopped,
            item = stream.next() => match item {
                Some(Ok(event)) => {
                    if let Err(e) = exporter.export(&event).await {
                        break Outcome::Failed(e.to_string());
                    }
                }
                Some(Err(e)) if e.is_auth_expired() => {
                    warn!(generation = id, "authorization expired");
                    break Outcome::Unauthorized;
                }
                Some(Err(e)) => break Outcome::Failed(e.to_string()),
                None => break Outcome::Failed("event stream ended".into()),
            },
        }
    };

    outcome.send_replace(Some(result));
}
