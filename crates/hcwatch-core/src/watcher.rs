// ── Event stream connector ──
//
// Owns the server-sent event connection: connect, idle timeout, reconnect
// with a fixed backoff. Every primary event is yielded, then the follow-ups
// its trigger produces, before the next chunk is read.

use std::sync::Arc;
use std::time::Duration;

use async_stream::try_stream;
use futures_util::{Stream, StreamExt};
use strum::{Display, EnumString};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use hcwatch_api::{Endpoints, RequestThrottler, SseFramer, Transport};

use crate::config::WatcherConfig;
use crate::error::CoreError;
use crate::event::Event;
use crate::metrics::{Metrics, NoopMetrics};
use crate::registry::ApplianceRegistry;
use crate::trigger::{Trigger, TriggerEngine, derive_trigger};

/// Why a stream connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum DisconnectReason {
    /// Rejected, refused or broken connection.
    Closed,
    /// No bytes within the idle timeout.
    Timeout,
    /// The server ended the stream cleanly.
    Ended,
}

/// Connection state observable by consumers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    /// Running the initial request sweep.
    Sweeping,
    Connecting { attempt: u32 },
    Streaming,
    Reconnecting {
        reason: DisconnectReason,
        delay: Duration,
    },
    Terminated,
}

// ── Watcher ──────────────────────────────────────────────────────

/// A single watcher run. Consumed by [`into_stream`](Self::into_stream).
pub struct Watcher {
    transport: Arc<dyn Transport>,
    engine: TriggerEngine,
    config: WatcherConfig,
    metrics: Arc<dyn Metrics>,
    state: Arc<watch::Sender<ConnectionState>>,
    last_event: Arc<watch::Sender<Option<Instant>>>,
}

impl Watcher {
    pub fn new(transport: Arc<dyn Transport>, config: WatcherConfig) -> Self {
        let throttler = RequestThrottler::new(config.throttle);
        let registry = Arc::new(ApplianceRegistry::new(Arc::clone(&transport), throttler));
        let engine = TriggerEngine::new(registry, config.staleness);
        let (state, _) = watch::channel(ConnectionState::Idle);
        let (last_event, _) = watch::channel(None);

        Self {
            transport,
            engine,
            config,
            metrics: Arc::new(NoopMetrics),
            state: Arc::new(state),
            last_event: Arc::new(last_event),
        }
    }

    /// Report through `metrics` and register the watcher's gauges with it.
    pub fn with_metrics(mut self, metrics: Arc<dyn Metrics>) -> Self {
        let last_event = self.last_event.subscribe();
        metrics.set_last_event_age(Box::new(move || last_event.borrow().map(|at| at.elapsed())));
        let registry = Arc::clone(self.engine.registry());
        metrics.set_appliance_count(Box::new(move || registry.len()));
        self.metrics = metrics;
        self
    }

    pub fn registry(&self) -> &Arc<ApplianceRegistry> {
        self.engine.registry()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Receipt time of the most recent stream event.
    pub fn subscribe_last_event(&self) -> watch::Receiver<Option<Instant>> {
        self.last_event.subscribe()
    }

    /// Run the watcher as an ordered stream of events.
    ///
    /// The stream ends only with an error (authorization, contract or
    /// unknown appliance); disconnects are retried internally. Dropping
    /// the stream cancels the run at its current suspension point.
    pub fn into_stream(self) -> impl Stream<Item = Result<Event, CoreError>> + Send {
        let state = Arc::clone(&self.state);
        self.run().map(move |item| {
            if let Err(ref e) = item {
                error!(error = %e, "watcher terminated");
                state.send_replace(ConnectionState::Terminated);
            }
            item
        })
    }

    fn run(self) -> impl Stream<Item = Result<Event, CoreError>> + Send {
        try_stream! {
            let Self { transport, engine, config, metrics, state, last_event } = self;

            // ── Initial sweep ──
            state.send_replace(ConnectionState::Sweeping);
            let appliances = engine.registry().list().await?;
            for appliance in appliances.iter() {
                if config.appliance.as_deref().is_some_and(|id| id != appliance.id()) {
                    continue;
                }
                info!(appliance_id = %appliance.id(), kind = %appliance.kind(), "initial sweep");
                let trigger = Trigger::full(appliance.id());
                let mut follow_ups = Vec::new();
                let outcome = engine.execute_into(Some(&trigger), &mut follow_ups).await;
                for event in follow_ups {
                    metrics.increment_event(&event);
                    yield event;
                }
                outcome?;
            }

            // ── Stream loop ──
            let path = Endpoints::events_path(config.appliance.as_deref());
            let mut attempt: u32 = 0;
            loop {
                attempt += 1;
                state.send_replace(ConnectionState::Connecting { attempt });
                debug!(attempt, path = %path, "opening event stream");

                let reason = match transport.open_stream(&path).await {
                    Err(e) if e.is_connection_drop() => {
                        warn!(attempt, error = %e, "failed to open event stream");
                        DisconnectReason::Closed
                    }
                    Err(e) => {
                        Err::<(), _>(e)?;
                        DisconnectReason::Closed
                    }
                    Ok(mut body) => {
                        info!(attempt, "event stream connected");
                        state.send_replace(ConnectionState::Streaming);
                        let mut framer = SseFramer::new();

                        loop {
                            let chunk = match tokio::time::timeout(config.idle_timeout, body.next()).await {
                                Err(_) => break DisconnectReason::Timeout,
                                Ok(None) => break DisconnectReason::Ended,
                                Ok(Some(Err(e))) if e.is_connection_drop() => {
                                    warn!(error = %e, "event stream broke");
                                    break DisconnectReason::Closed;
                                }
                                Ok(Some(Err(e))) => {
                                    Err::<(), _>(e)?;
                                    break DisconnectReason::Closed;
                                }
                                Ok(Some(Ok(chunk))) => chunk,
                            };

                            for frame in framer.push(&chunk) {
                                let event = Event::from_stream_chunk(&frame)?;
                                last_event.send_replace(Some(Instant::now()));
                                metrics.increment_event(&event);
                                let trigger = derive_trigger(&event);
                                yield event;
                                let trigger = trigger?;

                                let mut follow_ups = Vec::new();
                                let outcome = engine.execute_into(trigger.as_ref(), &mut follow_ups).await;
                                for event in follow_ups {
                                    metrics.increment_event(&event);
                                    yield event;
                                }
                                outcome?;
                            }
                        }
                    }
                };

                metrics.increment_disconnect(reason);
                warn!(
                    %reason,
                    delay_ms = u64::try_from(config.reconnect_delay.as_millis()).unwrap_or(u64::MAX),
                    "event stream disconnected, reconnecting"
                );
                state.send_replace(ConnectionState::Reconnecting {
                    reason,
                    delay: config.reconnect_delay,
                });
                tokio::time::sleep(config.reconnect_delay).await;
            }
        }
    }
}
