// ── Metrics ──
//
// The watcher reports through the `Metrics` trait. `NoopMetrics` is the
// default; `CounterMetrics` keeps in-process counters that the CLI logs
// periodically.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use arc_swap::ArcSwapOption;

use crate::event::{Event, EventKind};
use crate::watcher::DisconnectReason;

/// Gauge source for the age of the most recent stream event.
pub type AgeSource = Box<dyn Fn() -> Option<Duration> + Send + Sync>;
/// Gauge source for the number of known appliances.
pub type CountSource = Box<dyn Fn() -> usize + Send + Sync>;

/// Instrumentation hooks. Every method has a no-op default.
pub trait Metrics: Send + Sync {
    fn increment_event(&self, _event: &Event) {}
    fn increment_disconnect(&self, _reason: DisconnectReason) {}
    fn increment_token_refresh(&self) {}
    fn set_last_event_age(&self, _source: AgeSource) {}
    fn set_appliance_count(&self, _source: CountSource) {}
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl Metrics for NoopMetrics {}

/// In-process counters and gauges.
#[derive(Default)]
pub struct CounterMetrics {
    events: Mutex<HashMap<(Option<String>, EventKind), u64>>,
    disconnects: Mutex<HashMap<DisconnectReason, u64>>,
    token_refreshes: AtomicU64,
    last_event_age: ArcSwapOption<AgeSource>,
    appliance_count: ArcSwapOption<CountSource>,
}

/// Point-in-time view of [`CounterMetrics`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub events: u64,
    pub disconnects: HashMap<DisconnectReason, u64>,
    pub token_refreshes: u64,
    pub last_event_age: Option<Duration>,
    pub appliances: usize,
}

impl CounterMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Events seen for one appliance and kind.
    pub fn event_count(&self, appliance_id: Option<&str>, kind: EventKind) -> u64 {
        let events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        events
            .get(&(appliance_id.map(String::from), kind))
            .copied()
            .unwrap_or(0)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let events = self
            .events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .sum();
        let disconnects = self
            .disconnects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        MetricsSnapshot {
            events,
            disconnects,
            token_refreshes: self.token_refreshes.load(Ordering::Relaxed),
            last_event_age: self.last_event_age.load_full().and_then(|source| source()),
            appliances: self.appliance_count.load_full().map_or(0, |source| source()),
        }
    }
}

impl Metrics for CounterMetrics {
    fn increment_event(&self, event: &Event) {
        let key = (event.appliance_id().map(String::from), event.kind());
        *self
            .events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key)
            .or_default() += 1;
    }

    fn increment_disconnect(&self, reason: DisconnectReason) {
        *self
            .disconnects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(reason)
            .or_default() += 1;
    }

    fn increment_token_refresh(&self) {
        self.token_refreshes.fetch_add(1, Ordering::Relaxed);
    }

    fn set_last_event_age(&self, source: AgeSource) {
        self.last_event_age.store(Some(std::sync::Arc::new(source)));
    }

    fn set_appliance_count(&self, source: CountSource) {
        self.appliance_count.store(Some(std::sync::Arc::new(source)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_events_per_appliance_and_kind() {
        let metrics = CounterMetrics::new();
        let event = Event::new(EventKind::Notify, Some("A".into()), None);
        metrics.increment_event(&event);
        metrics.increment_event(&event);
        metrics.increment_event(&Event::new(EventKind::KeepAlive, None, None));

        assert_eq!(metrics.event_count(Some("A"), EventKind::Notify), 2);
        assert_eq!(metrics.event_count(None, EventKind::KeepAlive), 1);
        assert_eq!(metrics.event_count(Some("B"), EventKind::Notify), 0);
        assert_eq!(metrics.snapshot().events, 3);
    }

    #[test]
    fn gauges_read_their_sources() {
        let metrics = CounterMetrics::new();
        assert_eq!(metrics.snapshot().appliances, 0);
        assert_eq!(metrics.snapshot().last_event_age, None);

        metrics.set_appliance_count(Box::new(|| 4));
        metrics.set_last_event_age(Box::new(|| Some(Duration::from_secs(7))));
        metrics.increment_disconnect(DisconnectReason::Timeout);
        metrics.increment_token_refresh();

        let snap = metrics.snapshot();
        assert_eq!(snap.appliances, 4);
        assert_eq!(snap.last_event_age, Some(Duration::from_secs(7)));
        assert_eq!(snap.disconnects[&DisconnectReason::Timeout], 1);
        assert_eq!(snap.token_refreshes, 1);
    }
}
