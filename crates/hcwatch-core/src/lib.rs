// hcwatch-core: Event-driven appliance watcher between hcwatch-api and the sinks.

pub mod config;
pub mod error;
pub mod event;
pub mod export;
pub mod metrics;
pub mod registry;
pub mod supervisor;
pub mod trigger;
pub mod watcher;

// ── Primary re-exports ──────────────────────────────────────────────
pub use config::{ClientConfig, WatcherConfig};
pub use error::CoreError;
pub use event::{ApiError, Event, EventError, EventKind, ITEM_RULES_VERSION, ItemMap, RequestKind};
pub use export::{
    EventFile, Exporter, FileExporter, MultiExporter, SqlExporter, read_event_file, read_events,
};
pub use metrics::{CounterMetrics, Metrics, MetricsSnapshot, NoopMetrics};
pub use registry::{Appliance, ApplianceRegistry, ProgramSupport};
pub use supervisor::{DEFAULT_HEALTH_THRESHOLD, Supervisor, TransportFactory, WatcherHealth};
pub use trigger::{RequestPolicy, Trigger, TriggerEngine, derive_trigger};
pub use watcher::{ConnectionState, DisconnectReason, Watcher};
