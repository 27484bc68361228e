// ── Appliance registry ──
//
// Lazily loads the appliance list once and keeps per-appliance state the
// trigger engine consults: when each request kind last succeeded, and
// whether the appliance supports programs at all.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::{ArcSwap, ArcSwapOption};
use dashmap::DashMap;
use serde_json::{Map, Value};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use hcwatch_api::{RequestThrottler, Transport};

use crate::error::CoreError;
use crate::event::{ApiError, Event, RequestKind};

/// Program capability of an appliance.
///
/// `Unknown` moves to one of the two terminal states exactly once.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ProgramSupport {
    #[default]
    Unknown,
    Unsupported,
    Supported(Vec<String>),
}

impl ProgramSupport {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Unknown)
    }
}

// ── Appliance ───────────────────────────────────────────────────────

/// One appliance known to the registry.
#[derive(Debug)]
pub struct Appliance {
    id: String,
    kind: String,
    name: Option<String>,
    last_update: DashMap<RequestKind, Instant>,
    programs: ArcSwap<ProgramSupport>,
}

impl Appliance {
    pub fn new(id: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            name: None,
            last_update: DashMap::new(),
            programs: ArcSwap::from_pointee(ProgramSupport::Unknown),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Appliance type as reported by the vendor (`Dishwasher`, `Oven`, ...).
    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn programs(&self) -> Arc<ProgramSupport> {
        self.programs.load_full()
    }

    /// Time since the last answered request of `kind`, if any.
    pub fn since_update(&self, kind: RequestKind) -> Option<Duration> {
        self.last_update.get(&kind).map(|at| at.elapsed())
    }

    /// Record a successful request of `kind` at `at`.
    pub fn mark_updated_at(&self, kind: RequestKind, at: Instant) {
        self.last_update.insert(kind, at);
    }

    fn settle_programs(&self, support: ProgramSupport) {
        self.programs.store(Arc::new(support));
    }
}

// ── Registry ────────────────────────────────────────────────────────

/// Cached appliance list plus the throttled request path.
pub struct ApplianceRegistry {
    transport: Arc<dyn Transport>,
    throttler: RequestThrottler,
    appliances: ArcSwapOption<Vec<Arc<Appliance>>>,
}

impl ApplianceRegistry {
    pub fn new(transport: Arc<dyn Transport>, throttler: RequestThrottler) -> Self {
        Self {
            transport,
            throttler,
            appliances: ArcSwapOption::empty(),
        }
    }

    /// All appliances, loading the list on first use.
    pub async fn list(&self) -> Result<Arc<Vec<Arc<Appliance>>>, CoreError> {
        if let Some(cached) = self.appliances.load_full() {
            return Ok(cached);
        }
        self.refresh().await
    }

    /// Number of cached appliances (0 before the first load).
    pub fn len(&self) -> usize {
        self.appliances.load_full().map_or(0, |list| list.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub async fn get(&self, id: &str) -> Result<Arc<Appliance>, CoreError> {
        self.list()
            .await?
            .iter()
            .find(|a| a.id == id)
            .cloned()
            .ok_or_else(|| CoreError::ApplianceNotFound { id: id.to_owned() })
    }

    /// Reload the appliance list and swap it in.
    ///
    /// Appliances that survive the reload keep their cached state.
    pub async fn refresh(&self) -> Result<Arc<Vec<Arc<Appliance>>>, CoreError> {
        let envelope = self.throttler.get(&self.transport, "").await?;
        let data = expect_data(&envelope, "")?;

        let entries = data
            .get("homeappliances")
            .and_then(Value::as_array)
            .ok_or_else(|| CoreError::Api {
                message: "appliance list response lacks `homeappliances`".into(),
            })?;

        let previous = self.appliances.load_full();
        let mut appliances = Vec::with_capacity(entries.len());
        for entry in entries {
            let (Some(id), Some(kind)) = (
                entry.get("haId").and_then(Value::as_str),
                entry.get("type").and_then(Value::as_str),
            ) else {
                return Err(CoreError::Api {
                    message: format!("malformed appliance entry: {entry}"),
                });
            };

            let existing = previous
                .as_ref()
                .and_then(|list| list.iter().find(|a| a.id == id).cloned());
            let appliance = existing.unwrap_or_else(|| {
                let mut fresh = Appliance::new(id, kind);
                fresh.name = entry.get("name").and_then(Value::as_str).map(String::from);
                Arc::new(fresh)
            });
            appliances.push(appliance);
        }

        info!(count = appliances.len(), "appliance list loaded");
        let list = Arc::new(appliances);
        self.appliances.store(Some(Arc::clone(&list)));
        Ok(list)
    }

    /// Programs the appliance offers.
    ///
    /// `Some(empty)` means programs are unsupported, `None` means the
    /// appliance cannot tell right now (offline, busy). The endpoint is
    /// queried at most until the answer is terminal.
    pub async fn available_programs(
        &self,
        appliance: &Appliance,
    ) -> Result<Option<Vec<String>>, CoreError> {
        match appliance.programs().as_ref() {
            ProgramSupport::Supported(programs) => return Ok(Some(programs.clone())),
            ProgramSupport::Unsupported => return Ok(Some(Vec::new())),
            ProgramSupport::Unknown => {}
        }

        let path = format!("/{}/programs/available", appliance.id);
        let envelope = self.throttler.get(&self.transport, &path).await?;

        if let Some(error) = envelope.get("error") {
            let error = parse_error(error, &path)?;
            if error.is("UnsupportedOperation") {
                debug!(appliance_id = %appliance.id, "appliance does not support programs");
                appliance.settle_programs(ProgramSupport::Unsupported);
                return Ok(Some(Vec::new()));
            }
            if error.is_initialization_failed() || error.is("WrongOperationState") {
                warn!(appliance_id = %appliance.id, key = %error.key, "programs unavailable for now");
                return Ok(None);
            }
            return Err(CoreError::Rejected { path, error });
        }

        let data = expect_data(&envelope, &path)?;
        let programs: Vec<String> = data
            .get("programs")
            .and_then(Value::as_array)
            .map(|list| {
                list.iter()
                    .filter_map(|p| p.get("key").and_then(Value::as_str).map(String::from))
                    .collect()
            })
            .unwrap_or_default();

        if programs.is_empty() {
            appliance.settle_programs(ProgramSupport::Unsupported);
        } else {
            debug!(appliance_id = %appliance.id, count = programs.len(), "programs available");
            appliance.settle_programs(ProgramSupport::Supported(programs.clone()));
        }
        Ok(Some(programs))
    }

    /// Issue one follow-up request and normalise the response.
    pub async fn request(&self, appliance: &Appliance, kind: RequestKind) -> Result<Event, CoreError> {
        let path = kind.path(&appliance.id);
        let envelope = self.throttler.get(&self.transport, &path).await?;
        let event = Event::from_response(kind, &Value::Object(envelope), &appliance.id)?;
        // Error envelopes count as answers.
        appliance.mark_updated_at(kind, Instant::now());
        debug!(appliance_id = %appliance.id, kind = %event.kind(), "follow-up request done");
        Ok(event)
    }
}

fn expect_data<'a>(envelope: &'a Map<String, Value>, path: &str) -> Result<&'a Value, CoreError> {
    if let Some(error) = envelope.get("error") {
        return Err(CoreError::Rejected {
            path: path.to_owned(),
            error: parse_error(error, path)?,
        });
    }
    envelope.get("data").ok_or_else(|| CoreError::Api {
        message: format!("response for {path:?} has neither data nor error"),
    })
}

fn parse_error(error: &Value, path: &str) -> Result<ApiError, CoreError> {
    serde_json::from_value(error.clone()).map_err(|e| CoreError::Api {
        message: format!("malformed error envelope for {path:?}: {e}"),
    })
}
