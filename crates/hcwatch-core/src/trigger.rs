// ── Trigger engine ──
//
// Decides which follow-up requests an event warrants and runs them through
// the registry in a fixed order.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::debug;

use crate::error::CoreError;
use crate::event::{Event, EventError, EventKind, RequestKind};
use crate::registry::{Appliance, ApplianceRegistry};

/// Default minimum age before an `IfStale` request is repeated.
pub const DEFAULT_STALENESS: Duration = Duration::from_secs(300);

const OPERATION_STATE: &str = "BSH.Common.Status.OperationState";
const OPERATION_STATE_RUN: &str = "BSH.Common.EnumType.OperationState.Run";
const LOCAL_CONTROL_ACTIVE: &str = "BSH.Common.Status.LocalControlActive";

/// When a requested follow-up actually runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestPolicy {
    /// Unconditionally.
    Always,
    /// Only if the last success of that kind is older than the threshold.
    IfStale,
}

/// Follow-up requests derived from one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trigger {
    pub appliance_id: String,
    pub status: bool,
    pub settings: bool,
    pub active_program: bool,
    pub selected_program: bool,
    pub policy: RequestPolicy,
}

impl Trigger {
    fn empty(appliance_id: &str, policy: RequestPolicy) -> Self {
        Self {
            appliance_id: appliance_id.to_owned(),
            status: false,
            settings: false,
            active_program: false,
            selected_program: false,
            policy,
        }
    }

    /// Every request kind, unconditionally (connect, pair, initial sweep).
    pub fn full(appliance_id: &str) -> Self {
        Self {
            status: true,
            settings: true,
            active_program: true,
            selected_program: true,
            ..Self::empty(appliance_id, RequestPolicy::Always)
        }
    }

    pub fn wants(&self, kind: RequestKind) -> bool {
        match kind {
            RequestKind::Status => self.status,
            RequestKind::Settings => self.settings,
            RequestKind::ActiveProgram => self.active_program,
            RequestKind::SelectedProgram => self.selected_program,
        }
    }
}

/// Map an event to the follow-ups it warrants.
///
/// Fails only when a STATUS payload cannot be projected into items.
pub fn derive_trigger(event: &Event) -> Result<Option<Trigger>, EventError> {
    let Some(id) = event.appliance_id() else {
        return Ok(None);
    };

    let trigger = match event.kind() {
        EventKind::Connected | EventKind::Paired => Some(Trigger::full(id)),
        EventKind::Notify | EventKind::Event => Some(Trigger {
            status: true,
            ..Trigger::empty(id, RequestPolicy::IfStale)
        }),
        EventKind::Status => {
            let items = event.items()?;
            if items.get(OPERATION_STATE).and_then(Value::as_str) == Some(OPERATION_STATE_RUN) {
                Some(Trigger {
                    active_program: true,
                    settings: true,
                    ..Trigger::empty(id, RequestPolicy::Always)
                })
            } else if items.get(LOCAL_CONTROL_ACTIVE) == Some(&Value::Bool(false)) {
                Some(Trigger {
                    active_program: true,
                    selected_program: true,
                    ..Trigger::empty(id, RequestPolicy::IfStale)
                })
            } else {
                None
            }
        }
        _ => None,
    };
    Ok(trigger)
}

// ── Execution ───────────────────────────────────────────────────────

/// Runs triggers against the registry.
pub struct TriggerEngine {
    registry: Arc<ApplianceRegistry>,
    staleness: Duration,
}

impl TriggerEngine {
    pub fn new(registry: Arc<ApplianceRegistry>, staleness: Duration) -> Self {
        Self {
            registry,
            staleness,
        }
    }

    pub fn registry(&self) -> &Arc<ApplianceRegistry> {
        &self.registry
    }

    /// Execute a trigger and collect the follow-up events.
    pub async fn execute(&self, trigger: Option<Trigger>) -> Result<Vec<Event>, CoreError> {
        let mut events = Vec::new();
        self.execute_into(trigger.as_ref(), &mut events).await?;
        Ok(events)
    }

    /// Like [`execute`](Self::execute), but keeps the events produced
    /// before a fatal error in `out`.
    pub async fn execute_into(
        &self,
        trigger: Option<&Trigger>,
        out: &mut Vec<Event>,
    ) -> Result<(), CoreError> {
        let Some(trigger) = trigger else {
            return Ok(());
        };
        let appliance = self.registry.get(&trigger.appliance_id).await?;

        let wants_programs = trigger.active_program || trigger.selected_program;
        let mut programs_checked = false;
        let mut programs_supported = false;

        for kind in RequestKind::ORDER {
            if !trigger.wants(kind) {
                continue;
            }
            if kind.needs_programs() && wants_programs && !programs_checked {
                programs_checked = true;
                programs_supported = self
                    .registry
                    .available_programs(&appliance)
                    .await?
                    .is_some_and(|programs| !programs.is_empty());
            }
            if kind.needs_programs() && !programs_supported {
                continue;
            }
            if !self.is_due(&appliance, kind, trigger.policy) {
                debug!(appliance_id = %appliance.id(), %kind, "skipping fresh request");
                continue;
            }
            out.push(self.registry.request(&appliance, kind).await?);
        }
        Ok(())
    }

    fn is_due(&self, appliance: &Appliance, kind: RequestKind, policy: RequestPolicy) -> bool {
        match policy {
            RequestPolicy::Always => true,
            RequestPolicy::IfStale => appliance
                .since_update(kind)
                .is_none_or(|age| age >= self.staleness),
        }
    }
}
