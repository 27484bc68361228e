// ── Canonical event record ──
//
// Every record the watcher emits, whether it arrived on the event stream or
// came back from a follow-up request, is normalised into an `Event`. The
// canonical line form (`to_line` / `from_line`) is what the sinks persist.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{AsRefStr, Display, EnumIter, EnumString};
use thiserror::Error;

/// Version of the item extraction rules implemented by [`Event::items`].
pub const ITEM_RULES_VERSION: u32 = 3;

/// Item map projected from an event payload. Absent values are `null`.
pub type ItemMap = BTreeMap<String, Value>;

const ERROR_PREFIX: &str = "SDK.Error.";
const INITIALIZATION_FAILED: &str = "HomeAppliance.Connection.Initialization.Failed";
const ACTIVE_PROGRAM_KEY: &str = "BSH.Common.Root.ActiveProgram";
const SELECTED_PROGRAM_KEY: &str = "BSH.Common.Root.SelectedProgram";

// ── Kinds ───────────────────────────────────────────────────────────

/// Event kind, as named on the wire.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, AsRefStr, EnumIter,
)]
#[strum(serialize_all = "SCREAMING-KEBAB-CASE")]
pub enum EventKind {
    Connected,
    Disconnected,
    Paired,
    Depaired,
    Notify,
    Event,
    Status,
    KeepAlive,
    StatusRequest,
    SettingsRequest,
    ActiveProgramRequest,
    SelectedProgramRequest,
}

impl EventKind {
    /// The request kind behind a `*-REQUEST` event.
    pub fn request_kind(self) -> Option<RequestKind> {
        match self {
            Self::StatusRequest => Some(RequestKind::Status),
            Self::SettingsRequest => Some(RequestKind::Settings),
            Self::ActiveProgramRequest => Some(RequestKind::ActiveProgram),
            Self::SelectedProgramRequest => Some(RequestKind::SelectedProgram),
            _ => None,
        }
    }

    pub fn is_request(self) -> bool {
        self.request_kind().is_some()
    }
}

/// A follow-up request the watcher can issue for an appliance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
pub enum RequestKind {
    Status,
    Settings,
    ActiveProgram,
    SelectedProgram,
}

impl RequestKind {
    /// Fixed execution order of follow-up requests.
    pub const ORDER: [Self; 4] = [
        Self::Status,
        Self::Settings,
        Self::ActiveProgram,
        Self::SelectedProgram,
    ];

    /// Path below `/{id}/`.
    pub fn path_suffix(self) -> &'static str {
        match self {
            Self::Status => "status",
            Self::Settings => "settings",
            Self::ActiveProgram => "programs/active",
            Self::SelectedProgram => "programs/selected",
        }
    }

    pub fn path(self, appliance_id: &str) -> String {
        format!("/{appliance_id}/{}", self.path_suffix())
    }

    pub fn event_kind(self) -> EventKind {
        match self {
            Self::Status => EventKind::StatusRequest,
            Self::Settings => EventKind::SettingsRequest,
            Self::ActiveProgram => EventKind::ActiveProgramRequest,
            Self::SelectedProgram => EventKind::SelectedProgramRequest,
        }
    }

    /// Whether the request depends on the appliance supporting programs.
    pub fn needs_programs(self) -> bool {
        matches!(self, Self::ActiveProgram | Self::SelectedProgram)
    }
}

// ── Errors ──────────────────────────────────────────────────────────

/// Vendor error envelope content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    pub key: String,
    #[serde(default)]
    pub description: String,
}

impl ApiError {
    /// Match the key with or without the `SDK.Error.` prefix.
    pub fn is(&self, name: &str) -> bool {
        self.key.strip_prefix(ERROR_PREFIX).unwrap_or(&self.key) == name
    }

    /// Bare HTTP status codes such as `429` or `500`.
    pub fn is_http_status(&self) -> bool {
        self.key.len() == 3 && self.key.bytes().all(|b| b.is_ascii_digit())
    }

    pub fn is_initialization_failed(&self) -> bool {
        self.is(INITIALIZATION_FAILED)
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.description.is_empty() {
            f.write_str(&self.key)
        } else {
            write!(f, "{}: {}", self.key, self.description)
        }
    }
}

/// Failure to decode or interpret an event.
#[derive(Debug, Error)]
pub enum EventError {
    #[error("Malformed stream chunk: {0}")]
    Parse(String),

    #[error("Unexpected response envelope: {0}")]
    Envelope(String),

    #[error("Unrecognized payload shape for {event} event")]
    UnrecognizedShape { event: EventKind },

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

// ── Event ───────────────────────────────────────────────────────────

/// A canonical appliance event. Immutable once constructed.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    kind: EventKind,
    timestamp: DateTime<Utc>,
    appliance_id: Option<String>,
    payload: Option<Value>,
    error: Option<ApiError>,
}

impl Event {
    /// A stream event received now.
    pub fn new(kind: EventKind, appliance_id: Option<String>, payload: Option<Value>) -> Self {
        Self {
            kind,
            timestamp: Utc::now(),
            appliance_id,
            payload,
            error: None,
        }
    }

    /// Replace the timestamp (replays, tests).
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn appliance_id(&self) -> Option<&str> {
        self.appliance_id.as_deref()
    }

    pub fn payload(&self) -> Option<&Value> {
        self.payload.as_ref()
    }

    pub fn error(&self) -> Option<&ApiError> {
        self.error.as_ref()
    }

    /// Decode one blank-line delimited chunk of the event stream.
    ///
    /// Accepts `event:`, `data:` and `id:` lines with or without a single
    /// space after the colon. Other lines (comments, `retry:`) are ignored.
    pub fn from_stream_chunk(chunk: &[u8]) -> Result<Self, EventError> {
        let text = std::str::from_utf8(chunk)
            .map_err(|e| EventError::Parse(format!("not UTF-8: {e}")))?;

        let mut kind = None;
        let mut data: Option<String> = None;
        let mut appliance_id = None;

        for line in text.lines() {
            if let Some(value) = field(line, "event:") {
                let parsed = value
                    .trim()
                    .parse::<EventKind>()
                    .map_err(|_| EventError::Parse(format!("unknown event kind {value:?}")))?;
                kind = Some(parsed);
            } else if let Some(value) = field(line, "data:") {
                match data {
                    Some(ref mut buf) => {
                        buf.push('\n');
                        buf.push_str(value);
                    }
                    None => data = Some(value.to_owned()),
                }
            } else if let Some(value) = field(line, "id:") {
                let value = value.trim();
                if !value.is_empty() {
                    appliance_id = Some(value.to_owned());
                }
            }
        }

        let kind = kind.ok_or_else(|| EventError::Parse("missing event line".into()))?;
        let payload = match data {
            Some(raw) if !raw.trim().is_empty() => Some(serde_json::from_str(&raw)?),
            _ => None,
        };

        Ok(Self::new(kind, appliance_id, payload))
    }

    /// Wrap a follow-up response envelope (`{"data": …}` or `{"error": …}`).
    pub fn from_response(
        request: RequestKind,
        response: &Value,
        appliance_id: &str,
    ) -> Result<Self, EventError> {
        let Some(envelope) = response.as_object() else {
            return Err(EventError::Envelope("response is not an object".into()));
        };
        if envelope.len() != 1 {
            return Err(EventError::Envelope(format!(
                "expected one top-level key, got {}",
                envelope.len()
            )));
        }

        let mut event = Self::new(request.event_kind(), Some(appliance_id.to_owned()), None);
        if let Some(data) = envelope.get("data") {
            event.payload = Some(data.clone());
        } else if let Some(error) = envelope.get("error") {
            event.error = Some(serde_json::from_value(error.clone())?);
        } else {
            return Err(EventError::Envelope(format!(
                "unknown key {:?}",
                envelope.keys().next()
            )));
        }
        Ok(event)
    }

    /// Canonical single-line JSON form (no trailing newline).
    pub fn to_line(&self) -> String {
        let line = Line {
            appliance_id: self.appliance_id.as_deref(),
            event: self.kind.as_ref(),
            timestamp: unix_seconds(self.timestamp),
            data: self.payload.as_ref(),
            error: self.error.as_ref(),
        };
        serde_json::to_string(&line).unwrap_or_else(|_| unreachable!("event lines always encode"))
    }

    /// Inverse of [`to_line`](Self::to_line).
    pub fn from_line(line: &str) -> Result<Self, EventError> {
        let parsed: OwnedLine = serde_json::from_str(line)?;
        let kind = parsed
            .event
            .parse::<EventKind>()
            .map_err(|_| EventError::Parse(format!("unknown event kind {:?}", parsed.event)))?;
        let timestamp = from_unix_seconds(parsed.timestamp)
            .ok_or_else(|| EventError::Parse(format!("bad timestamp {}", parsed.timestamp)))?;
        Ok(Self {
            kind,
            timestamp,
            appliance_id: parsed.appliance_id,
            payload: parsed.data,
            error: parsed.error,
        })
    }

    /// Project the payload into a flat key/value map.
    pub fn items(&self) -> Result<ItemMap, EventError> {
        use EventKind as K;

        if self.kind == K::KeepAlive {
            return Ok(ItemMap::new());
        }

        if let Some(ref error) = self.error {
            let root = match self.kind {
                _ if error.is_http_status() => None,
                K::ActiveProgramRequest
                    if error.is("NoProgramActive") || error.is_initialization_failed() =>
                {
                    Some(ACTIVE_PROGRAM_KEY)
                }
                K::SelectedProgramRequest
                    if error.is("NoProgramSelected") || error.is_initialization_failed() =>
                {
                    Some(SELECTED_PROGRAM_KEY)
                }
                _ => None,
            };
            return Ok(root
                .map(|key| ItemMap::from([(key.to_owned(), Value::Null)]))
                .unwrap_or_default());
        }

        let shape = || EventError::UnrecognizedShape { event: self.kind };
        match self.kind {
            K::ActiveProgramRequest => self.program_items(ACTIVE_PROGRAM_KEY).ok_or_else(shape),
            K::SelectedProgramRequest => {
                self.program_items(SELECTED_PROGRAM_KEY).ok_or_else(shape)
            }
            K::StatusRequest => self.list_items("status").ok_or_else(shape),
            K::SettingsRequest => self.list_items("settings").ok_or_else(shape),
            K::Connected | K::Disconnected | K::Paired | K::Depaired => {
                let mut items = ItemMap::new();
                if let Some(key) = self.field_str("key") {
                    let value = self
                        .payload
                        .as_ref()
                        .and_then(|p| p.get("value"))
                        .cloned()
                        .unwrap_or(Value::Null);
                    items.insert(key.to_owned(), value);
                }
                Ok(items)
            }
            K::Status | K::Event | K::Notify => self.list_items("items").ok_or_else(shape),
            K::KeepAlive => Ok(ItemMap::new()),
        }
    }

    fn field_str(&self, name: &str) -> Option<&str> {
        self.payload.as_ref()?.get(name)?.as_str()
    }

    fn list_items(&self, field: &str) -> Option<ItemMap> {
        let entries = self.payload.as_ref()?.get(field)?.as_array()?;
        entries.iter().map(entry).collect()
    }

    fn program_items(&self, root_key: &str) -> Option<ItemMap> {
        let payload = self.payload.as_ref()?;
        let program = payload.get("key")?.clone();
        let mut items = match payload.get("options") {
            Some(Value::Array(options)) => options.iter().map(entry).collect::<Option<ItemMap>>()?,
            Some(_) => return None,
            None => ItemMap::new(),
        };
        items.insert(root_key.to_owned(), program);
        Some(items)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_line())
    }
}

fn entry(item: &Value) -> Option<(String, Value)> {
    let key = item.get("key")?.as_str()?.to_owned();
    let value = item.get("value").cloned().unwrap_or(Value::Null);
    Some((key, value))
}

fn field<'a>(line: &'a str, prefix: &str) -> Option<&'a str> {
    let rest = line.strip_prefix(prefix)?;
    Some(rest.strip_prefix(' ').unwrap_or(rest))
}

#[allow(clippy::cast_precision_loss, clippy::as_conversions)]
fn unix_seconds(ts: DateTime<Utc>) -> f64 {
    ts.timestamp_micros() as f64 / 1_000_000.0
}

#[allow(clippy::cast_possible_truncation, clippy::as_conversions)]
fn from_unix_seconds(secs: f64) -> Option<DateTime<Utc>> {
    if !secs.is_finite() {
        return None;
    }
    DateTime::from_timestamp_micros((secs * 1_000_000.0).round() as i64)
}

// ── Line encoding ───────────────────────────────────────────────────

#[derive(Serialize)]
struct Line<'a> {
    appliance_id: Option<&'a str>,
    event: &'a str,
    timestamp: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a ApiError>,
}

#[derive(Deserialize)]
struct OwnedLine {
    #[serde(default)]
    appliance_id: Option<String>,
    event: String,
    timestamp: f64,
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    error: Option<ApiError>,
}
