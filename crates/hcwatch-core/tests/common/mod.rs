// Shared fakes for the watcher integration tests.
#![allow(dead_code, clippy::unwrap_used)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use serde_json::{Value, json};
use tokio::time::Instant;

use hcwatch_api::{ByteStream, Error, Transport};
use hcwatch_core::{CoreError, Event, Exporter, WatcherConfig};

/// What the next `open_stream` call does.
pub enum StreamScript {
    /// Answer with a non-200 status.
    Reject(u16),
    /// Fail authorization.
    Unauthorized,
    /// Deliver the chunks, then end the stream cleanly.
    Finite(Vec<&'static str>),
    /// Deliver the chunks, then stay silent.
    Open(Vec<&'static str>),
}

/// A transport that serves fixed JSON per path and scripted streams.
#[derive(Default)]
pub struct ScriptedTransport {
    routes: Mutex<HashMap<String, Value>>,
    streams: Mutex<VecDeque<StreamScript>>,
    calls: Mutex<Vec<(String, Instant)>>,
    opens: Mutex<Vec<(String, Instant)>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(self, path: &str, body: Value) -> Self {
        self.routes.lock().unwrap().insert(path.to_owned(), body);
        self
    }

    pub fn stream(self, script: StreamScript) -> Self {
        self.streams.lock().unwrap().push_back(script);
        self
    }

    /// Register a dishwasher-like appliance with programs and full data.
    pub fn appliance_with_programs(self, id: &str) -> Self {
        self.route(&format!("/{id}/status"), json!({"data": {"status": [
                {"key": "BSH.Common.Status.DoorState", "value": "BSH.Common.EnumType.DoorState.Closed"}
            ]}}))
            .route(&format!("/{id}/settings"), json!({"data": {"settings": [
                {"key": "BSH.Common.Setting.PowerState", "value": "BSH.Common.EnumType.PowerState.On"}
            ]}}))
            .route(&format!("/{id}/programs/available"), json!({"data": {"programs": [
                {"key": "Dishcare.Dishwasher.Program.Eco50"}
            ]}}))
            .route(&format!("/{id}/programs/active"), json!({"error": {
                "key": "SDK.Error.NoProgramActive", "description": "There is no program active"
            }}))
            .route(&format!("/{id}/programs/selected"), json!({"data": {
                "key": "Dishcare.Dishwasher.Program.Eco50", "options": []
            }}))
    }

    pub fn calls_to(&self, path: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|(p, _)| p == path).count()
    }

    pub fn call_paths(&self) -> Vec<String> {
        self.calls.lock().unwrap().iter().map(|(p, _)| p.clone()).collect()
    }

    pub fn opens(&self) -> Vec<(String, Instant)> {
        self.opens.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn get_json(&self, path: &str) -> Result<Value, Error> {
        self.calls
            .lock()
            .unwrap()
            .push((path.to_owned(), Instant::now()));
        let body = self.routes.lock().unwrap().get(path).cloned();
        Ok(body.unwrap_or_else(|| panic!("no route for {path:?}")))
    }

    async fn open_stream(&self, path: &str) -> Result<ByteStream, Error> {
        self.opens
            .lock()
            .unwrap()
            .push((path.to_owned(), Instant::now()));
        let script = self.streams.lock().unwrap().pop_front();
        let chunks = |list: Vec<&'static str>| {
            stream::iter(
                list.into_iter()
                    .map(|c| Ok::<_, Error>(Bytes::from_static(c.as_bytes())))
                    .collect::<Vec<_>>(),
            )
        };
        match script {
            Some(StreamScript::Reject(status)) => Err(Error::StreamRejected { status }),
            Some(StreamScript::Unauthorized) => Err(Error::Unauthorized),
            Some(StreamScript::Finite(list)) => Ok(chunks(list).boxed()),
            Some(StreamScript::Open(list)) => Ok(chunks(list).chain(stream::pending()).boxed()),
            None => Ok(stream::pending().boxed()),
        }
    }
}

/// Appliance list response for the given `(haId, type)` pairs.
pub fn appliance_list(appliances: &[(&str, &str)]) -> Value {
    let entries: Vec<Value> = appliances
        .iter()
        .map(|(id, kind)| json!({"haId": id, "type": kind, "name": kind, "connected": true}))
        .collect();
    json!({"data": {"homeappliances": entries}})
}

/// Watcher timing with the vendor defaults; paused time makes them free.
pub fn config() -> WatcherConfig {
    WatcherConfig::default()
}

/// Exporter that keeps everything in memory.
#[derive(Default)]
pub struct CollectingExporter {
    pub events: Mutex<Vec<Event>>,
    pub closed: Mutex<bool>,
}

impl CollectingExporter {
    pub fn len(&self) -> usize {
        self.events.lock().unwrap().len()
    }
}

#[async_trait]
impl Exporter for CollectingExporter {
    async fn export(&self, event: &Event) -> Result<(), CoreError> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }

    async fn close(&self) -> Result<(), CoreError> {
        *self.closed.lock().unwrap() = true;
        Ok(())
    }
}

pub fn shared(transport: ScriptedTransport) -> Arc<ScriptedTransport> {
    Arc::new(transport)
}
