#![allow(clippy::unwrap_used)]

mod common;

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use pretty_assertions::assert_eq;
use serde_json::json;

use common::{ScriptedTransport, StreamScript, appliance_list, config, shared};
use hcwatch_api::{RequestThrottler, ThrottleConfig, Transport};
use hcwatch_core::{
    ApplianceRegistry, ConnectionState, CoreError, CounterMetrics, DisconnectReason, Event,
    EventKind, Metrics, ProgramSupport, RequestKind, RequestPolicy, Trigger, TriggerEngine,
    Watcher, WatcherConfig,
};

const KEEP_ALIVE: &str = "event: KEEP-ALIVE\ndata:\n\n";

async fn take(watcher: Watcher, n: usize) -> Vec<Event> {
    let stream = Box::pin(watcher.into_stream());
    stream
        .take(n)
        .map(|item| item.unwrap())
        .collect::<Vec<_>>()
        .await
}

fn kinds(events: &[Event]) -> Vec<EventKind> {
    events.iter().map(Event::kind).collect()
}

fn watcher(transport: &Arc<ScriptedTransport>, config: WatcherConfig) -> Watcher {
    Watcher::new(Arc::clone(transport) as Arc<dyn Transport>, config)
}

// ── Sweep and follow-ups ────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn connected_event_is_followed_by_all_requests_in_order() {
    let transport = shared(
        ScriptedTransport::new()
            .route("", appliance_list(&[("A", "Dishwasher")]))
            .appliance_with_programs("A")
            .stream(StreamScript::Open(vec!["event: CONNECTED\ndata:\nid: A\n\n"])),
    );

    let events = take(watcher(&transport, config()), 9).await;

    let requests = [
        EventKind::StatusRequest,
        EventKind::SettingsRequest,
        EventKind::ActiveProgramRequest,
        EventKind::SelectedProgramRequest,
    ];
    let mut expected = requests.to_vec();
    expected.push(EventKind::Connected);
    expected.extend(requests);
    assert_eq!(kinds(&events), expected);

    assert!(events.iter().all(|e| e.appliance_id() == Some("A")));
    // No active program is reported as an error-carrying event.
    assert_eq!(events[2].error().unwrap().key, "SDK.Error.NoProgramActive");
    // Supported programs are cached after the first answer.
    assert_eq!(transport.calls_to("/A/programs/available"), 1);
    assert_eq!(transport.calls_to(""), 1);
}

#[tokio::test(start_paused = true)]
async fn scoped_watcher_sweeps_one_appliance_and_uses_its_stream() {
    let transport = shared(
        ScriptedTransport::new()
            .route("", appliance_list(&[("A", "Oven"), ("B", "Dishwasher")]))
            .appliance_with_programs("B")
            .stream(StreamScript::Open(vec![KEEP_ALIVE])),
    );
    let config = WatcherConfig {
        appliance: Some("B".into()),
        ..config()
    };

    let events = take(watcher(&transport, config), 5).await;

    assert!(events[..4].iter().all(|e| e.appliance_id() == Some("B")));
    assert_eq!(events[4].kind(), EventKind::KeepAlive);
    assert!(transport.call_paths().iter().all(|p| !p.starts_with("/A")));
    assert_eq!(transport.opens()[0].0, "/B/events");
}

#[tokio::test(start_paused = true)]
async fn notify_right_after_sweep_skips_fresh_status() {
    let transport = shared(
        ScriptedTransport::new()
            .route("", appliance_list(&[("A", "Dishwasher")]))
            .appliance_with_programs("A")
            .stream(StreamScript::Open(vec![
                "event: NOTIFY\nid: A\ndata: {\"items\":[]}\n\n",
                KEEP_ALIVE,
            ])),
    );

    let events = take(watcher(&transport, config()), 6).await;

    assert_eq!(events[4].kind(), EventKind::Notify);
    assert_eq!(events[5].kind(), EventKind::KeepAlive);
    assert_eq!(transport.calls_to("/A/status"), 1);
}

#[tokio::test(start_paused = true)]
async fn frames_split_across_chunks_are_reassembled() {
    let transport = shared(
        ScriptedTransport::new()
            .route("", appliance_list(&[]))
            .stream(StreamScript::Open(vec![
                "event: KEEP-A",
                "LIVE\ndata:\n\nevent: DISCONNECTED\nid: A\n",
                "data:\n\n",
            ])),
    );

    let events = take(watcher(&transport, config()), 2).await;

    assert_eq!(
        kinds(&events),
        vec![EventKind::KeepAlive, EventKind::Disconnected]
    );
    assert_eq!(events[1].appliance_id(), Some("A"));
}

#[tokio::test(start_paused = true)]
async fn unsupported_programs_are_never_queried_again() {
    let transport = shared(
        ScriptedTransport::new()
            .route("", appliance_list(&[("A", "Hood")]))
            .route("/A/status", json!({"data": {"status": []}}))
            .route("/A/settings", json!({"data": {"settings": []}}))
            .route(
                "/A/programs/available",
                json!({"error": {"key": "SDK.Error.UnsupportedOperation", "description": "nope"}}),
            )
            .stream(StreamScript::Open(vec![
                "event: STATUS\nid: A\ndata: {\"items\":[{\"key\":\"BSH.Common.Status.LocalControlActive\",\"value\":false}]}\n\n",
                "event: STATUS\nid: A\ndata: {\"items\":[{\"key\":\"BSH.Common.Status.LocalControlActive\",\"value\":false}]}\n\n",
                KEEP_ALIVE,
            ])),
    );

    let w = watcher(&transport, config());
    let registry = Arc::clone(w.registry());
    let events = take(w, 5).await;

    assert_eq!(
        kinds(&events),
        vec![
            EventKind::StatusRequest,
            EventKind::SettingsRequest,
            EventKind::Status,
            EventKind::Status,
            EventKind::KeepAlive,
        ]
    );
    assert_eq!(transport.calls_to("/A/programs/available"), 1);
    let appliance = registry.get("A").await.unwrap();
    assert_eq!(*appliance.programs(), ProgramSupport::Unsupported);
    assert!(appliance.programs().is_terminal());
    assert_eq!(appliance.name(), Some("Hood"));
}

#[tokio::test(start_paused = true)]
async fn busy_appliance_is_asked_for_programs_again_later() {
    let transport = shared(
        ScriptedTransport::new()
            .route("", appliance_list(&[("A", "Washer")]))
            .route("/A/status", json!({"data": {"status": []}}))
            .route("/A/settings", json!({"data": {"settings": []}}))
            .route(
                "/A/programs/available",
                json!({"error": {"key": "SDK.Error.WrongOperationState", "description": "busy"}}),
            )
            .stream(StreamScript::Open(vec![
                "event: PAIRED\nid: A\ndata:\n\n",
                KEEP_ALIVE,
            ])),
    );

    let events = take(watcher(&transport, config()), 6).await;

    assert_eq!(
        kinds(&events),
        vec![
            EventKind::StatusRequest,
            EventKind::SettingsRequest,
            EventKind::Paired,
            EventKind::StatusRequest,
            EventKind::SettingsRequest,
            EventKind::KeepAlive,
        ]
    );
    assert_eq!(transport.calls_to("/A/programs/available"), 2);
}

// ── Staleness gate ──────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn if_stale_requests_wait_for_the_threshold() {
    let transport = shared(
        ScriptedTransport::new()
            .route("", appliance_list(&[("A", "Dishwasher")]))
            .route("/A/status", json!({"data": {"status": []}})),
    );
    let throttler = RequestThrottler::new(ThrottleConfig {
        spacing: Duration::ZERO,
        ..ThrottleConfig::default()
    });
    let registry = Arc::new(ApplianceRegistry::new(
        Arc::clone(&transport) as Arc<dyn Transport>,
        throttler,
    ));
    let engine = TriggerEngine::new(Arc::clone(&registry), Duration::from_secs(300));

    let appliance = registry.get("A").await.unwrap();
    appliance.mark_updated_at(RequestKind::Status, tokio::time::Instant::now());
    let trigger = Trigger {
        appliance_id: "A".into(),
        status: true,
        settings: false,
        active_program: false,
        selected_program: false,
        policy: RequestPolicy::IfStale,
    };

    tokio::time::advance(Duration::from_secs(100)).await;
    assert!(engine.execute(Some(trigger.clone())).await.unwrap().is_empty());

    tokio::time::advance(Duration::from_secs(300)).await;
    let events = engine.execute(Some(trigger.clone())).await.unwrap();
    assert_eq!(kinds(&events), vec![EventKind::StatusRequest]);

    // The answer above resets the clock.
    assert!(engine.execute(Some(trigger)).await.unwrap().is_empty());
    assert_eq!(transport.calls_to("/A/status"), 1);
}

#[tokio::test(start_paused = true)]
async fn error_answers_close_the_staleness_gate_too() {
    let transport = shared(
        ScriptedTransport::new()
            .route("", appliance_list(&[("A", "Dishwasher")]))
            .appliance_with_programs("A"),
    );
    let throttler = RequestThrottler::new(ThrottleConfig {
        spacing: Duration::ZERO,
        ..ThrottleConfig::default()
    });
    let registry = Arc::new(ApplianceRegistry::new(
        Arc::clone(&transport) as Arc<dyn Transport>,
        throttler,
    ));
    let engine = TriggerEngine::new(Arc::clone(&registry), Duration::from_secs(300));
    let trigger = Trigger {
        appliance_id: "A".into(),
        status: false,
        settings: false,
        active_program: true,
        selected_program: true,
        policy: RequestPolicy::IfStale,
    };

    let first = engine.execute(Some(trigger.clone())).await.unwrap();
    assert_eq!(
        kinds(&first),
        vec![
            EventKind::ActiveProgramRequest,
            EventKind::SelectedProgramRequest
        ]
    );
    assert!(first[0].error().unwrap().is("NoProgramActive"));

    for _ in 0..4 {
        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(engine.execute(Some(trigger.clone())).await.unwrap().is_empty());
    }
    assert_eq!(transport.calls_to("/A/programs/active"), 1);
    assert_eq!(transport.calls_to("/A/programs/selected"), 1);
}

// ── Reconnects ──────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn rejected_streams_are_retried_after_the_backoff() {
    let transport = shared(
        ScriptedTransport::new()
            .route("", appliance_list(&[]))
            .stream(StreamScript::Reject(503))
            .stream(StreamScript::Reject(502))
            .stream(StreamScript::Open(vec![KEEP_ALIVE])),
    );
    let metrics = Arc::new(CounterMetrics::new());
    let w = watcher(&transport, config()).with_metrics(Arc::clone(&metrics) as Arc<dyn Metrics>);
    let state = w.subscribe_state();

    let events = take(w, 1).await;

    assert_eq!(kinds(&events), vec![EventKind::KeepAlive]);
    let opens = transport.opens();
    assert_eq!(opens.len(), 3);
    for pair in opens.windows(2) {
        assert!(pair[1].1 - pair[0].1 >= Duration::from_secs(120));
    }
    // The sweep ran once, before the first connection.
    assert_eq!(transport.calls_to(""), 1);
    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.disconnects.get(&DisconnectReason::Closed), Some(&2));
    assert_eq!(snapshot.events, 1);
    assert_eq!(*state.borrow(), ConnectionState::Streaming);
}

#[tokio::test(start_paused = true)]
async fn silent_stream_times_out_and_reconnects() {
    let transport = shared(
        ScriptedTransport::new()
            .route("", appliance_list(&[]))
            .stream(StreamScript::Open(vec![]))
            .stream(StreamScript::Open(vec![KEEP_ALIVE])),
    );
    let metrics = Arc::new(CounterMetrics::new());
    let w = watcher(&transport, config()).with_metrics(Arc::clone(&metrics) as Arc<dyn Metrics>);

    take(w, 1).await;

    let opens = transport.opens();
    assert_eq!(opens.len(), 2);
    assert!(opens[1].1 - opens[0].1 >= Duration::from_secs(240));
    assert_eq!(
        metrics.snapshot().disconnects.get(&DisconnectReason::Timeout),
        Some(&1)
    );
}

#[tokio::test(start_paused = true)]
async fn clean_end_of_stream_is_a_disconnect() {
    let transport = shared(
        ScriptedTransport::new()
            .route("", appliance_list(&[]))
            .stream(StreamScript::Finite(vec![KEEP_ALIVE]))
            .stream(StreamScript::Open(vec![KEEP_ALIVE])),
    );
    let metrics = Arc::new(CounterMetrics::new());
    let w = watcher(&transport, config()).with_metrics(Arc::clone(&metrics) as Arc<dyn Metrics>);

    let events = take(w, 2).await;

    assert_eq!(events.len(), 2);
    assert_eq!(transport.opens().len(), 2);
    assert_eq!(
        metrics.snapshot().disconnects.get(&DisconnectReason::Ended),
        Some(&1)
    );
}

// ── Fatal errors ────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn authorization_failure_terminates_the_stream() {
    let transport = shared(
        ScriptedTransport::new()
            .route("", appliance_list(&[]))
            .stream(StreamScript::Unauthorized)
            .stream(StreamScript::Open(vec![KEEP_ALIVE])),
    );
    let w = watcher(&transport, config());
    let state = w.subscribe_state();
    let mut stream = Box::pin(w.into_stream());

    let err = stream.next().await.unwrap().unwrap_err();
    assert!(err.is_auth_expired(), "{err}");
    assert!(stream.next().await.is_none());
    assert_eq!(transport.opens().len(), 1);
    assert_eq!(*state.borrow(), ConnectionState::Terminated);
}

#[tokio::test(start_paused = true)]
async fn unexpected_program_error_is_fatal_after_earlier_events() {
    let transport = shared(
        ScriptedTransport::new()
            .route("", appliance_list(&[("A", "Oven")]))
            .route("/A/status", json!({"data": {"status": []}}))
            .route("/A/settings", json!({"data": {"settings": []}}))
            .route(
                "/A/programs/available",
                json!({"error": {"key": "SDK.Error.Mystery", "description": "?"}}),
            ),
    );
    let mut stream = Box::pin(watcher(&transport, config()).into_stream());

    assert_eq!(stream.next().await.unwrap().unwrap().kind(), EventKind::StatusRequest);
    assert_eq!(stream.next().await.unwrap().unwrap().kind(), EventKind::SettingsRequest);
    let err = stream.next().await.unwrap().unwrap_err();
    assert!(matches!(err, CoreError::Rejected { ref path, .. } if path == "/A/programs/available"));
    assert!(stream.next().await.is_none());
    assert!(transport.opens().is_empty());
}

#[tokio::test(start_paused = true)]
async fn stream_event_for_unknown_appliance_is_fatal() {
    let transport = shared(
        ScriptedTransport::new()
            .route("", appliance_list(&[]))
            .stream(StreamScript::Open(vec!["event: CONNECTED\nid: GHOST\ndata:\n\n"])),
    );
    let mut stream = Box::pin(watcher(&transport, config()).into_stream());

    assert_eq!(stream.next().await.unwrap().unwrap().kind(), EventKind::Connected);
    let err = stream.next().await.unwrap().unwrap_err();
    assert!(matches!(err, CoreError::ApplianceNotFound { ref id } if id == "GHOST"));
}
