mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use pretty_assertions::assert_eq;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tokio_test::assert_ok;
use tokio_util::sync::CancellationToken;

use common::{Call, ScriptedLink};
use tzone_ble::ble::{PASSWORD_UUID, SYNC_DATASWITCH_UUID, TEMPERATURE_UUID};
use tzone_ble::data::TZ_BT04_ADDRESS;
use tzone_ble::protocol::encode_stored_record;
use tzone_ble::{
    BufferSink, CyclePolicy, DeviceSelector, FixedSelector, Result, SessionConfig,
    SessionController, SessionEvent, SessionState, TargetDevice,
};

fn selector() -> FixedSelector {
    FixedSelector::new(TargetDevice::new(TZ_BT04_ADDRESS, "TZ-BT04"))
}

/// A selector whose user never answers.
struct SilentSelector;

#[async_trait]
impl DeviceSelector for SilentSelector {
    async fn select(&self) -> Result<TargetDevice> {
        std::future::pending().await
    }
}

fn states(events: &[SessionEvent]) -> Vec<SessionState> {
    events.iter().map(|e| e.state).collect()
}

fn drain(rx: &mut broadcast::Receiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Cancel `cancel` the first time the session enters `state`.
async fn cancel_on(
    mut rx: broadcast::Receiver<SessionEvent>,
    state: SessionState,
    cancel: CancellationToken,
) {
    while let Ok(event) = rx.recv().await {
        if event.state == state {
            cancel.cancel();
            return;
        }
    }
}

#[tokio::test(start_paused = true)]
async fn three_connect_failures_then_listening_on_fourth_attempt() {
    let link = Arc::new(ScriptedLink::new().with_connects(&[false, false, false, true]));
    let sink = Arc::new(BufferSink::new(8));
    let config = SessionConfig::live().with_cycle_policy(CyclePolicy::UntilFirstSuccess);
    let session = SessionController::new(link.clone(), config, sink).unwrap();
    let mut events = session.subscribe_events();

    let start = Instant::now();
    let stats = assert_ok!(session.run(&selector(), CancellationToken::new()).await);

    assert_eq!(stats.attempts, 4);
    assert_eq!(stats.connect_failures, 3);
    assert_eq!(stats.completed_cycles, 1);
    // Three back-offs of 2 s, then one 2 s dwell window.
    assert_eq!(start.elapsed(), Duration::from_secs(8));

    let events = drain(&mut events);
    let listening = events
        .iter()
        .position(|e| e.state == SessionState::Listening)
        .unwrap();
    let backoffs = events[..listening]
        .iter()
        .filter(|e| e.state == SessionState::BackoffWait)
        .count();
    assert_eq!(backoffs, 3);
    assert_eq!(events[listening].attempt, 4);
    assert_eq!(session.state(), SessionState::Idle);
    assert_eq!(link.open_connections(), 0);
}

#[tokio::test(start_paused = true)]
async fn stored_sync_unlocks_then_emits_records_in_order() {
    let day = NaiveDate::from_ymd_opt(2023, 11, 4).unwrap();
    let mut payload = encode_stored_record(day.and_hms_opt(6, 0, 0).unwrap(), 4.2, 71)
        .unwrap()
        .to_vec();
    payload.extend_from_slice(
        &encode_stored_record(day.and_hms_opt(6, 30, 0).unwrap(), 3.9, 73).unwrap(),
    );

    let link = Arc::new(ScriptedLink::new().with_payload(SYNC_DATASWITCH_UUID, payload));
    let sink = Arc::new(BufferSink::new(8));
    let config = SessionConfig::stored_sync().with_cycle_policy(CyclePolicy::UntilFirstSuccess);
    let session = SessionController::new(link.clone(), config, sink.clone()).unwrap();

    let stats = assert_ok!(session.run(&selector(), CancellationToken::new()).await);
    assert_eq!(stats.readings_emitted, 2);

    let readings = sink.readings();
    assert_eq!(
        readings.iter().map(|r| r.timestamp_string()).collect::<Vec<_>>(),
        vec!["2023-11-04 06:00:00", "2023-11-04 06:30:00"]
    );
    assert_eq!(readings[0].temperature_celsius, 4.2);
    assert_eq!(readings[1].humidity.percent(), 73.0);

    assert_eq!(
        link.calls(),
        vec![
            Call::Connect(TZ_BT04_ADDRESS.to_string()),
            Call::Write(PASSWORD_UUID, vec![0u8; 6]),
            Call::Subscribe(SYNC_DATASWITCH_UUID),
            Call::Unsubscribe(SYNC_DATASWITCH_UUID),
            Call::Disconnect(1),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn timestamp_only_packet_emits_nothing() {
    let link = Arc::new(
        ScriptedLink::new().with_payload(SYNC_DATASWITCH_UUID, vec![0x00, 0x00, 0x00, 0x0A]),
    );
    let sink = Arc::new(BufferSink::new(8));
    let config = SessionConfig::stored_sync().with_cycle_policy(CyclePolicy::UntilFirstSuccess);
    let session = SessionController::new(link, config, sink.clone()).unwrap();

    let stats = assert_ok!(session.run(&selector(), CancellationToken::new()).await);

    assert_eq!(stats.completed_cycles, 1);
    assert_eq!(stats.readings_emitted, 0);
    assert!(sink.is_empty());
}

#[tokio::test(start_paused = true)]
async fn vanished_device_fails_the_cycle_and_backs_off() {
    let link = Arc::new(ScriptedLink::new().vanishing_after(2));
    let sink = Arc::new(BufferSink::new(8));
    let session = SessionController::new(link.clone(), SessionConfig::live(), sink).unwrap();
    let cancel = CancellationToken::new();

    let watcher = cancel_on(
        session.subscribe_events(),
        SessionState::BackoffWait,
        cancel.clone(),
    );
    let start = Instant::now();
    let selector = selector();
    let (stats, _) = tokio::join!(session.run(&selector, cancel), watcher);
    let stats = assert_ok!(stats);

    assert_eq!(stats.completed_cycles, 0);
    // The loss is seen as soon as the notification queues close.
    assert!(start.elapsed() < Duration::from_secs(2));
    assert_eq!(link.count(|c| matches!(c, Call::Unsubscribe(_))), 2);
    assert_eq!(link.count(|c| matches!(c, Call::Disconnect(_))), 1);
    assert_eq!(session.state(), SessionState::Idle);
}

#[tokio::test(start_paused = true)]
async fn lost_link_during_stored_sync_is_retried() {
    let day = NaiveDate::from_ymd_opt(2023, 11, 4).unwrap();
    let payload = encode_stored_record(day.and_hms_opt(6, 0, 0).unwrap(), 4.2, 71)
        .unwrap()
        .to_vec();
    let link = Arc::new(
        ScriptedLink::new()
            .with_payload(SYNC_DATASWITCH_UUID, payload)
            .vanishing_after(1),
    );
    let sink = Arc::new(BufferSink::new(8));
    let config = SessionConfig::stored_sync().with_cycle_policy(CyclePolicy::UntilFirstSuccess);
    let session = SessionController::new(link.clone(), config, sink.clone()).unwrap();
    let mut events = session.subscribe_events();

    let stats = assert_ok!(session.run(&selector(), CancellationToken::new()).await);

    assert_eq!(stats.attempts, 2);
    assert_eq!(stats.completed_cycles, 1);
    assert_eq!(link.count(|c| matches!(c, Call::Connect(_))), 2);
    assert_eq!(link.open_connections(), 0);
    // One reading per cycle: the first was routed before the link dropped.
    assert_eq!(sink.len(), 2);

    let states = states(&drain(&mut events));
    let first_backoff = states
        .iter()
        .position(|s| *s == SessionState::BackoffWait)
        .unwrap();
    assert_eq!(
        states[..first_backoff].to_vec(),
        vec![
            SessionState::Selecting,
            SessionState::Connecting,
            SessionState::Subscribing,
            SessionState::Listening,
            SessionState::Unsubscribing,
            SessionState::Disconnecting,
        ]
    );
    assert_eq!(states.last(), Some(&SessionState::Idle));
}

#[tokio::test(start_paused = true)]
async fn cancellation_while_connecting_returns_without_a_handle() {
    let link = Arc::new(ScriptedLink::new().with_connect_delay(Duration::from_secs(3600)));
    let sink = Arc::new(BufferSink::new(1));
    let session = SessionController::new(link.clone(), SessionConfig::live(), sink).unwrap();
    let cancel = CancellationToken::new();

    let watcher = cancel_on(
        session.subscribe_events(),
        SessionState::Connecting,
        cancel.clone(),
    );
    let start = Instant::now();
    let selector = selector();
    let (stats, _) = tokio::join!(session.run(&selector, cancel), watcher);
    let stats = assert_ok!(stats);

    assert!(start.elapsed() < Duration::from_secs(1));
    assert_eq!(stats.attempts, 1);
    assert_eq!(stats.connect_failures, 0);
    assert_eq!(link.open_connections(), 0);
    assert_eq!(link.calls(), vec![Call::Connect(TZ_BT04_ADDRESS.to_string())]);
    assert_eq!(session.state(), SessionState::Idle);
}

#[tokio::test(start_paused = true)]
async fn cancellation_while_subscribing_releases_handle() {
    let link = Arc::new(ScriptedLink::new().with_subscribe_delay(Duration::from_secs(3600)));
    let sink = Arc::new(BufferSink::new(1));
    let session = SessionController::new(link.clone(), SessionConfig::live(), sink).unwrap();
    let cancel = CancellationToken::new();

    let watcher = cancel_on(
        session.subscribe_events(),
        SessionState::Subscribing,
        cancel.clone(),
    );
    let start = Instant::now();
    let selector = selector();
    let (stats, _) = tokio::join!(session.run(&selector, cancel), watcher);
    let stats = assert_ok!(stats);

    assert!(start.elapsed() < Duration::from_secs(1));
    assert_eq!(stats.completed_cycles, 0);
    assert_eq!(link.open_connections(), 0);
    // The interrupted subscription is undone along with the connection.
    assert_eq!(
        link.calls(),
        vec![
            Call::Connect(TZ_BT04_ADDRESS.to_string()),
            Call::Subscribe(TEMPERATURE_UUID),
            Call::Unsubscribe(TEMPERATURE_UUID),
            Call::Disconnect(1),
        ]
    );
    assert_eq!(session.state(), SessionState::Idle);
}

#[tokio::test(start_paused = true)]
async fn cancellation_while_selecting_returns_idle() {
    let link = Arc::new(ScriptedLink::new());
    let sink = Arc::new(BufferSink::new(1));
    let session = SessionController::new(link.clone(), SessionConfig::live(), sink).unwrap();
    let cancel = CancellationToken::new();

    let stopper = {
        let cancel = cancel.clone();
        async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            cancel.cancel();
        }
    };
    let (stats, _) = tokio::join!(session.run(&SilentSelector, cancel), stopper);
    let stats = assert_ok!(stats);

    assert_eq!(stats.attempts, 0);
    assert!(link.calls().is_empty());
    assert_eq!(session.state(), SessionState::Idle);
}

#[tokio::test(start_paused = true)]
async fn cancellation_while_listening_releases_handle() {
    let link = Arc::new(ScriptedLink::new().with_payload(TEMPERATURE_UUID, vec![0xF6, 0xFF]));
    let sink = Arc::new(BufferSink::new(8));
    let config = SessionConfig::live().with_dwell(Duration::from_secs(3600));
    let session = SessionController::new(link.clone(), config, sink.clone()).unwrap();
    let cancel = CancellationToken::new();

    let watcher = cancel_on(
        session.subscribe_events(),
        SessionState::Listening,
        cancel.clone(),
    );
    let start = Instant::now();
    let selector = selector();
    let (stats, _) = tokio::join!(session.run(&selector, cancel), watcher);
    let stats = assert_ok!(stats);

    assert!(start.elapsed() < Duration::from_secs(1));
    assert_eq!(stats.completed_cycles, 0);
    assert_eq!(link.open_connections(), 0);
    assert_eq!(link.count(|c| matches!(c, Call::Unsubscribe(_))), 2);
    assert_eq!(session.state(), SessionState::Idle);

    // Packets already queued are still routed before release.
    assert_eq!(sink.live_samples().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn list_services_retries_until_connected() {
    let link = Arc::new(ScriptedLink::new().with_connects(&[false, true]));
    let sink = Arc::new(BufferSink::new(1));
    let session = SessionController::new(link.clone(), SessionConfig::live(), sink).unwrap();

    let start = Instant::now();
    let services = assert_ok!(
        session
            .list_services(
                &TargetDevice::new(TZ_BT04_ADDRESS, "TZ-BT04"),
                &CancellationToken::new(),
            )
            .await
    );

    assert_eq!(services.len(), 1);
    assert_eq!(start.elapsed(), Duration::from_secs(2));
    assert_eq!(link.open_connections(), 0);
    assert_eq!(session.stats().connect_failures, 1);
}

#[tokio::test(start_paused = true)]
async fn cancellation_while_listing_services_connects_nothing() {
    let link = Arc::new(ScriptedLink::new().with_connect_delay(Duration::from_secs(3600)));
    let sink = Arc::new(BufferSink::new(1));
    let session = SessionController::new(link.clone(), SessionConfig::live(), sink).unwrap();
    let cancel = CancellationToken::new();

    let watcher = cancel_on(
        session.subscribe_events(),
        SessionState::Connecting,
        cancel.clone(),
    );
    let target = TargetDevice::new(TZ_BT04_ADDRESS, "TZ-BT04");
    let (result, _) = tokio::join!(session.list_services(&target, &cancel), watcher);

    assert!(matches!(result, Err(tzone_ble::Error::Cancelled)));
    assert_eq!(link.open_connections(), 0);
    assert_eq!(session.state(), SessionState::Idle);
}
