mod test_harness;

use std::sync::Arc;
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use test_harness::{manual_clock, RecordingAlerts, ScriptedReconnector};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use transcode_fleet::backoff::BackoffPolicy;
use transcode_fleet::clock::{Clock, ManualClock};
use transcode_fleet::connection::{ConnectionHealthMonitor, ConnectionStatus, ReconnectOutcome};
use transcode_fleet::FleetError;

struct Fixture {
    clock: Arc<ManualClock>,
    reconnector: Arc<ScriptedReconnector>,
    alerts: Arc<RecordingAlerts>,
    monitor: Arc<ConnectionHealthMonitor>,
}

fn fixture(reconnector: ScriptedReconnector) -> Fixture {
    let clock = manual_clock();
    let reconnector = Arc::new(reconnector);
    let alerts = Arc::new(RecordingAlerts::default());
    let monitor = Arc::new(ConnectionHealthMonitor::new(
        BackoffPolicy::default(),
        reconnector.clone(),
        alerts.clone(),
        clock.clone(),
    ));
    Fixture {
        clock,
        reconnector,
        alerts,
        monitor,
    }
}

/// Paused time jumps straight to timer deadlines; allow for millisecond rounding.
fn assert_waited(started: Instant, expected: Duration) {
    let elapsed = started.elapsed();
    assert!(
        elapsed >= expected && elapsed < expected + Duration::from_millis(50),
        "waited {:?}, expected {:?}",
        elapsed,
        expected
    );
}

fn spawn_disconnect(
    monitor: &Arc<ConnectionHealthMonitor>,
    session_id: &'static str,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<transcode_fleet::Result<ReconnectOutcome>> {
    let monitor = monitor.clone();
    tokio::spawn(async move { monitor.handle_disconnect(session_id, cancel).await })
}

#[test]
fn test_default_delays_double_from_one_second() {
    let f = fixture(ScriptedReconnector::failing(0));
    let delays: Vec<u64> = (1..=5)
        .map(|attempt| f.monitor.calculate_delay(attempt).as_secs())
        .collect();
    assert_eq!(delays, vec![1, 2, 4, 8, 16]);
    assert_eq!(f.monitor.calculate_delay(12), Duration::from_secs(60));

    assert!(f.monitor.should_attempt_reconnection(0));
    assert!(f.monitor.should_attempt_reconnection(4));
    assert!(!f.monitor.should_attempt_reconnection(5));
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_on_first_attempt() {
    let f = fixture(ScriptedReconnector::failing(0));
    f.monitor.open_session("live-1");

    let started = Instant::now();
    let outcome = f
        .monitor
        .handle_disconnect("live-1", CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome, ReconnectOutcome::Reconnected { attempts: 1 });
    assert_waited(started, Duration::from_secs(1));

    let state = f.monitor.state("live-1").unwrap();
    assert_eq!(state.status, ConnectionStatus::Connected);
    assert_eq!(state.attempt_count, 0);
    assert_eq!(f.alerts.failover_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_after_failures_resets_attempts() {
    let f = fixture(ScriptedReconnector::failing(3));
    f.monitor.open_session("live-1");

    let started = Instant::now();
    let outcome = f
        .monitor
        .handle_disconnect("live-1", CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome, ReconnectOutcome::Reconnected { attempts: 4 });
    // 1 + 2 + 4 + 8 seconds of backoff before the fourth try.
    assert_waited(started, Duration::from_secs(15));

    let attempts: Vec<u32> = f.reconnector.calls().iter().map(|(_, a)| *a).collect();
    assert_eq!(attempts, vec![1, 2, 3, 4]);

    let state = f.monitor.state("live-1").unwrap();
    assert_eq!(state.status, ConnectionStatus::Connected);
    assert_eq!(state.attempt_count, 0);
}

#[tokio::test(start_paused = true)]
async fn test_exhaustion_fails_over_and_alerts_once() {
    let f = fixture(ScriptedReconnector::always_failing());
    f.monitor.open_session("live-1");

    let started = Instant::now();
    let outcome = f
        .monitor
        .handle_disconnect("live-1", CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome, ReconnectOutcome::FailedOver { attempts: 5 });
    assert_waited(started, Duration::from_secs(31));
    assert_eq!(f.reconnector.calls().len(), 5);

    let state = f.monitor.state("live-1").unwrap();
    assert_eq!(state.status, ConnectionStatus::FailedOver);
    assert_eq!(state.attempt_count, 5);
    assert_eq!(state.failed_over_at, Some(f.clock.now()));

    assert_eq!(f.alerts.failover_count(), 1);
    assert_eq!(f.alerts.failovers()[0].session_id, "live-1");

    let again = f
        .monitor
        .handle_disconnect("live-1", CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(again, ReconnectOutcome::FailedOver { attempts: 5 });
    assert_eq!(f.alerts.failover_count(), 1);
    assert_eq!(f.reconnector.calls().len(), 5);
}

#[tokio::test(start_paused = true)]
async fn test_touch_on_failed_over_session_is_rejected() {
    let f = fixture(ScriptedReconnector::always_failing());
    f.monitor.open_session("live-1");
    f.monitor.touch("live-1").unwrap();

    f.monitor
        .handle_disconnect("live-1", CancellationToken::new())
        .await
        .unwrap();

    let err = f.monitor.touch("live-1").unwrap_err();
    assert!(matches!(
        err,
        FleetError::ReconnectionExhausted { attempts: 5, .. }
    ));
    assert!(matches!(
        f.monitor.touch("missing").unwrap_err(),
        FleetError::SessionNotFound(_)
    ));
}

#[tokio::test(start_paused = true)]
async fn test_reset_allows_a_new_reconnection_cycle() {
    let f = fixture(ScriptedReconnector::always_failing());
    f.monitor.open_session("live-1");
    f.monitor
        .handle_disconnect("live-1", CancellationToken::new())
        .await
        .unwrap();

    let state = f.monitor.reset("live-1").unwrap();
    assert_eq!(state.status, ConnectionStatus::Connected);
    assert_eq!(state.attempt_count, 0);
    assert!(state.failed_over_at.is_none());
    f.monitor.touch("live-1").unwrap();

    let outcome = f
        .monitor
        .handle_disconnect("live-1", CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome, ReconnectOutcome::FailedOver { attempts: 5 });
    assert_eq!(f.reconnector.calls().len(), 10);
    assert_eq!(f.alerts.failover_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_reset_supersedes_running_loop() {
    let f = fixture(ScriptedReconnector::always_failing());
    f.monitor.open_session("live-1");

    let handle = spawn_disconnect(&f.monitor, "live-1", CancellationToken::new());
    // First attempt fails at 1s; the loop is now waiting 2s for the second.
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(f.monitor.state("live-1").unwrap().attempt_count, 1);

    f.monitor.reset("live-1").unwrap();
    let outcome = handle.await.unwrap().unwrap();
    assert_eq!(outcome, ReconnectOutcome::Reset);
    assert_eq!(f.reconnector.calls().len(), 1);

    let state = f.monitor.state("live-1").unwrap();
    assert_eq!(state.status, ConnectionStatus::Connected);
    assert_eq!(state.attempt_count, 0);
    assert_eq!(f.alerts.failover_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_second_disconnect_while_looping_is_in_progress() {
    let f = fixture(ScriptedReconnector::failing(1));
    f.monitor.open_session("live-1");

    let handle = spawn_disconnect(&f.monitor, "live-1", CancellationToken::new());
    tokio::time::sleep(Duration::from_millis(100)).await;

    let second = f
        .monitor
        .handle_disconnect("live-1", CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(second, ReconnectOutcome::InProgress);

    let first = handle.await.unwrap().unwrap();
    assert_eq!(first, ReconnectOutcome::Reconnected { attempts: 2 });
    assert_eq!(f.reconnector.calls().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_leaves_state_for_a_later_loop() {
    let f = fixture(ScriptedReconnector::failing(2));
    f.monitor.open_session("live-1");

    let cancel = CancellationToken::new();
    let handle = spawn_disconnect(&f.monitor, "live-1", cancel.clone());
    // Attempt 1 fails at 1s, attempt 2 starts its 2s wait.
    tokio::time::sleep(Duration::from_millis(1500)).await;
    cancel.cancel();

    let outcome = handle.await.unwrap().unwrap();
    assert_eq!(outcome, ReconnectOutcome::Cancelled { attempts: 2 });
    let state = f.monitor.state("live-1").unwrap();
    assert_eq!(state.status, ConnectionStatus::Reconnecting);
    assert_eq!(state.attempt_count, 2);

    // The loop flag was released, so a fresh disconnect picks up at attempt 3.
    let outcome = f
        .monitor
        .handle_disconnect("live-1", CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome, ReconnectOutcome::Reconnected { attempts: 3 });
}

#[tokio::test(start_paused = true)]
async fn test_aborted_task_releases_loop() {
    let f = fixture(ScriptedReconnector::failing(0));
    f.monitor.open_session("live-1");

    let handle = spawn_disconnect(&f.monitor, "live-1", CancellationToken::new());
    tokio::time::sleep(Duration::from_millis(100)).await;
    handle.abort();
    let _ = handle.await;

    let outcome = f
        .monitor
        .handle_disconnect("live-1", CancellationToken::new())
        .await
        .unwrap();
    assert!(matches!(outcome, ReconnectOutcome::Reconnected { .. }));
}

#[tokio::test]
async fn test_unknown_session_is_an_error() {
    let f = fixture(ScriptedReconnector::failing(0));
    let err = f
        .monitor
        .handle_disconnect("ghost", CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, FleetError::SessionNotFound(_)));
    assert!(f.monitor.reset("ghost").is_err());
}

#[test]
fn test_open_session_is_idempotent() {
    let f = fixture(ScriptedReconnector::failing(0));
    let first = f.monitor.open_session("live-1");
    f.clock.advance(ChronoDuration::seconds(30));
    let second = f.monitor.open_session("live-1");
    assert_eq!(first, second);
    assert_eq!(f.monitor.sessions().len(), 1);

    assert!(f.monitor.end_session("live-1").is_some());
    assert!(f.monitor.end_session("live-1").is_none());
    assert!(f.monitor.state("live-1").is_none());
}

#[tokio::test(start_paused = true)]
async fn test_sweep_drops_idle_sessions_only() {
    let f = fixture(ScriptedReconnector::always_failing());
    f.monitor.open_session("idle");
    f.monitor.open_session("active");
    f.monitor.open_session("looping");

    let handle = spawn_disconnect(&f.monitor, "looping", CancellationToken::new());
    tokio::time::sleep(Duration::from_millis(100)).await;

    f.clock.advance(ChronoDuration::minutes(20));
    f.monitor.touch("active").unwrap();
    f.clock.advance(ChronoDuration::minutes(15));

    let expired = f.monitor.sweep_expired(Duration::from_secs(30 * 60));
    assert_eq!(expired, vec!["idle".to_string()]);

    let remaining: Vec<String> = f
        .monitor
        .sessions()
        .into_iter()
        .map(|s| s.session_id)
        .collect();
    assert_eq!(remaining, vec!["active".to_string(), "looping".to_string()]);

    handle.abort();
}

#[tokio::test(start_paused = true)]
async fn test_sweeper_task_stops_on_cancel() {
    let f = fixture(ScriptedReconnector::failing(0));
    f.monitor.open_session("idle");
    f.clock.advance(ChronoDuration::hours(1));

    let cancel = CancellationToken::new();
    let sweeper = tokio::spawn(f.monitor.clone().run_sweeper(
        Duration::from_secs(60),
        Duration::from_secs(30 * 60),
        cancel.clone(),
    ));
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(f.monitor.sessions().is_empty());

    cancel.cancel();
    sweeper.await.unwrap();
}
