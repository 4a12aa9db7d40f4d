use std::sync::atomic::Ordering;

use shared::domain::{ActuatorId, Mode};

use super::*;
use crate::test_support::{eventually, readings, FakeAuthority};

fn synchronizer(
    authority: Arc<FakeAuthority>,
) -> (Arc<PullSynchronizer>, Arc<SyncStore>, broadcast::Receiver<ClientEvent>) {
    let store = Arc::new(SyncStore::new([ActuatorId::from("fan")]));
    let (events, rx) = broadcast::channel(64);
    let sync = Arc::new(PullSynchronizer::new(Arc::clone(&store), authority, events));
    (sync, store, rx)
}

#[tokio::test]
async fn sensor_pull_merges_readings() {
    let authority = Arc::new(FakeAuthority::new(Mode::Manual));
    *authority.sensors.lock().await = readings(55.5, 23.0);
    let (sync, store, _rx) = synchronizer(authority);

    let outcome = sync.pull(PullResource::Sensors).await.expect("pull");

    assert_eq!(outcome, MergeOutcome::Applied);
    let state = store.snapshot().await;
    assert_eq!(state.sensors, readings(55.5, 23.0));
    assert_eq!(state.last_update_source, Some(UpdateSource::Pull));
}

#[tokio::test]
async fn failed_pull_keeps_previous_state_and_reports() {
    let authority = Arc::new(FakeAuthority::new(Mode::Auto { threshold: 24.0 }));
    let (sync, store, mut rx) = synchronizer(Arc::clone(&authority));
    sync.refresh().await.expect("first refresh");
    let before = store.snapshot().await;

    authority.fail_reads.store(true, Ordering::SeqCst);
    let err = sync
        .pull(PullResource::Sensors)
        .await
        .expect_err("transport failure");

    assert!(matches!(err, SyncError::Transport { .. }));
    assert_eq!(store.snapshot().await, before);
    match rx.recv().await.expect("event") {
        ClientEvent::PullFailed { resource, error } => {
            assert_eq!(resource, PullResource::Sensors);
            assert_eq!(error.code, shared::error::ErrorCode::Transport);
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test]
async fn mode_pull_rejects_auto_without_threshold() {
    let authority = Arc::new(FakeAuthority::new(Mode::Manual));
    *authority.mode.lock().await = Some(shared::protocol::ModeResponse {
        mode: shared::domain::ModeKind::Auto,
        threshold: None,
    });
    let (sync, store, _rx) = synchronizer(authority);

    let err = sync.pull(PullResource::Mode).await.expect_err("protocol");

    assert!(matches!(err, SyncError::Protocol(_)));
    assert_eq!(store.mode().await, Mode::Manual);
}

#[tokio::test]
async fn try_pull_skips_while_same_resource_in_flight() {
    let authority = Arc::new(
        FakeAuthority::new(Mode::Manual).with_sensor_delay(Duration::from_millis(200)),
    );
    let (sync, _store, _rx) = synchronizer(Arc::clone(&authority));

    let slow = {
        let sync = Arc::clone(&sync);
        tokio::spawn(async move { sync.pull(PullResource::Sensors).await })
    };
    assert!(eventually!(authority.sensors_in_flight.load(Ordering::SeqCst) == 1));

    assert!(sync.try_pull(PullResource::Sensors).await.is_none());
    // Other resources are independent of the sensor gate.
    assert!(sync.try_pull(PullResource::Mode).await.is_some());

    slow.await.expect("join").expect("pull");
    assert_eq!(authority.sensor_reads.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn interval_never_overlaps_sensor_reads() {
    let authority = Arc::new(
        FakeAuthority::new(Mode::Manual).with_sensor_delay(Duration::from_millis(120)),
    );
    let (sync, _store, _rx) = synchronizer(Arc::clone(&authority));

    let task = sync.spawn(Duration::from_millis(25));
    tokio::time::sleep(Duration::from_millis(400)).await;
    task.stop().await;

    assert!(authority.sensor_reads.load(Ordering::SeqCst) >= 2);
    assert_eq!(authority.max_sensors_in_flight.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn interval_keeps_retrying_after_failures() {
    let authority = Arc::new(FakeAuthority::new(Mode::Manual).failing_reads());
    let (sync, store, _rx) = synchronizer(Arc::clone(&authority));

    let task = sync.spawn(Duration::from_millis(20));
    assert!(eventually!(authority.sensor_reads.load(Ordering::SeqCst) >= 3));

    authority.fail_reads.store(false, Ordering::SeqCst);
    assert!(eventually!(!store.snapshot().await.sensors.is_empty()));
    task.stop().await;
}

#[tokio::test]
async fn stopped_interval_issues_no_more_reads() {
    let authority = Arc::new(FakeAuthority::new(Mode::Manual));
    let (sync, _store, _rx) = synchronizer(Arc::clone(&authority));

    let task = sync.spawn(Duration::from_millis(20));
    assert!(eventually!(authority.sensor_reads.load(Ordering::SeqCst) >= 1));
    task.stop().await;

    let reads = authority.sensor_reads.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(authority.sensor_reads.load(Ordering::SeqCst), reads);
}
