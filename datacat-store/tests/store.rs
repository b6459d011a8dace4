//! Store-level integration tests against a real (in-memory) SQLite backend.

use chrono::Duration;
use datacat_common::{EventRecord, MetricRecord, MetricType};
use datacat_store::Store;
use serde_json::json;

async fn new_store() -> Store {
    Store::connect("sqlite::memory:", Duration::seconds(60))
        .await
        .expect("in-memory store should connect")
}

#[tokio::test]
async fn same_machine_registration_crashes_the_previous_session() {
    let store = new_store().await;
    let first = store
        .create("demo".into(), "1.0".into(), Some("machine-a".into()), None)
        .await
        .unwrap();
    let second = store
        .create("demo".into(), "1.0".into(), Some("machine-a".into()), None)
        .await
        .unwrap();

    let first_snapshot = store.get(&first.id).unwrap();
    assert!(first_snapshot.session.crashed);
    let second_snapshot = store.get(&second.id).unwrap();
    assert!(!second_snapshot.session.crashed);
}

#[tokio::test]
async fn same_machine_registration_clears_suspended_on_the_crashed_session() {
    // spec.md §8 scenario 4, literal values: A is created, goes stale
    // without a heartbeat (active=false, suspended=true), then B registers
    // from the same machine. A subsequent read on A must show
    // crashed=true, active=false, suspended=false, not still-suspended.
    let store = Store::connect("sqlite::memory:", Duration::seconds(0)).await.unwrap();
    let first = store
        .create("demo".into(), "1.0".into(), Some("m1".into()), None)
        .await
        .unwrap();
    store.heartbeat(&first.id).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;

    let before_crash = store.get(&first.id).unwrap();
    assert!(!before_crash.active);
    assert!(before_crash.suspended);

    store
        .create("demo".into(), "1.0".into(), Some("m1".into()), None)
        .await
        .unwrap();

    let after_crash = store.get(&first.id).unwrap();
    assert!(after_crash.session.crashed);
    assert!(!after_crash.active);
    assert!(!after_crash.suspended);
    assert_eq!(
        after_crash
            .session
            .events
            .iter()
            .filter(|e| e.name == "session_crashed_detected")
            .count(),
        1
    );
}

#[tokio::test]
async fn different_machines_never_crash_each_other() {
    let store = new_store().await;
    let first = store
        .create("demo".into(), "1.0".into(), Some("machine-a".into()), None)
        .await
        .unwrap();
    store
        .create("demo".into(), "1.0".into(), Some("machine-b".into()), None)
        .await
        .unwrap();

    let first_snapshot = store.get(&first.id).unwrap();
    assert!(!first_snapshot.session.crashed);
}

#[tokio::test]
async fn state_updates_deep_merge_and_append_history() {
    let store = new_store().await;
    let session = store.create("demo".into(), "1.0".into(), None, None).await.unwrap();

    store
        .update_state(&session.id, &json!({"user": {"id": "u1", "plan": "free"}}))
        .await
        .unwrap();
    store
        .update_state(&session.id, &json!({"user": {"plan": "pro"}, "feature_flags": null}))
        .await
        .unwrap();

    let snapshot = store.get(&session.id).unwrap();
    assert_eq!(snapshot.session.state["user"]["id"], json!("u1"));
    assert_eq!(snapshot.session.state["user"]["plan"], json!("pro"));
    assert_eq!(snapshot.session.state_history.len(), 2);
}

#[tokio::test]
async fn hang_and_recovery_events_toggle_the_hung_flag() {
    let store = new_store().await;
    let session = store.create("demo".into(), "1.0".into(), None, None).await.unwrap();

    store
        .add_event(
            &session.id,
            EventRecord {
                timestamp: chrono::Utc::now(),
                name: "application_appears_hung".into(),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(store.get(&session.id).unwrap().session.hung);

    store
        .add_event(
            &session.id,
            EventRecord {
                timestamp: chrono::Utc::now(),
                name: "application_recovered".into(),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(!store.get(&session.id).unwrap().session.hung);
}

#[tokio::test]
async fn end_and_crash_are_idempotent() {
    let store = new_store().await;
    let session = store.create("demo".into(), "1.0".into(), None, None).await.unwrap();

    store.end(&session.id).await.unwrap();
    let ended_at_first = store.get(&session.id).unwrap().session.ended_at.unwrap();
    store.end(&session.id).await.unwrap();
    let ended_at_second = store.get(&session.id).unwrap().session.ended_at.unwrap();
    assert_eq!(ended_at_first, ended_at_second);

    store.crash(&session.id, "reason-one").await.unwrap();
    store.crash(&session.id, "reason-two").await.unwrap();
    let events = &store.get(&session.id).unwrap().session.events;
    assert_eq!(events.iter().filter(|e| e.name == "session_crashed_detected").count(), 1);
}

#[tokio::test]
async fn metrics_are_appended_in_order() {
    let store = new_store().await;
    let session = store.create("demo".into(), "1.0".into(), None, None).await.unwrap();

    for value in [1.0, 2.0, 3.0] {
        store
            .add_metric(
                &session.id,
                MetricRecord {
                    timestamp: chrono::Utc::now(),
                    name: "requests_total".into(),
                    metric_type: MetricType::Counter,
                    value,
                    tags: Default::default(),
                    unit: None,
                    metadata: None,
                },
            )
            .await
            .unwrap();
    }

    let snapshot = store.get(&session.id).unwrap();
    assert_eq!(snapshot.session.metrics.len(), 3);
    assert_eq!(snapshot.session.metrics.last().unwrap().value, 3.0);
}

#[tokio::test]
async fn cleanup_expired_removes_sessions_older_than_retention() {
    let store = new_store().await;
    let session = store.create("demo".into(), "1.0".into(), None, None).await.unwrap();

    let far_future = chrono::Utc::now() + Duration::days(400);
    let removed = store.cleanup_expired(far_future, Duration::days(365)).await.unwrap();
    assert_eq!(removed, 1);
    assert!(store.get(&session.id).is_err());
}

#[tokio::test]
async fn heartbeat_keeps_a_session_active_and_its_absence_suspends_it() {
    let store = Store::connect("sqlite::memory:", Duration::seconds(0)).await.unwrap();
    let session = store.create("demo".into(), "1.0".into(), None, None).await.unwrap();

    store.heartbeat(&session.id).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    let snapshot = store.get(&session.id).unwrap();
    assert!(!snapshot.active);
    assert!(snapshot.suspended);
}
