//! End-to-end Aggregator scenarios from spec.md §8, run against a mock
//! Server via `wiremock` so reachability can be switched on mid-test.

use std::sync::Arc;
use std::time::Duration;

use datacat_aggregator::{Aggregator, AggregatorConfig};
use datacat_common::EventRecord;
use serde_json::json;
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config_for(server: &MockServer) -> AggregatorConfig {
    AggregatorConfig {
        server_url: server.uri(),
        batch_interval_seconds: 5,
        heartbeat_timeout_seconds: 1,
        enable_compression: false,
        ..AggregatorConfig::default()
    }
}

#[tokio::test(start_paused = true)]
async fn offline_registration_is_later_reconciled_to_a_server_identifier() {
    let server = MockServer::start().await;
    let aggregator = Aggregator::new(Arc::new(config_for(&server)));

    // Server is unreachable: no mock mounted yet, so create_session 404s.
    let local_id = aggregator
        .register("demo".into(), "1.0".into(), None)
        .await
        .unwrap();
    assert!(local_id.starts_with("local-session-"));

    aggregator.update_state(&local_id, json!({"a": 1})).await.unwrap();
    aggregator
        .add_event(
            &local_id,
            EventRecord {
                timestamp: chrono::Utc::now(),
                name: "startup".into(),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let workers = aggregator.spawn_workers();

    // First batch tick (t=5s) fails to forward against the still-absent
    // server and queues State/Event retries behind the already-queued
    // CreateSession retry.
    tokio::time::advance(Duration::from_secs(6)).await;
    tokio::task::yield_now().await;

    // The server "comes back up".
    Mock::given(method("POST"))
        .and(path("/api/sessions"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": "server-uuid-1"})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path_regex(r"^/api/sessions/server-uuid-1/state$"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path_regex(r"^/api/sessions/server-uuid-1/events$"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    // The next retry-processor tick (every 10s) re-drives the queue:
    // CreateSession succeeds first, rewriting the identifier, so the
    // State/Event retries behind it resolve against the new id.
    tokio::time::advance(Duration::from_secs(11)).await;
    tokio::task::yield_now().await;

    let snapshot = aggregator.get_session("server-uuid-1").await;
    assert!(snapshot.is_ok(), "rewritten identifier should resolve in the table");

    let received = server.received_requests().await.unwrap();
    assert!(received.iter().any(|r| r.url.path() == "/api/sessions/server-uuid-1/state"));
    assert!(received.iter().any(|r| r.url.path() == "/api/sessions/server-uuid-1/events"));

    for worker in workers {
        worker.shutdown().await;
    }
}

#[tokio::test(start_paused = true)]
async fn hang_then_recovery_events_are_flushed_in_order() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/sessions"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": "s1"})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path_regex(r"^/api/sessions/s1/events$"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let aggregator = Aggregator::new(Arc::new(config_for(&server)));
    let session_id = aggregator
        .register("demo".into(), "1.0".into(), None)
        .await
        .unwrap();
    assert_eq!(session_id, "s1");

    let workers = aggregator.spawn_workers();

    aggregator.heartbeat(&session_id).await.unwrap();
    // Heartbeat timeout is 1s; the monitor tick at t=5s sees a 5s gap and
    // logs `application_appears_hung`, then the batch tick at t=5s (or the
    // next one) flushes it to the server.
    tokio::time::advance(Duration::from_secs(11)).await;
    tokio::task::yield_now().await;

    // The heartbeat call itself notices `hang_logged` was set and appends
    // `application_recovered` immediately.
    aggregator.heartbeat(&session_id).await.unwrap();
    tokio::time::advance(Duration::from_secs(11)).await;
    tokio::task::yield_now().await;

    let received = server.received_requests().await.unwrap();
    let event_bodies: Vec<serde_json::Value> = received
        .iter()
        .filter(|r| r.url.path() == "/api/sessions/s1/events")
        .map(|r| r.body_json().unwrap())
        .collect();
    let names: Vec<&str> = event_bodies.iter().map(|b| b["name"].as_str().unwrap()).collect();
    assert!(names.contains(&"application_appears_hung"));
    assert!(names.contains(&"application_recovered"));
    let hung_index = names.iter().position(|n| *n == "application_appears_hung").unwrap();
    let recovered_index = names.iter().position(|n| *n == "application_recovered").unwrap();
    assert!(hung_index < recovered_index);

    for worker in workers {
        worker.shutdown().await;
    }
}

#[tokio::test(start_paused = true)]
async fn a_transient_server_failure_does_not_lose_the_write() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/sessions"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": "s1"})))
        .mount(&server)
        .await;

    let aggregator = Aggregator::new(Arc::new(config_for(&server)));
    let session_id = aggregator
        .register("demo".into(), "1.0".into(), None)
        .await
        .unwrap();

    let workers = aggregator.spawn_workers();

    aggregator.update_state(&session_id, json!({"k": "v"})).await.unwrap();
    // No /state mock is mounted yet: the first flush fails and the patch
    // is queued for retry rather than dropped.
    tokio::time::advance(Duration::from_secs(6)).await;
    tokio::task::yield_now().await;

    Mock::given(method("POST"))
        .and(path_regex(r"^/api/sessions/s1/state$"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;
    tokio::time::advance(Duration::from_secs(11)).await;
    tokio::task::yield_now().await;

    let received = server.received_requests().await.unwrap();
    assert!(received.iter().any(|r| r.url.path() == "/api/sessions/s1/state"));

    for worker in workers {
        worker.shutdown().await;
    }
}
