//! HTTP-surface tests driving the router directly with `tower::ServiceExt`,
//! no socket bound.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use datacat_store::{http, AppState, Store, StoreConfig};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

async fn test_app() -> axum::Router {
    let store = Arc::new(
        Store::connect("sqlite::memory:", chrono::Duration::seconds(60))
            .await
            .unwrap(),
    );
    let config = Arc::new(StoreConfig::default());
    http::router(AppState { store, config })
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn health_never_requires_auth() {
    let app = test_app().await;
    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn create_then_fetch_session_round_trips() {
    let app = test_app().await;
    let create_body = json!({"product": "demo", "version": "1.0", "machine_id": "m1"}).to_string();
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/sessions")
                .header("content-type", "application/json")
                .body(Body::from(create_body))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let created = body_json(response).await;
    let id = created["id"].as_str().unwrap().to_string();
    assert_eq!(created["active"], json!(true));

    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/api/sessions/{id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let fetched = body_json(response).await;
    assert_eq!(fetched["id"], json!(id));
}

#[tokio::test]
async fn fetching_an_unknown_session_is_404() {
    let app = test_app().await;
    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/sessions/does-not-exist")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn protected_routes_reject_missing_bearer_token_when_required() {
    let store = Arc::new(
        Store::connect("sqlite::memory:", chrono::Duration::seconds(60))
            .await
            .unwrap(),
    );
    let mut config = StoreConfig::default();
    config.require_api_key = true;
    config.api_key = Some("secret".into());
    let app = http::router(AppState {
        store,
        config: Arc::new(config),
    });

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/data/sessions")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/data/sessions")
                .header("authorization", "Bearer secret")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
