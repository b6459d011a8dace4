//! HTTP surface of the Session Store (spec.md §6).
//!
//! Every endpoint but `/health` runs behind [`crate::auth::require_api_key`].
//! Bodies are read as raw bytes and passed through
//! [`crate::gzip::maybe_decompress`] before JSON decoding, so a gzip-encoded
//! request body is transparent to the handlers below.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use datacat_common::{EventRecord, MetricRecord};
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use crate::error::StoreError;
use crate::gzip::maybe_decompress;
use crate::AppState;

pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/api/sessions", post(create_session))
        .route("/api/sessions/{id}", get(get_session))
        .route("/api/sessions/{id}/state", post(update_state))
        .route("/api/sessions/{id}/events", post(add_event))
        .route("/api/sessions/{id}/metrics", post(add_metric))
        .route("/api/sessions/{id}/heartbeat", post(heartbeat))
        .route("/api/sessions/{id}/end", post(end_session))
        .route("/api/sessions/{id}/crash", post(crash_session))
        .route("/api/data/sessions", get(list_sessions))
        .route_layer(middleware::from_fn_with_state(state.clone(), crate::auth::require_api_key));

    Router::new()
        .route("/health", get(health))
        .merge(protected)
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

impl IntoResponse for StoreError {
    fn into_response(self) -> Response {
        let status = match &self {
            StoreError::SessionNotFound { .. } => StatusCode::NOT_FOUND,
            StoreError::Backend { .. } | StoreError::Serde { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if matches!(status, StatusCode::INTERNAL_SERVER_ERROR) {
            warn!(error = %self, "request failed");
        }
        (status, self.to_string()).into_response()
    }
}

fn decode_body<T: serde::de::DeserializeOwned>(headers: &HeaderMap, body: &Bytes) -> Result<T, Response> {
    let raw = maybe_decompress(headers, body).map_err(|e| {
        (StatusCode::BAD_REQUEST, format!("could not decompress body: {e}")).into_response()
    })?;
    serde_json::from_slice(&raw)
        .map_err(|e| (StatusCode::BAD_REQUEST, format!("malformed JSON body: {e}")).into_response())
}

#[derive(Debug, Deserialize)]
struct CreateSessionRequest {
    product: String,
    version: String,
    #[serde(default)]
    machine_id: Option<String>,
    #[serde(default)]
    hostname: Option<String>,
}

async fn create_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, Response> {
    let req: CreateSessionRequest = decode_body(&headers, &body)?;
    let session = state
        .store
        .create(req.product, req.version, req.machine_id, req.hostname)
        .await
        .map_err(IntoResponse::into_response)?;
    let snapshot = session.snapshot_at(chrono::Utc::now(), state.config.heartbeat_timeout());
    Ok((StatusCode::CREATED, Json(snapshot)).into_response())
}

async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, Response> {
    let snapshot = state.store.get(&id).map_err(IntoResponse::into_response)?;
    Ok(Json(snapshot).into_response())
}

async fn update_state(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, Response> {
    let patch: Value = decode_body(&headers, &body)?;
    state
        .store
        .update_state(&id, &patch)
        .await
        .map_err(IntoResponse::into_response)?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

async fn add_event(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, Response> {
    let event: EventRecord = decode_body(&headers, &body)?;
    state
        .store
        .add_event(&id, event)
        .await
        .map_err(IntoResponse::into_response)?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

async fn add_metric(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, Response> {
    let metric: MetricRecord = decode_body(&headers, &body)?;
    state
        .store
        .add_metric(&id, metric)
        .await
        .map_err(IntoResponse::into_response)?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

async fn heartbeat(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, Response> {
    state
        .store
        .heartbeat(&id)
        .await
        .map_err(IntoResponse::into_response)?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

async fn end_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, Response> {
    state.store.end(&id).await.map_err(IntoResponse::into_response)?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

#[derive(Debug, Deserialize)]
struct CrashRequest {
    #[serde(default = "default_crash_reason")]
    reason: String,
}

fn default_crash_reason() -> String {
    "reported_by_aggregator".to_string()
}

async fn crash_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, Response> {
    let req: CrashRequest = if body.is_empty() {
        CrashRequest {
            reason: default_crash_reason(),
        }
    } else {
        decode_body(&headers, &body)?
    };
    state
        .store
        .crash(&id, &req.reason)
        .await
        .map_err(IntoResponse::into_response)?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

async fn list_sessions(State(state): State<AppState>) -> Response {
    Json(state.store.list()).into_response()
}
