//! The Aggregator's local HTTP surface (spec.md §6, default port 8079).
//! Every handler here completes without issuing an outbound call — writes
//! only touch buffers guarded by the session table (spec.md §5).

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use datacat_common::{EventRecord, ExceptionInfo, MetricType};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::aggregator::Aggregator;
use crate::error::AggregatorError;
use crate::metrics::MetricSample;

impl IntoResponse for AggregatorError {
    fn into_response(self) -> Response {
        let status = match &self {
            AggregatorError::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
            AggregatorError::SessionNotFound { .. } => StatusCode::NOT_FOUND,
            AggregatorError::Transport { .. } => StatusCode::BAD_GATEWAY,
        };
        (status, self.to_string()).into_response()
    }
}

pub fn router(aggregator: Arc<Aggregator>) -> Router {
    Router::new()
        .route("/register", post(register))
        .route("/state", post(state))
        .route("/event", post(event))
        .route("/metric", post(metric))
        .route("/heartbeat", post(heartbeat))
        .route("/pause_heartbeat", post(pause_heartbeat))
        .route("/resume_heartbeat", post(resume_heartbeat))
        .route("/end", post(end))
        .route("/session", get(get_session))
        .route("/sessions", get(list_sessions))
        .route("/health", get(health))
        .with_state(aggregator)
}

#[derive(Debug, Deserialize)]
struct RegisterRequest {
    product: String,
    version: String,
    #[serde(default)]
    parent_pid: Option<u32>,
}

async fn register(
    State(aggregator): State<Arc<Aggregator>>,
    Json(req): Json<RegisterRequest>,
) -> Result<Response, Response> {
    let session_id = aggregator
        .register(req.product, req.version, req.parent_pid)
        .await
        .map_err(IntoResponse::into_response)?;
    Ok((StatusCode::OK, Json(json!({"session_id": session_id}))).into_response())
}

#[derive(Debug, Deserialize)]
struct StateRequest {
    session_id: String,
    state: Value,
}

async fn state(
    State(aggregator): State<Arc<Aggregator>>,
    Json(req): Json<StateRequest>,
) -> Result<Response, Response> {
    aggregator
        .update_state(&req.session_id, req.state)
        .await
        .map_err(IntoResponse::into_response)?;
    Ok(ok_response())
}

#[derive(Debug, Deserialize)]
struct EventRequest {
    session_id: String,
    name: String,
    #[serde(default)]
    level: String,
    #[serde(default)]
    category: String,
    #[serde(default)]
    group: Option<String>,
    #[serde(default)]
    labels: BTreeMap<String, String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: Value,
    #[serde(default)]
    exception_type: Option<String>,
    #[serde(default)]
    exception_msg: Option<String>,
    #[serde(default)]
    stacktrace: Vec<String>,
    #[serde(default)]
    source_file: Option<String>,
    #[serde(default)]
    source_line: Option<u32>,
    #[serde(default)]
    source_function: Option<String>,
}

async fn event(
    State(aggregator): State<Arc<Aggregator>>,
    Json(req): Json<EventRequest>,
) -> Result<Response, Response> {
    let exception = req.exception_type.map(|exception_type| ExceptionInfo {
        exception_type,
        message: req.exception_msg.unwrap_or_default(),
        stacktrace: req.stacktrace,
        source_file: req.source_file,
        source_line: req.source_line,
        source_function: req.source_function,
    });
    let record = EventRecord {
        timestamp: chrono::Utc::now(),
        name: req.name,
        level: req.level,
        category: req.category,
        group: req.group,
        labels: req.labels,
        message: req.message,
        data: req.data,
        exception,
    };
    aggregator
        .add_event(&req.session_id, record)
        .await
        .map_err(IntoResponse::into_response)?;
    Ok(ok_response())
}

#[derive(Debug, Deserialize)]
struct MetricRequest {
    session_id: String,
    name: String,
    #[serde(rename = "type")]
    metric_type: MetricType,
    value: f64,
    #[serde(default)]
    delta: Option<f64>,
    #[serde(default)]
    tags: BTreeMap<String, String>,
    #[serde(default)]
    unit: Option<String>,
    #[serde(default)]
    buckets: Option<Vec<f64>>,
}

async fn metric(
    State(aggregator): State<Arc<Aggregator>>,
    Json(req): Json<MetricRequest>,
) -> Result<Response, Response> {
    let sample = MetricSample {
        name: req.name,
        metric_type: req.metric_type,
        value: req.value,
        delta: req.delta,
        tags: req.tags,
        unit: req.unit,
        buckets: req.buckets,
    };
    aggregator
        .add_metric(&req.session_id, sample)
        .await
        .map_err(IntoResponse::into_response)?;
    Ok(ok_response())
}

#[derive(Debug, Deserialize)]
struct SessionIdOnly {
    session_id: String,
}

async fn heartbeat(
    State(aggregator): State<Arc<Aggregator>>,
    Json(req): Json<SessionIdOnly>,
) -> Result<Response, Response> {
    aggregator.heartbeat(&req.session_id).await.map_err(IntoResponse::into_response)?;
    Ok(ok_response())
}

async fn pause_heartbeat(
    State(aggregator): State<Arc<Aggregator>>,
    Json(req): Json<SessionIdOnly>,
) -> Result<Response, Response> {
    aggregator
        .pause_heartbeat(&req.session_id)
        .await
        .map_err(IntoResponse::into_response)?;
    Ok(ok_response())
}

async fn resume_heartbeat(
    State(aggregator): State<Arc<Aggregator>>,
    Json(req): Json<SessionIdOnly>,
) -> Result<Response, Response> {
    aggregator
        .resume_heartbeat(&req.session_id)
        .await
        .map_err(IntoResponse::into_response)?;
    Ok(ok_response())
}

async fn end(
    State(aggregator): State<Arc<Aggregator>>,
    Json(req): Json<SessionIdOnly>,
) -> Result<Response, Response> {
    aggregator.end(&req.session_id).await.map_err(IntoResponse::into_response)?;
    Ok(ok_response())
}

#[derive(Debug, Deserialize)]
struct SessionQuery {
    session_id: String,
}

async fn get_session(
    State(aggregator): State<Arc<Aggregator>>,
    Query(query): Query<SessionQuery>,
) -> Result<Response, Response> {
    let snapshot = aggregator
        .get_session(&query.session_id)
        .await
        .map_err(IntoResponse::into_response)?;
    Ok(Json(snapshot).into_response())
}

async fn list_sessions(State(aggregator): State<Arc<Aggregator>>) -> Response {
    Json(aggregator.list_sessions().await).into_response()
}

async fn health(State(aggregator): State<Arc<Aggregator>>) -> Response {
    Json(json!({"status": "ok", "sessions": aggregator.session_count()})).into_response()
}

fn ok_response() -> Response {
    Json(json!({"status": "ok"})).into_response()
}
