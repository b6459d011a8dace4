//! Optional static shared-secret authentication (spec.md §6). `/health`
//! never requires it; every other endpoint does when `require_api_key` is
//! set.

use axum::body::Body;
use axum::extract::State;
use axum::http::{Request, StatusCode};
use axum::middleware::Next;
use axum::response::Response;

use crate::AppState;

pub async fn require_api_key(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    if !state.config.require_api_key {
        return Ok(next.run(request).await);
    }
    let Some(expected) = state.config.api_key.as_deref() else {
        return Ok(next.run(request).await);
    };
    let provided = request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    if provided == Some(expected) {
        Ok(next.run(request).await)
    } else {
        Err(StatusCode::UNAUTHORIZED)
    }
}
