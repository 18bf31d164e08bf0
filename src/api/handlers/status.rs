//! Liveness and readiness checks.

use super::AppState;
use crate::api::errors::GatewayError;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use std::sync::Arc;

/// Liveness handler
/// GET /-/healthy/ - the process is serving requests
pub async fn healthy() -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        "OK\n",
    )
        .into_response()
}

/// Readiness handler
/// GET /-/ready/ - at least one storage peer is healthy
pub async fn ready(State(state): State<Arc<AppState>>) -> Result<Response, GatewayError> {
    if !state.pool.has_healthy_peer() {
        return Err(GatewayError::Unavailable("no healthy peer".to_string()));
    }
    Ok(healthy().await)
}
