//! Gateway error types and plain-text responses

use crate::client::{RpcCode, RpcStatus};
use crate::pool::{PoolError, PoolNetworkError};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use std::error::Error as StdError;
use thiserror::Error;

/// Errors surfaced to HTTP clients.
///
/// The display text is the response body (a newline is appended on the wire).
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Unparsable input, malformed multipart, bad headers, bad bearer token,
    /// and upstream failures without a more specific mapping.
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    /// No healthy peer, or an internal collaborator is unavailable.
    #[error("{0}")]
    Unavailable(String),
}

impl GatewayError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        GatewayError::BadRequest(message.into())
    }

    /// Classify an upstream failure.
    ///
    /// The error chain is unwrapped to its root cause. A root RPC status keeps
    /// its own message and maps `NotFound` to 404 and everything else to 400.
    /// A pool without healthy peers maps to 503. Anything else is a 400 with
    /// `context` prepended to the full error chain.
    pub fn upstream(context: &str, err: &(dyn StdError + 'static)) -> Self {
        if let Some(status) = root_cause(err).downcast_ref::<RpcStatus>() {
            return match status.code {
                RpcCode::NotFound => GatewayError::NotFound(status.message.clone()),
                _ => GatewayError::BadRequest(status.message.clone()),
            };
        }
        let message = format!("{}: {}", context, error_chain(err));
        if is_unavailable(err) {
            GatewayError::Unavailable(message)
        } else {
            GatewayError::BadRequest(message)
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::BadRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::NotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = format!("{}\n", self);

        (
            status,
            [("Content-Type", "text/plain; charset=utf-8")],
            body,
        )
            .into_response()
    }
}

/// Innermost error of a `source()` chain.
pub fn root_cause<'a>(err: &'a (dyn StdError + 'static)) -> &'a (dyn StdError + 'static) {
    let mut current = err;
    while let Some(next) = current.source() {
        current = next;
    }
    current
}

/// Every message of a `source()` chain, joined with `": "`.
pub fn error_chain(err: &(dyn StdError + 'static)) -> String {
    let mut message = err.to_string();
    let mut current = err.source();
    while let Some(next) = current {
        message.push_str(": ");
        message.push_str(&next.to_string());
        current = next.source();
    }
    message
}

fn is_unavailable(err: &(dyn StdError + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(pool) = e.downcast_ref::<PoolError>() {
            return matches!(pool, PoolError::NoHealthyPeer | PoolError::Closed);
        }
        current = e.source();
    }
    false
}

impl From<PoolError> for GatewayError {
    fn from(err: PoolError) -> Self {
        GatewayError::upstream("could not get connection", &err)
    }
}

impl From<PoolNetworkError> for GatewayError {
    fn from(err: PoolNetworkError) -> Self {
        match err {
            PoolNetworkError::Pool(err) => err.into(),
            PoolNetworkError::Client(err) => GatewayError::upstream("could not get network info", &err),
        }
    }
}
