//! Custom Axum extractors for path validation

use super::errors::GatewayError;
use super::handlers::AppState;
use crate::types::ContainerId;
use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts, Path},
    http::request::Parts,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Container referenced by the `cid` path segment.
///
/// The segment is either a container ID or a container name. Names go
/// through the resolver chain. Both failing yields `400 wrong container id`.
///
/// # Example
/// ```ignore
/// async fn upload(
///     State(state): State<Arc<AppState>>,
///     ContainerRef(cid): ContainerRef,
/// ) -> Result<Response, GatewayError> {
///     // cid is a parsed container ID here
/// }
/// ```
#[derive(Debug, Clone, Copy)]
pub struct ContainerRef(pub ContainerId);

#[async_trait]
impl<S> FromRequestParts<S> for ContainerRef
where
    S: Send + Sync,
    Arc<AppState>: FromRef<S>,
{
    type Rejection = GatewayError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path(params): Path<HashMap<String, String>> = Path::from_request_parts(parts, state)
            .await
            .map_err(|_| GatewayError::bad_request("wrong container id"))?;
        let raw = params
            .get("cid")
            .ok_or_else(|| GatewayError::bad_request("wrong container id"))?;

        if let Ok(cid) = raw.parse::<ContainerId>() {
            return Ok(ContainerRef(cid));
        }

        let app_state = Arc::<AppState>::from_ref(state);
        match app_state.resolver.resolve(raw).await {
            Ok(cid) => Ok(ContainerRef(cid)),
            Err(err) => {
                debug!("could not resolve container {}: {}", raw, err);
                Err(GatewayError::bad_request("wrong container id"))
            }
        }
    }
}
