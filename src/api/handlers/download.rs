//! Object download handlers.

use super::{call_options, AppState};
use crate::api::attributes::project_attributes;
use crate::api::bearer::BearerContext;
use crate::api::errors::{error_chain, GatewayError};
use crate::api::extractors::ContainerRef;
use crate::api::sniff::sniff_stream;
use crate::types::{Address, ContainerId, ObjectId, SearchFilter};
use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::Response;
use axum::Extension;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::io::{ReaderStream, StreamReader};
use tracing::{debug, error, info, instrument};

/// Query parameters for downloads
#[derive(Debug, Deserialize, Default)]
pub struct DownloadQuery {
    /// Serve as an attachment instead of inline.
    pub download: Option<String>,
}

impl DownloadQuery {
    fn as_attachment(&self) -> bool {
        self.download.as_deref().is_some_and(|v| {
            ["1", "t", "true", "y", "yes"]
                .iter()
                .any(|accepted| v.eq_ignore_ascii_case(accepted))
        })
    }
}

/// Last element of a slash-separated path.
fn base_name(path: &str) -> &str {
    if path.is_empty() {
        return ".";
    }
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        return "/";
    }
    trimmed.rsplit('/').next().unwrap_or(trimmed)
}

fn header_value(s: &str) -> HeaderValue {
    HeaderValue::from_str(s).unwrap_or_else(|_| HeaderValue::from_static(""))
}

/// Download handler
/// GET /get/{cid}/{oid}
#[instrument(skip_all, fields(cid = %cid))]
pub async fn download_by_address(
    State(state): State<Arc<AppState>>,
    ContainerRef(cid): ContainerRef,
    Path(params): Path<HashMap<String, String>>,
    Query(query): Query<DownloadQuery>,
    Extension(bearer): Extension<BearerContext>,
) -> Result<Response, GatewayError> {
    let oid: ObjectId = params
        .get("oid")
        .and_then(|raw| raw.parse().ok())
        .ok_or_else(|| GatewayError::bad_request("wrong object id"))?;

    receive_object(&state, Address::new(cid, oid), &query, &bearer).await
}

/// Download-by-attribute handler
/// GET /get_by_attribute/{cid}/{attr_key}/{attr_val...}
#[instrument(skip_all, fields(cid = %cid))]
pub async fn download_by_attribute(
    State(state): State<Arc<AppState>>,
    ContainerRef(cid): ContainerRef,
    Path(params): Path<HashMap<String, String>>,
    Query(query): Query<DownloadQuery>,
    Extension(bearer): Extension<BearerContext>,
) -> Result<Response, GatewayError> {
    let key = params.get("attr_key").cloned().unwrap_or_default();
    let raw_value = params.get("attr_val").map(String::as_str).unwrap_or_default();
    let value = raw_value.strip_prefix('/').unwrap_or(raw_value).to_string();

    let oid = search_object(&state, cid, key, value, &bearer).await?;
    receive_object(&state, Address::new(cid, oid), &query, &bearer).await
}

async fn search_object(
    state: &AppState,
    cid: ContainerId,
    key: String,
    value: String,
    bearer: &BearerContext,
) -> Result<ObjectId, GatewayError> {
    let filters = [
        SearchFilter::Root,
        SearchFilter::AttributeEquals {
            key: key.clone(),
            value: value.clone(),
        },
    ];

    let conn = state.pool.connection_artifacts()?;
    let options = call_options(&conn, bearer.token());
    let ids = conn
        .client
        .search_objects(cid, &filters, &options)
        .await
        .map_err(|err| {
            error!("could not search for objects: {}", err);
            GatewayError::bad_request(format!(
                "could not search for objects: {}",
                error_chain(&err)
            ))
        })?;

    match ids.as_slice() {
        [] => {
            debug!("no objects found for {}={}", key, value);
            Err(GatewayError::NotFound("object not found".to_string()))
        }
        [first, rest @ ..] => {
            if !rest.is_empty() {
                debug!(
                    "found {} objects for {}={}, using the first one",
                    ids.len(),
                    key,
                    value
                );
            }
            Ok(*first)
        }
    }
}

/// Fetch an object and stream it back with its attribute headers.
async fn receive_object(
    state: &AppState,
    address: Address,
    query: &DownloadQuery,
    bearer: &BearerContext,
) -> Result<Response, GatewayError> {
    let started = Instant::now();
    let conn = state.pool.connection_artifacts()?;
    let options = call_options(&conn, bearer.token());

    let reader = conn
        .client
        .get_object(address, &options)
        .await
        .map_err(|err| {
            error!(oid = %address.object, elapsed = ?started.elapsed(), "could not receive object: {}", err);
            GatewayError::upstream("could not receive object", &err)
        })?;

    let info = reader.info;
    let projection = project_attributes(&info.attributes);

    let (content_type, payload) = match projection.content_type {
        Some(content_type) => (content_type, reader.payload),
        None => {
            let (detected, payload) = sniff_stream(reader.payload).await.map_err(|err| {
                error!(oid = %address.object, "could not read object payload: {}", err);
                GatewayError::upstream("could not receive object", &err)
            })?;
            (detected.to_string(), payload)
        }
    };

    let disposition = if query.as_attachment() {
        "attachment"
    } else {
        "inline"
    };
    let file_name = projection.file_name.as_deref().unwrap_or_default();

    let mut builder = Response::builder().status(StatusCode::OK);
    if let Some(headers) = builder.headers_mut() {
        headers.extend(projection.headers);
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(info.payload_size));
        headers.insert("x-object-id", header_value(&info.id.to_string()));
        headers.insert("x-owner-id", header_value(&info.owner.to_string()));
        headers.insert("x-container-id", header_value(&info.container.to_string()));
        headers.insert(header::CONTENT_TYPE, header_value(&content_type));
        headers.insert(
            header::CONTENT_DISPOSITION,
            header_value(&format!("{}; filename={}", disposition, base_name(file_name))),
        );
        if let Some(last_modified) = &projection.last_modified {
            headers.insert(header::LAST_MODIFIED, header_value(last_modified));
        }
    }

    info!(
        oid = %address.object,
        size = info.payload_size,
        elapsed = ?started.elapsed(),
        "object received"
    );

    let body = ReaderStream::with_capacity(
        StreamReader::new(payload),
        state.settings.write_buffer_size.max(1),
    );
    builder
        .body(Body::from_stream(body))
        .map_err(|e| GatewayError::bad_request(format!("could not build response: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_name() {
        assert_eq!(base_name("cat.jpg"), "cat.jpg");
        assert_eq!(base_name("zipfolder/name2.txt"), "name2.txt");
        assert_eq!(base_name("dir/"), "dir");
        assert_eq!(base_name(""), ".");
        assert_eq!(base_name("///"), "/");
    }

    #[test]
    fn test_download_flag() {
        for accepted in ["1", "t", "true", "TRUE", "y", "yes"] {
            let query = DownloadQuery {
                download: Some(accepted.to_string()),
            };
            assert!(query.as_attachment(), "{}", accepted);
        }
        for rejected in ["0", "false", "no", ""] {
            let query = DownloadQuery {
                download: Some(rejected.to_string()),
            };
            assert!(!query.as_attachment(), "{}", rejected);
        }
        assert!(!DownloadQuery::default().as_attachment());
    }
}
