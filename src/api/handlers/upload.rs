//! Multipart upload handler.

use super::{call_options, AppState};
use crate::api::attributes::{
    add_default_attributes, filter_headers, needs_expiration, prepare_expiration,
    to_attribute_list,
};
use crate::api::bearer::BearerContext;
use crate::api::errors::GatewayError;
use crate::api::extractors::ContainerRef;
use crate::client::PayloadStream;
use crate::types::ObjectHeader;
use axum::body::Body;
use axum::extract::State;
use axum::http::{header, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Extension;
use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument};

/// Body of a successful upload response.
#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub object_id: String,
    pub container_id: String,
}

type BodyStream = BoxStream<'static, Result<Bytes, axum::Error>>;

/// Request body shared between the multipart parser and the final drain.
#[derive(Clone)]
struct SharedBody(Arc<Mutex<BodyStream>>);

impl SharedBody {
    fn new(body: BodyStream) -> Self {
        Self(Arc::new(Mutex::new(body)))
    }

    /// A stream reading from the shared body.
    fn stream(&self) -> BodyStream {
        stream::unfold(self.0.clone(), |body| async move {
            let next = body.lock().await.next().await;
            next.map(|chunk| (chunk, body))
        })
        .boxed()
    }

    /// Read the body to EOF, discarding the data.
    async fn drain(&self) -> u64 {
        let mut body = self.0.lock().await;
        let mut drained = 0u64;
        while let Some(chunk) = body.next().await {
            match chunk {
                Ok(chunk) => drained += chunk.len() as u64,
                Err(err) => {
                    debug!("could not drain request body: {}", err);
                    break;
                }
            }
        }
        drained
    }
}

/// Skip to the first part that carries a form name and a file name.
async fn fetch_file_part(
    multipart: &mut multer::Multipart<'static>,
) -> Result<(String, multer::Field<'static>), GatewayError> {
    let receive_error =
        |reason: String| GatewayError::bad_request(format!("could not receive multipart/form: {}", reason));

    loop {
        let field = multipart
            .next_field()
            .await
            .map_err(|e| receive_error(e.to_string()))?
            .ok_or_else(|| receive_error("no file part found".to_string()))?;

        let form_name = field.name().unwrap_or_default().to_string();
        if form_name.is_empty() {
            debug!("ignore part, empty form name");
            continue;
        }
        let file_name = field.file_name().unwrap_or_default().to_string();
        if file_name.is_empty() {
            debug!("ignore part, empty filename (form {})", form_name);
            continue;
        }
        return Ok((file_name, field));
    }
}

/// Upload handler
/// POST /upload/{cid} - store the first file part of a multipart form
#[instrument(skip_all, fields(cid = %cid))]
pub async fn upload(
    State(state): State<Arc<AppState>>,
    ContainerRef(cid): ContainerRef,
    Extension(bearer): Extension<BearerContext>,
    request: Request<Body>,
) -> Result<Response, GatewayError> {
    let started = Instant::now();
    let (parts, body) = request.into_parts();

    let content_type = parts
        .headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let boundary = multer::parse_boundary(content_type).map_err(|e| {
        GatewayError::bad_request(format!("could not receive multipart/form: {}", e))
    })?;

    let body: BodyStream = if state.settings.stream_request_body {
        body.into_data_stream().boxed()
    } else {
        let buffered = axum::body::to_bytes(body, state.settings.max_request_body_size)
            .await
            .map_err(|e| {
                GatewayError::bad_request(format!("could not read request body: {}", e))
            })?;
        stream::once(async move { Ok(buffered) }).boxed()
    };
    let body = SharedBody::new(body);

    let mut multipart = multer::Multipart::new(body.stream(), boundary);
    let (file_name, field) = fetch_file_part(&mut multipart).await?;
    debug!("uploading part {}", file_name);

    let mut attributes = filter_headers(&parts.headers).map_err(|err| {
        error!("could not process headers: {}", err);
        GatewayError::bad_request(err.to_string())
    })?;

    let now = chrono::Utc::now();
    if needs_expiration(&attributes) {
        let network = state.pool.network_info().await?;
        prepare_expiration(&mut attributes, &network, now).map_err(|err| {
            error!("could not prepare expiration header: {}", err);
            GatewayError::bad_request(format!("could not prepare expiration header: {}", err))
        })?;
    }
    add_default_attributes(
        &mut attributes,
        &file_name,
        state.settings.use_default_timestamp,
        now,
    );

    let owner = bearer
        .token()
        .map(|token| token.issuer)
        .unwrap_or_else(|| state.pool.owner());
    let object_header = ObjectHeader {
        container: cid,
        owner,
        attributes: to_attribute_list(attributes),
    };

    let payload: PayloadStream = field
        .map(|chunk| chunk.map_err(std::io::Error::other))
        .boxed();

    let conn = state.pool.connection_artifacts()?;
    let options = call_options(&conn, bearer.token());
    let oid = conn
        .client
        .put_object(object_header, payload, &options)
        .await
        .map_err(|err| {
            error!(
                elapsed = ?started.elapsed(),
                "could not store file in neofs: {}", err
            );
            GatewayError::upstream("could not store file in neofs", &err)
        })?;

    drop(multipart);
    let drained = body.drain().await;
    if drained > 0 {
        debug!("drained {} trailing body bytes", drained);
    }

    info!(oid = %oid, elapsed = ?started.elapsed(), "object uploaded");

    let response = UploadResponse {
        object_id: oid.to_string(),
        container_id: cid.to_string(),
    };
    let mut json = serde_json::to_string_pretty(&response).map_err(|e| {
        GatewayError::bad_request(format!("could not encode response: {}", e))
    })?;
    json.push('\n');

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/json; charset=UTF-8")],
        json,
    )
        .into_response())
}
