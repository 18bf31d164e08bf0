//! HTTP API: route table, middleware and request handlers

pub mod attributes;
pub mod bearer;
mod errors;
mod extractors;
pub mod handlers;
pub mod sniff;

pub use errors::{error_chain, root_cause, GatewayError};
pub use extractors::ContainerRef;

use crate::metrics::{http_metrics_middleware, metrics_handler};
use axum::extract::{OriginalUri, Request};
use axum::http::{Method, StatusCode};
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use handlers::{download_by_address, download_by_attribute, healthy, ready, upload, AppState};
use std::sync::Arc;
use std::time::Duration;
use tower_http::timeout::{RequestBodyTimeoutLayer, TimeoutLayer};
use tower_http::trace::TraceLayer;
use tracing::info_span;

/// Router construction options.
#[derive(Debug, Clone)]
pub struct RouterOptions {
    /// Serve `/metrics/`.
    pub metrics: bool,
    /// Bound on reading a request body.
    pub read_timeout: Duration,
    /// Bound on producing a response.
    pub write_timeout: Duration,
}

impl Default for RouterOptions {
    fn default() -> Self {
        Self {
            metrics: false,
            read_timeout: Duration::from_secs(600),
            write_timeout: Duration::from_secs(300),
        }
    }
}

/// Redirect to the same path with its trailing slash toggled.
async fn redirect_trailing_slash(method: Method, OriginalUri(uri): OriginalUri) -> Response {
    let path = uri.path();
    let mut target = match path.strip_suffix('/') {
        Some(stripped) => stripped.to_string(),
        None => format!("{}/", path),
    };
    if let Some(query) = uri.query() {
        target.push('?');
        target.push_str(query);
    }
    let status = if method == Method::GET || method == Method::HEAD {
        StatusCode::MOVED_PERMANENTLY
    } else {
        StatusCode::PERMANENT_REDIRECT
    };
    (status, [("location", target)]).into_response()
}

/// Build the gateway router.
///
/// Routes:
///   POST /upload/{cid}                              - store a multipart file
///   GET  /get/{cid}/{oid}                           - fetch by address
///   GET  /get_by_attribute/{cid}/{key}/{value...}   - fetch by attribute
///   GET  /-/ready/, /-/healthy/                     - health checks
///   GET  /metrics/                                  - when enabled
///
/// Each route also answers on its trailing-slash twin with a redirect.
pub fn router(state: Arc<AppState>, options: &RouterOptions) -> Router {
    let objects = Router::new()
        .route("/upload/:cid", post(upload))
        .route("/get/:cid/:oid", get(download_by_address))
        .route(
            "/get_by_attribute/:cid/:attr_key/*attr_val",
            get(download_by_attribute),
        )
        .route_layer(middleware::from_fn(bearer::bearer_middleware));

    let mut app = Router::new()
        .merge(objects)
        .route("/upload/:cid/", post(redirect_trailing_slash))
        .route("/get/:cid/:oid/", get(redirect_trailing_slash))
        .route("/-/ready/", get(ready))
        .route("/-/ready", get(redirect_trailing_slash))
        .route("/-/healthy/", get(healthy))
        .route("/-/healthy", get(redirect_trailing_slash));

    if options.metrics {
        app = app
            .route("/metrics/", get(metrics_handler))
            .route("/metrics", get(redirect_trailing_slash));
    }

    app.layer(middleware::from_fn_with_state(state.clone(), http_metrics_middleware))
        .layer(RequestBodyTimeoutLayer::new(options.read_timeout))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            options.write_timeout,
        ))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &Request| {
                info_span!(
                    "request",
                    request_id = %uuid::Uuid::new_v4(),
                    method = %request.method(),
                    path = %request.uri().path(),
                )
            }),
        )
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{MemoryDialer, MemoryNetwork};
    use crate::credentials::PrivateKey;
    use crate::pool::{Peer, Pool, PoolConfig};
    use crate::resolver::ResolverChain;
    use axum::body::{to_bytes, Body};
    use handlers::HandlerSettings;
    use tower::ServiceExt;

    async fn test_router(metrics: bool) -> Router {
        let options = RouterOptions {
            metrics,
            ..RouterOptions::default()
        };
        test_router_with(&options).await.0
    }

    async fn test_router_with(options: &RouterOptions) -> (Router, MemoryNetwork) {
        let network = MemoryNetwork::new();
        network.add_node("memory://a");
        let config = PoolConfig {
            peers: vec![Peer::new("memory://a", 1.0)],
            connect_timeout: Duration::from_secs(1),
            request_timeout: Duration::from_secs(1),
            rebalance_interval: Duration::from_secs(60),
            session_expiration_epoch: u64::MAX,
        };
        let pool = Pool::new(
            &config,
            Arc::new(PrivateKey::generate()),
            &MemoryDialer::new(network.clone()),
        )
        .await
        .unwrap();
        let state = Arc::new(AppState {
            pool: Arc::new(pool),
            resolver: ResolverChain::new(Vec::new()),
            settings: HandlerSettings::default(),
            metrics: None,
        });
        (router(state, options), network)
    }

    fn request(method: Method, uri: &str) -> Request {
        Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_redirect_keeps_query() {
        let app = test_router(false).await;
        let response = app
            .oneshot(request(Method::GET, "/get/cid/oid/?download=1"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::MOVED_PERMANENTLY);
        assert_eq!(
            response.headers().get("location").unwrap(),
            "/get/cid/oid?download=1"
        );
    }

    #[tokio::test]
    async fn test_redirect_post_is_permanent() {
        let app = test_router(false).await;
        let response = app
            .oneshot(request(Method::POST, "/upload/cid/"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PERMANENT_REDIRECT);
        assert_eq!(response.headers().get("location").unwrap(), "/upload/cid");
    }

    #[tokio::test]
    async fn test_bearer_checked_on_object_routes_only() {
        let app = test_router(false).await;

        let mut bad = request(Method::GET, "/get/cid/oid");
        bad.headers_mut()
            .insert("authorization", "Bearer !!!".parse().unwrap());
        let response = app.clone().oneshot(bad).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(body.starts_with(b"could not fetch bearer token: "));

        let mut health = request(Method::GET, "/-/healthy/");
        health
            .headers_mut()
            .insert("authorization", "Bearer !!!".parse().unwrap());
        let response = app.oneshot(health).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_metrics_route_toggle() {
        let disabled = test_router(false).await;
        let response = disabled
            .oneshot(request(Method::GET, "/metrics/"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let enabled = test_router(true).await;
        let response = enabled
            .oneshot(request(Method::GET, "/metrics"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::MOVED_PERMANENTLY);
    }

    #[tokio::test]
    async fn test_slow_response_times_out() {
        let options = RouterOptions {
            write_timeout: Duration::from_millis(50),
            ..RouterOptions::default()
        };
        let (app, network) = test_router_with(&options).await;
        let cid = network.create_container("slow");
        let oid = network.seed_object(
            cid,
            crate::types::OwnerId::from_script_hash([1; 20]),
            vec![],
            "late",
        );
        network.set_latency("memory://a", Duration::from_millis(500));

        let response = app
            .oneshot(request(Method::GET, &format!("/get/{}/{}", cid, oid)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);
    }
}
