//! Prometheus metrics for the gateway.
//!
//! Counters and histograms are updated by an HTTP middleware; pool gauges are
//! refreshed from the pool's health snapshot on every scrape.

use axum::body::Body;
use axum::extract::State;
use axum::http::{Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use prometheus::{
    Encoder, Gauge, GaugeVec, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry,
    TextEncoder, TEXT_FORMAT,
};
use std::sync::Arc;
use std::time::Instant;

use crate::api::handlers::AppState;
use crate::api::GatewayError;
use crate::pool::PeerHealth;

const NAMESPACE: &str = "neofs_http_gw";

/// All Prometheus metrics of the gateway.
#[derive(Clone)]
pub struct Metrics {
    pub registry: Registry,

    // -- Process & Build --
    pub process_start_time_seconds: Gauge,
    pub build_info: GaugeVec,

    // -- HTTP Requests --
    pub http_requests_total: IntCounterVec,
    pub http_request_duration_seconds: HistogramVec,

    // -- Pool --
    pub pool_node_healthy: GaugeVec,
    pub pool_node_weight: GaugeVec,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some(NAMESPACE.to_string()), None)?;

        let process_start_time_seconds =
            Gauge::new("process_start_time_seconds", "Start time of the process")?;
        registry.register(Box::new(process_start_time_seconds.clone()))?;
        process_start_time_seconds.set(chrono::Utc::now().timestamp() as f64);

        let build_info = GaugeVec::new(Opts::new("build_info", "Build information"), &["version"])?;
        registry.register(Box::new(build_info.clone()))?;
        build_info
            .with_label_values(&[env!("CARGO_PKG_VERSION")])
            .set(1.0);

        let http_requests_total = IntCounterVec::new(
            Opts::new(
                "http_requests_total",
                "Total HTTP requests by method, status, and operation",
            ),
            &["method", "status", "operation"],
        )?;
        registry.register(Box::new(http_requests_total.clone()))?;

        let http_request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "http_request_duration_seconds",
                "HTTP request duration in seconds",
            ),
            &["method", "operation"],
        )?;
        registry.register(Box::new(http_request_duration_seconds.clone()))?;

        let pool_node_healthy = GaugeVec::new(
            Opts::new("pool_node_healthy", "Storage peer health (1 healthy, 0 not)"),
            &["address"],
        )?;
        registry.register(Box::new(pool_node_healthy.clone()))?;

        let pool_node_weight = GaugeVec::new(
            Opts::new("pool_node_weight", "Normalized storage peer weight"),
            &["address"],
        )?;
        registry.register(Box::new(pool_node_weight.clone()))?;

        Ok(Metrics {
            registry,
            process_start_time_seconds,
            build_info,
            http_requests_total,
            http_request_duration_seconds,
            pool_node_healthy,
            pool_node_weight,
        })
    }

    /// Refresh the per-peer gauges.
    pub fn observe_pool(&self, peers: &[PeerHealth]) {
        for peer in peers {
            let healthy = if peer.healthy { 1.0 } else { 0.0 };
            self.pool_node_healthy
                .with_label_values(&[&peer.address])
                .set(healthy);
            self.pool_node_weight
                .with_label_values(&[&peer.address])
                .set(peer.weight);
        }
    }
}

/// Classify a gateway request into a bounded operation label.
pub fn classify_operation(method: &str, path: &str) -> &'static str {
    let first = path.split('/').find(|s| !s.is_empty()).unwrap_or_default();

    match (method, first) {
        ("POST", "upload") => "upload",
        ("GET", "get") => "get",
        ("GET", "get_by_attribute") => "get_by_attribute",
        ("GET", "metrics") => "metrics",
        ("GET", "-") if path.starts_with("/-/ready") => "ready",
        ("GET", "-") if path.starts_with("/-/healthy") => "healthy",
        _ => "unknown",
    }
}

/// Axum middleware that records HTTP request metrics.
pub async fn http_metrics_middleware(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let metrics = match &state.metrics {
        Some(m) => m,
        None => return next.run(request).await,
    };

    let method = request.method().to_string();
    let operation = classify_operation(&method, request.uri().path());

    let start = Instant::now();
    let response = next.run(request).await;
    let duration = start.elapsed().as_secs_f64();

    let status = response.status().as_u16().to_string();

    metrics
        .http_requests_total
        .with_label_values(&[&method, &status, operation])
        .inc();
    metrics
        .http_request_duration_seconds
        .with_label_values(&[&method, operation])
        .observe(duration);

    response
}

/// Handler for GET /metrics/ - returns Prometheus text format.
pub async fn metrics_handler(State(state): State<Arc<AppState>>) -> Response {
    let metrics = match &state.metrics {
        Some(m) => m,
        None => {
            return (StatusCode::NOT_FOUND, "metrics not enabled\n").into_response();
        }
    };

    metrics.observe_pool(&state.pool.health());

    let encoder = TextEncoder::new();
    let metric_families = metrics.registry.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return GatewayError::Unavailable(format!("failed to encode metrics: {}", e))
            .into_response();
    }

    (StatusCode::OK, [("content-type", TEXT_FORMAT)], buffer).into_response()
}
