//! Prometheus Metrics for the HTTP Layer
//!
//! Request metrics are registered on the same [`Registry`] as the engine's
//! [`SyncMetrics`](promosync_core::SyncMetrics); `/metrics` renders it.

use axum::{extract::State, http::StatusCode, response::IntoResponse};
use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// HTTP request latency buckets (seconds)
/// Covers: 1ms, 5ms, 10ms, 25ms, 50ms, 100ms, 250ms, 500ms, 1s, 2.5s, 5s, 10s
const HTTP_LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0, 2.5, 5.0, 10.0,
];

/// HTTP metrics handle.
#[derive(Clone)]
pub struct ApiMetrics {
    /// HTTP request counter - labels: method, path, status
    pub http_requests_total: IntCounterVec,

    /// HTTP request duration histogram - labels: method, path
    pub http_request_duration_seconds: HistogramVec,
}

impl ApiMetrics {
    /// Create and register the HTTP metrics with `registry`.
    pub fn new(registry: &Registry) -> ApiResult<Self> {
        let http_requests_total = IntCounterVec::new(
            Opts::new(
                "promosync_http_requests_total",
                "Total number of HTTP requests",
            ),
            &["method", "path", "status"],
        )
        .map_err(|e| ApiError::internal_error(format!("Failed to create http_requests_total: {}", e)))?;

        let http_request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "promosync_http_request_duration_seconds",
                "HTTP request duration in seconds",
            )
            .buckets(HTTP_LATENCY_BUCKETS.to_vec()),
            &["method", "path"],
        )
        .map_err(|e| {
            ApiError::internal_error(format!("Failed to create http_request_duration_seconds: {}", e))
        })?;

        registry
            .register(Box::new(http_requests_total.clone()))
            .map_err(|e| ApiError::internal_error(format!("Failed to register http_requests_total: {}", e)))?;
        registry
            .register(Box::new(http_request_duration_seconds.clone()))
            .map_err(|e| {
                ApiError::internal_error(format!(
                    "Failed to register http_request_duration_seconds: {}",
                    e
                ))
            })?;

        Ok(Self {
            http_requests_total,
            http_request_duration_seconds,
        })
    }

    /// Record an HTTP request.
    pub fn record_http_request(&self, method: &str, path: &str, status: u16, duration_secs: f64) {
        let status_str = status.to_string();
        self.http_requests_total
            .with_label_values(&[method, path, &status_str])
            .inc();
        self.http_request_duration_seconds
            .with_label_values(&[method, path])
            .observe(duration_secs);
    }
}

/// Handler for GET /metrics.
///
/// Returns Prometheus text format metrics.
pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = state.registry.gather();
    let mut buffer = Vec::new();

    match encoder.encode(&metric_families, &mut buffer) {
        Ok(_) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [("content-type", "text/plain")],
                format!("Failed to encode metrics: {}", e).into_bytes(),
            )
        }
    }
}
