//! Axum Middleware for HTTP Request Tracing and Metrics

use axum::{
    extract::{MatchedPath, Request, State},
    middleware::Next,
    response::Response,
};
use std::time::Instant;
use tracing::{info_span, Instrument};

use super::metrics::ApiMetrics;

/// Route template for metric labels, so ids do not explode cardinality.
fn route_label(request: &Request) -> String {
    request
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string())
}

/// Observability middleware: a request span, Prometheus metrics and a
/// completion log line.
pub async fn observability_middleware(
    State(metrics): State<ApiMetrics>,
    request: Request,
    next: Next,
) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let route = route_label(&request);

    let span = info_span!(
        "http_request",
        http.method = %method,
        http.target = %path,
        http.route = %route,
    );
    let response = next.run(request).instrument(span).await;

    let duration = start.elapsed();
    let status = response.status();
    metrics.record_http_request(method.as_str(), &route, status.as_u16(), duration.as_secs_f64());

    tracing::info!(
        method = %method,
        path = %path,
        status = status.as_u16(),
        duration_ms = duration.as_millis() as u64,
        "Request completed"
    );

    response
}
