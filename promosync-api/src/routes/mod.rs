//! Route assembly.

pub mod health;
pub mod promotions;

use axum::{middleware, routing::get, Router};
use tower_http::trace::TraceLayer;

use crate::state::AppState;
use crate::telemetry::{metrics_handler, observability_middleware};

/// Build the full application router.
pub fn create_router(state: AppState) -> Router {
    let metrics = state.metrics.clone();

    Router::new()
        .merge(promotions::create_router())
        .nest("/health", health::create_router())
        .route("/metrics", get(metrics_handler))
        .route_layer(middleware::from_fn_with_state(
            metrics,
            observability_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
