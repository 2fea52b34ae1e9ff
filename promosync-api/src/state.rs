//! Shared handler state.

use std::sync::Arc;
use std::time::Instant;

use prometheus::Registry;
use promosync_engine::PromotionService;
use promosync_storage::ReplicaStore;

use crate::telemetry::ApiMetrics;

/// State shared by every route.
#[derive(Clone)]
pub struct AppState {
    pub service: PromotionService,
    /// Direct replica handle for health reporting; lookups go through `service`.
    pub replica: Arc<dyn ReplicaStore>,
    pub metrics: ApiMetrics,
    /// Registry holding both engine and HTTP metrics.
    pub registry: Registry,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(
        service: PromotionService,
        replica: Arc<dyn ReplicaStore>,
        metrics: ApiMetrics,
        registry: Registry,
    ) -> Self {
        Self {
            service,
            replica,
            metrics,
            registry,
            started_at: Instant::now(),
        }
    }
}
