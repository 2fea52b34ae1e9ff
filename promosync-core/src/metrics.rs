//! Prometheus Metrics Definitions
//!
//! Metrics are registered on a caller-provided [`Registry`] and passed around
//! as a cloneable [`SyncMetrics`] handle.

use crate::error::{SyncError, SyncResult};
use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry};

/// Rebuild cycle duration buckets (seconds)
const REBUILD_DURATION_BUCKETS: &[f64] = &[
    0.010, 0.050, 0.100, 0.250, 0.500, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 300.0,
];

/// Container for engine metrics.
#[derive(Clone)]
pub struct SyncMetrics {
    /// Input lines loaded into the primary store
    pub csv_processed_lines: IntCounter,

    /// Store operations - labels: operation
    pub database_operations: IntCounterVec,

    pub cache_hits: IntCounter,
    pub cache_misses: IntCounter,

    /// Notifications acknowledged by the transport
    pub events_published: IntCounter,

    /// Rebuild cycles - labels: outcome (success/failure)
    pub rebuild_cycles: IntCounterVec,

    pub rebuild_duration_seconds: Histogram,
}

impl SyncMetrics {
    /// Create and register all metrics with `registry`.
    pub fn new(registry: &Registry) -> SyncResult<Self> {
        let csv_processed_lines = IntCounter::new(
            "promosync_csv_processed_lines_total",
            "Total number of input lines loaded into the primary store",
        )
        .map_err(|e| registration_error("csv_processed_lines_total", e))?;

        let database_operations = IntCounterVec::new(
            Opts::new(
                "promosync_database_operations_total",
                "Total number of store operations",
            ),
            &["operation"],
        )
        .map_err(|e| registration_error("database_operations_total", e))?;

        let cache_hits = IntCounter::new("promosync_cache_hits_total", "Total cache hits")
            .map_err(|e| registration_error("cache_hits_total", e))?;

        let cache_misses = IntCounter::new("promosync_cache_misses_total", "Total cache misses")
            .map_err(|e| registration_error("cache_misses_total", e))?;

        let events_published = IntCounter::new(
            "promosync_events_published_total",
            "Total notifications acknowledged by the transport",
        )
        .map_err(|e| registration_error("events_published_total", e))?;

        let rebuild_cycles = IntCounterVec::new(
            Opts::new("promosync_rebuild_cycles_total", "Total rebuild cycles"),
            &["outcome"],
        )
        .map_err(|e| registration_error("rebuild_cycles_total", e))?;

        let rebuild_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "promosync_rebuild_duration_seconds",
                "Replica rebuild duration in seconds",
            )
            .buckets(REBUILD_DURATION_BUCKETS.to_vec()),
        )
        .map_err(|e| registration_error("rebuild_duration_seconds", e))?;

        let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
            Box::new(csv_processed_lines.clone()),
            Box::new(database_operations.clone()),
            Box::new(cache_hits.clone()),
            Box::new(cache_misses.clone()),
            Box::new(events_published.clone()),
            Box::new(rebuild_cycles.clone()),
            Box::new(rebuild_duration_seconds.clone()),
        ];
        for collector in collectors {
            registry
                .register(collector)
                .map_err(|e| registration_error("sync metrics", e))?;
        }

        Ok(Self {
            csv_processed_lines,
            database_operations,
            cache_hits,
            cache_misses,
            events_published,
            rebuild_cycles,
            rebuild_duration_seconds,
        })
    }

    /// Record a store operation.
    pub fn record_db_operation(&self, operation: &str) {
        self.database_operations
            .with_label_values(&[operation])
            .inc();
    }

    /// Record a finished rebuild cycle.
    pub fn record_rebuild(&self, success: bool, duration_secs: f64) {
        let outcome = if success { "success" } else { "failure" };
        self.rebuild_cycles.with_label_values(&[outcome]).inc();
        self.rebuild_duration_seconds.observe(duration_secs);
    }
}

fn registration_error(name: &str, e: prometheus::Error) -> SyncError {
    SyncError::internal(format!("Failed to register {}: {}", name, e))
}
