//! Replica rebuild coordinator.
//!
//! A cycle copies the whole primary into the shadow slot with striped
//! workers, then promotes the shadow slot in one rotation. Readers only
//! ever see the live slot, so they observe either the previous generation
//! or the new one.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use promosync_core::{RebuildConfig, SyncError, SyncEvent, SyncMetrics, SyncResult};
use promosync_events::EventHandler;
use promosync_storage::{PrimaryStore, ReplicaStore, Slot, SlotAssignment};
use tokio::sync::Mutex;
use tokio::task::JoinSet;

/// Offsets handled by `worker` of `workers`: `worker * batch_size`, then
/// every `workers * batch_size` after it, while below `total`.
pub fn stripe_offsets(
    total: u64,
    batch_size: u64,
    workers: u64,
    worker: u64,
) -> impl Iterator<Item = u64> {
    let batch_size = batch_size.max(1);
    let stride = workers.max(1).saturating_mul(batch_size);
    let start = worker.saturating_mul(batch_size);
    std::iter::successors(Some(start), move |offset| offset.checked_add(stride))
        .take_while(move |offset| *offset < total)
}

/// Outcome of a successful rebuild cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct RebuildReport {
    /// Records copied into the new live slot.
    pub records: u64,
    pub batches: u64,
    pub assignment: SlotAssignment,
    pub elapsed: Duration,
}

/// Rebuilds the replica from the primary and rotates it live.
pub struct RebuildCoordinator {
    primary: Arc<dyn PrimaryStore>,
    replica: Arc<dyn ReplicaStore>,
    batch_size: u64,
    workers: u64,
    metrics: SyncMetrics,
    /// Serializes cycles within this process.
    cycle: Mutex<()>,
}

impl RebuildCoordinator {
    pub fn new(
        primary: Arc<dyn PrimaryStore>,
        replica: Arc<dyn ReplicaStore>,
        config: &RebuildConfig,
        metrics: SyncMetrics,
    ) -> Self {
        Self {
            primary,
            replica,
            batch_size: config.batch_size.max(1),
            workers: config.workers.max(1),
            metrics,
            cycle: Mutex::new(()),
        }
    }

    /// Run one full cycle. On failure the live slot is untouched and the
    /// shadow slot is left dirty until the next cycle clears it.
    pub async fn rebuild(&self) -> SyncResult<RebuildReport> {
        let _cycle = self.cycle.lock().await;
        let started = Instant::now();

        let result = self.run_cycle(started).await;
        self.metrics
            .record_rebuild(result.is_ok(), started.elapsed().as_secs_f64());

        match &result {
            Ok(report) => tracing::info!(
                records = report.records,
                batches = report.batches,
                generation = report.assignment.generation,
                slot = %report.assignment.live,
                elapsed_ms = report.elapsed.as_millis() as u64,
                "Rebuild complete"
            ),
            Err(e) => tracing::error!(error = %e, "Rebuild failed"),
        }
        result
    }

    async fn run_cycle(&self, started: Instant) -> SyncResult<RebuildReport> {
        let expected = self.replica.assignment().await?;
        let shadow = expected.shadow;
        tracing::debug!(assignment = %expected, "Rebuild cycle starting");

        self.replica.clear_slot(shadow).await?;
        self.metrics.record_db_operation("clear");

        let total = self.primary.count().await?;
        self.metrics.record_db_operation("count");

        let copied = Arc::new(AtomicU64::new(0));
        let batches = Arc::new(AtomicU64::new(0));
        let mut workers = JoinSet::new();
        for worker in 0..self.workers {
            workers.spawn(copy_stripe(
                StripeJob {
                    worker,
                    total,
                    batch_size: self.batch_size,
                    workers: self.workers,
                    shadow,
                },
                self.primary.clone(),
                self.replica.clone(),
                self.metrics.clone(),
                copied.clone(),
                batches.clone(),
            ));
        }

        // Join every worker, keeping the first failure by completion order.
        let mut first_error: Option<SyncError> = None;
        while let Some(joined) = workers.join_next().await {
            let outcome = joined
                .map_err(|e| SyncError::internal(format!("rebuild worker failed: {}", e)))
                .and_then(|result| result);
            if let Err(e) = outcome {
                match first_error {
                    None => first_error = Some(e),
                    Some(_) => tracing::debug!(error = %e, "Discarding later rebuild worker error"),
                }
            }
        }
        if let Some(e) = first_error {
            return Err(e);
        }

        let assignment = self.replica.rotate(&expected).await?;
        self.metrics.record_db_operation("rotate");

        if let Err(e) = self.replica.clear_slot(assignment.retired).await {
            tracing::warn!(
                slot = %assignment.retired,
                error = %e,
                "Failed to truncate retired slot; it is cleared again before reuse"
            );
        }

        Ok(RebuildReport {
            records: copied.load(Ordering::SeqCst),
            batches: batches.load(Ordering::SeqCst),
            assignment,
            elapsed: started.elapsed(),
        })
    }
}

#[derive(Debug, Clone, Copy)]
struct StripeJob {
    worker: u64,
    total: u64,
    batch_size: u64,
    workers: u64,
    shadow: Slot,
}

async fn copy_stripe(
    job: StripeJob,
    primary: Arc<dyn PrimaryStore>,
    replica: Arc<dyn ReplicaStore>,
    metrics: SyncMetrics,
    copied: Arc<AtomicU64>,
    batches: Arc<AtomicU64>,
) -> SyncResult<()> {
    for offset in stripe_offsets(job.total, job.batch_size, job.workers, job.worker) {
        let records = primary.batch(offset, job.batch_size).await?;
        metrics.record_db_operation("batch_read");
        if records.is_empty() {
            continue;
        }
        let inserted = replica.insert_batch(job.shadow, &records).await.map_err(|e| {
            tracing::warn!(worker = job.worker, offset = offset, slot = %job.shadow, error = %e, "Batch copy failed");
            e
        })?;
        metrics.record_db_operation("batch_insert");
        copied.fetch_add(inserted, Ordering::SeqCst);
        batches.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(worker = job.worker, offset = offset, records = inserted, "Batch copied");
    }
    Ok(())
}

#[async_trait]
impl EventHandler for RebuildCoordinator {
    async fn handle(&self, event: &SyncEvent) -> SyncResult<()> {
        match event {
            SyncEvent::DatasetUpdated => self.rebuild().await.map(|_| ()),
            SyncEvent::Unknown => Ok(()),
        }
    }
}
