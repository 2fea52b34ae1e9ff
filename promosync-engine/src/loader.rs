//! Ingestion loader.
//!
//! One reader streams lines into a hand-off channel of capacity 1; a fixed
//! pool of workers pulls from the shared receiver, validates each record
//! and writes it to a [`RecordSink`]. The first error from any task wins
//! and stops the load. Records written before that error stay written.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use promosync_core::{InputError, Promotion, SyncError, SyncEvent, SyncMetrics, SyncResult};
use promosync_events::EventPublisher;
use promosync_storage::PrimaryStore;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;

use crate::decode::{is_blank, RawRecord};

/// Hand-off channel capacity. The smallest bound tokio allows.
const HANDOFF_CAPACITY: usize = 1;

// ============================================================================
// SINK
// ============================================================================

/// Destination for validated records.
#[async_trait]
pub trait RecordSink: Send + Sync {
    /// Runs once before any line is read.
    async fn begin(&self) -> SyncResult<()> {
        Ok(())
    }

    async fn write(&self, promotion: &Promotion) -> SyncResult<()>;
}

/// Sink that replaces the primary store's contents.
#[derive(Clone)]
pub struct PrimarySink {
    store: Arc<dyn PrimaryStore>,
    metrics: SyncMetrics,
}

impl PrimarySink {
    pub fn new(store: Arc<dyn PrimaryStore>, metrics: SyncMetrics) -> Self {
        Self { store, metrics }
    }
}

#[async_trait]
impl RecordSink for PrimarySink {
    /// Clear-then-load.
    async fn begin(&self) -> SyncResult<()> {
        self.store.clear().await?;
        self.metrics.record_db_operation("clear");
        Ok(())
    }

    async fn write(&self, promotion: &Promotion) -> SyncResult<()> {
        self.store.insert(promotion).await?;
        self.metrics.record_db_operation("insert");
        Ok(())
    }
}

// ============================================================================
// LOADER
// ============================================================================

/// Outcome of a successful load.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadReport {
    /// Records written to the sink.
    pub records: u64,
    /// Lines read, blank ones included.
    pub lines: u64,
    pub elapsed: Duration,
}

/// Keeps the first error raised by the reader or any worker.
#[derive(Default)]
struct FirstError {
    failed: AtomicBool,
    error: std::sync::Mutex<Option<SyncError>>,
}

impl FirstError {
    fn record(&self, error: SyncError) {
        if self.failed.swap(true, Ordering::SeqCst) {
            tracing::debug!(error = %error, "Discarding error after first failure");
            return;
        }
        if let Ok(mut slot) = self.error.lock() {
            *slot = Some(error);
        }
    }

    fn is_set(&self) -> bool {
        self.failed.load(Ordering::SeqCst)
    }

    fn take(&self) -> Option<SyncError> {
        if !self.is_set() {
            return None;
        }
        let taken = self.error.lock().ok().and_then(|mut slot| slot.take());
        Some(taken.unwrap_or_else(|| SyncError::internal("load failed, error lost to a poisoned lock")))
    }
}

/// Streams an input document into a [`RecordSink`] and announces the new
/// dataset once every record is written.
#[derive(Clone)]
pub struct IngestionLoader {
    worker_count: usize,
    publisher: Arc<dyn EventPublisher>,
    metrics: SyncMetrics,
}

impl IngestionLoader {
    pub fn new(worker_count: usize, publisher: Arc<dyn EventPublisher>, metrics: SyncMetrics) -> Self {
        Self {
            worker_count: worker_count.max(1),
            publisher,
            metrics,
        }
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Open `path` and [`load`](Self::load) it.
    pub async fn load_file(
        &self,
        path: impl AsRef<Path>,
        sink: Arc<dyn RecordSink>,
    ) -> SyncResult<LoadReport> {
        let path = path.as_ref();
        let file = tokio::fs::File::open(path)
            .await
            .map_err(|e| InputError::Open {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;
        tracing::info!(path = %path.display(), "Loading input file");
        self.load(BufReader::new(file), sink).await
    }

    /// Load every line of `source` into `sink`, then publish
    /// [`SyncEvent::DatasetUpdated`].
    pub async fn load<R>(&self, source: R, sink: Arc<dyn RecordSink>) -> SyncResult<LoadReport>
    where
        R: AsyncBufRead + Unpin + Send,
    {
        let started = Instant::now();
        sink.begin().await?;

        let (tx, rx) = mpsc::channel::<RawRecord>(HANDOFF_CAPACITY);
        let rx = Arc::new(Mutex::new(rx));
        let failure = Arc::new(FirstError::default());
        let written = Arc::new(AtomicU64::new(0));

        let mut workers = JoinSet::new();
        for worker in 0..self.worker_count {
            workers.spawn(run_worker(
                worker,
                rx.clone(),
                sink.clone(),
                failure.clone(),
                written.clone(),
                self.metrics.clone(),
            ));
        }
        // Workers own the receiver; if they all exit, sends fail.
        drop(rx);

        let lines = read_lines(source, tx, &failure).await;

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                failure.record(SyncError::internal(format!("loader worker failed: {}", e)));
            }
        }

        let records = written.load(Ordering::SeqCst);
        if let Some(error) = failure.take() {
            tracing::warn!(records = records, error = %error, "Load failed");
            return Err(error);
        }

        self.publisher.publish(&SyncEvent::DatasetUpdated).await?;

        let report = LoadReport {
            records,
            lines,
            elapsed: started.elapsed(),
        };
        tracing::info!(
            records = report.records,
            lines = report.lines,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Load complete"
        );
        Ok(report)
    }
}

/// Feed split lines to the workers. Returns the number of lines read.
async fn read_lines<R>(source: R, tx: mpsc::Sender<RawRecord>, failure: &FirstError) -> u64
where
    R: AsyncBufRead + Unpin + Send,
{
    let mut lines = source.lines();
    let mut line = 0u64;

    loop {
        if failure.is_set() {
            break;
        }
        let text = match lines.next_line().await {
            Ok(Some(text)) => text,
            Ok(None) => break,
            Err(e) => {
                failure.record(
                    InputError::Read {
                        line: line + 1,
                        reason: e.to_string(),
                    }
                    .into(),
                );
                break;
            }
        };
        line += 1;

        if is_blank(&text) {
            continue;
        }

        let record = match RawRecord::split(line, &text) {
            Ok(record) => record,
            Err(e) => {
                failure.record(e.into());
                break;
            }
        };

        // Fails only once a worker has closed the hand-off.
        if tx.send(record).await.is_err() {
            break;
        }
    }

    line
}

async fn run_worker(
    worker: usize,
    rx: Arc<Mutex<mpsc::Receiver<RawRecord>>>,
    sink: Arc<dyn RecordSink>,
    failure: Arc<FirstError>,
    written: Arc<AtomicU64>,
    metrics: SyncMetrics,
) {
    loop {
        let next = rx.lock().await.recv().await;
        let Some(raw) = next else {
            break;
        };
        // Buffered items are dropped once the load has failed.
        if failure.is_set() {
            break;
        }

        let line = raw.line;
        let result = match raw.decode() {
            Ok(promotion) => sink.write(&promotion).await,
            Err(e) => Err(e.into()),
        };

        match result {
            Ok(()) => {
                written.fetch_add(1, Ordering::SeqCst);
                metrics.csv_processed_lines.inc();
            }
            Err(e) => {
                tracing::warn!(worker = worker, line = line, error = %e, "Record rejected");
                failure.record(e);
                rx.lock().await.close();
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use promosync_storage::InMemoryPrimaryStore;
    use promosync_test_utils::{assertions, fixtures, FailingPrimaryStore, RecordingPublisher};

    fn loader(workers: usize) -> (IngestionLoader, RecordingPublisher, SyncMetrics) {
        let publisher = RecordingPublisher::new();
        let metrics = fixtures::metrics();
        let loader = IngestionLoader::new(workers, Arc::new(publisher.clone()), metrics.clone());
        (loader, publisher, metrics)
    }

    fn sink(store: &InMemoryPrimaryStore, metrics: &SyncMetrics) -> Arc<dyn RecordSink> {
        Arc::new(PrimarySink::new(Arc::new(store.clone()), metrics.clone()))
    }

    #[tokio::test]
    async fn test_load_well_formed_document() {
        let (loader, publisher, metrics) = loader(5);
        let store = InMemoryPrimaryStore::new();
        let records = fixtures::promotions(40);
        let document = fixtures::csv_document(&records);

        let report = loader
            .load(document.as_bytes(), sink(&store, &metrics))
            .await
            .unwrap();

        assert_eq!(report.records, 40);
        assert_eq!(store.count().await.unwrap(), 40);
        assert_eq!(store.snapshot().unwrap(), records);
        assert_eq!(publisher.events(), vec![SyncEvent::DatasetUpdated]);
        assert_eq!(metrics.csv_processed_lines.get(), 40);
    }

    #[tokio::test]
    async fn test_load_replaces_previous_contents() {
        let (loader, _, metrics) = loader(2);
        let store = InMemoryPrimaryStore::with_records(vec![fixtures::promotion("stale", 1.0)]);
        let document = fixtures::csv_document(&[fixtures::promotion("fresh", 2.0)]);

        loader
            .load(document.as_bytes(), sink(&store, &metrics))
            .await
            .unwrap();
        assert!(store.get("stale").unwrap().is_none());
        assert!(store.get("fresh").unwrap().is_some());
    }

    #[tokio::test]
    async fn test_blank_lines_skipped() {
        let (loader, _, metrics) = loader(3);
        let store = InMemoryPrimaryStore::new();
        let document = "\nid1,9.99,2024-01-01 00:00:00 +0000 UTC\n\n  \nid2,1.5,2024-01-01 00:00:00 +0000 UTC\n";

        let report = loader
            .load(document.as_bytes(), sink(&store, &metrics))
            .await
            .unwrap();
        assert_eq!(report.records, 2);
        assert_eq!(report.lines, 5);
    }

    #[tokio::test]
    async fn test_validation_error_keeps_earlier_writes() {
        let (loader, publisher, metrics) = loader(1);
        let store = InMemoryPrimaryStore::new();
        let document = "id1,9.99,2024-01-01 00:00:00 +0000 UTC\nid2,-1,2024-01-01 00:00:00 +0000 UTC\n";

        let result = loader.load(document.as_bytes(), sink(&store, &metrics)).await;

        assertions::assert_invalid_line(&result, 2);
        assert!(store.get("id1").unwrap().is_some());
        assert!(store.get("id2").unwrap().is_none());
        assert_eq!(publisher.count(), 0);
    }

    #[tokio::test]
    async fn test_field_count_error() {
        let (loader, publisher, metrics) = loader(4);
        let store = InMemoryPrimaryStore::new();
        let document = "id1,9.99,2024-01-01 00:00:00 +0000 UTC\nid2,1.0\n";

        let result = loader.load(document.as_bytes(), sink(&store, &metrics)).await;
        assertions::assert_field_count(&result, 2);
        assert_eq!(publisher.count(), 0);
    }

    #[tokio::test]
    async fn test_store_error_stops_load() {
        let (loader, publisher, metrics) = loader(3);
        let store = FailingPrimaryStore::on_insert("promo-0005");
        let document = fixtures::csv_document(&fixtures::promotions(50));

        let result = loader
            .load(
                document.as_bytes(),
                Arc::new(PrimarySink::new(Arc::new(store.clone()), metrics.clone())),
            )
            .await;

        assertions::assert_storage_error(&result);
        assert!(store.inner().count().await.unwrap() < 50);
        assert_eq!(publisher.count(), 0);
    }

    #[tokio::test]
    async fn test_publish_failure_is_load_error() {
        let metrics = fixtures::metrics();
        let loader = IngestionLoader::new(
            2,
            Arc::new(RecordingPublisher::failing()),
            metrics.clone(),
        );
        let store = InMemoryPrimaryStore::new();
        let document = fixtures::csv_document(&fixtures::promotions(3));

        let result = loader.load(document.as_bytes(), sink(&store, &metrics)).await;

        assertions::assert_transport_error(&result);
        // Writes are not rolled back.
        assert_eq!(store.count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_load_file_missing() {
        let (loader, _, metrics) = loader(1);
        let store = InMemoryPrimaryStore::new();
        let err = loader
            .load_file("/definitely/not/here.csv", sink(&store, &metrics))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Input(InputError::Open { .. })));
    }

    #[tokio::test]
    async fn test_load_file() {
        let (loader, _, metrics) = loader(2);
        let store = InMemoryPrimaryStore::new();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("promotions.csv");
        std::fs::write(&path, fixtures::csv_document(&fixtures::promotions(7))).unwrap();

        let report = loader.load_file(&path, sink(&store, &metrics)).await.unwrap();
        assert_eq!(report.records, 7);
    }

    mod prop_tests {
        use super::*;
        use proptest::prelude::*;
        use promosync_test_utils::generators;

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(100))]

            #[test]
            fn prop_load_writes_every_record_and_publishes_once(
                records in generators::arb_promotions(60),
                workers in 1usize..6,
            ) {
                let runtime = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .unwrap();
                let (report, stored, published) = runtime.block_on(async {
                    let (loader, publisher, metrics) = loader(workers);
                    let store = InMemoryPrimaryStore::new();
                    let document = fixtures::csv_document(&records);
                    let report = loader
                        .load(document.as_bytes(), sink(&store, &metrics))
                        .await
                        .unwrap();
                    (report, store.snapshot().unwrap(), publisher.count())
                });

                prop_assert_eq!(report.records, records.len() as u64);
                prop_assert_eq!(stored.len(), records.len());
                prop_assert_eq!(published, 1);
                for record in &records {
                    prop_assert!(stored.contains(record), "missing {}", record.id);
                }
            }
        }
    }
}
