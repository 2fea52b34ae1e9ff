//! promosync Test Utilities
//!
//! Shared test infrastructure for the promosync workspace:
//! - Proptest generators for promotions and input documents
//! - Fixtures for records, input lines and metrics
//! - Fault-injecting doubles for stores, caches and transports
//! - Assertions for the error taxonomy

pub use promosync_core::{
    InputError, Promotion, StorageError, SyncError, SyncEvent, SyncMetrics, SyncResult,
    Timestamp, TransportError, ValidationError,
};

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use promosync_core::CacheError;
use promosync_events::{EventPublisher, InMemoryBroker, Subscription, Transport};
use promosync_storage::{CacheBackend, CacheStats, InMemoryPrimaryStore, PrimaryStore};

// ============================================================================
// DOUBLES
// ============================================================================

/// Primary store that fails inserts of one chosen id, or every read.
#[derive(Clone)]
pub struct FailingPrimaryStore {
    inner: InMemoryPrimaryStore,
    fail_insert_id: Option<String>,
    fail_reads: bool,
}

impl FailingPrimaryStore {
    /// Fail `insert` for the record with `id`; everything else succeeds.
    pub fn on_insert(id: impl Into<String>) -> Self {
        Self {
            inner: InMemoryPrimaryStore::new(),
            fail_insert_id: Some(id.into()),
            fail_reads: false,
        }
    }

    /// Hold `records` but fail every `batch` call.
    pub fn on_batch(records: impl IntoIterator<Item = Promotion>) -> Self {
        Self {
            inner: InMemoryPrimaryStore::with_records(records),
            fail_insert_id: None,
            fail_reads: true,
        }
    }

    pub fn inner(&self) -> &InMemoryPrimaryStore {
        &self.inner
    }
}

#[async_trait]
impl PrimaryStore for FailingPrimaryStore {
    async fn clear(&self) -> SyncResult<()> {
        self.inner.clear().await
    }

    async fn insert(&self, promotion: &Promotion) -> SyncResult<()> {
        if self.fail_insert_id.as_deref() == Some(promotion.id.as_str()) {
            return Err(StorageError::Query {
                operation: "insert",
                reason: format!("injected failure for {}", promotion.id),
            }
            .into());
        }
        self.inner.insert(promotion).await
    }

    async fn count(&self) -> SyncResult<u64> {
        self.inner.count().await
    }

    async fn batch(&self, offset: u64, limit: u64) -> SyncResult<Vec<Promotion>> {
        if self.fail_reads {
            return Err(StorageError::Query {
                operation: "batch",
                reason: format!("injected failure at offset {}", offset),
            }
            .into());
        }
        self.inner.batch(offset, limit).await
    }
}

/// Transport whose first `failures` sends fail; later sends reach an
/// in-memory broker.
#[derive(Clone)]
pub struct FlakyTransport {
    failures: u32,
    calls: Arc<AtomicU32>,
    broker: InMemoryBroker,
}

impl FlakyTransport {
    pub fn new(failures: u32) -> Self {
        Self {
            failures,
            calls: Arc::new(AtomicU32::new(0)),
            broker: InMemoryBroker::new(),
        }
    }

    /// Transport that never accepts a send.
    pub fn always_failing() -> Self {
        Self::new(u32::MAX)
    }

    /// Number of `send` calls so far, failed ones included.
    pub fn send_calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn broker(&self) -> &InMemoryBroker {
        &self.broker
    }
}

#[async_trait]
impl Transport for FlakyTransport {
    async fn send(&self, payload: &[u8]) -> Result<u64, TransportError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst).saturating_add(1);
        if call <= self.failures {
            return Err(TransportError::Send {
                reason: format!("injected send failure #{}", call),
            });
        }
        self.broker.send(payload).await
    }

    async fn subscribe(&self, consumer: &str) -> Result<Box<dyn Subscription>, TransportError> {
        self.broker.subscribe(consumer).await
    }
}

/// Cache backend where every operation fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct FailingCache;

impl FailingCache {
    fn error() -> CacheError {
        CacheError::Backend {
            reason: "injected cache failure".to_string(),
        }
    }
}

#[async_trait]
impl CacheBackend for FailingCache {
    async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        Err(Self::error())
    }

    async fn set(&self, _key: &str, _value: &[u8], _ttl: Duration) -> Result<(), CacheError> {
        Err(Self::error())
    }

    async fn delete(&self, _key: &str) -> Result<bool, CacheError> {
        Err(Self::error())
    }

    async fn stats(&self) -> Result<CacheStats, CacheError> {
        Err(Self::error())
    }
}

/// Publisher that records every event, optionally failing instead.
#[derive(Clone, Default)]
pub struct RecordingPublisher {
    events: Arc<Mutex<Vec<SyncEvent>>>,
    fail: bool,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publisher whose every publish fails as an exhausted retry would.
    pub fn failing() -> Self {
        Self {
            events: Arc::default(),
            fail: true,
        }
    }

    pub fn events(&self) -> Vec<SyncEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn count(&self) -> usize {
        self.events().len()
    }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(&self, event: &SyncEvent) -> SyncResult<()> {
        if self.fail {
            return Err(TransportError::PublishExhausted {
                attempts: 3,
                last: "injected publish failure".to_string(),
            }
            .into());
        }
        self.events
            .lock()
            .map_err(|_| SyncError::internal("publisher lock poisoned"))?
            .push(event.clone());
        Ok(())
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for promotions and input documents.

    use super::*;
    use proptest::prelude::*;

    /// Generate a well-formed promotion id.
    pub fn arb_id() -> impl Strategy<Value = String> {
        "[A-Za-z0-9_-]{1,36}"
    }

    /// Generate a strictly positive, finite price with cent precision.
    pub fn arb_price() -> impl Strategy<Value = f64> {
        (1u64..10_000_000).prop_map(|cents| cents as f64 / 100.0)
    }

    /// Generate a whole-second UTC timestamp between 2020 and 2030.
    pub fn arb_expiration() -> impl Strategy<Value = Timestamp> {
        (1577836800i64..1893456000i64).prop_map(|secs| {
            chrono::DateTime::from_timestamp(secs, 0).unwrap_or_else(fixtures::expiration)
        })
    }

    pub fn arb_promotion() -> impl Strategy<Value = Promotion> {
        (arb_id(), arb_price(), arb_expiration()).prop_map(|(id, price, expiration_date)| {
            Promotion {
                id,
                price,
                expiration_date,
            }
        })
    }

    /// Generate up to `max` promotions with distinct ids.
    pub fn arb_promotions(max: usize) -> impl Strategy<Value = Vec<Promotion>> {
        prop::collection::btree_map(arb_id(), (arb_price(), arb_expiration()), 0..=max).prop_map(
            |records| {
                records
                    .into_iter()
                    .map(|(id, (price, expiration_date))| Promotion {
                        id,
                        price,
                        expiration_date,
                    })
                    .collect()
            },
        )
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built records and input documents.

    use super::*;
    use chrono::{TimeZone, Utc};
    use prometheus::Registry;

    /// The expiration used by [`promotion`]: 2030-06-01 12:00:00 UTC.
    pub fn expiration() -> Timestamp {
        Utc.with_ymd_and_hms(2030, 6, 1, 12, 0, 0)
            .single()
            .unwrap_or_else(Utc::now)
    }

    /// A valid promotion with the fixture expiration.
    pub fn promotion(id: &str, price: f64) -> Promotion {
        Promotion {
            id: id.to_string(),
            price,
            expiration_date: expiration(),
        }
    }

    /// `count` valid promotions with ids `promo-0000`, `promo-0001`, ...
    pub fn promotions(count: usize) -> Vec<Promotion> {
        (0..count)
            .map(|i| promotion(&format!("promo-{:04}", i), 1.0 + i as f64 / 100.0))
            .collect()
    }

    /// Render a promotion as one input line.
    pub fn csv_line(promotion: &Promotion) -> String {
        format!(
            "{},{},{} UTC",
            promotion.id,
            promotion.price,
            promotion
                .expiration_date
                .format(promosync_core::EXPIRATION_FORMAT)
        )
    }

    /// Render promotions as an input document, one line each.
    pub fn csv_document(promotions: &[Promotion]) -> String {
        promotions
            .iter()
            .map(|p| csv_line(p) + "\n")
            .collect()
    }

    /// Metrics registered on a throwaway registry.
    pub fn metrics() -> SyncMetrics {
        metrics_with_registry().0
    }

    pub fn metrics_with_registry() -> (SyncMetrics, Registry) {
        let registry = Registry::new();
        match SyncMetrics::new(&registry) {
            Ok(metrics) => (metrics, registry),
            Err(e) => panic!("metric registration on a fresh registry failed: {e}"),
        }
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions over the promosync error taxonomy.

    use super::*;

    /// Assert that `result` failed validation on input line `line`.
    #[track_caller]
    pub fn assert_invalid_line<T: std::fmt::Debug>(result: &SyncResult<T>, line: u64) {
        match result {
            Err(SyncError::Input(InputError::Invalid { line: l, .. })) => {
                assert_eq!(*l, line, "validation error on wrong line");
            }
            other => panic!("Expected invalid data on line {}, got: {:?}", line, other),
        }
    }

    /// Assert that `result` is a field-count error on input line `line`.
    #[track_caller]
    pub fn assert_field_count<T: std::fmt::Debug>(result: &SyncResult<T>, line: u64) {
        match result {
            Err(SyncError::Input(InputError::FieldCount { line: l, .. })) => {
                assert_eq!(*l, line, "field count error on wrong line");
            }
            other => panic!("Expected field count error on line {}, got: {:?}", line, other),
        }
    }

    #[track_caller]
    pub fn assert_storage_error<T: std::fmt::Debug>(result: &SyncResult<T>) {
        match result {
            Err(SyncError::Storage(_)) => {}
            other => panic!("Expected Storage error, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_transport_error<T: std::fmt::Debug>(result: &SyncResult<T>) {
        match result {
            Err(SyncError::Transport(_)) => {}
            other => panic!("Expected Transport error, got: {:?}", other),
        }
    }

    /// Assert that two record sets hold the same promotions, ignoring order.
    #[track_caller]
    pub fn assert_same_records(left: &[Promotion], right: &[Promotion]) {
        let mut left = left.to_vec();
        let mut right = right.to_vec();
        left.sort_by(|a, b| a.id.cmp(&b.id));
        right.sort_by(|a, b| a.id.cmp(&b.id));
        assert_eq!(left, right);
    }
}

// ============================================================================
// TESTS
// ============================================================================
