//! Load → notify → rebuild → read, wired with the in-memory backends.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use promosync_core::{Promotion, RebuildConfig, RetryPolicy, SyncMetrics};
use promosync_engine::{IngestionLoader, PrimarySink, PromotionService, RebuildCoordinator};
use promosync_events::{Consumer, InMemoryBroker, Producer};
use promosync_storage::{
    CacheAside, CacheBackend, InMemoryCache, InMemoryPrimaryStore, InMemoryReplicaStore,
    PrimaryStore, Slot,
};
use promosync_test_utils::{assertions, fixtures, FailingCache};
use tokio::sync::watch;

struct Pipeline {
    primary: InMemoryPrimaryStore,
    replica: InMemoryReplicaStore,
    broker: InMemoryBroker,
    service: PromotionService,
    coordinator: Arc<RebuildCoordinator>,
    metrics: SyncMetrics,
}

fn pipeline(cache: Arc<dyn CacheBackend>) -> Pipeline {
    let metrics = fixtures::metrics();
    let primary = InMemoryPrimaryStore::new();
    let replica = InMemoryReplicaStore::new();
    let broker = InMemoryBroker::new();

    let producer = Producer::new(
        Arc::new(broker.clone()),
        RetryPolicy::new(3, Duration::from_millis(1)),
        metrics.clone(),
    );
    let loader = IngestionLoader::new(4, Arc::new(producer), metrics.clone());
    let sink = Arc::new(PrimarySink::new(Arc::new(primary.clone()), metrics.clone()));
    let reader = CacheAside::new(
        cache,
        Arc::new(replica.clone()),
        Duration::from_secs(3600),
        metrics.clone(),
    );
    let coordinator = Arc::new(RebuildCoordinator::new(
        Arc::new(primary.clone()),
        Arc::new(replica.clone()),
        &RebuildConfig {
            batch_size: 7,
            workers: 3,
        },
        metrics.clone(),
    ));

    Pipeline {
        primary,
        replica,
        broker,
        service: PromotionService::new(reader, loader, sink),
        coordinator,
        metrics,
    }
}

fn write_input(dir: &tempfile::TempDir, name: &str, records: &[Promotion]) -> std::path::PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, fixtures::csv_document(records)).unwrap();
    path
}

#[tokio::test]
async fn load_publishes_once_and_rebuild_makes_records_readable() {
    let p = pipeline(Arc::new(InMemoryCache::new()));
    let dir = tempfile::tempdir().unwrap();
    let records = fixtures::promotions(50);
    let path = write_input(&dir, "promotions.csv", &records);

    let report = p.service.process_file(&path).await.unwrap();
    assert_eq!(report.records, 50);
    assert_eq!(p.primary.count().await.unwrap(), 50);
    assert_eq!(p.broker.len(), 1);

    // Nothing is readable until the consumer rebuilds.
    assert!(p.service.get_promotion("promo-0000").await.unwrap_err().is_not_found());

    p.broker.close();
    let stats = Consumer::new(Arc::new(p.broker.clone()), "replica-rebuild")
        .run(p.coordinator.as_ref())
        .await
        .unwrap();
    assert_eq!(stats.handled, 1);

    assertions::assert_same_records(&p.replica.live_snapshot().unwrap(), &records);
    let found = p.service.get_promotion("promo-0049").await.unwrap();
    assert_eq!(found, records[49]);
    assert_eq!(p.metrics.events_published.get(), 1);
}

#[tokio::test]
async fn repeated_reads_serialize_identically() {
    let p = pipeline(Arc::new(InMemoryCache::new()));
    p.replica
        .seed_slot(Slot::A, vec![fixtures::promotion("id1", 9.99)])
        .unwrap();

    let first = p.service.get_promotion("id1").await.unwrap();
    let second = p.service.get_promotion("id1").await.unwrap();
    assert_eq!(
        serde_json::to_vec(&first).unwrap(),
        serde_json::to_vec(&second).unwrap()
    );
    assert_eq!(p.metrics.cache_hits.get(), 1);
}

#[tokio::test]
async fn reads_survive_cache_outage() {
    let p = pipeline(Arc::new(FailingCache));
    p.primary.insert(&fixtures::promotion("id1", 1.0)).await.unwrap();
    p.coordinator.rebuild().await.unwrap();

    assert!(p.service.get_promotion("id1").await.is_ok());
    assert_eq!(p.metrics.cache_misses.get(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_readers_see_one_generation() {
    let p = pipeline(Arc::new(InMemoryCache::new()));
    let old: Vec<Promotion> = (0..200)
        .map(|i| fixtures::promotion(&format!("promo-{:04}", i), 1.0))
        .collect();
    let new: Vec<Promotion> = (0..200)
        .map(|i| fixtures::promotion(&format!("promo-{:04}", i), 2.0))
        .collect();

    for record in &old {
        p.primary.insert(record).await.unwrap();
    }
    p.coordinator.rebuild().await.unwrap();

    p.primary.clear().await.unwrap();
    for record in &new {
        p.primary.insert(record).await.unwrap();
    }

    let done = Arc::new(AtomicBool::new(false));
    let mut readers = Vec::new();
    for _ in 0..4 {
        let replica = p.replica.clone();
        let done = done.clone();
        readers.push(tokio::spawn(async move {
            let mut observed = 0u32;
            while !done.load(Ordering::SeqCst) {
                let snapshot = replica.live_snapshot().unwrap();
                assert_eq!(snapshot.len(), 200);
                let price = snapshot[0].price;
                assert!(snapshot.iter().all(|r| r.price == price), "mixed generations");
                observed += 1;
                tokio::task::yield_now().await;
            }
            observed
        }));
    }

    p.coordinator.rebuild().await.unwrap();
    done.store(true, Ordering::SeqCst);
    for reader in readers {
        assert!(reader.await.unwrap() > 0);
    }

    assertions::assert_same_records(&p.replica.live_snapshot().unwrap(), &new);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn consumer_stops_on_shutdown_signal() {
    let p = pipeline(Arc::new(InMemoryCache::new()));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let coordinator = p.coordinator.clone();
    let broker = p.broker.clone();
    let consumer = tokio::spawn(async move {
        Consumer::new(Arc::new(broker), "replica-rebuild")
            .run_until(coordinator.as_ref(), shutdown_rx)
            .await
    });

    let dir = tempfile::tempdir().unwrap();
    let path = write_input(&dir, "input.csv", &fixtures::promotions(10));
    p.service.process_file(&path).await.unwrap();

    // Wait for the rebuild to land.
    let mut attempts = 0;
    while p.replica.live_snapshot().unwrap().len() != 10 {
        attempts += 1;
        assert!(attempts < 200, "rebuild never completed");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    shutdown_tx.send(true).unwrap();
    let stats = tokio::time::timeout(Duration::from_secs(5), consumer)
        .await
        .expect("consumer stops")
        .unwrap()
        .unwrap();
    assert_eq!(stats.handled, 1);
    assert_eq!(p.broker.committed("replica-rebuild"), 1);
}
