//! Process wiring: configuration in, running components out.

use std::sync::Arc;
use std::time::Duration;

use prometheus::Registry;
use promosync_core::{CacheError, SyncConfig, SyncMetrics, SyncResult};
use promosync_engine::{IngestionLoader, PrimarySink, PromotionService, RebuildCoordinator};
use promosync_events::{Consumer, PgOutboxTransport, Producer, Transport};
use promosync_storage::{
    apply_migrations_with_retry, connect_with_retry, CacheAside, CacheBackend, InMemoryCache,
    LmdbCacheBackend, PgPrimaryStore, PgReplicaStore, PrimaryStore, ReplicaStore,
    PRIMARY_MIGRATIONS, REPLICA_MIGRATIONS,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use crate::error::ApiResult;
use crate::state::AppState;
use crate::telemetry::ApiMetrics;

/// Shortest pause between expired-entry sweeps of the LMDB cache.
const MIN_PURGE_INTERVAL: Duration = Duration::from_secs(60);

/// Everything `main` needs to serve and consume.
pub struct Application {
    pub state: AppState,
    pub coordinator: Arc<RebuildCoordinator>,
    pub consumer: Consumer,
    /// Present when the cache is LMDB-backed.
    pub lmdb: Option<Arc<LmdbCacheBackend>>,
}

/// Connect to both databases, migrate them and assemble the components.
pub async fn build(config: &SyncConfig, registry: Registry) -> ApiResult<Application> {
    let connect = config.retry.connect_policy();

    let primary_pool = connect_with_retry(&config.primary_db_url, config.db_pool_size, connect).await?;
    let applied = apply_migrations_with_retry(&primary_pool, PRIMARY_MIGRATIONS, connect).await?;
    tracing::info!(applied = applied, "Primary database ready");

    let replica_pool = connect_with_retry(&config.replica_db_url, config.db_pool_size, connect).await?;
    let applied = apply_migrations_with_retry(&replica_pool, REPLICA_MIGRATIONS, connect).await?;
    tracing::info!(applied = applied, "Replica database ready");

    let metrics = SyncMetrics::new(&registry)?;
    let api_metrics = ApiMetrics::new(&registry)?;

    let primary: Arc<dyn PrimaryStore> = Arc::new(PgPrimaryStore::new(primary_pool.clone()));
    let replica: Arc<dyn ReplicaStore> = Arc::new(PgReplicaStore::new(replica_pool));
    let transport: Arc<dyn Transport> = Arc::new(PgOutboxTransport::new(
        primary_pool,
        config.events.poll_interval(),
    ));

    let (cache, lmdb) = open_cache(config)?;

    let producer = Producer::new(transport.clone(), config.retry.publish_policy(), metrics.clone());
    let loader = IngestionLoader::new(config.ingest.worker_count, Arc::new(producer), metrics.clone());
    let sink = Arc::new(PrimarySink::new(primary.clone(), metrics.clone()));
    let reader = CacheAside::new(cache, replica.clone(), config.cache.ttl(), metrics.clone());
    let service = PromotionService::new(reader, loader, sink);

    let coordinator = Arc::new(RebuildCoordinator::new(
        primary,
        replica.clone(),
        &config.rebuild,
        metrics,
    ));
    let consumer = Consumer::new(transport, config.events.consumer_name.clone());

    Ok(Application {
        state: AppState::new(service, replica, api_metrics, registry),
        coordinator,
        consumer,
        lmdb,
    })
}

type OpenedCache = (Arc<dyn CacheBackend>, Option<Arc<LmdbCacheBackend>>);

fn open_cache(config: &SyncConfig) -> SyncResult<OpenedCache> {
    match &config.cache.path {
        Some(path) => {
            let backend = Arc::new(
                LmdbCacheBackend::new(path, config.cache.max_size_mb).map_err(CacheError::from)?,
            );
            tracing::info!(path = %path, max_size_mb = config.cache.max_size_mb, "LMDB cache opened");
            Ok((backend.clone(), Some(backend)))
        }
        None => {
            tracing::info!("Using in-memory cache");
            Ok((Arc::new(InMemoryCache::new()), None))
        }
    }
}

/// Run the rebuild consumer until `shutdown` fires.
pub fn spawn_consumer(
    consumer: Consumer,
    coordinator: Arc<RebuildCoordinator>,
    shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        match consumer.run_until(coordinator.as_ref(), shutdown).await {
            Ok(stats) => tracing::info!(
                delivered = stats.delivered,
                handled = stats.handled,
                "Rebuild consumer exited"
            ),
            Err(e) => tracing::error!(error = %e, "Rebuild consumer failed"),
        }
    })
}

/// Periodically drop expired LMDB entries until `shutdown` fires.
pub fn spawn_cache_janitor(
    cache: Arc<LmdbCacheBackend>,
    ttl: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    let period = (ttl / 2).max(MIN_PURGE_INTERVAL);
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match cache.purge_expired() {
                        Ok(0) => {}
                        Ok(purged) => tracing::debug!(purged = purged, "Purged expired cache entries"),
                        Err(e) => tracing::warn!(error = %e, "Cache purge failed"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_in_memory_cache_by_default() {
        let config = SyncConfig::default();
        let (_, lmdb) = open_cache(&config).unwrap();
        assert!(lmdb.is_none());
    }

    #[test]
    fn test_open_lmdb_cache_when_path_set() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = SyncConfig::default();
        config.cache.path = Some(dir.path().join("cache").display().to_string());
        config.cache.max_size_mb = 16;

        let (_, lmdb) = open_cache(&config).unwrap();
        assert!(lmdb.is_some());
    }

    #[tokio::test]
    async fn test_janitor_stops_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(LmdbCacheBackend::new(dir.path(), 16).unwrap());
        let (tx, rx) = watch::channel(false);

        let handle = spawn_cache_janitor(cache, Duration::from_secs(3600), rx);
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("janitor stops")
            .unwrap();
    }
}
