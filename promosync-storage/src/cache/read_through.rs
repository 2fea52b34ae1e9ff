//! Cache-aside point lookups over the live replica slot.
//!
//! Entries are never invalidated by rebuilds; after a rotation a cached
//! record may be served for up to the configured TTL.

use std::sync::Arc;
use std::time::Duration;

use promosync_core::{Promotion, SyncMetrics, SyncResult};

use super::traits::CacheBackend;
use crate::traits::ReplicaStore;

/// Cache key for a promotion id.
pub fn cache_key(id: &str) -> String {
    format!("promotion:{}", id)
}

/// Cache-aside reader: cache first, then the live slot, then a
/// best-effort cache fill.
#[derive(Clone)]
pub struct CacheAside {
    cache: Arc<dyn CacheBackend>,
    replica: Arc<dyn ReplicaStore>,
    ttl: Duration,
    metrics: SyncMetrics,
}

impl CacheAside {
    pub fn new(
        cache: Arc<dyn CacheBackend>,
        replica: Arc<dyn ReplicaStore>,
        ttl: Duration,
        metrics: SyncMetrics,
    ) -> Self {
        Self {
            cache,
            replica,
            ttl,
            metrics,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Look up `id`. `Ok(None)` means not found in the live slot.
    ///
    /// Cache failures never fail the read; store failures do.
    pub async fn get(&self, id: &str) -> SyncResult<Option<Promotion>> {
        let key = cache_key(id);

        match self.cache.get(&key).await {
            Ok(Some(bytes)) => match serde_json::from_slice::<Promotion>(&bytes) {
                Ok(promotion) => {
                    self.metrics.cache_hits.inc();
                    return Ok(Some(promotion));
                }
                Err(e) => {
                    tracing::warn!(id = %id, error = %e, "Undecodable cache entry, reading through");
                }
            },
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(id = %id, error = %e, "Cache read failed, reading through");
            }
        }

        self.metrics.cache_misses.inc();

        let promotion = self.replica.get_live(id).await?;
        self.metrics.record_db_operation("read");

        if let Some(promotion) = &promotion {
            self.fill(&key, promotion).await;
        }

        Ok(promotion)
    }

    async fn fill(&self, key: &str, promotion: &Promotion) {
        let bytes = match serde_json::to_vec(promotion) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(id = %promotion.id, error = %e, "Failed to encode cache entry");
                return;
            }
        };
        if let Err(e) = self.cache.set(key, &bytes, self.ttl).await {
            tracing::warn!(id = %promotion.id, error = %e, "Failed to populate cache");
        }
    }
}
