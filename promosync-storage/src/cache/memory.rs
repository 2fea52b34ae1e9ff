//! In-process TTL cache.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use promosync_core::CacheError;

use super::traits::{CacheBackend, CacheStats};

#[derive(Debug)]
struct Entry {
    value: Vec<u8>,
    expires_at: Instant,
}

/// HashMap-backed cache. Expired entries are dropped lazily on read.
#[derive(Debug, Default, Clone)]
pub struct InMemoryCache {
    entries: Arc<RwLock<HashMap<String, Entry>>>,
    stats: Arc<RwLock<CacheStats>>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn poisoned() -> CacheError {
        CacheError::Backend {
            reason: "cache lock poisoned".to_string(),
        }
    }

    fn bump(&self, f: impl FnOnce(&mut CacheStats)) {
        if let Ok(mut stats) = self.stats.write() {
            f(&mut stats);
        }
    }
}

#[async_trait]
impl CacheBackend for InMemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let now = Instant::now();
        let mut entries = self.entries.write().map_err(|_| Self::poisoned())?;
        match entries.get(key) {
            Some(entry) if entry.expires_at > now => {
                let value = entry.value.clone();
                drop(entries);
                self.bump(|s| s.hits += 1);
                Ok(Some(value))
            }
            Some(_) => {
                entries.remove(key);
                drop(entries);
                self.bump(|s| {
                    s.misses += 1;
                    s.expired += 1;
                    s.entry_count = s.entry_count.saturating_sub(1);
                });
                Ok(None)
            }
            None => {
                drop(entries);
                self.bump(|s| s.misses += 1);
                Ok(None)
            }
        }
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), CacheError> {
        let entry = Entry {
            value: value.to_vec(),
            expires_at: Instant::now() + ttl,
        };
        let mut entries = self.entries.write().map_err(|_| Self::poisoned())?;
        let is_new = entries.insert(key.to_string(), entry).is_none();
        drop(entries);
        if is_new {
            self.bump(|s| s.entry_count += 1);
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        let mut entries = self.entries.write().map_err(|_| Self::poisoned())?;
        let existed = entries.remove(key).is_some();
        drop(entries);
        if existed {
            self.bump(|s| s.entry_count = s.entry_count.saturating_sub(1));
        }
        Ok(existed)
    }

    async fn stats(&self) -> Result<CacheStats, CacheError> {
        Ok(self.stats.read().map(|s| s.clone()).unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_then_get() {
        let cache = InMemoryCache::new();
        cache.set("k", b"v", Duration::from_secs(60)).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some(b"v".to_vec()));
        let stats = cache.stats().await.unwrap();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.entry_count, 1);
    }

    #[tokio::test]
    async fn test_expired_entry_is_miss() {
        let cache = InMemoryCache::new();
        cache.set("k", b"v", Duration::from_millis(5)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(cache.get("k").await.unwrap(), None);
        let stats = cache.stats().await.unwrap();
        assert_eq!(stats.expired, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entry_count, 0);
    }

    #[tokio::test]
    async fn test_delete() {
        let cache = InMemoryCache::new();
        cache.set("k", b"v", Duration::from_secs(60)).await.unwrap();
        assert!(cache.delete("k").await.unwrap());
        assert!(!cache.delete("k").await.unwrap());
        assert_eq!(cache.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_overwrite_keeps_single_entry() {
        let cache = InMemoryCache::new();
        cache.set("k", b"1", Duration::from_secs(60)).await.unwrap();
        cache.set("k", b"2", Duration::from_secs(60)).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some(b"2".to_vec()));
        assert_eq!(cache.stats().await.unwrap().entry_count, 1);
    }
}
