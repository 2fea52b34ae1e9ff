//! Cache backend trait and statistics.

use std::time::Duration;

use async_trait::async_trait;
use promosync_core::CacheError;

/// Byte-oriented key/value cache with per-entry expiry.
///
/// Implementations must be thread-safe. An expired entry behaves exactly
/// like a missing one.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Get the value stored under `key`, if present and unexpired.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    /// Store `value` under `key` for `ttl`.
    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), CacheError>;

    /// Remove `key`. Returns whether an entry existed.
    async fn delete(&self, key: &str) -> Result<bool, CacheError>;

    async fn stats(&self) -> Result<CacheStats, CacheError>;
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Entries currently stored, expired or not.
    pub entry_count: u64,
    /// Reads that found an entry past its expiry.
    pub expired: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_stats_hit_rate() {
        let stats = CacheStats {
            hits: 80,
            misses: 20,
            ..Default::default()
        };
        assert!((stats.hit_rate() - 0.8).abs() < 0.001);
        assert!((CacheStats::default().hit_rate() - 0.0).abs() < 0.001);
    }
}
