//! LMDB-backed cache implementation.
//!
//! Uses the heed crate (Rust bindings for LMDB) for a memory-mapped cache
//! that survives process restarts.
//!
//! # Entry Format
//!
//! Each value is stored as `[expires_at: i64 millis LE][payload]`. Reads
//! past `expires_at` behave as misses and remove the entry.

use std::path::Path;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};
use promosync_core::CacheError;

use super::traits::{CacheBackend, CacheStats};

const HEADER_LEN: usize = 8;

/// Error type for LMDB cache operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbCacheError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    #[error("Failed to open database: {0}")]
    DbOpen(String),

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Corrupt cache entry: {0}")]
    Corrupt(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LmdbCacheError> for CacheError {
    fn from(e: LmdbCacheError) -> Self {
        match e {
            LmdbCacheError::Corrupt(reason) => CacheError::Deserialization { reason },
            other => CacheError::Backend {
                reason: other.to_string(),
            },
        }
    }
}

fn txn_error(e: heed::Error) -> LmdbCacheError {
    LmdbCacheError::Transaction(e.to_string())
}

/// Split an envelope into its expiry and payload.
fn decode_envelope(bytes: &[u8]) -> Result<(i64, &[u8]), LmdbCacheError> {
    if bytes.len() < HEADER_LEN {
        return Err(LmdbCacheError::Corrupt(format!(
            "entry is {} bytes, shorter than its header",
            bytes.len()
        )));
    }
    let (header, payload) = bytes.split_at(HEADER_LEN);
    let expires_bytes: [u8; HEADER_LEN] = header
        .try_into()
        .map_err(|_| LmdbCacheError::Corrupt("invalid expiry header".into()))?;
    Ok((i64::from_le_bytes(expires_bytes), payload))
}

/// Whether an entry is past its expiry at `now`. Undecodable entries count
/// as expired.
fn is_stale(bytes: &[u8], now_millis: i64) -> bool {
    match decode_envelope(bytes) {
        Ok((expires_at, _)) => expires_at <= now_millis,
        Err(_) => true,
    }
}

fn encode_envelope(expires_at_millis: i64, payload: &[u8]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(HEADER_LEN + payload.len());
    bytes.extend_from_slice(&expires_at_millis.to_le_bytes());
    bytes.extend_from_slice(payload);
    bytes
}

/// LMDB-backed cache.
///
/// # Example
///
/// ```ignore
/// let backend = LmdbCacheBackend::new("/var/lib/promosync/cache", 256)?;
/// backend.set("promotion:id1", &bytes, Duration::from_secs(3600)).await?;
/// let cached = backend.get("promotion:id1").await?;
/// ```
pub struct LmdbCacheBackend {
    env: Env,
    db: Database<Bytes, Bytes>,
    stats: Arc<RwLock<CacheStats>>,
}

impl LmdbCacheBackend {
    /// Create a new LMDB cache backend.
    ///
    /// # Arguments
    ///
    /// * `path` - Directory where LMDB files will be stored
    /// * `max_size_mb` - Maximum size of the database in megabytes
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the LMDB
    /// environment or database cannot be opened.
    pub fn new<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbCacheError> {
        std::fs::create_dir_all(&path)?;

        // SAFETY: the environment directory is owned by this process; LMDB
        // requires that the same path is not opened twice in one process.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbCacheError::EnvOpen(e.to_string()))?;

        let mut wtxn = env.write_txn().map_err(txn_error)?;
        let db: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| LmdbCacheError::DbOpen(e.to_string()))?;
        wtxn.commit().map_err(txn_error)?;

        let entry_count = {
            let rtxn = env.read_txn().map_err(txn_error)?;
            db.len(&rtxn).map_err(txn_error)?
        };

        Ok(Self {
            env,
            db,
            stats: Arc::new(RwLock::new(CacheStats {
                entry_count,
                ..Default::default()
            })),
        })
    }

    fn bump(&self, f: impl FnOnce(&mut CacheStats)) {
        if let Ok(mut stats) = self.stats.write() {
            f(&mut stats);
        }
    }

    fn remove_key(&self, key: &[u8]) -> Result<bool, LmdbCacheError> {
        let mut wtxn = self.env.write_txn().map_err(txn_error)?;
        let deleted = self.db.delete(&mut wtxn, key).map_err(txn_error)?;
        wtxn.commit().map_err(txn_error)?;
        if deleted {
            self.bump(|s| s.entry_count = s.entry_count.saturating_sub(1));
        }
        Ok(deleted)
    }

    /// Delete `key` only if its entry is still stale at `now_millis`.
    ///
    /// The check runs inside the write transaction, so an entry rewritten
    /// after the caller saw it expire is left alone.
    fn remove_if_expired(&self, key: &[u8], now_millis: i64) -> Result<bool, LmdbCacheError> {
        let mut wtxn = self.env.write_txn().map_err(txn_error)?;
        let stale = match self.db.get(&wtxn, key).map_err(txn_error)? {
            Some(bytes) => is_stale(bytes, now_millis),
            None => false,
        };
        let deleted = stale && self.db.delete(&mut wtxn, key).map_err(txn_error)?;
        wtxn.commit().map_err(txn_error)?;
        if deleted {
            self.bump(|s| s.entry_count = s.entry_count.saturating_sub(1));
        }
        Ok(deleted)
    }

    /// Remove every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> Result<u64, LmdbCacheError> {
        let now = Utc::now().timestamp_millis();
        let candidates: Vec<Vec<u8>> = {
            let rtxn = self.env.read_txn().map_err(txn_error)?;
            let iter = self.db.iter(&rtxn).map_err(txn_error)?;
            let mut keys = Vec::new();
            for result in iter {
                let (key, value) = result.map_err(txn_error)?;
                if is_stale(value, now) {
                    keys.push(key.to_vec());
                }
            }
            keys
        };

        let mut wtxn = self.env.write_txn().map_err(txn_error)?;
        let mut removed = 0u64;
        for key in &candidates {
            // Re-check: the entry may have been refreshed since the scan.
            let stale = match self.db.get(&wtxn, key).map_err(txn_error)? {
                Some(bytes) => is_stale(bytes, now),
                None => false,
            };
            if stale && self.db.delete(&mut wtxn, key).map_err(txn_error)? {
                removed += 1;
            }
        }
        wtxn.commit().map_err(txn_error)?;

        self.bump(|s| s.entry_count = s.entry_count.saturating_sub(removed));
        Ok(removed)
    }
}

#[async_trait]
impl CacheBackend for LmdbCacheBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let found = {
            let rtxn = self.env.read_txn().map_err(txn_error)?;
            match self.db.get(&rtxn, key.as_bytes()).map_err(txn_error)? {
                Some(bytes) => {
                    let (expires_at, payload) = decode_envelope(bytes)?;
                    Some((expires_at, payload.to_vec()))
                }
                None => None,
            }
        };

        let now = Utc::now().timestamp_millis();
        match found {
            Some((expires_at, payload)) if expires_at > now => {
                self.bump(|s| s.hits += 1);
                Ok(Some(payload))
            }
            Some(_) => {
                self.remove_if_expired(key.as_bytes(), now)?;
                self.bump(|s| {
                    s.misses += 1;
                    s.expired += 1;
                });
                Ok(None)
            }
            None => {
                self.bump(|s| s.misses += 1);
                Ok(None)
            }
        }
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), CacheError> {
        let ttl_millis = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        let expires_at = Utc::now().timestamp_millis().saturating_add(ttl_millis);
        let envelope = encode_envelope(expires_at, value);

        let mut wtxn = self.env.write_txn().map_err(txn_error)?;
        let is_new = self
            .db
            .get(&wtxn, key.as_bytes())
            .map_err(txn_error)?
            .is_none();
        self.db
            .put(&mut wtxn, key.as_bytes(), &envelope)
            .map_err(txn_error)?;
        wtxn.commit().map_err(txn_error)?;

        if is_new {
            self.bump(|s| s.entry_count += 1);
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.remove_key(key.as_bytes())?)
    }

    async fn stats(&self) -> Result<CacheStats, CacheError> {
        Ok(self.stats.read().map(|s| s.clone()).unwrap_or_default())
    }
}
