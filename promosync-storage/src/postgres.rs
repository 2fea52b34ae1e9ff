//! Postgres-backed stores using deadpool-postgres.
//!
//! Every multi-statement operation uses a `tokio_postgres` transaction that
//! rolls back when dropped and commits only on its success path.

use async_trait::async_trait;
use deadpool_postgres::{Config, ManagerConfig, Pool, PoolConfig, PoolError, RecyclingMethod, Runtime};
use promosync_core::{Promotion, RetryPolicy, StorageError, SyncError, SyncResult};
use tokio_postgres::error::SqlState;
use tokio_postgres::types::ToSql;
use tokio_postgres::{NoTls, Row};

use crate::slots::{Slot, SlotAssignment};
use crate::traits::{PrimaryStore, ReplicaStore};

/// Rows per INSERT statement inside one batch transaction.
const INSERT_CHUNK_ROWS: usize = 5_000;

// ============================================================================
// CONNECTION
// ============================================================================

/// Create a connection pool for `url`.
pub fn create_pool(url: &str, pool_size: usize) -> SyncResult<Pool> {
    let mut cfg = Config::new();
    cfg.url = Some(url.to_string());
    cfg.manager = Some(ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    });
    cfg.pool = Some(PoolConfig::new(pool_size));

    let pool = cfg
        .create_pool(Some(Runtime::Tokio1), NoTls)
        .map_err(|e| StorageError::Connection {
            reason: format!("Failed to create pool: {}", e),
        })?;
    Ok(pool)
}

/// Check out a connection and run `SELECT 1`.
pub async fn probe(pool: &Pool) -> SyncResult<()> {
    let client = pool.get().await.map_err(pool_error)?;
    client
        .query_one("SELECT 1", &[])
        .await
        .map_err(|e| StorageError::Connection {
            reason: e.to_string(),
        })?;
    Ok(())
}

/// Create a pool and probe it, retrying under `policy`.
pub async fn connect_with_retry(url: &str, pool_size: usize, policy: RetryPolicy) -> SyncResult<Pool> {
    promosync_core::retry(policy, move || async move {
        let pool = create_pool(url, pool_size)?;
        probe(&pool).await?;
        Ok::<_, SyncError>(pool)
    })
    .await
    .map_err(|e| {
        tracing::error!(attempts = e.attempts, error = %e.last, "Giving up on database connection");
        SyncError::from(StorageError::Connection {
            reason: e.to_string(),
        })
    })
}

// ============================================================================
// ERROR MAPPING
// ============================================================================

pub(crate) fn pool_error(e: PoolError) -> StorageError {
    StorageError::Connection {
        reason: e.to_string(),
    }
}

pub(crate) fn query_error(operation: &'static str, e: tokio_postgres::Error) -> StorageError {
    StorageError::Query {
        operation,
        reason: e.to_string(),
    }
}

fn insert_error(operation: &'static str, id: Option<&str>, e: tokio_postgres::Error) -> StorageError {
    match (e.code(), id) {
        (Some(code), Some(id)) if *code == SqlState::UNIQUE_VIOLATION => StorageError::DuplicateKey {
            id: id.to_string(),
        },
        _ => query_error(operation, e),
    }
}

fn row_to_promotion(row: &Row) -> Result<Promotion, StorageError> {
    let decode = |e: tokio_postgres::Error| query_error("decode_row", e);
    Ok(Promotion {
        id: row.try_get("id").map_err(decode)?,
        price: row.try_get("price").map_err(decode)?,
        expiration_date: row.try_get("expiration_date").map_err(decode)?,
    })
}

fn count_from_row(row: &Row) -> Result<u64, StorageError> {
    let count: i64 = row.try_get(0).map_err(|e| query_error("count", e))?;
    Ok(count.max(0) as u64)
}

// ============================================================================
// PRIMARY
// ============================================================================

/// Primary store over the `promotions` table.
#[derive(Clone)]
pub struct PgPrimaryStore {
    pool: Pool,
}

impl PgPrimaryStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }
}

#[async_trait]
impl PrimaryStore for PgPrimaryStore {
    async fn clear(&self) -> SyncResult<()> {
        let client = self.pool.get().await.map_err(pool_error)?;
        client
            .execute("DELETE FROM promotions", &[])
            .await
            .map_err(|e| query_error("clear_primary", e))?;
        Ok(())
    }

    async fn insert(&self, promotion: &Promotion) -> SyncResult<()> {
        let mut client = self.pool.get().await.map_err(pool_error)?;
        let tx = client
            .transaction()
            .await
            .map_err(|e| query_error("begin_insert", e))?;
        tx.execute(
            "INSERT INTO promotions (id, price, expiration_date) VALUES ($1, $2, $3)",
            &[&promotion.id, &promotion.price, &promotion.expiration_date],
        )
        .await
        .map_err(|e| insert_error("insert_primary", Some(promotion.id.as_str()), e))?;
        tx.commit()
            .await
            .map_err(|e| StorageError::TransactionFailed {
                reason: e.to_string(),
            })?;
        Ok(())
    }

    async fn count(&self) -> SyncResult<u64> {
        let client = self.pool.get().await.map_err(pool_error)?;
        let row = client
            .query_one("SELECT COUNT(*) FROM promotions", &[])
            .await
            .map_err(|e| query_error("count_primary", e))?;
        Ok(count_from_row(&row)?)
    }

    async fn batch(&self, offset: u64, limit: u64) -> SyncResult<Vec<Promotion>> {
        let client = self.pool.get().await.map_err(pool_error)?;
        let limit = limit as i64;
        let offset = offset as i64;
        let rows = client
            .query(
                "SELECT id, price, expiration_date FROM promotions ORDER BY id LIMIT $1 OFFSET $2",
                &[&limit, &offset],
            )
            .await
            .map_err(|e| query_error("batch_primary", e))?;
        let promotions = rows
            .iter()
            .map(row_to_promotion)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(promotions)
    }
}

// ============================================================================
// REPLICA
// ============================================================================

/// Replica store over `promotions_slot_{a,b,c}`, `replica_slots` and the
/// `promotions_live` view.
#[derive(Clone)]
pub struct PgReplicaStore {
    pool: Pool,
}

impl PgReplicaStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }
}

fn row_to_assignment(row: &Row) -> Result<SlotAssignment, StorageError> {
    let decode = |e: tokio_postgres::Error| query_error("decode_assignment", e);
    let live: String = row.try_get("live").map_err(decode)?;
    let shadow: String = row.try_get("shadow").map_err(decode)?;
    let retired: String = row.try_get("retired").map_err(decode)?;
    Ok(SlotAssignment {
        live: live.parse()?,
        shadow: shadow.parse()?,
        retired: retired.parse()?,
        generation: row.try_get("generation").map_err(decode)?,
    })
}

const SELECT_ASSIGNMENT: &str =
    "SELECT live, shadow, retired, generation FROM replica_slots WHERE singleton";

#[async_trait]
impl ReplicaStore for PgReplicaStore {
    async fn assignment(&self) -> SyncResult<SlotAssignment> {
        let client = self.pool.get().await.map_err(pool_error)?;
        let row = client
            .query_one(SELECT_ASSIGNMENT, &[])
            .await
            .map_err(|e| query_error("read_assignment", e))?;
        Ok(row_to_assignment(&row)?)
    }

    async fn clear_slot(&self, slot: Slot) -> SyncResult<()> {
        let client = self.pool.get().await.map_err(pool_error)?;
        client
            .batch_execute(&format!("TRUNCATE TABLE {}", slot.table()))
            .await
            .map_err(|e| query_error("clear_slot", e))?;
        Ok(())
    }

    async fn insert_batch(&self, slot: Slot, records: &[Promotion]) -> SyncResult<u64> {
        if records.is_empty() {
            return Ok(0);
        }

        let mut client = self.pool.get().await.map_err(pool_error)?;
        let tx = client
            .transaction()
            .await
            .map_err(|e| query_error("begin_insert_batch", e))?;

        let mut inserted = 0u64;
        for chunk in records.chunks(INSERT_CHUNK_ROWS) {
            let mut sql = format!(
                "INSERT INTO {} (id, price, expiration_date) VALUES ",
                slot.table()
            );
            let mut params: Vec<&(dyn ToSql + Sync)> = Vec::with_capacity(chunk.len() * 3);
            for (i, promotion) in chunk.iter().enumerate() {
                if i > 0 {
                    sql.push(',');
                }
                let base = i * 3;
                sql.push_str(&format!("(${}, ${}, ${})", base + 1, base + 2, base + 3));
                params.push(&promotion.id);
                params.push(&promotion.price);
                params.push(&promotion.expiration_date);
            }
            inserted += tx
                .execute(sql.as_str(), &params)
                .await
                .map_err(|e| insert_error("insert_batch", None, e))?;
        }

        tx.commit()
            .await
            .map_err(|e| StorageError::TransactionFailed {
                reason: e.to_string(),
            })?;
        Ok(inserted)
    }

    async fn rotate(&self, expected: &SlotAssignment) -> SyncResult<SlotAssignment> {
        let mut client = self.pool.get().await.map_err(pool_error)?;
        let tx = client
            .transaction()
            .await
            .map_err(|e| query_error("begin_rotate", e))?;

        let row = tx
            .query_one(format!("{} FOR UPDATE", SELECT_ASSIGNMENT).as_str(), &[])
            .await
            .map_err(|e| query_error("lock_assignment", e))?;
        let current = row_to_assignment(&row)?;
        if current != *expected {
            return Err(StorageError::SlotConflict {
                expected: expected.to_string(),
                found: current.to_string(),
            }
            .into());
        }

        let next = current.rotated();
        tx.execute(
            "UPDATE replica_slots
             SET live = $1, shadow = $2, retired = $3, generation = $4, rotated_at = now()
             WHERE singleton",
            &[
                &next.live.as_str(),
                &next.shadow.as_str(),
                &next.retired.as_str(),
                &next.generation,
            ],
        )
        .await
        .map_err(|e| query_error("update_assignment", e))?;

        tx.batch_execute(&format!(
            "CREATE OR REPLACE VIEW promotions_live AS SELECT id, price, expiration_date FROM {}",
            next.live.table()
        ))
        .await
        .map_err(|e| query_error("repoint_live_view", e))?;

        tx.commit()
            .await
            .map_err(|e| StorageError::TransactionFailed {
                reason: e.to_string(),
            })?;
        Ok(next)
    }

    async fn get_live(&self, id: &str) -> SyncResult<Option<Promotion>> {
        let client = self.pool.get().await.map_err(pool_error)?;
        let row = client
            .query_opt(
                "SELECT id, price, expiration_date FROM promotions_live WHERE id = $1",
                &[&id],
            )
            .await
            .map_err(|e| query_error("get_live", e))?;
        match row {
            Some(row) => Ok(Some(row_to_promotion(&row)?)),
            None => Ok(None),
        }
    }

    async fn count_slot(&self, slot: Slot) -> SyncResult<u64> {
        let client = self.pool.get().await.map_err(pool_error)?;
        let row = client
            .query_one(format!("SELECT COUNT(*) FROM {}", slot.table()).as_str(), &[])
            .await
            .map_err(|e| query_error("count_slot", e))?;
        Ok(count_from_row(&row)?)
    }

    async fn live_count(&self) -> SyncResult<(SlotAssignment, u64)> {
        let client = self.pool.get().await.map_err(pool_error)?;
        // One statement, one snapshot: the view and the assignment row are
        // repointed in the same transaction by `rotate`.
        let row = client
            .query_one(
                "SELECT live, shadow, retired, generation,
                        (SELECT COUNT(*) FROM promotions_live) AS live_records
                 FROM replica_slots WHERE singleton",
                &[],
            )
            .await
            .map_err(|e| query_error("live_count", e))?;
        let assignment = row_to_assignment(&row)?;
        let live_records: i64 = row
            .try_get("live_records")
            .map_err(|e| query_error("live_count", e))?;
        Ok((assignment, live_records.max(0) as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_pool_rejects_bad_url() {
        // Pool creation parses the URL eagerly; connecting is lazy.
        let result = create_pool("not a url ::", 2);
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_connect_with_retry_gives_up() {
        let policy = RetryPolicy::new(2, std::time::Duration::from_millis(1));
        let result = connect_with_retry("postgres://nobody@127.0.0.1:1/none", 1, policy).await;
        let err = result.err().map(|e| e.to_string()).unwrap_or_default();
        assert!(err.contains("after 2 attempts"), "unexpected: {}", err);
    }
}
