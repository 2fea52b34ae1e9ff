//! Durable transport over the primary database.
//!
//! Events are appended to `sync_events`; each consumer's resume point lives
//! in `sync_consumer_offsets`. Subscribers poll for rows at or past their
//! position.

use std::time::Duration;

use async_trait::async_trait;
use deadpool_postgres::Pool;
use promosync_core::TransportError;
use tokio_postgres::Row;

use crate::transport::{Delivery, Subscription, Transport};

/// Postgres outbox transport. Tables are created by the primary migrations.
#[derive(Clone)]
pub struct PgOutboxTransport {
    pool: Pool,
    poll_interval: Duration,
}

impl PgOutboxTransport {
    pub fn new(pool: Pool, poll_interval: Duration) -> Self {
        Self {
            pool,
            poll_interval,
        }
    }
}

fn to_i64(offset: u64) -> i64 {
    i64::try_from(offset).unwrap_or(i64::MAX)
}

fn offset_column(row: &Row, idx: usize) -> Result<u64, String> {
    let offset: i64 = row
        .try_get(idx)
        .map_err(|e| format!("undecodable offset column: {}", e))?;
    Ok(offset.max(0) as u64)
}

fn delivery_from_row(row: &Row) -> Result<Delivery, String> {
    Ok(Delivery {
        offset: offset_column(row, 0)?,
        payload: row
            .try_get(1)
            .map_err(|e| format!("undecodable payload column: {}", e))?,
    })
}

#[async_trait]
impl Transport for PgOutboxTransport {
    async fn send(&self, payload: &[u8]) -> Result<u64, TransportError> {
        let client = self.pool.get().await.map_err(|e| TransportError::Send {
            reason: e.to_string(),
        })?;
        let row = client
            .query_one(
                "INSERT INTO sync_events (payload) VALUES ($1) RETURNING event_offset",
                &[&payload],
            )
            .await
            .map_err(|e| TransportError::Send {
                reason: e.to_string(),
            })?;
        offset_column(&row, 0).map_err(|reason| TransportError::Send { reason })
    }

    async fn subscribe(&self, consumer: &str) -> Result<Box<dyn Subscription>, TransportError> {
        let client = self.pool.get().await.map_err(|e| TransportError::Subscribe {
            reason: e.to_string(),
        })?;
        let row = client
            .query_one(
                "INSERT INTO sync_consumer_offsets (consumer_name) VALUES ($1) \
                 ON CONFLICT (consumer_name) DO UPDATE SET updated_at = now() \
                 RETURNING next_offset",
                &[&consumer],
            )
            .await
            .map_err(|e| TransportError::Subscribe {
                reason: e.to_string(),
            })?;
        let position =
            offset_column(&row, 0).map_err(|reason| TransportError::Subscribe { reason })?;

        tracing::info!(consumer = %consumer, offset = position, "Outbox subscription opened");

        Ok(Box::new(OutboxSubscription {
            pool: self.pool.clone(),
            consumer: consumer.to_string(),
            position,
            poll_interval: self.poll_interval,
        }))
    }
}

struct OutboxSubscription {
    pool: Pool,
    consumer: String,
    position: u64,
    poll_interval: Duration,
}

impl OutboxSubscription {
    async fn poll_once(&self) -> Result<Option<Delivery>, String> {
        let client = self.pool.get().await.map_err(|e| e.to_string())?;
        let row = client
            .query_opt(
                "SELECT event_offset, payload FROM sync_events \
                 WHERE event_offset >= $1 ORDER BY event_offset LIMIT 1",
                &[&to_i64(self.position)],
            )
            .await
            .map_err(|e| e.to_string())?;
        row.as_ref().map(delivery_from_row).transpose()
    }
}

#[async_trait]
impl Subscription for OutboxSubscription {
    /// Polls until a row appears. Database and decode errors are logged and
    /// retried at the poll interval; the outbox never reports itself closed.
    async fn next(&mut self) -> Result<Option<Delivery>, TransportError> {
        loop {
            match self.poll_once().await {
                Ok(Some(delivery)) => {
                    self.position = delivery.offset + 1;
                    return Ok(Some(delivery));
                }
                Ok(None) => {}
                Err(reason) => {
                    tracing::warn!(
                        consumer = %self.consumer,
                        offset = self.position,
                        error = %reason,
                        "Outbox poll failed"
                    );
                }
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn commit(&mut self, offset: u64) -> Result<(), TransportError> {
        let commit_error = |reason: String| TransportError::Commit { offset, reason };
        let client = self
            .pool
            .get()
            .await
            .map_err(|e| commit_error(e.to_string()))?;
        client
            .execute(
                "UPDATE sync_consumer_offsets \
                 SET next_offset = GREATEST(next_offset, $2), updated_at = now() \
                 WHERE consumer_name = $1",
                &[&self.consumer, &to_i64(offset.saturating_add(1))],
            )
            .await
            .map_err(|e| commit_error(e.to_string()))?;
        Ok(())
    }
}
