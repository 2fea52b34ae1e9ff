//! Notification producer.

use std::sync::Arc;

use async_trait::async_trait;
use promosync_core::{retry, RetryPolicy, SyncEvent, SyncMetrics, SyncResult, TransportError};

use crate::transport::Transport;

/// Publishes notifications and waits for the transport acknowledgment.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: &SyncEvent) -> SyncResult<()>;
}

/// [`EventPublisher`] that retries transient send failures.
#[derive(Clone)]
pub struct Producer {
    transport: Arc<dyn Transport>,
    policy: RetryPolicy,
    metrics: SyncMetrics,
}

impl Producer {
    pub fn new(transport: Arc<dyn Transport>, policy: RetryPolicy, metrics: SyncMetrics) -> Self {
        Self {
            transport,
            policy,
            metrics,
        }
    }
}

#[async_trait]
impl EventPublisher for Producer {
    async fn publish(&self, event: &SyncEvent) -> SyncResult<()> {
        let payload = event.encode()?;
        let transport = &self.transport;
        let payload = payload.as_slice();

        let offset = retry(self.policy, || async move { transport.send(payload).await })
            .await
            .map_err(|e| {
                tracing::error!(
                    event_type = event.event_type(),
                    attempts = e.attempts,
                    error = %e.last,
                    "Giving up on publish"
                );
                TransportError::PublishExhausted {
                    attempts: e.attempts,
                    last: e.last.to_string(),
                }
            })?;

        self.metrics.events_published.inc();
        tracing::info!(event_type = event.event_type(), offset = offset, "Event published");
        Ok(())
    }
}
