//! Notification consumer.
//!
//! Deliveries are handled one at a time and committed only after the
//! handler returns, giving at-least-once processing.

use std::sync::Arc;

use async_trait::async_trait;
use promosync_core::{SyncEvent, SyncResult};
use tokio::sync::watch;

use crate::transport::{Delivery, Subscription, Transport};

/// Reacts to decoded notifications.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &SyncEvent) -> SyncResult<()>;
}

/// Counters for one consumer run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    pub delivered: u64,
    pub handled: u64,
    pub failed: u64,
    /// Malformed or unrecognized payloads.
    pub skipped: u64,
}

/// Subscribes as a named consumer and dispatches to an [`EventHandler`].
pub struct Consumer {
    transport: Arc<dyn Transport>,
    name: String,
}

impl Consumer {
    pub fn new(transport: Arc<dyn Transport>, name: impl Into<String>) -> Self {
        Self {
            transport,
            name: name.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Consume until the transport closes.
    pub async fn run(&self, handler: &dyn EventHandler) -> SyncResult<ConsumerStats> {
        self.consume(handler, None).await
    }

    /// Consume until the transport closes or `shutdown` turns true (or its
    /// sender is dropped). An in-flight handler is allowed to finish.
    pub async fn run_until(
        &self,
        handler: &dyn EventHandler,
        shutdown: watch::Receiver<bool>,
    ) -> SyncResult<ConsumerStats> {
        self.consume(handler, Some(shutdown)).await
    }

    async fn consume(
        &self,
        handler: &dyn EventHandler,
        mut shutdown: Option<watch::Receiver<bool>>,
    ) -> SyncResult<ConsumerStats> {
        let mut subscription = self.transport.subscribe(&self.name).await?;
        let mut stats = ConsumerStats::default();

        tracing::info!(consumer = %self.name, "Consumer started");

        loop {
            let next = match shutdown.as_mut() {
                Some(rx) => {
                    if *rx.borrow() {
                        break;
                    }
                    tokio::select! {
                        changed = rx.changed() => {
                            if changed.is_err() || *rx.borrow() {
                                break;
                            }
                            continue;
                        }
                        next = subscription.next() => next,
                    }
                }
                None => subscription.next().await,
            };

            let Some(delivery) = next? else {
                tracing::info!(consumer = %self.name, "Transport closed");
                break;
            };

            stats.delivered += 1;
            self.dispatch(handler, &delivery, &mut stats).await;
            self.commit(subscription.as_mut(), delivery.offset).await;
        }

        tracing::info!(
            consumer = %self.name,
            delivered = stats.delivered,
            handled = stats.handled,
            failed = stats.failed,
            skipped = stats.skipped,
            "Consumer stopped"
        );
        Ok(stats)
    }

    async fn dispatch(&self, handler: &dyn EventHandler, delivery: &Delivery, stats: &mut ConsumerStats) {
        let event = match SyncEvent::decode(&delivery.payload) {
            Ok(SyncEvent::Unknown) => {
                tracing::warn!(consumer = %self.name, offset = delivery.offset, "Skipping unrecognized event type");
                stats.skipped += 1;
                return;
            }
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(
                    consumer = %self.name,
                    offset = delivery.offset,
                    error = %e,
                    "Skipping malformed event"
                );
                stats.skipped += 1;
                return;
            }
        };

        tracing::debug!(consumer = %self.name, offset = delivery.offset, event_type = event.event_type(), "Handling event");
        match handler.handle(&event).await {
            Ok(()) => stats.handled += 1,
            Err(e) => {
                tracing::error!(
                    consumer = %self.name,
                    offset = delivery.offset,
                    event_type = event.event_type(),
                    error = %e,
                    "Event handler failed"
                );
                stats.failed += 1;
            }
        }
    }

    async fn commit(&self, subscription: &mut dyn Subscription, offset: u64) {
        if let Err(e) = subscription.commit(offset).await {
            tracing::warn!(consumer = %self.name, offset = offset, error = %e, "Offset commit failed");
        }
    }
}
