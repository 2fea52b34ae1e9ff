//! Transport abstraction for the single notification topic.

use async_trait::async_trait;
use promosync_core::TransportError;

/// One message read from the topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Position in the topic. Strictly increasing per transport.
    pub offset: u64,
    pub payload: Vec<u8>,
}

/// Single-topic, at-least-once message transport.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Append `payload`. Returns its offset once the transport has
    /// acknowledged it.
    async fn send(&self, payload: &[u8]) -> Result<u64, TransportError>;

    /// Open a subscription for the named consumer, positioned at its last
    /// committed offset.
    async fn subscribe(&self, consumer: &str) -> Result<Box<dyn Subscription>, TransportError>;
}

/// Cursor over the topic for one consumer.
#[async_trait]
pub trait Subscription: Send {
    /// Wait for the next delivery. `Ok(None)` means the transport closed.
    ///
    /// Cancel-safe: dropping the future does not skip a delivery.
    async fn next(&mut self) -> Result<Option<Delivery>, TransportError>;

    /// Record that `offset` has been fully handled. A restarted consumer
    /// resumes after the highest committed offset.
    async fn commit(&mut self, offset: u64) -> Result<(), TransportError>;
}
