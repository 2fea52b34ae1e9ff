//! promosync Events - Notification Channel
//!
//! A single logical topic carrying [`SyncEvent`](promosync_core::SyncEvent)
//! notifications from the loader to the rebuild coordinator.
//!
//! # Delivery
//!
//! - Producers wait for the transport acknowledgment and retry transient
//!   send failures under a [`RetryPolicy`](promosync_core::RetryPolicy).
//! - Consumers handle one delivery at a time and commit its offset after
//!   the handler returns. A restarted consumer may see a delivery twice.
//!
//! # Transports
//!
//! - [`InMemoryBroker`]: process-local, for tests and single-node runs
//! - [`PgOutboxTransport`]: durable `sync_events` table in the primary database

mod consumer;
mod memory;
mod outbox;
mod producer;
mod transport;

pub use consumer::{Consumer, ConsumerStats, EventHandler};
pub use memory::InMemoryBroker;
pub use outbox::PgOutboxTransport;
pub use producer::{EventPublisher, Producer};
pub use transport::{Delivery, Subscription, Transport};

pub use promosync_core::SyncEvent;
