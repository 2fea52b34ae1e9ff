//! In-memory broker for tests and single-process runs.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use promosync_core::TransportError;
use tokio::sync::watch;

use crate::transport::{Delivery, Subscription, Transport};

#[derive(Debug, Default)]
struct BrokerState {
    log: Vec<Vec<u8>>,
    /// Next offset to deliver, per consumer name.
    committed: HashMap<String, u64>,
    closed: bool,
}

/// Append-only in-memory topic with per-consumer committed offsets.
///
/// Subscribers wake through a `watch` channel carrying a change counter.
#[derive(Clone)]
pub struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
    changes: Arc<watch::Sender<u64>>,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBroker {
    pub fn new() -> Self {
        let (changes, _) = watch::channel(0u64);
        Self {
            state: Arc::new(Mutex::new(BrokerState::default())),
            changes: Arc::new(changes),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BrokerState>, TransportError> {
        self.state.lock().map_err(|_| TransportError::Send {
            reason: "broker lock poisoned".to_string(),
        })
    }

    fn notify(&self) {
        self.changes.send_modify(|version| *version += 1);
    }

    /// Stop accepting sends; subscribers drain what is left and then end.
    pub fn close(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.closed = true;
        }
        self.notify();
    }

    /// Every payload sent so far, in order.
    pub fn messages(&self) -> Vec<Vec<u8>> {
        self.state
            .lock()
            .map(|s| s.log.clone())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.state.lock().map(|s| s.log.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Next offset `consumer` would receive after a restart.
    pub fn committed(&self, consumer: &str) -> u64 {
        self.state
            .lock()
            .ok()
            .and_then(|s| s.committed.get(consumer).copied())
            .unwrap_or(0)
    }
}

#[async_trait]
impl Transport for InMemoryBroker {
    async fn send(&self, payload: &[u8]) -> Result<u64, TransportError> {
        let offset = {
            let mut state = self.lock()?;
            if state.closed {
                return Err(TransportError::Closed);
            }
            state.log.push(payload.to_vec());
            (state.log.len() - 1) as u64
        };
        self.notify();
        Ok(offset)
    }

    async fn subscribe(&self, consumer: &str) -> Result<Box<dyn Subscription>, TransportError> {
        let position = {
            let mut state = self.state.lock().map_err(|_| TransportError::Subscribe {
                reason: "broker lock poisoned".to_string(),
            })?;
            *state.committed.entry(consumer.to_string()).or_insert(0)
        };
        Ok(Box::new(InMemorySubscription {
            broker: self.clone(),
            consumer: consumer.to_string(),
            position,
            changes: self.changes.subscribe(),
        }))
    }
}

struct InMemorySubscription {
    broker: InMemoryBroker,
    consumer: String,
    position: u64,
    changes: watch::Receiver<u64>,
}

#[async_trait]
impl Subscription for InMemorySubscription {
    async fn next(&mut self) -> Result<Option<Delivery>, TransportError> {
        loop {
            // Mark seen before inspecting state so a concurrent send wakes us.
            self.changes.borrow_and_update();
            {
                let state = self.broker.lock()?;
                if let Some(payload) = state.log.get(self.position as usize) {
                    let delivery = Delivery {
                        offset: self.position,
                        payload: payload.clone(),
                    };
                    self.position += 1;
                    return Ok(Some(delivery));
                }
                if state.closed {
                    return Ok(None);
                }
            }
            if self.changes.changed().await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn commit(&mut self, offset: u64) -> Result<(), TransportError> {
        let mut state = self.broker.state.lock().map_err(|_| TransportError::Commit {
            offset,
            reason: "broker lock poisoned".to_string(),
        })?;
        let next = state.committed.entry(self.consumer.clone()).or_insert(0);
        *next = (*next).max(offset + 1);
        Ok(())
    }
}
