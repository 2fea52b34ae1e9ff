//! In-memory store implementations for tests and local runs.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use promosync_core::{Promotion, StorageError, SyncResult};

use crate::slots::{Slot, SlotAssignment};
use crate::traits::{PrimaryStore, ReplicaStore};

type Table = BTreeMap<String, Promotion>;

// ============================================================================
// PRIMARY
// ============================================================================

/// In-memory primary store. Records are kept ordered by id.
#[derive(Debug, Default, Clone)]
pub struct InMemoryPrimaryStore {
    records: Arc<RwLock<Table>>,
}

impl InMemoryPrimaryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with `records`, for tests.
    pub fn with_records(records: impl IntoIterator<Item = Promotion>) -> Self {
        let table = records
            .into_iter()
            .map(|p| (p.id.clone(), p))
            .collect::<Table>();
        Self {
            records: Arc::new(RwLock::new(table)),
        }
    }

    pub fn get(&self, id: &str) -> SyncResult<Option<Promotion>> {
        let records = self.records.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(records.get(id).cloned())
    }

    pub fn snapshot(&self) -> SyncResult<Vec<Promotion>> {
        let records = self.records.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(records.values().cloned().collect())
    }
}

#[async_trait]
impl PrimaryStore for InMemoryPrimaryStore {
    async fn clear(&self) -> SyncResult<()> {
        self.records
            .write()
            .map_err(|_| StorageError::LockPoisoned)?
            .clear();
        Ok(())
    }

    async fn insert(&self, promotion: &Promotion) -> SyncResult<()> {
        let mut records = self.records.write().map_err(|_| StorageError::LockPoisoned)?;
        if records.contains_key(&promotion.id) {
            return Err(StorageError::DuplicateKey {
                id: promotion.id.clone(),
            }
            .into());
        }
        records.insert(promotion.id.clone(), promotion.clone());
        Ok(())
    }

    async fn count(&self) -> SyncResult<u64> {
        let records = self.records.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(records.len() as u64)
    }

    async fn batch(&self, offset: u64, limit: u64) -> SyncResult<Vec<Promotion>> {
        let records = self.records.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(records
            .values()
            .skip(offset as usize)
            .take(limit as usize)
            .cloned()
            .collect())
    }
}

// ============================================================================
// REPLICA
// ============================================================================

/// In-memory replica store with three slots.
///
/// Point reads hold the assignment lock while they read the live slot, so
/// a rotation can never interleave with a lookup.
#[derive(Debug, Default, Clone)]
pub struct InMemoryReplicaStore {
    assignment: Arc<RwLock<SlotAssignment>>,
    slots: Arc<[RwLock<Table>; 3]>,
}

impl InMemoryReplicaStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records in the live slot, read atomically with respect to rotation.
    pub fn live_snapshot(&self) -> SyncResult<Vec<Promotion>> {
        let assignment = self
            .assignment
            .read()
            .map_err(|_| StorageError::LockPoisoned)?;
        let slot = self.slots[assignment.live.index()]
            .read()
            .map_err(|_| StorageError::LockPoisoned)?;
        Ok(slot.values().cloned().collect())
    }

    pub fn slot_snapshot(&self, slot: Slot) -> SyncResult<Vec<Promotion>> {
        let table = self.slots[slot.index()]
            .read()
            .map_err(|_| StorageError::LockPoisoned)?;
        Ok(table.values().cloned().collect())
    }

    /// Seed a slot directly, bypassing the rebuild path. Test helper.
    pub fn seed_slot(&self, slot: Slot, records: impl IntoIterator<Item = Promotion>) -> SyncResult<()> {
        let mut table = self.slots[slot.index()]
            .write()
            .map_err(|_| StorageError::LockPoisoned)?;
        for record in records {
            table.insert(record.id.clone(), record);
        }
        Ok(())
    }
}

#[async_trait]
impl ReplicaStore for InMemoryReplicaStore {
    async fn assignment(&self) -> SyncResult<SlotAssignment> {
        let assignment = self
            .assignment
            .read()
            .map_err(|_| StorageError::LockPoisoned)?;
        Ok(*assignment)
    }

    async fn clear_slot(&self, slot: Slot) -> SyncResult<()> {
        self.slots[slot.index()]
            .write()
            .map_err(|_| StorageError::LockPoisoned)?
            .clear();
        Ok(())
    }

    async fn insert_batch(&self, slot: Slot, records: &[Promotion]) -> SyncResult<u64> {
        let mut table = self.slots[slot.index()]
            .write()
            .map_err(|_| StorageError::LockPoisoned)?;
        // All-or-nothing, like the single transaction of the SQL backend.
        if let Some(dup) = records.iter().find(|r| table.contains_key(&r.id)) {
            return Err(StorageError::DuplicateKey { id: dup.id.clone() }.into());
        }
        for record in records {
            table.insert(record.id.clone(), record.clone());
        }
        Ok(records.len() as u64)
    }

    async fn rotate(&self, expected: &SlotAssignment) -> SyncResult<SlotAssignment> {
        let mut assignment = self
            .assignment
            .write()
            .map_err(|_| StorageError::LockPoisoned)?;
        if *assignment != *expected {
            return Err(StorageError::SlotConflict {
                expected: expected.to_string(),
                found: assignment.to_string(),
            }
            .into());
        }
        *assignment = assignment.rotated();
        Ok(*assignment)
    }

    async fn get_live(&self, id: &str) -> SyncResult<Option<Promotion>> {
        let assignment = self
            .assignment
            .read()
            .map_err(|_| StorageError::LockPoisoned)?;
        let slot = self.slots[assignment.live.index()]
            .read()
            .map_err(|_| StorageError::LockPoisoned)?;
        Ok(slot.get(id).cloned())
    }

    async fn count_slot(&self, slot: Slot) -> SyncResult<u64> {
        let table = self.slots[slot.index()]
            .read()
            .map_err(|_| StorageError::LockPoisoned)?;
        Ok(table.len() as u64)
    }

    async fn live_count(&self) -> SyncResult<(SlotAssignment, u64)> {
        // Holding the assignment read lock blocks `rotate` until counted.
        let assignment = self
            .assignment
            .read()
            .map_err(|_| StorageError::LockPoisoned)?;
        let table = self.slots[assignment.live.index()]
            .read()
            .map_err(|_| StorageError::LockPoisoned)?;
        Ok((*assignment, table.len() as u64))
    }
}

// ============================================================================
// TESTS
// ============================================================================
