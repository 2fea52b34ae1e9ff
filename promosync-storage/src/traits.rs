//! Store traits for the primary (write) and replica (read) sides.

use async_trait::async_trait;
use promosync_core::{Promotion, SyncResult};

use crate::slots::{Slot, SlotAssignment};

/// Write-optimized authoritative store, rewritten wholesale by each load.
///
/// Implementations must be safe to share across loader workers.
#[async_trait]
pub trait PrimaryStore: Send + Sync {
    /// Remove every record.
    async fn clear(&self) -> SyncResult<()>;

    /// Insert one record in its own transaction.
    ///
    /// Fails with `StorageError::DuplicateKey` if the id already exists.
    async fn insert(&self, promotion: &Promotion) -> SyncResult<()>;

    /// Current number of records.
    async fn count(&self) -> SyncResult<u64>;

    /// Records at positions `[offset, offset + limit)` ordered by id.
    async fn batch(&self, offset: u64, limit: u64) -> SyncResult<Vec<Promotion>>;
}

/// Read-optimized store made of three rotating slots.
#[async_trait]
pub trait ReplicaStore: Send + Sync {
    /// Current role assignment.
    async fn assignment(&self) -> SyncResult<SlotAssignment>;

    /// Remove every record from `slot`.
    async fn clear_slot(&self, slot: Slot) -> SyncResult<()>;

    /// Insert `records` into `slot` as a single transaction.
    async fn insert_batch(&self, slot: Slot, records: &[Promotion]) -> SyncResult<u64>;

    /// Atomically promote the shadow slot.
    ///
    /// Succeeds only if the stored assignment still equals `expected`;
    /// otherwise fails with `StorageError::SlotConflict` and changes nothing.
    async fn rotate(&self, expected: &SlotAssignment) -> SyncResult<SlotAssignment>;

    /// Point lookup against the live slot.
    async fn get_live(&self, id: &str) -> SyncResult<Option<Promotion>>;

    /// Number of records in `slot`.
    async fn count_slot(&self, slot: Slot) -> SyncResult<u64>;

    /// Current assignment and the live slot's record count, read as one
    /// snapshot so a concurrent rotation cannot split them.
    async fn live_count(&self) -> SyncResult<(SlotAssignment, u64)>;
}
