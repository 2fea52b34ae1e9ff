//! promosync Storage - Store Traits and Implementations
//!
//! Defines the primary and replica store abstractions, the three-slot
//! replica rotation, the cache-aside read path and their in-memory and
//! Postgres/LMDB implementations.

pub mod cache;
pub mod memory;
pub mod migrations;
pub mod postgres;
pub mod slots;
pub mod traits;

pub use cache::{
    cache_key, CacheAside, CacheBackend, CacheStats, InMemoryCache, LmdbCacheBackend,
    LmdbCacheError,
};
pub use memory::{InMemoryPrimaryStore, InMemoryReplicaStore};
pub use migrations::{
    apply_migrations, apply_migrations_with_retry, Migration, PRIMARY_MIGRATIONS,
    REPLICA_MIGRATIONS,
};
pub use postgres::{connect_with_retry, create_pool, probe, PgPrimaryStore, PgReplicaStore};
pub use slots::{Slot, SlotAssignment};
pub use traits::{PrimaryStore, ReplicaStore};
