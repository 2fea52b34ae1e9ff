//! Cache layer for point lookups.
//!
//! [`CacheAside`] fronts the live replica slot with a byte-oriented
//! [`CacheBackend`]. Two backends ship: [`InMemoryCache`] for tests and
//! local runs, and [`LmdbCacheBackend`] for a cache that survives restarts.

pub mod lmdb_backend;
pub mod memory;
pub mod read_through;
pub mod traits;

pub use lmdb_backend::{LmdbCacheBackend, LmdbCacheError};
pub use memory::InMemoryCache;
pub use read_through::{cache_key, CacheAside};
pub use traits::{CacheBackend, CacheStats};
