//! promosync API - HTTP surface over the synchronization engine
//!
//! Exposes promotion lookups and CSV ingestion over REST, plus health and
//! Prometheus endpoints. [`bootstrap`] wires the Postgres, LMDB and outbox
//! backends into an [`AppState`].

pub mod bootstrap;
pub mod error;
pub mod routes;
pub mod state;
pub mod telemetry;

pub use bootstrap::{build, spawn_cache_janitor, spawn_consumer, Application};
pub use error::{ApiError, ApiResult, ErrorCode};
pub use routes::create_router;
pub use state::AppState;
