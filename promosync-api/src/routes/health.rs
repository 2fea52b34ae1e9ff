//! Process and replica health.
//!
//! `/health/ping` never touches a backend. `/health/replica` reads the slot
//! assignment and the live slot's size in one snapshot, so it fails with
//! 503 when the replica database is unreachable.

use axum::{extract::State, routing::get, Json, Router};
use promosync_storage::Slot;
use serde::{Deserialize, Serialize};

use crate::error::ApiResult;
use crate::state::AppState;

/// Body of `GET /health/replica`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaHealth {
    pub live_slot: Slot,
    /// Completed rotations since the replica was created.
    pub generation: i64,
    pub live_records: u64,
    pub version: String,
    pub uptime_seconds: u64,
}

/// GET /health/ping
pub async fn ping() -> &'static str {
    "pong"
}

/// GET /health/replica
pub async fn replica(State(state): State<AppState>) -> ApiResult<Json<ReplicaHealth>> {
    let (assignment, live_records) = state.replica.live_count().await?;

    Ok(Json(ReplicaHealth {
        live_slot: assignment.live,
        generation: assignment.generation,
        live_records,
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
    }))
}

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/ping", get(ping))
        .route("/replica", get(replica))
}
