//! Promotion REST endpoints.

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Form, Json, Router,
};
use promosync_core::Promotion;
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Form body of `POST /process-csv`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProcessCsvRequest {
    pub filename: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessCsvResponse {
    pub message: String,
    pub records: u64,
}

/// GET /promotions/:id
pub async fn get_promotion(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Promotion>> {
    let promotion = state.service.get_promotion(&id).await?;
    Ok(Json(promotion))
}

/// POST /process-csv
///
/// Loads the named file into the primary store and waits for the load to
/// finish. The replica is rebuilt asynchronously afterwards.
pub async fn process_csv(
    State(state): State<AppState>,
    Form(request): Form<ProcessCsvRequest>,
) -> ApiResult<Json<ProcessCsvResponse>> {
    let filename = request
        .filename
        .filter(|f| !f.trim().is_empty())
        .ok_or_else(|| ApiError::missing_field("filename"))?;

    tracing::info!(filename = %filename, "Processing input file");
    let report = state.service.process_file(&filename).await?;

    Ok(Json(ProcessCsvResponse {
        message: "CSV processed successfully".to_string(),
        records: report.records,
    }))
}

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/promotions/:id", get(get_promotion))
        .route("/process-csv", post(process_csv))
}
