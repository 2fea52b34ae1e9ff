//! Error Types for the promosync API
//!
//! - [`ErrorCode`] categorizes failures and fixes their HTTP status
//! - [`ApiError`] is the JSON body returned by every failing endpoint
//!
//! Engine errors convert through `From<SyncError>`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use promosync_core::{ConfigError, StorageError, SyncError};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// ERROR CODE ENUM
// ============================================================================

/// Error codes for API responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // ========================================================================
    // Validation Errors (400)
    // ========================================================================
    /// A record failed entity validation
    ValidationFailed,

    /// Request or input file is malformed
    InvalidInput,

    /// Required request field is missing
    MissingField,

    // ========================================================================
    // Not Found Errors (404)
    // ========================================================================
    EntityNotFound,

    // ========================================================================
    // Availability Errors (503)
    // ========================================================================
    /// A backing service (database, transport) is unreachable
    ServiceUnavailable,

    // ========================================================================
    // Server Errors (500)
    // ========================================================================
    DatabaseError,

    InternalError,
}

impl ErrorCode {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorCode::ValidationFailed | ErrorCode::InvalidInput | ErrorCode::MissingField => {
                StatusCode::BAD_REQUEST
            }
            ErrorCode::EntityNotFound => StatusCode::NOT_FOUND,
            ErrorCode::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorCode::DatabaseError | ErrorCode::InternalError => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorCode::ValidationFailed => "VALIDATION_FAILED",
            ErrorCode::InvalidInput => "INVALID_INPUT",
            ErrorCode::MissingField => "MISSING_FIELD",
            ErrorCode::EntityNotFound => "ENTITY_NOT_FOUND",
            ErrorCode::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            ErrorCode::DatabaseError => "DATABASE_ERROR",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        };
        f.write_str(s)
    }
}

// ============================================================================
// API ERROR STRUCT
// ============================================================================

/// Structured error response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        self.code.status_code()
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::EntityNotFound, message)
    }

    pub fn missing_field(field: &str) -> Self {
        Self::new(ErrorCode::MissingField, format!("Missing required field: {}", field))
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidInput, message)
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        (status, Json(self)).into_response()
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = Result<T, ApiError>;

// ============================================================================
// CONVERSIONS
// ============================================================================

impl From<SyncError> for ApiError {
    fn from(err: SyncError) -> Self {
        match &err {
            SyncError::Storage(StorageError::NotFound { id }) => {
                ApiError::not_found(format!("Promotion not found: {}", id))
            }
            SyncError::Input(_) => ApiError::invalid_input(err.to_string()),
            SyncError::Validation(_) => ApiError::new(ErrorCode::ValidationFailed, err.to_string()),
            SyncError::Transport(_) | SyncError::Storage(StorageError::Connection { .. }) => {
                tracing::error!(error = %err, "Backing service unavailable");
                ApiError::new(ErrorCode::ServiceUnavailable, err.to_string())
            }
            SyncError::Storage(_) => {
                tracing::error!(error = %err, "Storage error");
                // Keep driver detail out of responses.
                ApiError::new(ErrorCode::DatabaseError, "Database operation failed")
            }
            SyncError::Cache(_) | SyncError::Config(_) | SyncError::Internal { .. } => {
                tracing::error!(error = %err, "Internal error");
                ApiError::internal_error(err.to_string())
            }
        }
    }
}

impl From<ConfigError> for ApiError {
    fn from(err: ConfigError) -> Self {
        SyncError::from(err).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use promosync_core::{InputError, TransportError, ValidationError};

    #[test]
    fn test_error_code_serialization() {
        let json = serde_json::to_string(&ErrorCode::EntityNotFound).unwrap();
        assert_eq!(json, "\"ENTITY_NOT_FOUND\"");
        assert_eq!(ErrorCode::EntityNotFound.to_string(), "ENTITY_NOT_FOUND");
    }

    #[test]
    fn test_sync_error_status_mapping() {
        let cases: Vec<(SyncError, StatusCode)> = vec![
            (
                StorageError::NotFound { id: "x".into() }.into(),
                StatusCode::NOT_FOUND,
            ),
            (
                InputError::FieldCount {
                    line: 2,
                    expected: 3,
                    got: 1,
                }
                .into(),
                StatusCode::BAD_REQUEST,
            ),
            (
                ValidationError::MissingField { field: "id" }.into(),
                StatusCode::BAD_REQUEST,
            ),
            (TransportError::Closed.into(), StatusCode::SERVICE_UNAVAILABLE),
            (
                StorageError::Connection {
                    reason: "refused".into(),
                }
                .into(),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                StorageError::Query {
                    operation: "insert",
                    reason: "syntax".into(),
                }
                .into(),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (SyncError::internal("boom"), StatusCode::INTERNAL_SERVER_ERROR),
        ];

        for (err, status) in cases {
            let api: ApiError = err.into();
            assert_eq!(api.status_code(), status, "{}", api);
        }
    }

    #[test]
    fn test_storage_detail_not_leaked() {
        let api: ApiError = SyncError::from(StorageError::Query {
            operation: "insert",
            reason: "relation promotions_secret does not exist".into(),
        })
        .into();
        assert!(!api.message.contains("promotions_secret"));
    }
}
