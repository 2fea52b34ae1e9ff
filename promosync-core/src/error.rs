//! Error types for promosync operations

use thiserror::Error;

/// Entity-level validation failures.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    MissingField { field: &'static str },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

/// Errors raised while reading and decoding an input file.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum InputError {
    #[error("Failed to open {path}: {reason}")]
    Open { path: String, reason: String },

    #[error("Failed to read line {line}: {reason}")]
    Read { line: u64, reason: String },

    #[error("Line {line}: expected {expected} fields, got {got}")]
    FieldCount { line: u64, expected: usize, got: usize },

    #[error("Line {line}: malformed quoting: {reason}")]
    Quote { line: u64, reason: String },

    #[error("Line {line}: invalid promotion data: {source}")]
    Invalid {
        line: u64,
        #[source]
        source: ValidationError,
    },
}

impl InputError {
    /// Line number the error refers to, if any.
    pub fn line(&self) -> Option<u64> {
        match self {
            InputError::Open { .. } => None,
            InputError::Read { line, .. }
            | InputError::FieldCount { line, .. }
            | InputError::Quote { line, .. }
            | InputError::Invalid { line, .. } => Some(*line),
        }
    }
}

/// Storage layer errors (primary and replica).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Promotion not found: {id}")]
    NotFound { id: String },

    #[error("Duplicate promotion id: {id}")]
    DuplicateKey { id: String },

    #[error("Connection failed: {reason}")]
    Connection { reason: String },

    #[error("Query failed during {operation}: {reason}")]
    Query { operation: &'static str, reason: String },

    #[error("Transaction failed: {reason}")]
    TransactionFailed { reason: String },

    #[error("Slot assignment changed underneath rotation: expected {expected}, found {found}")]
    SlotConflict { expected: String, found: String },

    #[error("Migration {version} ({name}) failed: {reason}")]
    Migration {
        version: i64,
        name: &'static str,
        reason: String,
    },

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

/// Notification transport errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("Send failed: {reason}")]
    Send { reason: String },

    #[error("Subscribe failed: {reason}")]
    Subscribe { reason: String },

    #[error("Commit failed at offset {offset}: {reason}")]
    Commit { offset: u64, reason: String },

    #[error("Transport closed")]
    Closed,

    #[error("Publish failed after {attempts} attempts, last error: {last}")]
    PublishExhausted { attempts: u32, last: String },

    #[error("Event encoding failed: {reason}")]
    Encode { reason: String },
}

/// Cache backend errors. Always soft on the read path.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Cache backend error: {reason}")]
    Backend { reason: String },

    #[error("Cache entry could not be encoded: {reason}")]
    Serialization { reason: String },

    #[error("Cache entry could not be decoded: {reason}")]
    Deserialization { reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingField { field: &'static str },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: &'static str,
        value: String,
        reason: String,
    },

    #[error("Failed to read config file {path}: {reason}")]
    File { path: String, reason: String },
}

/// Master error type for all promosync errors.
#[derive(Debug, Clone, Error)]
pub enum SyncError {
    #[error("Input error: {0}")]
    Input(#[from] InputError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Internal error: {reason}")]
    Internal { reason: String },
}

impl SyncError {
    pub fn internal(reason: impl Into<String>) -> Self {
        SyncError::Internal {
            reason: reason.into(),
        }
    }

    /// True when the error is a missing-record lookup.
    pub fn is_not_found(&self) -> bool {
        matches!(self, SyncError::Storage(StorageError::NotFound { .. }))
    }
}

/// Result type alias for promosync operations.
pub type SyncResult<T> = Result<T, SyncError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_error_names_line() {
        let err = InputError::Invalid {
            line: 2,
            source: ValidationError::InvalidValue {
                field: "price",
                reason: "must be positive, got -1".to_string(),
            },
        };
        let msg = err.to_string();
        assert!(msg.contains("Line 2"));
        assert!(msg.contains("must be positive"));
        assert_eq!(err.line(), Some(2));
    }

    #[test]
    fn test_field_count_display() {
        let err = InputError::FieldCount {
            line: 7,
            expected: 3,
            got: 4,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("Line 7"));
        assert!(msg.contains("expected 3"));
        assert!(msg.contains("got 4"));
    }

    #[test]
    fn test_publish_exhausted_names_attempts() {
        let err = TransportError::PublishExhausted {
            attempts: 3,
            last: "broker unavailable".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("3 attempts"));
        assert!(msg.contains("broker unavailable"));
    }

    #[test]
    fn test_sync_error_from_storage() {
        let err: SyncError = StorageError::NotFound {
            id: "abc".to_string(),
        }
        .into();
        assert!(err.is_not_found());
        assert!(err.to_string().contains("abc"));
    }

    #[test]
    fn test_open_error_has_no_line() {
        let err = InputError::Open {
            path: "/nope.csv".to_string(),
            reason: "No such file".to_string(),
        };
        assert_eq!(err.line(), None);
    }
}
