//! promosync Core - Entity Types
//!
//! The promotion record, its validation rules and the shared ambient pieces
//! (errors, configuration, retry, events, metrics). Every other crate in the
//! workspace depends on this one.

pub mod config;
pub mod error;
pub mod event;
pub mod metrics;
pub mod retry;

pub use config::{
    CacheConfig, EventsConfig, HttpConfig, IngestConfig, RebuildConfig, RetrySettings, SyncConfig,
};
pub use error::{
    CacheError, ConfigError, InputError, StorageError, SyncError, SyncResult, TransportError,
    ValidationError,
};
pub use event::SyncEvent;
pub use metrics::SyncMetrics;
pub use retry::{retry, RetryError, RetryPolicy};

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

// ============================================================================
// IDENTITY TYPES
// ============================================================================

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Textual layout of expiration timestamps in input files, minus the
/// trailing zone abbreviation: `2024-01-01 00:00:00 +0000`.
pub const EXPIRATION_FORMAT: &str = "%Y-%m-%d %H:%M:%S %z";

/// Maximum length of a promotion identifier.
pub const MAX_ID_LEN: usize = 64;

static ID_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]{1,64}$").expect("Invalid promotion id regex"));

/// Check whether `id` is a well-formed promotion identifier.
///
/// UUIDs and short ids such as `id1` both qualify.
pub fn is_valid_id(id: &str) -> bool {
    ID_PATTERN.is_match(id)
}

// ============================================================================
// ENTITY
// ============================================================================

/// A single promotion record, the unit every store holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Promotion {
    pub id: String,
    pub price: f64,
    pub expiration_date: Timestamp,
}

impl Promotion {
    /// Build a promotion and check its invariants.
    pub fn new(
        id: impl Into<String>,
        price: f64,
        expiration_date: Timestamp,
    ) -> Result<Self, ValidationError> {
        let promotion = Self {
            id: id.into(),
            price,
            expiration_date,
        };
        promotion.validate()?;
        Ok(promotion)
    }

    /// Parse the three textual fields of an input line.
    pub fn parse_fields(id: &str, price: &str, expiration: &str) -> Result<Self, ValidationError> {
        let price = parse_price(price)?;
        let expiration_date = parse_expiration(expiration)?;
        Self::new(id.trim(), price, expiration_date)
    }

    /// Validate the entity invariants: well-formed id, finite positive price.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.id.is_empty() {
            return Err(ValidationError::MissingField { field: "id" });
        }
        if !is_valid_id(&self.id) {
            return Err(ValidationError::InvalidValue {
                field: "id",
                reason: format!(
                    "'{}' is not 1-{} letters, digits, '-' or '_'",
                    self.id, MAX_ID_LEN
                ),
            });
        }
        if !self.price.is_finite() {
            return Err(ValidationError::InvalidValue {
                field: "price",
                reason: format!("must be finite, got {}", self.price),
            });
        }
        if self.price <= 0.0 {
            return Err(ValidationError::InvalidValue {
                field: "price",
                reason: format!("must be positive, got {}", self.price),
            });
        }
        Ok(())
    }
}

/// Parse a price field. Positivity is checked by [`Promotion::validate`].
pub fn parse_price(raw: &str) -> Result<f64, ValidationError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(ValidationError::MissingField { field: "price" });
    }
    raw.parse::<f64>()
        .map_err(|e| ValidationError::InvalidValue {
            field: "price",
            reason: format!("'{}': {}", raw, e),
        })
}

/// Parse an expiration timestamp of the form `2024-01-01 00:00:00 +0000 UTC`.
///
/// The numeric offset is authoritative; the trailing zone abbreviation is
/// required but only checked for shape.
pub fn parse_expiration(raw: &str) -> Result<Timestamp, ValidationError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(ValidationError::MissingField {
            field: "expiration_date",
        });
    }

    let invalid = |reason: String| ValidationError::InvalidValue {
        field: "expiration_date",
        reason,
    };

    let (rest, zone) = raw
        .rsplit_once(' ')
        .ok_or_else(|| invalid(format!("'{}' has no zone abbreviation", raw)))?;

    let zone_ok = !zone.is_empty()
        && zone
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '-');
    if !zone_ok {
        return Err(invalid(format!("'{}' is not a zone abbreviation", zone)));
    }

    DateTime::parse_from_str(rest.trim_end(), EXPIRATION_FORMAT)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| invalid(format!("'{}': {}", raw, e)))
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_fields_valid() {
        let p = Promotion::parse_fields("id1", "9.99", "2024-01-01 00:00:00 +0000 UTC").unwrap();
        assert_eq!(p.id, "id1");
        assert!((p.price - 9.99).abs() < f64::EPSILON);
        assert_eq!(p.expiration_date, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_parse_expiration_applies_offset() {
        let ts = parse_expiration("2018-08-04 05:32:31 +0200 CEST").unwrap();
        assert_eq!(ts, Utc.with_ymd_and_hms(2018, 8, 4, 3, 32, 31).unwrap());
    }

    #[test]
    fn test_parse_expiration_requires_zone() {
        let err = parse_expiration("2024-01-01 00:00:00 +0000").unwrap_err();
        assert!(matches!(
            err,
            ValidationError::InvalidValue { field: "expiration_date", .. }
        ));
    }

    #[test]
    fn test_parse_expiration_rejects_garbage() {
        assert!(parse_expiration("yesterday UTC").is_err());
        assert!(parse_expiration("").is_err());
    }

    #[test]
    fn test_negative_price_rejected() {
        let err = Promotion::parse_fields("id2", "-1", "2024-01-01 00:00:00 +0000 UTC").unwrap_err();
        assert!(matches!(err, ValidationError::InvalidValue { field: "price", .. }));
        assert!(err.to_string().contains("must be positive"));
    }

    #[test]
    fn test_zero_and_nan_price_rejected() {
        let ts = Utc::now();
        assert!(Promotion::new("a", 0.0, ts).is_err());
        assert!(Promotion::new("a", f64::NAN, ts).is_err());
        assert!(Promotion::new("a", f64::INFINITY, ts).is_err());
    }

    #[test]
    fn test_unparseable_price_rejected() {
        let err = parse_price("nine").unwrap_err();
        assert!(matches!(err, ValidationError::InvalidValue { field: "price", .. }));
    }

    #[test]
    fn test_uuid_ids_accepted() {
        assert!(is_valid_id("d018ef0b-dbd9-48f1-ac1a-eb4d90e57118"));
        assert!(is_valid_id("id1"));
        assert!(!is_valid_id(""));
        assert!(!is_valid_id("has space"));
        assert!(!is_valid_id(&"x".repeat(65)));
    }

    #[test]
    fn test_json_field_names() {
        let p = Promotion::new("id1", 1.5, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
            .unwrap();
        let value = serde_json::to_value(&p).unwrap();
        assert_eq!(value["id"], "id1");
        assert_eq!(value["price"], 1.5);
        assert!(value["expiration_date"].is_string());
    }
}

// ============================================================================
// PROPERTY-BASED TESTS
// ============================================================================
