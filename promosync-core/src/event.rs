//! Notification event types carried by the notification channel.

use crate::error::TransportError;
use serde::{Deserialize, Serialize};

/// Typed notification payload.
///
/// Serialized as `{"type":"dataset updated"}`. Any other `type` value
/// decodes as [`SyncEvent::Unknown`] so consumers can skip it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SyncEvent {
    /// The primary store finished a bulk load.
    #[serde(rename = "dataset updated")]
    DatasetUpdated,

    #[serde(other)]
    Unknown,
}

impl SyncEvent {
    /// Get the event type as a string for logging.
    pub fn event_type(&self) -> &'static str {
        match self {
            SyncEvent::DatasetUpdated => "dataset updated",
            SyncEvent::Unknown => "unknown",
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, TransportError> {
        serde_json::to_vec(self).map_err(|e| TransportError::Encode {
            reason: e.to_string(),
        })
    }

    pub fn decode(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_format() {
        let bytes = SyncEvent::DatasetUpdated.encode().unwrap();
        assert_eq!(bytes, br#"{"type":"dataset updated"}"#);
    }

    #[test]
    fn test_decode_known() {
        let event = SyncEvent::decode(br#"{"type":"dataset updated"}"#).unwrap();
        assert_eq!(event, SyncEvent::DatasetUpdated);
    }

    #[test]
    fn test_decode_unknown_type() {
        let event = SyncEvent::decode(br#"{"type":"something else"}"#).unwrap();
        assert_eq!(event, SyncEvent::Unknown);
        assert_eq!(event.event_type(), "unknown");
    }

    #[test]
    fn test_decode_malformed() {
        assert!(SyncEvent::decode(b"not json").is_err());
        assert!(SyncEvent::decode(br#"{"kind":"dataset updated"}"#).is_err());
    }
}
