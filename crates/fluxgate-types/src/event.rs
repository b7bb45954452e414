//! The canonical event record.
//!
//! Events are producer-assigned, self-describing records. The gateway treats
//! the `data` payload as an opaque JSON string; only the rule engine parses
//! it, lazily, when a condition reaches into `data.*`.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Maximum encoded event size in bytes (1 MiB).
///
/// Events whose JSON encoding exceeds this are rejected at ingestion.
pub const MAX_EVENT_SIZE: usize = 1024 * 1024;

/// A single event flowing through the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Producer-assigned identifier. Used for dedup/audit downstream but not
    /// enforced unique by the gateway.
    pub event_id: String,
    /// Dotted lowercase type, e.g. `order.created`.
    pub event_type: String,
    /// Producer identifier.
    pub source: String,
    /// Seconds since the Unix epoch. Stamped at ingestion when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    /// Self-describing JSON payload, opaque to routing.
    pub data: String,
    /// Producer-supplied metadata.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

impl Event {
    /// Create an event with the required fields set.
    #[must_use]
    pub fn new(
        event_id: impl Into<String>,
        event_type: impl Into<String>,
        source: impl Into<String>,
        data: impl Into<String>,
    ) -> Self {
        Self {
            event_id: event_id.into(),
            event_type: event_type.into(),
            source: source.into(),
            timestamp: None,
            data: data.into(),
            metadata: HashMap::new(),
        }
    }

    /// Attach a metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Check required fields.
    ///
    /// Returns the machine-usable rejection reason for the first missing
    /// field, in the order `event_id`, `event_type`, `source`, `data`.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.event_id.is_empty() {
            return Err(reason::EVENT_ID_REQUIRED);
        }
        if self.event_type.is_empty() {
            return Err(reason::EVENT_TYPE_REQUIRED);
        }
        if self.source.is_empty() {
            return Err(reason::SOURCE_REQUIRED);
        }
        if self.data.is_empty() {
            return Err(reason::DATA_REQUIRED);
        }
        Ok(())
    }

    /// Fill in the ingestion timestamp if the producer omitted it.
    pub fn stamp(&mut self, now_secs: i64) {
        if self.timestamp.is_none() {
            self.timestamp = Some(now_secs);
        }
    }
}

/// Machine-usable rejection reason tokens, surfaced in per-element batch
/// results and single-event error bodies.
pub mod reason {
    /// `event_id` was empty.
    pub const EVENT_ID_REQUIRED: &str = "event_id_required";
    /// `event_type` was empty.
    pub const EVENT_TYPE_REQUIRED: &str = "event_type_required";
    /// `source` was empty.
    pub const SOURCE_REQUIRED: &str = "source_required";
    /// `data` was empty.
    pub const DATA_REQUIRED: &str = "data_required";
    /// Encoded size exceeded [`super::MAX_EVENT_SIZE`].
    pub const EVENT_TOO_LARGE: &str = "event_too_large";
    /// The element was not a decodable event object.
    pub const MALFORMED_EVENT: &str = "malformed_event";
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn validate_accepts_complete_event() {
        let event = Event::new("e1", "user.created", "auth", r#"{"email":"a@b"}"#);
        assert!(event.validate().is_ok());
    }

    #[test]
    fn validate_reports_first_missing_field() {
        let mut event = Event::new("", "", "", "");
        assert_eq!(event.validate(), Err(reason::EVENT_ID_REQUIRED));
        event.event_id = "e1".into();
        assert_eq!(event.validate(), Err(reason::EVENT_TYPE_REQUIRED));
        event.event_type = "t".into();
        assert_eq!(event.validate(), Err(reason::SOURCE_REQUIRED));
        event.source = "s".into();
        assert_eq!(event.validate(), Err(reason::DATA_REQUIRED));
    }

    #[test]
    fn stamp_only_fills_missing_timestamp() {
        let mut event = Event::new("e1", "t", "s", "{}");
        event.stamp(100);
        assert_eq!(event.timestamp, Some(100));
        event.stamp(200);
        assert_eq!(event.timestamp, Some(100));
    }

    #[test]
    fn serde_roundtrip_preserves_fields() {
        let event = Event::new("e1", "order.created", "shop", r#"{"total":12}"#)
            .with_metadata("region", "eu");
        let json = serde_json::to_string(&event).unwrap();
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(event, back);
    }

    #[test]
    fn absent_timestamp_is_not_serialized() {
        let event = Event::new("e1", "t", "s", "{}");
        let json = serde_json::to_string(&event).unwrap();
        assert!(!json.contains("timestamp"));
    }
}
