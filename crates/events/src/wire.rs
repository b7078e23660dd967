//! Wire format.
//!
//! A stream entry is an opaque envelope with a single field named `event`
//! whose value is the event serialized as a flat, self-describing JSON
//! object (field names preserved, timestamps in RFC 3339 sortable form).
//!
//! Decoding distinguishes two permanent failure modes the consumer treats
//! differently in logs: a payload that is not valid event JSON at all
//! ([`WireError::Malformed`]) and a structurally valid event whose type has
//! no variant in this deployment ([`WireError::UnknownEventType`]). Both are
//! acknowledged without retry since replaying them cannot succeed.

use thiserror::Error;

use crate::event::{Event, EventKind};

/// Field name carrying the serialized event inside a stream entry.
pub const ENVELOPE_FIELD: &str = "event";

#[derive(Debug, Error)]
pub enum WireError {
    #[error("malformed stream entry: {0}")]
    Malformed(String),

    #[error("unknown event type: {0}")]
    UnknownEventType(String),
}

/// Serialize an event for the stream.
pub fn encode(event: &Event) -> Result<String, WireError> {
    serde_json::to_string(event).map_err(|e| WireError::Malformed(e.to_string()))
}

/// Deserialize a stream entry payload back into an event.
pub fn decode(payload: &str) -> Result<Event, WireError> {
    let value: serde_json::Value =
        serde_json::from_str(payload).map_err(|e| WireError::Malformed(e.to_string()))?;

    let event_type = value
        .get("event_type")
        .and_then(|v| v.as_str())
        .ok_or_else(|| WireError::Malformed("missing event_type field".to_string()))?;

    if event_type.parse::<EventKind>().is_err() {
        return Err(WireError::UnknownEventType(event_type.to_string()));
    }

    serde_json::from_value(value).map_err(|e| WireError::Malformed(e.to_string()))
}
