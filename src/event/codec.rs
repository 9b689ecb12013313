//! Event codec and type registry
//!
//! Maps each event kind to its stable name and round-trips payloads.
//! The dispatcher refuses to ship payloads the registry cannot decode;
//! the projection engine skips them.

use serde_json::Value;

use super::QueueEvent;

/// Errors raised while encoding or decoding event payloads.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("unknown event type: {0}")]
    UnknownEventType(String),

    #[error("malformed payload for {event_name}: {source}")]
    MalformedPayload {
        event_name: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Stable names of every event kind the pipeline knows how to carry.
pub const REGISTERED_EVENTS: &[&str] = &[
    "PatientCheckedIn",
    "PatientCalled",
    "PatientAttended",
    "CheckInCancelled",
];

/// Name-keyed serializer/deserializer for queue events.
///
/// Payloads are internally tagged, so `encode` emits a document that
/// `decode` restores when paired with the same event name. Unknown
/// fields in incoming payloads are ignored for forward compatibility;
/// missing required fields are a `MalformedPayload`.
#[derive(Debug, Clone, Copy, Default)]
pub struct EventCodec;

impl EventCodec {
    pub fn is_registered(event_name: &str) -> bool {
        REGISTERED_EVENTS.contains(&event_name)
    }

    /// Serialize an event into its wire payload.
    pub fn encode(event: &QueueEvent) -> Result<Value, CodecError> {
        serde_json::to_value(event).map_err(|source| CodecError::MalformedPayload {
            event_name: event.event_name().to_string(),
            source,
        })
    }

    /// Decode a payload recorded under the given event name.
    pub fn decode(event_name: &str, payload: &Value) -> Result<QueueEvent, CodecError> {
        if !Self::is_registered(event_name) {
            return Err(CodecError::UnknownEventType(event_name.to_string()));
        }

        // The name the log recorded is authoritative over whatever tag
        // the payload carries.
        let mut doc = payload.clone();
        if let Value::Object(fields) = &mut doc {
            fields.insert("type".to_string(), Value::String(event_name.to_string()));
        }

        serde_json::from_value(doc).map_err(|source| CodecError::MalformedPayload {
            event_name: event_name.to_string(),
            source,
        })
    }
}
