//! Event envelope records
//!
//! `UncommittedEvent` is what the domain layer hands to the writer;
//! `StoredEvent` is what comes back out of the log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::QueueEvent;

/// A recorded event as read back from the log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredEvent {
    pub event_id: Uuid,
    pub aggregate_id: Uuid,
    /// Per-aggregate monotonic version, starting at 1.
    pub version: i64,
    pub event_name: String,
    pub payload: serde_json::Value,
    pub occurred_at: DateTime<Utc>,
    pub correlation_id: Option<Uuid>,
    pub causation_id: Option<Uuid>,
    pub actor: Option<String>,
    pub idempotency_key: String,
    pub schema_version: i32,
}

/// An event produced by the domain layer that has not been persisted
/// yet. The writer stamps the version on append; everything else is
/// fixed at construction so a retried save carries identical identity.
#[derive(Debug, Clone)]
pub struct UncommittedEvent {
    pub event_id: Uuid,
    pub event: QueueEvent,
    pub occurred_at: DateTime<Utc>,
    pub correlation_id: Option<Uuid>,
    pub causation_id: Option<Uuid>,
    pub actor: Option<String>,
    pub idempotency_key: String,
    pub schema_version: i32,
}

impl UncommittedEvent {
    /// Wrap a queue event with fresh identity metadata. The occurred-at
    /// instant comes from the event itself.
    pub fn new(event: QueueEvent) -> Self {
        let event_id = Uuid::new_v4();
        Self {
            event_id,
            occurred_at: event.occurred_at(),
            correlation_id: None,
            causation_id: None,
            actor: None,
            idempotency_key: event_id.to_string(),
            schema_version: 1,
            event,
        }
    }

    pub fn with_correlation_id(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    pub fn with_causation_id(mut self, causation_id: Uuid) -> Self {
        self.causation_id = Some(causation_id);
        self
    }

    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    /// Override the generated idempotency key, e.g. with a key derived
    /// from the command that produced the event.
    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = key.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uncommitted_event_builder() {
        let correlation_id = Uuid::new_v4();
        let causation_id = Uuid::new_v4();
        let checked_in_at = Utc::now();

        let event = UncommittedEvent::new(QueueEvent::PatientCheckedIn {
            patient_id: Uuid::new_v4(),
            patient_name: "Rosa Lindgren".to_string(),
            priority: "normal".to_string(),
            checked_in_at,
        })
        .with_correlation_id(correlation_id)
        .with_causation_id(causation_id)
        .with_actor("reception-desk")
        .with_idempotency_key("checkin:front-desk:42");

        assert_eq!(event.correlation_id, Some(correlation_id));
        assert_eq!(event.causation_id, Some(causation_id));
        assert_eq!(event.actor.as_deref(), Some("reception-desk"));
        assert_eq!(event.idempotency_key, "checkin:front-desk:42");
        assert_eq!(event.occurred_at, checked_in_at);
        assert_eq!(event.schema_version, 1);
    }

    #[test]
    fn test_default_idempotency_key_tracks_event_id() {
        let event = UncommittedEvent::new(QueueEvent::PatientAttended {
            patient_id: Uuid::new_v4(),
            attended_at: Utc::now(),
        });

        assert_eq!(event.idempotency_key, event.event_id.to_string());
    }
}
