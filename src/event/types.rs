//! Waiting-queue events
//!
//! Immutable facts about one waiting queue. The pipeline itself treats
//! them as opaque payloads; the concrete variants live here so the codec
//! registry and the projection handlers have something to register.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Events of the waiting-queue aggregate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum QueueEvent {
    /// A patient joined the queue.
    PatientCheckedIn {
        patient_id: Uuid,
        patient_name: String,
        priority: String,
        checked_in_at: DateTime<Utc>,
    },

    /// A patient was called to a station.
    PatientCalled {
        patient_id: Uuid,
        station: String,
        called_at: DateTime<Utc>,
    },

    /// A called patient was attended.
    PatientAttended {
        patient_id: Uuid,
        attended_at: DateTime<Utc>,
    },

    /// A check-in was cancelled before the patient was called.
    CheckInCancelled {
        patient_id: Uuid,
        reason: Option<String>,
        cancelled_at: DateTime<Utc>,
    },
}

impl QueueEvent {
    /// Stable name used as the codec key and the broker routing key.
    pub fn event_name(&self) -> &'static str {
        match self {
            QueueEvent::PatientCheckedIn { .. } => "PatientCheckedIn",
            QueueEvent::PatientCalled { .. } => "PatientCalled",
            QueueEvent::PatientAttended { .. } => "PatientAttended",
            QueueEvent::CheckInCancelled { .. } => "CheckInCancelled",
        }
    }

    /// The patient this event relates to.
    pub fn patient_id(&self) -> Uuid {
        match self {
            QueueEvent::PatientCheckedIn { patient_id, .. } => *patient_id,
            QueueEvent::PatientCalled { patient_id, .. } => *patient_id,
            QueueEvent::PatientAttended { patient_id, .. } => *patient_id,
            QueueEvent::CheckInCancelled { patient_id, .. } => *patient_id,
        }
    }

    /// Timestamp carried by the event itself. Projections use this as
    /// their only clock.
    pub fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            QueueEvent::PatientCheckedIn { checked_in_at, .. } => *checked_in_at,
            QueueEvent::PatientCalled { called_at, .. } => *called_at,
            QueueEvent::PatientAttended { attended_at, .. } => *attended_at,
            QueueEvent::CheckInCancelled { cancelled_at, .. } => *cancelled_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_event_serialization() {
        let event = QueueEvent::PatientCheckedIn {
            patient_id: Uuid::new_v4(),
            patient_name: "Ada Martin".to_string(),
            priority: "high".to_string(),
            checked_in_at: Utc::now(),
        };

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("PatientCheckedIn"));

        let deserialized: QueueEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(event.event_name(), deserialized.event_name());
        assert_eq!(event.patient_id(), deserialized.patient_id());
    }

    #[test]
    fn test_event_name_mapping() {
        let patient_id = Uuid::new_v4();
        let at = Utc::now();

        let called = QueueEvent::PatientCalled {
            patient_id,
            station: "triage-2".to_string(),
            called_at: at,
        };
        assert_eq!(called.event_name(), "PatientCalled");
        assert_eq!(called.occurred_at(), at);

        let cancelled = QueueEvent::CheckInCancelled {
            patient_id,
            reason: None,
            cancelled_at: at,
        };
        assert_eq!(cancelled.event_name(), "CheckInCancelled");
    }
}
