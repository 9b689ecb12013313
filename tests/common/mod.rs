//! Shared fixtures for the integration suites
//!
//! Each suite compiles this module on its own; not every suite uses
//! every helper.
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use waitline::clock::FixedClock;
use waitline::event::{QueueEvent, UncommittedEvent};
use waitline::outbox::{EventPublisher, OutboxMessage, PublishError};

/// Start of the simulated day every suite runs in.
pub fn day_start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()
}

pub fn fixed_clock() -> FixedClock {
    FixedClock::at(day_start())
}

/// Check-in event `offset_minutes` into the day.
pub fn check_in(patient_name: &str, priority: &str, offset_minutes: i64) -> UncommittedEvent {
    UncommittedEvent::new(QueueEvent::PatientCheckedIn {
        patient_id: Uuid::new_v4(),
        patient_name: patient_name.to_string(),
        priority: priority.to_string(),
        checked_in_at: day_start() + Duration::minutes(offset_minutes),
    })
}

pub fn called(patient_id: Uuid, station: &str, offset_minutes: i64) -> UncommittedEvent {
    UncommittedEvent::new(QueueEvent::PatientCalled {
        patient_id,
        station: station.to_string(),
        called_at: day_start() + Duration::minutes(offset_minutes),
    })
}

pub fn attended(patient_id: Uuid, offset_minutes: i64) -> UncommittedEvent {
    UncommittedEvent::new(QueueEvent::PatientAttended {
        patient_id,
        attended_at: day_start() + Duration::minutes(offset_minutes),
    })
}

pub fn cancelled(patient_id: Uuid, offset_minutes: i64) -> UncommittedEvent {
    UncommittedEvent::new(QueueEvent::CheckInCancelled {
        patient_id,
        reason: Some("left the building".to_string()),
        cancelled_at: day_start() + Duration::minutes(offset_minutes),
    })
}

/// Publisher double: records published messages and can be told to fail
/// the next N publish calls.
#[derive(Default)]
pub struct RecordingPublisher {
    published: Mutex<Vec<OutboxMessage>>,
    fail_remaining: AtomicUsize,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` publish calls with a broker-style error.
    pub fn fail_next(&self, n: usize) {
        self.fail_remaining.store(n, Ordering::SeqCst);
    }

    pub fn published(&self) -> Vec<OutboxMessage> {
        self.published.lock().clone()
    }

    pub fn published_ids(&self) -> Vec<Uuid> {
        self.published.lock().iter().map(|m| m.event_id).collect()
    }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(&self, message: &OutboxMessage) -> Result<(), PublishError> {
        let remaining = self.fail_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_remaining.store(remaining - 1, Ordering::SeqCst);
            return Err(PublishError::Failed("broker unavailable".to_string()));
        }

        self.published.lock().push(message.clone());
        Ok(())
    }
}
