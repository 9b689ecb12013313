//! Projection handlers
//!
//! One handler per event name. Handlers only move data: derive the
//! dedup key, return early on replays, mutate views, mark processed.
//! Event timestamps are the only clock in here.

use async_trait::async_trait;
use uuid::Uuid;

use crate::event::{QueueEvent, StoredEvent};

use super::views::{HistoryEntry, NextTurnView, WaitingPatient};
use super::{ProjectionContext, ProjectionError};

/// Normalize free-form priority labels into the monitor buckets.
pub fn normalize_priority(raw: &str) -> String {
    let trimmed = raw.trim().to_lowercase();
    match trimmed.as_str() {
        "urgent" | "high" => "high".to_string(),
        "medium" | "normal" => "normal".to_string(),
        "low" => "low".to_string(),
        _ => trimmed,
    }
}

/// Event-to-view transform registered under one event name.
#[async_trait]
pub trait ProjectionHandler: Send + Sync {
    /// Stable event name this handler consumes.
    fn event_name(&self) -> &'static str;

    async fn handle(
        &self,
        projection_id: &str,
        event: &StoredEvent,
        payload: &QueueEvent,
        context: &dyn ProjectionContext,
    ) -> Result<(), ProjectionError>;
}

fn dedup_key(tag: &str, event: &StoredEvent) -> String {
    format!("{}:{}:{}", tag, event.aggregate_id, event.event_id)
}

fn history_entry(event: &StoredEvent, patient_id: Uuid) -> HistoryEntry {
    HistoryEntry {
        event_id: event.event_id,
        event_name: event.event_name.clone(),
        patient_id,
        occurred_at: event.occurred_at,
    }
}

/// Adds the patient to the waiting views.
pub struct PatientCheckedInHandler;

#[async_trait]
impl ProjectionHandler for PatientCheckedInHandler {
    fn event_name(&self) -> &'static str {
        "PatientCheckedIn"
    }

    async fn handle(
        &self,
        projection_id: &str,
        event: &StoredEvent,
        payload: &QueueEvent,
        context: &dyn ProjectionContext,
    ) -> Result<(), ProjectionError> {
        let (patient_id, patient_name, priority, checked_in_at) = match payload {
            QueueEvent::PatientCheckedIn {
                patient_id,
                patient_name,
                priority,
                checked_in_at,
            } => (patient_id, patient_name, priority, checked_in_at),
            _ => return Ok(()),
        };

        let key = dedup_key("checkin", event);
        if context.already_processed(projection_id, &key).await? {
            return Ok(());
        }

        let priority = normalize_priority(priority);
        context
            .increment_waiting(event.aggregate_id, &priority)
            .await?;
        context
            .add_waiting_patient(
                event.aggregate_id,
                WaitingPatient {
                    patient_id: *patient_id,
                    patient_name: patient_name.clone(),
                    priority,
                    checked_in_at: *checked_in_at,
                },
            )
            .await?;
        context
            .push_history(event.aggregate_id, history_entry(event, *patient_id))
            .await?;

        context.mark_processed(projection_id, &key).await
    }
}

/// Moves the patient from the waiting views to the next-turn board.
pub struct PatientCalledHandler;

#[async_trait]
impl ProjectionHandler for PatientCalledHandler {
    fn event_name(&self) -> &'static str {
        "PatientCalled"
    }

    async fn handle(
        &self,
        projection_id: &str,
        event: &StoredEvent,
        payload: &QueueEvent,
        context: &dyn ProjectionContext,
    ) -> Result<(), ProjectionError> {
        let (patient_id, station, called_at) = match payload {
            QueueEvent::PatientCalled {
                patient_id,
                station,
                called_at,
            } => (patient_id, station, called_at),
            _ => return Ok(()),
        };

        let key = dedup_key("called", event);
        if context.already_processed(projection_id, &key).await? {
            return Ok(());
        }

        if let Some(removed) = context
            .remove_waiting_patient(event.aggregate_id, *patient_id)
            .await?
        {
            context
                .decrement_waiting(event.aggregate_id, &removed.priority)
                .await?;
        }
        context
            .set_next_turn(
                event.aggregate_id,
                NextTurnView {
                    patient_id: *patient_id,
                    station: station.clone(),
                    called_at: *called_at,
                },
            )
            .await?;
        context
            .push_history(event.aggregate_id, history_entry(event, *patient_id))
            .await?;

        context.mark_processed(projection_id, &key).await
    }
}

/// Retires the patient from the boards once attended.
pub struct PatientAttendedHandler;

#[async_trait]
impl ProjectionHandler for PatientAttendedHandler {
    fn event_name(&self) -> &'static str {
        "PatientAttended"
    }

    async fn handle(
        &self,
        projection_id: &str,
        event: &StoredEvent,
        payload: &QueueEvent,
        context: &dyn ProjectionContext,
    ) -> Result<(), ProjectionError> {
        let patient_id = match payload {
            QueueEvent::PatientAttended { patient_id, .. } => patient_id,
            _ => return Ok(()),
        };

        let key = dedup_key("attended", event);
        if context.already_processed(projection_id, &key).await? {
            return Ok(());
        }

        // If the call event was never folded in, the patient may still
        // sit in the waiting views.
        if let Some(removed) = context
            .remove_waiting_patient(event.aggregate_id, *patient_id)
            .await?
        {
            context
                .decrement_waiting(event.aggregate_id, &removed.priority)
                .await?;
        }
        context
            .clear_next_turn(event.aggregate_id, *patient_id)
            .await?;
        context
            .push_history(event.aggregate_id, history_entry(event, *patient_id))
            .await?;

        context.mark_processed(projection_id, &key).await
    }
}

/// Removes a cancelled check-in from the waiting views.
pub struct CheckInCancelledHandler;

#[async_trait]
impl ProjectionHandler for CheckInCancelledHandler {
    fn event_name(&self) -> &'static str {
        "CheckInCancelled"
    }

    async fn handle(
        &self,
        projection_id: &str,
        event: &StoredEvent,
        payload: &QueueEvent,
        context: &dyn ProjectionContext,
    ) -> Result<(), ProjectionError> {
        let patient_id = match payload {
            QueueEvent::CheckInCancelled { patient_id, .. } => patient_id,
            _ => return Ok(()),
        };

        let key = dedup_key("cancelled", event);
        if context.already_processed(projection_id, &key).await? {
            return Ok(());
        }

        if let Some(removed) = context
            .remove_waiting_patient(event.aggregate_id, *patient_id)
            .await?
        {
            context
                .decrement_waiting(event.aggregate_id, &removed.priority)
                .await?;
        }
        context
            .push_history(event.aggregate_id, history_entry(event, *patient_id))
            .await?;

        context.mark_processed(projection_id, &key).await
    }
}
