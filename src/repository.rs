//! Collaborator-facing aggregate port
//!
//! External command handlers load a queue's stream, run the domain
//! rules elsewhere, and hand the new events back for the transactional
//! append.

use std::sync::Arc;

use uuid::Uuid;

use crate::event::{StoredEvent, UncommittedEvent};
use crate::event_store::{EventStore, EventStoreError};

/// A loaded aggregate stream: the recorded events and the version to
/// pass back as `expected_version` on save.
#[derive(Debug, Clone)]
pub struct AggregateStream {
    pub aggregate_id: Uuid,
    pub version: i64,
    pub events: Vec<StoredEvent>,
}

/// Load/save surface over the event store.
#[derive(Clone)]
pub struct AggregateRepository {
    store: Arc<dyn EventStore>,
}

impl AggregateRepository {
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self { store }
    }

    /// Stream for an aggregate, or `None` when it has no events.
    pub async fn load(
        &self,
        aggregate_id: Uuid,
    ) -> Result<Option<AggregateStream>, EventStoreError> {
        let events = self.store.read_aggregate(aggregate_id).await?;
        if events.is_empty() {
            return Ok(None);
        }

        let version = events.last().map(|e| e.version).unwrap_or(0);
        Ok(Some(AggregateStream {
            aggregate_id,
            version,
            events,
        }))
    }

    /// Stream for an aggregate that must exist.
    pub async fn load_required(
        &self,
        aggregate_id: Uuid,
    ) -> Result<AggregateStream, EventStoreError> {
        self.load(aggregate_id)
            .await?
            .ok_or(EventStoreError::AggregateNotFound(aggregate_id))
    }

    /// Append new events under optimistic concurrency.
    pub async fn save(
        &self,
        aggregate_id: Uuid,
        expected_version: i64,
        events: Vec<UncommittedEvent>,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        self.store.save(aggregate_id, expected_version, events).await
    }
}
