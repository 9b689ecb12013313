//! In-memory log + outbox backend
//!
//! Co-locates the event log and the outbox behind one lock, which makes
//! the save contract atomic without a database. Backs the deterministic
//! test suites and works as an embedded store.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::clock::Clock;
use crate::event::{EventCodec, StoredEvent, UncommittedEvent};
use crate::event_store::{EventStore, EventStoreError};
use crate::outbox::{OutboxMessage, OutboxStatus, OutboxStore, OutboxStoreError};

#[derive(Default)]
struct Backend {
    // Insertion order; per-aggregate versions are contiguous.
    events: Vec<StoredEvent>,
    outbox: Vec<OutboxMessage>,
}

impl Backend {
    fn max_version(&self, aggregate_id: Uuid) -> i64 {
        self.events
            .iter()
            .filter(|e| e.aggregate_id == aggregate_id)
            .map(|e| e.version)
            .max()
            .unwrap_or(0)
    }

    fn has_key(&self, idempotency_key: &str) -> bool {
        self.events
            .iter()
            .any(|e| e.idempotency_key == idempotency_key)
    }
}

/// Event log and outbox over process memory.
#[derive(Clone)]
pub struct InMemoryStore {
    backend: Arc<Mutex<Backend>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            backend: Arc::new(Mutex::new(Backend::default())),
            clock,
        }
    }

    /// Snapshot of every outbox row, for assertions and operator
    /// tooling.
    pub fn outbox_rows(&self) -> Vec<OutboxMessage> {
        self.backend.lock().outbox.clone()
    }

    /// Total number of events in the log.
    pub fn event_count(&self) -> usize {
        self.backend.lock().events.len()
    }

    /// Place a row directly in the outbox, bypassing the log. Useful to
    /// stage delivery scenarios the write path would reject.
    pub fn seed_outbox(&self, message: OutboxMessage) {
        self.backend.lock().outbox.push(message);
    }
}

#[async_trait]
impl EventStore for InMemoryStore {
    async fn save(
        &self,
        aggregate_id: Uuid,
        expected_version: i64,
        events: Vec<UncommittedEvent>,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        if events.is_empty() {
            return Ok(Vec::new());
        }

        // Encoding is pure; do it before taking the lock.
        let mut encoded = Vec::with_capacity(events.len());
        for event in &events {
            encoded.push(EventCodec::encode(&event.event)?);
        }

        let mut backend = self.backend.lock();

        let current = backend.max_version(aggregate_id);
        if current != expected_version {
            // A full replay of an already committed save is a no-op,
            // not a conflict.
            if events.iter().all(|e| backend.has_key(&e.idempotency_key)) {
                let mut existing: Vec<StoredEvent> = backend
                    .events
                    .iter()
                    .filter(|s| {
                        events
                            .iter()
                            .any(|e| e.idempotency_key == s.idempotency_key)
                    })
                    .cloned()
                    .collect();
                existing.sort_by_key(|e| e.version);
                return Ok(existing);
            }
            return Err(EventStoreError::VersionConflict {
                aggregate_id,
                expected: expected_version,
                actual: current,
            });
        }

        let mut stored = Vec::with_capacity(events.len());

        for (i, (event, payload)) in events.iter().zip(encoded).enumerate() {
            if backend.has_key(&event.idempotency_key) {
                continue;
            }

            let record = StoredEvent {
                event_id: event.event_id,
                aggregate_id,
                version: expected_version + i as i64 + 1,
                event_name: event.event.event_name().to_string(),
                payload,
                occurred_at: event.occurred_at,
                correlation_id: event.correlation_id,
                causation_id: event.causation_id,
                actor: event.actor.clone(),
                idempotency_key: event.idempotency_key.clone(),
                schema_version: event.schema_version,
            };

            backend.outbox.push(OutboxMessage::for_event(&record));
            backend.events.push(record.clone());
            stored.push(record);
        }

        Ok(stored)
    }

    async fn read_aggregate(
        &self,
        aggregate_id: Uuid,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let mut events: Vec<StoredEvent> = self
            .backend
            .lock()
            .events
            .iter()
            .filter(|e| e.aggregate_id == aggregate_id)
            .cloned()
            .collect();
        events.sort_by_key(|e| e.version);
        Ok(events)
    }

    async fn read_all(&self) -> Result<Vec<StoredEvent>, EventStoreError> {
        let mut events = self.backend.lock().events.clone();
        events.sort_by(|a, b| {
            (a.occurred_at, a.aggregate_id, a.version).cmp(&(
                b.occurred_at,
                b.aggregate_id,
                b.version,
            ))
        });
        Ok(events)
    }

    async fn max_version(&self, aggregate_id: Uuid) -> Result<i64, EventStoreError> {
        Ok(self.backend.lock().max_version(aggregate_id))
    }
}

#[async_trait]
impl OutboxStore for InMemoryStore {
    async fn pending(&self, batch_size: usize) -> Result<Vec<OutboxMessage>, OutboxStoreError> {
        let now = self.clock.now();
        let mut eligible: Vec<OutboxMessage> = self
            .backend
            .lock()
            .outbox
            .iter()
            .filter(|m| {
                matches!(m.status, OutboxStatus::Pending | OutboxStatus::Failed)
                    && m.next_attempt_at.map_or(true, |at| at <= now)
            })
            .cloned()
            .collect();
        eligible.sort_by_key(|m| m.occurred_at);
        eligible.truncate(batch_size);
        Ok(eligible)
    }

    async fn mark_dispatched(&self, event_ids: &[Uuid]) -> Result<(), OutboxStoreError> {
        let mut backend = self.backend.lock();
        for message in backend
            .outbox
            .iter_mut()
            .filter(|m| event_ids.contains(&m.event_id))
        {
            message.status = OutboxStatus::Dispatched;
            message.attempts += 1;
            message.next_attempt_at = None;
            message.last_error = None;
        }
        Ok(())
    }

    async fn mark_failed(
        &self,
        event_ids: &[Uuid],
        error: &str,
        retry_after: Duration,
    ) -> Result<(), OutboxStoreError> {
        let now = self.clock.now();
        let retry = chrono::Duration::from_std(retry_after)
            .unwrap_or_else(|_| chrono::Duration::days(365));

        let mut backend = self.backend.lock();
        for message in backend
            .outbox
            .iter_mut()
            .filter(|m| event_ids.contains(&m.event_id))
        {
            message.status = OutboxStatus::Failed;
            message.attempts += 1;
            message.next_attempt_at = Some(now + retry);
            message.last_error = Some(error.to_string());
        }
        Ok(())
    }
}
