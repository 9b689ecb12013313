//! Event store contract

use async_trait::async_trait;
use uuid::Uuid;

use crate::event::{StoredEvent, UncommittedEvent};

use super::EventStoreError;

/// Append-only event log with transactional outbox enqueue.
///
/// `save` carries the whole write contract: the version check, version
/// stamping, the idempotent append, and the outbox rows all commit (or
/// abort) as one unit. Each backend implements that atomically, because
/// a transaction cannot be threaded across an object-safe seam.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Atomically append events and their outbox rows.
    ///
    /// Events are stamped `expected_version + 1 ..= expected_version + n`.
    /// An event whose idempotency key is already in the log is left
    /// untouched and produces no outbox row; re-issuing a save whose
    /// keys are all persisted is a successful no-op even when
    /// `expected_version` has gone stale. Returns the events that were
    /// actually written (or, for a full replay, the previously written
    /// ones).
    async fn save(
        &self,
        aggregate_id: Uuid,
        expected_version: i64,
        events: Vec<UncommittedEvent>,
    ) -> Result<Vec<StoredEvent>, EventStoreError>;

    /// All events of one aggregate, version ascending.
    async fn read_aggregate(
        &self,
        aggregate_id: Uuid,
    ) -> Result<Vec<StoredEvent>, EventStoreError>;

    /// The full stream, for rebuilds. Per aggregate the order is version
    /// ascending; across aggregates the order is
    /// `(occurred_at, aggregate_id, version)` and stable across calls.
    /// Consumers must not rely on the cross-aggregate part.
    async fn read_all(&self) -> Result<Vec<StoredEvent>, EventStoreError>;

    /// Highest persisted version, 0 when the aggregate has no events.
    async fn max_version(&self, aggregate_id: Uuid) -> Result<i64, EventStoreError>;
}
