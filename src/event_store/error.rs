//! Event store errors

use uuid::Uuid;

use crate::event::CodecError;
use crate::outbox::OutboxStoreError;

/// Errors that can occur in the event store.
#[derive(Debug, thiserror::Error)]
pub enum EventStoreError {
    /// Optimistic concurrency conflict; the caller should reload the
    /// aggregate and retry.
    #[error("version conflict for aggregate {aggregate_id}: expected {expected}, found {actual}")]
    VersionConflict {
        aggregate_id: Uuid,
        expected: i64,
        actual: i64,
    },

    /// Load miss where the caller demanded existence.
    #[error("aggregate not found: {0}")]
    AggregateNotFound(Uuid),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("outbox error: {0}")]
    Outbox(#[from] OutboxStoreError),
}

impl EventStoreError {
    pub fn is_version_conflict(&self) -> bool {
        matches!(self, EventStoreError::VersionConflict { .. })
    }
}
