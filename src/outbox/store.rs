//! Outbox store contract

use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use super::OutboxMessage;

/// Errors from outbox persistence.
#[derive(Debug, thiserror::Error)]
pub enum OutboxStoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Outbox rows co-located with the event log.
///
/// Rows are inserted by the event store inside the save transaction;
/// this trait is the dispatcher-facing surface.
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Up to `batch_size` rows eligible for delivery, oldest
    /// `occurred_at` first. A row is eligible while `Pending`, or
    /// `Failed` with an elapsed `next_attempt_at`.
    async fn pending(&self, batch_size: usize) -> Result<Vec<OutboxMessage>, OutboxStoreError>;

    /// Record successful delivery: `Dispatched`, one more attempt,
    /// retry state cleared.
    async fn mark_dispatched(&self, event_ids: &[Uuid]) -> Result<(), OutboxStoreError>;

    /// Record a failed attempt: `Failed`, one more attempt, eligible
    /// again once `retry_after` has elapsed.
    async fn mark_failed(
        &self,
        event_ids: &[Uuid],
        error: &str,
        retry_after: Duration,
    ) -> Result<(), OutboxStoreError>;
}
