//! Postgres-backed outbox store

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::{OutboxMessage, OutboxStatus, OutboxStore, OutboxStoreError};

type MessageRow = (
    Uuid,
    Uuid,
    String,
    DateTime<Utc>,
    Option<Uuid>,
    Option<Uuid>,
    serde_json::Value,
    String,
    i32,
    Option<DateTime<Utc>>,
    Option<String>,
);

fn from_row(row: MessageRow) -> OutboxMessage {
    let (
        outbox_id,
        event_id,
        event_name,
        occurred_at,
        correlation_id,
        causation_id,
        payload,
        status,
        attempts,
        next_attempt_at,
        last_error,
    ) = row;

    OutboxMessage {
        outbox_id,
        event_id,
        event_name,
        occurred_at,
        correlation_id,
        causation_id,
        payload,
        status: OutboxStatus::from(status),
        attempts,
        next_attempt_at,
        last_error,
    }
}

/// Outbox store over a PostgreSQL pool.
#[derive(Debug, Clone)]
pub struct PostgresOutboxStore {
    pool: PgPool,
}

impl PostgresOutboxStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert rows within the caller's transaction. A conflicting
    /// `event_id` is left untouched (re-save idempotency).
    pub async fn add_within(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        messages: &[OutboxMessage],
    ) -> Result<(), OutboxStoreError> {
        for message in messages {
            sqlx::query(
                r#"
                INSERT INTO outbox_messages (
                    outbox_id, event_id, event_name, occurred_at,
                    correlation_id, causation_id, payload, status, attempts
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                ON CONFLICT (event_id) DO NOTHING
                "#,
            )
            .bind(message.outbox_id)
            .bind(message.event_id)
            .bind(&message.event_name)
            .bind(message.occurred_at)
            .bind(message.correlation_id)
            .bind(message.causation_id)
            .bind(&message.payload)
            .bind(message.status.as_str())
            .bind(message.attempts)
            .execute(&mut **tx)
            .await?;
        }

        Ok(())
    }
}

#[async_trait]
impl OutboxStore for PostgresOutboxStore {
    async fn pending(&self, batch_size: usize) -> Result<Vec<OutboxMessage>, OutboxStoreError> {
        let rows: Vec<MessageRow> = sqlx::query_as(
            r#"
            SELECT outbox_id, event_id, event_name, occurred_at,
                   correlation_id, causation_id, payload, status, attempts,
                   next_attempt_at, last_error
            FROM outbox_messages
            WHERE status IN ('pending', 'failed')
              AND (next_attempt_at IS NULL OR next_attempt_at <= NOW())
            ORDER BY occurred_at ASC
            LIMIT $1
            "#,
        )
        .bind(batch_size as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(from_row).collect())
    }

    async fn mark_dispatched(&self, event_ids: &[Uuid]) -> Result<(), OutboxStoreError> {
        sqlx::query(
            r#"
            UPDATE outbox_messages
            SET status = 'dispatched',
                attempts = attempts + 1,
                next_attempt_at = NULL,
                last_error = NULL
            WHERE event_id = ANY($1)
            "#,
        )
        .bind(event_ids)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn mark_failed(
        &self,
        event_ids: &[Uuid],
        error: &str,
        retry_after: Duration,
    ) -> Result<(), OutboxStoreError> {
        sqlx::query(
            r#"
            UPDATE outbox_messages
            SET status = 'failed',
                attempts = attempts + 1,
                next_attempt_at = NOW() + make_interval(secs => $2),
                last_error = $3
            WHERE event_id = ANY($1)
            "#,
        )
        .bind(event_ids)
        .bind(retry_after.as_secs_f64())
        .bind(error)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
