//! Postgres-backed event log
//!
//! The outbox table lives in the same database, so a save commits the
//! log append and the outbox enqueue as one transaction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::event::{EventCodec, StoredEvent, UncommittedEvent};
use crate::outbox::{OutboxMessage, PostgresOutboxStore};

use super::{EventStore, EventStoreError};

type EventRow = (
    Uuid,
    Uuid,
    i64,
    String,
    serde_json::Value,
    DateTime<Utc>,
    Option<Uuid>,
    Option<Uuid>,
    Option<String>,
    String,
    i32,
);

const EVENT_COLUMNS: &str = "event_id, aggregate_id, version, event_name, payload, \
     occurred_at, correlation_id, causation_id, actor, idempotency_key, schema_version";

fn from_row(row: EventRow) -> StoredEvent {
    let (
        event_id,
        aggregate_id,
        version,
        event_name,
        payload,
        occurred_at,
        correlation_id,
        causation_id,
        actor,
        idempotency_key,
        schema_version,
    ) = row;

    StoredEvent {
        event_id,
        aggregate_id,
        version,
        event_name,
        payload,
        occurred_at,
        correlation_id,
        causation_id,
        actor,
        idempotency_key,
        schema_version,
    }
}

/// Event store over a PostgreSQL pool.
#[derive(Debug, Clone)]
pub struct PostgresEventStore {
    pool: PgPool,
    outbox: PostgresOutboxStore,
}

impl PostgresEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            outbox: PostgresOutboxStore::new(pool.clone()),
            pool,
        }
    }

    async fn current_version(
        tx: &mut Transaction<'_, Postgres>,
        aggregate_id: Uuid,
    ) -> Result<i64, EventStoreError> {
        let version: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT MAX(version) FROM events WHERE aggregate_id = $1
            "#,
        )
        .bind(aggregate_id)
        .fetch_optional(&mut **tx)
        .await?
        .flatten();

        Ok(version.unwrap_or(0))
    }

    /// True when every idempotency key of the batch is already in the
    /// log, i.e. the whole save committed before.
    async fn all_keys_persisted(
        tx: &mut Transaction<'_, Postgres>,
        events: &[UncommittedEvent],
    ) -> Result<bool, EventStoreError> {
        let keys: Vec<String> = events.iter().map(|e| e.idempotency_key.clone()).collect();

        let persisted: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM events WHERE idempotency_key = ANY($1)
            "#,
        )
        .bind(&keys)
        .fetch_one(&mut **tx)
        .await?;

        Ok(persisted == events.len() as i64)
    }

    async fn stored_by_keys(
        tx: &mut Transaction<'_, Postgres>,
        events: &[UncommittedEvent],
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let keys: Vec<String> = events.iter().map(|e| e.idempotency_key.clone()).collect();

        let rows: Vec<EventRow> = sqlx::query_as(&format!(
            r#"
            SELECT {EVENT_COLUMNS}
            FROM events
            WHERE idempotency_key = ANY($1)
            ORDER BY version ASC
            "#
        ))
        .bind(&keys)
        .fetch_all(&mut **tx)
        .await?;

        Ok(rows.into_iter().map(from_row).collect())
    }

    fn is_version_unique_violation(err: &sqlx::Error) -> bool {
        matches!(
            err,
            sqlx::Error::Database(db)
                if db.constraint() == Some("events_aggregate_version_unique")
        )
    }
}

#[async_trait]
impl EventStore for PostgresEventStore {
    async fn save(
        &self,
        aggregate_id: Uuid,
        expected_version: i64,
        events: Vec<UncommittedEvent>,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        if events.is_empty() {
            return Ok(Vec::new());
        }

        let mut tx = self.pool.begin().await?;

        let current = Self::current_version(&mut tx, aggregate_id).await?;
        if current != expected_version {
            // A full replay of an already committed save is a no-op,
            // not a conflict.
            if Self::all_keys_persisted(&mut tx, &events).await? {
                return Self::stored_by_keys(&mut tx, &events).await;
            }
            return Err(EventStoreError::VersionConflict {
                aggregate_id,
                expected: expected_version,
                actual: current,
            });
        }

        let mut stored = Vec::with_capacity(events.len());
        let mut outbox_rows = Vec::with_capacity(events.len());

        for (i, event) in events.iter().enumerate() {
            let version = expected_version + i as i64 + 1;
            let payload = EventCodec::encode(&event.event)?;

            let result = sqlx::query(
                r#"
                INSERT INTO events (
                    event_id, aggregate_id, version, event_name, payload,
                    occurred_at, correlation_id, causation_id, actor,
                    idempotency_key, schema_version
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                ON CONFLICT (idempotency_key) DO NOTHING
                "#,
            )
            .bind(event.event_id)
            .bind(aggregate_id)
            .bind(version)
            .bind(event.event.event_name())
            .bind(&payload)
            .bind(event.occurred_at)
            .bind(event.correlation_id)
            .bind(event.causation_id)
            .bind(event.actor.as_deref())
            .bind(&event.idempotency_key)
            .bind(event.schema_version)
            .execute(&mut *tx)
            .await;

            let inserted = match result {
                Ok(done) => done.rows_affected(),
                // A concurrent writer claimed this version slot between
                // our read and the insert.
                Err(err) if Self::is_version_unique_violation(&err) => {
                    tx.rollback().await.ok();
                    let actual = self.max_version(aggregate_id).await?;
                    return Err(EventStoreError::VersionConflict {
                        aggregate_id,
                        expected: expected_version,
                        actual,
                    });
                }
                Err(err) => return Err(err.into()),
            };

            // 0 rows affected: already persisted, no outbox row.
            if inserted == 0 {
                continue;
            }

            let record = StoredEvent {
                event_id: event.event_id,
                aggregate_id,
                version,
                event_name: event.event.event_name().to_string(),
                payload,
                occurred_at: event.occurred_at,
                correlation_id: event.correlation_id,
                causation_id: event.causation_id,
                actor: event.actor.clone(),
                idempotency_key: event.idempotency_key.clone(),
                schema_version: event.schema_version,
            };
            outbox_rows.push(OutboxMessage::for_event(&record));
            stored.push(record);
        }

        self.outbox.add_within(&mut tx, &outbox_rows).await?;

        tx.commit().await?;

        tracing::debug!(
            aggregate_id = %aggregate_id,
            appended = stored.len(),
            "events appended"
        );

        Ok(stored)
    }

    async fn read_aggregate(
        &self,
        aggregate_id: Uuid,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let rows: Vec<EventRow> = sqlx::query_as(&format!(
            r#"
            SELECT {EVENT_COLUMNS}
            FROM events
            WHERE aggregate_id = $1
            ORDER BY version ASC
            "#
        ))
        .bind(aggregate_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(from_row).collect())
    }

    async fn read_all(&self) -> Result<Vec<StoredEvent>, EventStoreError> {
        let rows: Vec<EventRow> = sqlx::query_as(&format!(
            r#"
            SELECT {EVENT_COLUMNS}
            FROM events
            ORDER BY occurred_at ASC, aggregate_id ASC, version ASC
            "#
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(from_row).collect())
    }

    async fn max_version(&self, aggregate_id: Uuid) -> Result<i64, EventStoreError> {
        let version: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT MAX(version) FROM events WHERE aggregate_id = $1
            "#,
        )
        .bind(aggregate_id)
        .fetch_optional(&self.pool)
        .await?
        .flatten();

        Ok(version.unwrap_or(0))
    }
}
