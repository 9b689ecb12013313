//! Schema bootstrap
//!
//! Idempotent DDL for the event log and outbox tables, run on worker
//! startup.

use sqlx::PgPool;

/// Create the pipeline tables and indexes when missing.
pub async fn ensure_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS events (
            event_id UUID PRIMARY KEY,
            aggregate_id UUID NOT NULL,
            version BIGINT NOT NULL,
            event_name TEXT NOT NULL,
            payload JSONB NOT NULL,
            occurred_at TIMESTAMPTZ NOT NULL,
            correlation_id UUID,
            causation_id UUID,
            actor TEXT,
            idempotency_key TEXT NOT NULL,
            schema_version INT NOT NULL DEFAULT 1,
            recorded_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            CONSTRAINT events_aggregate_version_unique UNIQUE (aggregate_id, version),
            CONSTRAINT events_idempotency_key_unique UNIQUE (idempotency_key)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_events_aggregate_replay
        ON events (aggregate_id, version ASC)
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS outbox_messages (
            outbox_id UUID PRIMARY KEY,
            event_id UUID NOT NULL,
            event_name TEXT NOT NULL,
            occurred_at TIMESTAMPTZ NOT NULL,
            correlation_id UUID,
            causation_id UUID,
            payload JSONB NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            attempts INT NOT NULL DEFAULT 0,
            next_attempt_at TIMESTAMPTZ,
            last_error TEXT,
            CONSTRAINT outbox_event_id_unique UNIQUE (event_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_outbox_status_next_attempt
        ON outbox_messages (status, next_attempt_at)
        "#,
    )
    .execute(pool)
    .await?;

    tracing::info!("database schema verified");
    Ok(())
}

/// Simple connectivity check.
pub async fn verify_connection(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}
