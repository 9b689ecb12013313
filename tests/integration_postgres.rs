//! Postgres-backed tests for the save path and outbox store
//!
//! These need a running database. Set `DATABASE_URL` and run with
//! `cargo test -- --ignored`.

mod common;

use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

use waitline::event_store::{EventStore, EventStoreError, PostgresEventStore};
use waitline::outbox::{OutboxStatus, OutboxStore, PostgresOutboxStore};
use waitline::schema;

async fn connect() -> PgPool {
    dotenvy::dotenv().ok();
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for tests");

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .expect("Failed to connect to DB");

    schema::ensure_schema(&pool).await.expect("schema bootstrap");
    pool
}

#[tokio::test]
#[ignore = "requires a running Postgres (set DATABASE_URL)"]
async fn postgres_save_and_read_round_trip() {
    let pool = connect().await;
    let store = PostgresEventStore::new(pool.clone());
    let queue_id = Uuid::new_v4();

    let stored = store
        .save(
            queue_id,
            0,
            vec![
                common::check_in("Ada Martin", "high", 0),
                common::check_in("Leo Brandt", "normal", 1),
            ],
        )
        .await
        .unwrap();
    assert_eq!(stored.len(), 2);

    let events = store.read_aggregate(queue_id).await.unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].version, 1);
    assert_eq!(events[1].version, 2);
    assert_eq!(events[0].event_name, "PatientCheckedIn");
    assert_eq!(store.max_version(queue_id).await.unwrap(), 2);
}

#[tokio::test]
#[ignore = "requires a running Postgres (set DATABASE_URL)"]
async fn postgres_version_conflict() {
    let pool = connect().await;
    let store = PostgresEventStore::new(pool.clone());
    let queue_id = Uuid::new_v4();

    store
        .save(queue_id, 0, vec![common::check_in("Ada", "high", 0)])
        .await
        .unwrap();

    let conflict = store
        .save(queue_id, 0, vec![common::check_in("Eve", "low", 1)])
        .await;

    assert!(matches!(
        conflict,
        Err(EventStoreError::VersionConflict {
            expected: 0,
            actual: 1,
            ..
        })
    ));
}

#[tokio::test]
#[ignore = "requires a running Postgres (set DATABASE_URL)"]
async fn postgres_resave_is_noop() {
    let pool = connect().await;
    let store = PostgresEventStore::new(pool.clone());
    let queue_id = Uuid::new_v4();

    let batch = vec![common::check_in("Ada", "high", 0)];
    let first = store.save(queue_id, 0, batch.clone()).await.unwrap();

    let replay = store.save(queue_id, 0, batch).await.unwrap();
    assert_eq!(replay.len(), 1);
    assert_eq!(replay[0].event_id, first[0].event_id);
    assert_eq!(store.max_version(queue_id).await.unwrap(), 1);
}

#[tokio::test]
#[ignore = "requires a running Postgres (set DATABASE_URL)"]
async fn postgres_outbox_status_transitions() {
    let pool = connect().await;
    let store = PostgresEventStore::new(pool.clone());
    let outbox = PostgresOutboxStore::new(pool.clone());
    let queue_id = Uuid::new_v4();

    let stored = store
        .save(queue_id, 0, vec![common::check_in("Ada", "high", 0)])
        .await
        .unwrap();
    let event_id = stored[0].event_id;

    let pending = outbox.pending(1000).await.unwrap();
    assert!(pending.iter().any(|m| m.event_id == event_id));

    outbox
        .mark_failed(&[event_id], "broker unavailable", Duration::from_secs(3600))
        .await
        .unwrap();

    // Backed-off rows disappear from the polling window.
    let pending = outbox.pending(1000).await.unwrap();
    assert!(!pending.iter().any(|m| m.event_id == event_id));

    outbox.mark_dispatched(&[event_id]).await.unwrap();

    let row: (String, i32, Option<String>) = sqlx::query_as(
        r#"
        SELECT status, attempts, last_error
        FROM outbox_messages
        WHERE event_id = $1
        "#,
    )
    .bind(event_id)
    .fetch_one(&pool)
    .await
    .unwrap();

    assert_eq!(OutboxStatus::from(row.0), OutboxStatus::Dispatched);
    assert_eq!(row.1, 2);
    assert!(row.2.is_none());
}
