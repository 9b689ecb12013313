//! Integration tests for the outbox dispatcher

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use uuid::Uuid;
use waitline::Clock;

use waitline::event_store::EventStore;
use waitline::memory::InMemoryStore;
use waitline::outbox::{
    DispatchReport, DispatcherConfig, OutboxDispatcher, OutboxMessage, OutboxStatus,
};

use common::RecordingPublisher;

struct Fixture {
    clock: waitline::clock::FixedClock,
    store: Arc<InMemoryStore>,
    publisher: Arc<RecordingPublisher>,
    dispatcher: OutboxDispatcher,
}

fn fixture() -> Fixture {
    let clock = common::fixed_clock();
    let store = Arc::new(InMemoryStore::new(Arc::new(clock.clone())));
    let publisher = Arc::new(RecordingPublisher::new());
    let dispatcher = OutboxDispatcher::new(
        store.clone(),
        publisher.clone(),
        DispatcherConfig::default(),
    );

    Fixture {
        clock,
        store,
        publisher,
        dispatcher,
    }
}

#[tokio::test]
async fn dispatch_happy_path_marks_row_dispatched() {
    let f = fixture();
    let queue_id = Uuid::new_v4();

    let stored = f
        .store
        .save(queue_id, 0, vec![common::check_in("Ada", "high", 0)])
        .await
        .unwrap();
    let event_id = stored[0].event_id;

    let report = f.dispatcher.run_once().await.unwrap();
    assert_eq!(report.published, 1);
    assert_eq!(report.failed, 0);

    let published = f.publisher.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].event_id, event_id);

    let rows = f.store.outbox_rows();
    assert_eq!(rows[0].status, OutboxStatus::Dispatched);
    assert_eq!(rows[0].attempts, 1);
    assert!(rows[0].next_attempt_at.is_none());
    assert!(rows[0].last_error.is_none());
}

#[tokio::test]
async fn failed_publish_backs_off_then_quarantines() {
    let f = fixture();
    let queue_id = Uuid::new_v4();

    f.store
        .save(queue_id, 0, vec![common::check_in("Ada", "high", 0)])
        .await
        .unwrap();

    // First failure: 30 s backoff.
    f.publisher.fail_next(1);
    let report = f.dispatcher.run_once().await.unwrap();
    assert_eq!(report, DispatchReport { published: 0, failed: 1, quarantined: 0 });

    let row = &f.store.outbox_rows()[0];
    assert_eq!(row.status, OutboxStatus::Failed);
    assert_eq!(row.attempts, 1);
    assert_eq!(
        row.next_attempt_at,
        Some(f.clock.now() + ChronoDuration::seconds(30))
    );
    assert!(row
        .last_error
        .as_deref()
        .unwrap()
        .contains("broker unavailable"));

    // Keep failing until the poison threshold. Each round waits out the
    // backoff (capped at one hour) before the row is eligible again.
    for _ in 1..5 {
        f.clock.advance(ChronoDuration::hours(2));
        f.publisher.fail_next(1);
        f.dispatcher.run_once().await.unwrap();
    }

    let row = &f.store.outbox_rows()[0];
    assert_eq!(row.status, OutboxStatus::Failed);
    assert_eq!(row.attempts, 5);
    assert_eq!(
        row.next_attempt_at,
        Some(f.clock.now() + ChronoDuration::days(365))
    );

    // Quarantined rows stay out of the polling window.
    f.clock.advance(ChronoDuration::days(30));
    let report = f.dispatcher.run_once().await.unwrap();
    assert_eq!(report.processed(), 0);
    assert!(f.publisher.published().is_empty());
}

#[tokio::test]
async fn one_failure_does_not_block_the_batch() {
    let f = fixture();

    // Two events with distinct occurred-at so the poll order is fixed.
    f.store
        .save(Uuid::new_v4(), 0, vec![common::check_in("First", "high", 0)])
        .await
        .unwrap();
    f.store
        .save(Uuid::new_v4(), 0, vec![common::check_in("Second", "low", 5)])
        .await
        .unwrap();

    f.publisher.fail_next(1);
    let report = f.dispatcher.run_once().await.unwrap();

    assert_eq!(report.published, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(f.publisher.published().len(), 1);
    assert_eq!(f.publisher.published()[0].event_name, "PatientCheckedIn");

    let rows = f.store.outbox_rows();
    let failed = rows.iter().filter(|r| r.status == OutboxStatus::Failed).count();
    let dispatched = rows
        .iter()
        .filter(|r| r.status == OutboxStatus::Dispatched)
        .count();
    assert_eq!((failed, dispatched), (1, 1));
}

#[tokio::test]
async fn failed_row_is_retried_after_backoff_elapses() {
    let f = fixture();
    let queue_id = Uuid::new_v4();

    let stored = f
        .store
        .save(queue_id, 0, vec![common::check_in("Ada", "normal", 0)])
        .await
        .unwrap();

    f.publisher.fail_next(1);
    f.dispatcher.run_once().await.unwrap();

    // Not yet eligible.
    let report = f.dispatcher.run_once().await.unwrap();
    assert_eq!(report.processed(), 0);

    // Once the backoff elapses the same row goes out.
    f.clock.advance(ChronoDuration::seconds(30));
    let report = f.dispatcher.run_once().await.unwrap();
    assert_eq!(report.published, 1);

    let row = &f.store.outbox_rows()[0];
    assert_eq!(row.status, OutboxStatus::Dispatched);
    assert_eq!(row.attempts, 2);
    assert_eq!(f.publisher.published_ids(), vec![stored[0].event_id]);
}

#[tokio::test]
async fn undecodable_message_routes_through_retry() {
    let f = fixture();

    // A row whose event name no codec knows, as a decommissioned
    // deployment might leave behind.
    f.store.seed_outbox(OutboxMessage {
        outbox_id: Uuid::new_v4(),
        event_id: Uuid::new_v4(),
        event_name: "LegacyPatientMoved".to_string(),
        occurred_at: common::day_start(),
        correlation_id: None,
        causation_id: None,
        payload: serde_json::json!({"patient_id": Uuid::new_v4()}),
        status: OutboxStatus::Pending,
        attempts: 0,
        next_attempt_at: None,
        last_error: None,
    });

    let report = f.dispatcher.run_once().await.unwrap();
    assert_eq!(report.failed, 1);
    assert!(f.publisher.published().is_empty());

    let row = &f.store.outbox_rows()[0];
    assert_eq!(row.status, OutboxStatus::Failed);
    assert!(row
        .last_error
        .as_deref()
        .unwrap()
        .contains("unknown event type"));
}

#[tokio::test]
async fn published_ids_match_dispatched_rows() {
    let f = fixture();

    for i in 0..5 {
        f.store
            .save(
                Uuid::new_v4(),
                0,
                vec![common::check_in("P", "normal", i)],
            )
            .await
            .unwrap();
    }

    // Fail two of the five on the first pass.
    f.publisher.fail_next(2);
    f.dispatcher.run_once().await.unwrap();

    let mut published = f.publisher.published_ids();
    let mut dispatched: Vec<Uuid> = f
        .store
        .outbox_rows()
        .iter()
        .filter(|r| r.status == OutboxStatus::Dispatched)
        .map(|r| r.event_id)
        .collect();

    published.sort();
    dispatched.sort();
    assert_eq!(published, dispatched);
    assert_eq!(published.len(), 3);
}

#[tokio::test]
async fn polling_empty_outbox_returns_promptly() {
    let f = fixture();
    let report = f.dispatcher.run_once().await.unwrap();
    assert_eq!(report, DispatchReport::default());
}

#[tokio::test]
async fn dispatcher_start_and_stop() {
    let f = fixture();
    f.store
        .save(Uuid::new_v4(), 0, vec![common::check_in("Ada", "high", 0)])
        .await
        .unwrap();

    let publisher = f.publisher.clone();
    let store = f.store.clone();

    let handle = f.dispatcher.start();
    assert!(handle.is_running());

    // The first iteration runs immediately.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(publisher.published().len(), 1);

    handle.stop().await;
    assert_eq!(
        store
            .outbox_rows()
            .iter()
            .filter(|r| r.status == OutboxStatus::Dispatched)
            .count(),
        1
    );
}
