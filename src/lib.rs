//! waitline core
//!
//! Event-sourced write path for a waiting-queue system: an append-only
//! event log with a transactional outbox, a background dispatcher that
//! ships events to the broker at-least-once, and deterministic,
//! rebuildable projections.

pub mod clock;
pub mod config;
pub mod event;
pub mod event_store;
pub mod memory;
pub mod outbox;
pub mod projection;
pub mod repository;
pub mod schema;

pub use clock::{Clock, FixedClock, SystemClock};
pub use config::Config;
pub use event::{CodecError, EventCodec, QueueEvent, StoredEvent, UncommittedEvent};
pub use event_store::{EventStore, EventStoreError, PostgresEventStore};
pub use memory::InMemoryStore;
pub use outbox::{
    DispatchReport, DispatcherConfig, DispatcherHandle, EventPublisher, OutboxDispatcher,
    OutboxMessage, OutboxStatus, OutboxStore, PostgresOutboxStore, PublishError,
    RabbitMqPublisher,
};
pub use projection::{
    InMemoryProjectionContext, ProjectionCheckpoint, ProjectionContext, ProjectionEngine,
};
pub use repository::{AggregateRepository, AggregateStream};
