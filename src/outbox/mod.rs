//! Transactional outbox
//!
//! Records every appended event exactly once for reliable asynchronous
//! fan-out, and ships pending rows to the broker from a background
//! dispatcher with retry, backoff, and poison quarantine.

mod dispatcher;
mod message;
mod postgres;
mod publisher;
mod store;

pub use dispatcher::{DispatchReport, DispatcherConfig, DispatcherHandle, OutboxDispatcher};
pub use message::{OutboxMessage, OutboxStatus};
pub use postgres::PostgresOutboxStore;
pub use publisher::{EventPublisher, PublishError, RabbitMqPublisher};
pub use store::{OutboxStore, OutboxStoreError};
