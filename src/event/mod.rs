//! Event model
//!
//! Queue event types, their metadata envelope, and the name-keyed codec
//! used by the outbox dispatcher and the projection engine.

mod codec;
mod metadata;
mod types;

pub use codec::{CodecError, EventCodec, REGISTERED_EVENTS};
pub use metadata::{StoredEvent, UncommittedEvent};
pub use types::QueueEvent;
