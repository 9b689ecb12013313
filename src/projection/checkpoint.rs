//! Projection checkpoints

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Progress marker for one projection. There is one checkpoint per
/// projection; saving is last-writer-wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectionCheckpoint {
    pub projection_id: String,
    /// Version of the last event folded in, 0 when nothing has been.
    pub last_event_version: i64,
    pub checkpointed_at: DateTime<Utc>,
    /// Idempotency key of the last event applied.
    pub idempotency_key: String,
    /// Lifecycle marker, e.g. `rebuild-complete`.
    pub status: Option<String>,
}
