//! Projection context
//!
//! The capability surface handlers mutate views through: processed-key
//! dedup, checkpoints, and view primitives. The default implementation
//! keeps everything in process memory; a remote store can stand in
//! behind the same trait.

use std::collections::{HashMap, HashSet, VecDeque};

use async_trait::async_trait;
use parking_lot::RwLock;
use uuid::Uuid;

use super::views::{HistoryEntry, MonitorView, NextTurnView, WaitingPatient, HISTORY_CAP};
use super::ProjectionCheckpoint;

/// Errors surfaced by projection storage or handlers.
#[derive(Debug, thiserror::Error)]
pub enum ProjectionError {
    #[error("projection storage error: {0}")]
    Storage(String),

    #[error("handler error: {0}")]
    Handler(String),
}

/// Storage capabilities of one projection.
///
/// All operations must be safe under concurrent readers; writers are
/// serialized by the implementation. The default context hosts the
/// views of a single projection.
#[async_trait]
pub trait ProjectionContext: Send + Sync {
    async fn already_processed(
        &self,
        projection_id: &str,
        idempotency_key: &str,
    ) -> Result<bool, ProjectionError>;

    async fn mark_processed(
        &self,
        projection_id: &str,
        idempotency_key: &str,
    ) -> Result<(), ProjectionError>;

    async fn checkpoint(
        &self,
        projection_id: &str,
    ) -> Result<Option<ProjectionCheckpoint>, ProjectionError>;

    /// Last-writer-wins.
    async fn save_checkpoint(
        &self,
        checkpoint: ProjectionCheckpoint,
    ) -> Result<(), ProjectionError>;

    /// Drop the processed keys, checkpoint, and views of this
    /// projection. First step of a rebuild, which must start from empty
    /// state.
    async fn clear(&self, projection_id: &str) -> Result<(), ProjectionError>;

    // View mutators. Each is a pure function of current view +
    // arguments; no wall-clock reads happen in here.

    async fn increment_waiting(
        &self,
        queue_id: Uuid,
        priority: &str,
    ) -> Result<(), ProjectionError>;

    async fn decrement_waiting(
        &self,
        queue_id: Uuid,
        priority: &str,
    ) -> Result<(), ProjectionError>;

    /// Insert keeping the list sorted by priority, ties by check-in
    /// time then arrival.
    async fn add_waiting_patient(
        &self,
        queue_id: Uuid,
        patient: WaitingPatient,
    ) -> Result<(), ProjectionError>;

    /// Remove and return the entry, if present.
    async fn remove_waiting_patient(
        &self,
        queue_id: Uuid,
        patient_id: Uuid,
    ) -> Result<Option<WaitingPatient>, ProjectionError>;

    async fn set_next_turn(
        &self,
        queue_id: Uuid,
        next: NextTurnView,
    ) -> Result<(), ProjectionError>;

    /// Clear the next-turn view when it points at this patient.
    async fn clear_next_turn(
        &self,
        queue_id: Uuid,
        patient_id: Uuid,
    ) -> Result<(), ProjectionError>;

    /// Append to the rolling history, dropping the oldest entry past
    /// the cap.
    async fn push_history(
        &self,
        queue_id: Uuid,
        entry: HistoryEntry,
    ) -> Result<(), ProjectionError>;

    // View readers.

    async fn monitor(&self, queue_id: Uuid) -> Result<MonitorView, ProjectionError>;

    async fn waiting_list(&self, queue_id: Uuid) -> Result<Vec<WaitingPatient>, ProjectionError>;

    async fn next_turn(&self, queue_id: Uuid) -> Result<Option<NextTurnView>, ProjectionError>;

    async fn history(&self, queue_id: Uuid) -> Result<Vec<HistoryEntry>, ProjectionError>;
}

#[derive(Default)]
struct ContextState {
    processed: HashSet<(String, String)>,
    checkpoints: HashMap<String, ProjectionCheckpoint>,
    monitors: HashMap<Uuid, MonitorView>,
    waiting: HashMap<Uuid, Vec<WaitingPatient>>,
    next_turns: HashMap<Uuid, NextTurnView>,
    history: HashMap<Uuid, VecDeque<HistoryEntry>>,
}

/// In-process projection context. Readers take the shared lock; writers
/// are serialized by the exclusive lock.
#[derive(Default)]
pub struct InMemoryProjectionContext {
    state: RwLock<ContextState>,
}

impl InMemoryProjectionContext {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProjectionContext for InMemoryProjectionContext {
    async fn already_processed(
        &self,
        projection_id: &str,
        idempotency_key: &str,
    ) -> Result<bool, ProjectionError> {
        let state = self.state.read();
        Ok(state
            .processed
            .contains(&(projection_id.to_string(), idempotency_key.to_string())))
    }

    async fn mark_processed(
        &self,
        projection_id: &str,
        idempotency_key: &str,
    ) -> Result<(), ProjectionError> {
        self.state
            .write()
            .processed
            .insert((projection_id.to_string(), idempotency_key.to_string()));
        Ok(())
    }

    async fn checkpoint(
        &self,
        projection_id: &str,
    ) -> Result<Option<ProjectionCheckpoint>, ProjectionError> {
        Ok(self.state.read().checkpoints.get(projection_id).cloned())
    }

    async fn save_checkpoint(
        &self,
        checkpoint: ProjectionCheckpoint,
    ) -> Result<(), ProjectionError> {
        self.state
            .write()
            .checkpoints
            .insert(checkpoint.projection_id.clone(), checkpoint);
        Ok(())
    }

    async fn clear(&self, projection_id: &str) -> Result<(), ProjectionError> {
        let mut state = self.state.write();
        state.processed.retain(|(pid, _)| pid != projection_id);
        state.checkpoints.remove(projection_id);
        state.monitors.clear();
        state.waiting.clear();
        state.next_turns.clear();
        state.history.clear();
        Ok(())
    }

    async fn increment_waiting(
        &self,
        queue_id: Uuid,
        priority: &str,
    ) -> Result<(), ProjectionError> {
        self.state
            .write()
            .monitors
            .entry(queue_id)
            .or_default()
            .increment(priority);
        Ok(())
    }

    async fn decrement_waiting(
        &self,
        queue_id: Uuid,
        priority: &str,
    ) -> Result<(), ProjectionError> {
        self.state
            .write()
            .monitors
            .entry(queue_id)
            .or_default()
            .decrement(priority);
        Ok(())
    }

    async fn add_waiting_patient(
        &self,
        queue_id: Uuid,
        patient: WaitingPatient,
    ) -> Result<(), ProjectionError> {
        let mut state = self.state.write();
        let list = state.waiting.entry(queue_id).or_default();
        list.push(patient);
        // Stable sort: equal (rank, checked_in_at) keep arrival order.
        list.sort_by(|a, b| {
            (a.priority_rank(), a.checked_in_at).cmp(&(b.priority_rank(), b.checked_in_at))
        });
        Ok(())
    }

    async fn remove_waiting_patient(
        &self,
        queue_id: Uuid,
        patient_id: Uuid,
    ) -> Result<Option<WaitingPatient>, ProjectionError> {
        let mut state = self.state.write();
        let list = match state.waiting.get_mut(&queue_id) {
            Some(list) => list,
            None => return Ok(None),
        };
        match list.iter().position(|p| p.patient_id == patient_id) {
            Some(index) => Ok(Some(list.remove(index))),
            None => Ok(None),
        }
    }

    async fn set_next_turn(
        &self,
        queue_id: Uuid,
        next: NextTurnView,
    ) -> Result<(), ProjectionError> {
        self.state.write().next_turns.insert(queue_id, next);
        Ok(())
    }

    async fn clear_next_turn(
        &self,
        queue_id: Uuid,
        patient_id: Uuid,
    ) -> Result<(), ProjectionError> {
        let mut state = self.state.write();
        if state
            .next_turns
            .get(&queue_id)
            .is_some_and(|next| next.patient_id == patient_id)
        {
            state.next_turns.remove(&queue_id);
        }
        Ok(())
    }

    async fn push_history(
        &self,
        queue_id: Uuid,
        entry: HistoryEntry,
    ) -> Result<(), ProjectionError> {
        let mut state = self.state.write();
        let history = state.history.entry(queue_id).or_default();
        history.push_back(entry);
        while history.len() > HISTORY_CAP {
            history.pop_front();
        }
        Ok(())
    }

    async fn monitor(&self, queue_id: Uuid) -> Result<MonitorView, ProjectionError> {
        Ok(self
            .state
            .read()
            .monitors
            .get(&queue_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn waiting_list(&self, queue_id: Uuid) -> Result<Vec<WaitingPatient>, ProjectionError> {
        Ok(self
            .state
            .read()
            .waiting
            .get(&queue_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn next_turn(&self, queue_id: Uuid) -> Result<Option<NextTurnView>, ProjectionError> {
        Ok(self.state.read().next_turns.get(&queue_id).cloned())
    }

    async fn history(&self, queue_id: Uuid) -> Result<Vec<HistoryEntry>, ProjectionError> {
        Ok(self
            .state
            .read()
            .history
            .get(&queue_id)
            .map(|h| h.iter().cloned().collect())
            .unwrap_or_default())
    }
}
