//! Projection engine
//!
//! Routes events to handlers through an explicit name table and tracks
//! checkpoints. Rebuild folds the full log into a cleared context and
//! ends in the same state an incremental run would have reached.

use std::collections::HashMap;
use std::sync::Arc;

use crate::clock::Clock;
use crate::event::{EventCodec, StoredEvent};
use crate::event_store::EventStore;

use super::handlers::{
    CheckInCancelledHandler, PatientAttendedHandler, PatientCalledHandler, PatientCheckedInHandler,
    ProjectionHandler,
};
use super::{ProjectionCheckpoint, ProjectionContext, ProjectionError};

/// Dispatches events to registered handlers and records progress.
pub struct ProjectionEngine {
    projection_id: String,
    handlers: HashMap<&'static str, Box<dyn ProjectionHandler>>,
    context: Arc<dyn ProjectionContext>,
    store: Arc<dyn EventStore>,
    clock: Arc<dyn Clock>,
}

impl ProjectionEngine {
    pub fn new(
        projection_id: impl Into<String>,
        context: Arc<dyn ProjectionContext>,
        store: Arc<dyn EventStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            projection_id: projection_id.into(),
            handlers: HashMap::new(),
            context,
            store,
            clock,
        }
    }

    /// Engine wired with every handler of the waiting-room views.
    pub fn with_default_handlers(
        projection_id: impl Into<String>,
        context: Arc<dyn ProjectionContext>,
        store: Arc<dyn EventStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self::new(projection_id, context, store, clock)
            .register(Box::new(PatientCheckedInHandler))
            .register(Box::new(PatientCalledHandler))
            .register(Box::new(PatientAttendedHandler))
            .register(Box::new(CheckInCancelledHandler))
    }

    /// Register a handler under its event name. Last registration wins.
    pub fn register(mut self, handler: Box<dyn ProjectionHandler>) -> Self {
        self.handlers.insert(handler.event_name(), handler);
        self
    }

    pub fn projection_id(&self) -> &str {
        &self.projection_id
    }

    /// Apply one event and advance the checkpoint to its version.
    pub async fn process_event(&self, event: &StoredEvent) -> Result<(), ProjectionError> {
        self.apply(event).await?;
        self.write_checkpoint(event.version, &event.idempotency_key, None)
            .await
    }

    /// Apply a batch in order; one checkpoint at the highest version.
    pub async fn process_batch(&self, events: &[StoredEvent]) -> Result<(), ProjectionError> {
        if events.is_empty() {
            return Ok(());
        }

        let mut last_event_version = 0;
        let mut last_key = String::new();

        for event in events {
            self.apply(event).await?;
            if event.version > last_event_version {
                last_event_version = event.version;
                last_key = event.idempotency_key.clone();
            }
        }

        self.write_checkpoint(last_event_version, &last_key, None)
            .await
    }

    /// Rebuild from scratch: clear this projection, fold the whole log,
    /// checkpoint. Aborts on the first handler error; an empty log
    /// still checkpoints, at version 0.
    pub async fn rebuild(&self) -> Result<ProjectionCheckpoint, ProjectionError> {
        self.context.clear(&self.projection_id).await?;

        let events = self
            .store
            .read_all()
            .await
            .map_err(|e| ProjectionError::Storage(e.to_string()))?;

        let mut last_event_version = 0;
        let mut last_key = format!("rebuild:{}", self.projection_id);

        for event in &events {
            self.apply(event).await?;
            if event.version > last_event_version {
                last_event_version = event.version;
                last_key = event.idempotency_key.clone();
            }
        }

        let checkpoint = ProjectionCheckpoint {
            projection_id: self.projection_id.clone(),
            last_event_version,
            checkpointed_at: self.clock.now(),
            idempotency_key: last_key,
            status: Some("rebuild-complete".to_string()),
        };
        self.context.save_checkpoint(checkpoint.clone()).await?;

        tracing::info!(
            projection_id = %self.projection_id,
            events = events.len(),
            last_event_version,
            "projection rebuilt"
        );

        Ok(checkpoint)
    }

    /// Fire-and-forget rebuild for the collaborator surface; the call
    /// returns once the rebuild is accepted.
    pub fn spawn_rebuild(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let engine = self;
        tokio::spawn(async move {
            if let Err(error) = engine.rebuild().await {
                tracing::error!(
                    projection_id = %engine.projection_id,
                    error = %error,
                    "projection rebuild failed"
                );
            }
        })
    }

    /// Route one event through its handler. Unknown names and payloads
    /// the codec rejects are logged and skipped so they cannot block
    /// the stream; handler errors propagate.
    async fn apply(&self, event: &StoredEvent) -> Result<(), ProjectionError> {
        let handler = match self.handlers.get(event.event_name.as_str()) {
            Some(handler) => handler,
            None => {
                tracing::debug!(
                    event_name = %event.event_name,
                    event_id = %event.event_id,
                    "no handler registered, skipping"
                );
                return Ok(());
            }
        };

        let payload = match EventCodec::decode(&event.event_name, &event.payload) {
            Ok(payload) => payload,
            Err(error) => {
                tracing::warn!(
                    event_id = %event.event_id,
                    event_name = %event.event_name,
                    error = %error,
                    "undecodable event skipped"
                );
                return Ok(());
            }
        };

        handler
            .handle(&self.projection_id, event, &payload, self.context.as_ref())
            .await
    }

    async fn write_checkpoint(
        &self,
        last_event_version: i64,
        idempotency_key: &str,
        status: Option<String>,
    ) -> Result<(), ProjectionError> {
        self.context
            .save_checkpoint(ProjectionCheckpoint {
                projection_id: self.projection_id.clone(),
                last_event_version,
                checkpointed_at: self.clock.now(),
                idempotency_key: idempotency_key.to_string(),
                status,
            })
            .await
    }
}
