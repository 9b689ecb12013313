//! Outbox dispatcher
//!
//! Background worker that drains the outbox: poll, decode, publish,
//! advance row status. Failures back off exponentially; rows that keep
//! failing are quarantined for a year until an operator requeues them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::event::EventCodec;

use super::{EventPublisher, OutboxMessage, OutboxStore, OutboxStoreError};

/// Quarantine delay for poison messages. Requeueing is an operator
/// action.
const POISON_RETRY_AFTER: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Dispatcher tuning knobs.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Sleep between polling iterations.
    pub poll_interval: Duration,
    /// Maximum rows fetched per iteration.
    pub batch_size: usize,
    /// Attempt count at which a message is quarantined.
    pub max_retry_attempts: i32,
    /// First retry delay; doubles on every further failure.
    pub base_retry_delay: Duration,
    /// Ceiling for the doubling retry delay.
    pub max_retry_delay: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            batch_size: 100,
            max_retry_attempts: 5,
            base_retry_delay: Duration::from_secs(30),
            max_retry_delay: Duration::from_secs(60 * 60),
        }
    }
}

/// Outcome of one polling iteration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub published: usize,
    pub failed: usize,
    pub quarantined: usize,
}

impl DispatchReport {
    pub fn processed(&self) -> usize {
        self.published + self.failed + self.quarantined
    }
}

/// Polls the outbox and ships eligible rows to the broker.
pub struct OutboxDispatcher {
    outbox: Arc<dyn OutboxStore>,
    publisher: Arc<dyn EventPublisher>,
    config: DispatcherConfig,
}

impl OutboxDispatcher {
    pub fn new(
        outbox: Arc<dyn OutboxStore>,
        publisher: Arc<dyn EventPublisher>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            outbox,
            publisher,
            config,
        }
    }

    /// Drain one batch. Messages are processed in order and each one is
    /// decoded and published on its own; one failure never blocks the
    /// rest of the batch.
    pub async fn run_once(&self) -> Result<DispatchReport, OutboxStoreError> {
        let batch = self.outbox.pending(self.config.batch_size).await?;
        if batch.is_empty() {
            return Ok(DispatchReport::default());
        }

        let mut report = DispatchReport::default();

        for message in batch {
            match self.dispatch(&message).await {
                Ok(()) => {
                    self.outbox.mark_dispatched(&[message.event_id]).await?;
                    report.published += 1;
                }
                Err(error) => {
                    let attempts = message.attempts + 1;
                    let retry_after = if attempts >= self.config.max_retry_attempts {
                        report.quarantined += 1;
                        tracing::error!(
                            event_id = %message.event_id,
                            event_name = %message.event_name,
                            attempts,
                            error = %error,
                            "message quarantined after repeated failures"
                        );
                        POISON_RETRY_AFTER
                    } else {
                        report.failed += 1;
                        tracing::warn!(
                            event_id = %message.event_id,
                            event_name = %message.event_name,
                            attempts,
                            error = %error,
                            "publish failed, will retry"
                        );
                        self.backoff(message.attempts)
                    };

                    self.outbox
                        .mark_failed(&[message.event_id], &error, retry_after)
                        .await?;
                }
            }
        }

        Ok(report)
    }

    /// Decode-then-publish. Both failure kinds route through retry: an
    /// undecodable payload is a poison candidate like any other.
    async fn dispatch(&self, message: &OutboxMessage) -> Result<(), String> {
        EventCodec::decode(&message.event_name, &message.payload).map_err(|e| e.to_string())?;
        self.publisher
            .publish(message)
            .await
            .map_err(|e| e.to_string())
    }

    /// `base * 2^attempts`, capped at the configured maximum.
    fn backoff(&self, attempts: i32) -> Duration {
        let shift = attempts.clamp(0, 30) as u32;
        let delay = self
            .config
            .base_retry_delay
            .as_secs()
            .saturating_mul(1u64 << shift);

        Duration::from_secs(delay.min(self.config.max_retry_delay.as_secs()))
    }

    /// Spawn the polling loop. The handle stops it cooperatively; an
    /// in-flight batch finishes before the task exits.
    pub fn start(self) -> DispatcherHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let running = Arc::new(AtomicBool::new(true));
        let running_flag = running.clone();

        let handle = tokio::spawn(async move {
            tracing::info!(
                poll_interval_secs = self.config.poll_interval.as_secs(),
                batch_size = self.config.batch_size,
                max_retry_attempts = self.config.max_retry_attempts,
                "outbox dispatcher started"
            );

            loop {
                match self.run_once().await {
                    Ok(report) if report.processed() > 0 => {
                        tracing::info!(
                            published = report.published,
                            failed = report.failed,
                            quarantined = report.quarantined,
                            "outbox batch processed"
                        );
                    }
                    Ok(_) => {}
                    // Infrastructure hiccups must not kill the loop.
                    Err(error) => {
                        tracing::error!(error = %error, "outbox polling iteration failed");
                    }
                }

                tokio::select! {
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    _ = tokio::time::sleep(self.config.poll_interval) => {}
                }
            }

            running_flag.store(false, Ordering::SeqCst);
            tracing::info!("outbox dispatcher stopped");
        });

        DispatcherHandle {
            shutdown: shutdown_tx,
            running,
            handle,
        }
    }
}

/// Controls for a running dispatcher.
pub struct DispatcherHandle {
    shutdown: watch::Sender<bool>,
    running: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl DispatcherHandle {
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Signal shutdown and wait for the loop to finish its current
    /// iteration.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        let _ = self.handle.await;
    }
}
