//! Delivery worker: pulls due records, attempts delivery, reports outcomes.
//!
//! The worker owns no schedule of its own; `process_batch` is designed to be
//! driven by an external timer, and `run` is a thin poll loop around it for
//! the deployable binary. Any number of workers may run against the same
//! store: leasing in the queue manager keeps them from double-sending.

use crate::config::WorkerConfig;
use crate::error::MailerError;
use crate::metrics;
use crate::queue::{FailureDisposition, MailQueue};
use crate::record::QueuedEmail;
use crate::store::QueueStore;
use crate::transport::MailTransport;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// What one batch did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Records this worker leased and attempted.
    pub processed: usize,
    /// Delivered successfully.
    pub sent: usize,
    /// Re-queued with backoff.
    pub retried: usize,
    /// Moved to the dead-letter queue.
    pub dead_lettered: usize,
    /// Due records another worker leased first (or whose payload vanished).
    pub skipped: usize,
    /// Records that hit a store error mid-flight.
    pub store_failures: usize,
}

/// Timer-driven batch processor.
pub struct MailWorker<S: QueueStore, T: MailTransport> {
    queue: Arc<MailQueue<S>>,
    transport: Arc<T>,
    config: WorkerConfig,
}

impl<S: QueueStore, T: MailTransport> MailWorker<S, T> {
    /// Create a new worker.
    pub fn new(queue: Arc<MailQueue<S>>, transport: Arc<T>, config: WorkerConfig) -> Self {
        Self {
            queue,
            transport,
            config,
        }
    }

    /// Get a reference to the queue manager.
    pub fn queue(&self) -> &MailQueue<S> {
        &self.queue
    }

    /// Process one batch of due records.
    ///
    /// Failures are isolated per record: one record's error never aborts
    /// the rest of the batch. The exception is wholesale infrastructure
    /// failure — when every attempted record hit a store error the batch
    /// returns `MailerError::BatchFailed` so the scheduler can alarm
    /// instead of spinning silently.
    pub async fn process_batch(&self, limit: usize) -> Result<BatchOutcome, MailerError> {
        let started = std::time::Instant::now();
        let due = self.queue.get_due(limit).await?;
        let attempted = due.len();

        let mut outcome = BatchOutcome::default();
        if attempted == 0 {
            return Ok(outcome);
        }

        debug!(
            consumer_id = %self.config.consumer_id,
            count = %attempted,
            "Processing due emails"
        );

        for record in due {
            self.process_record(&record, &mut outcome).await;
        }

        metrics::record_batch(attempted, started.elapsed());

        if outcome.store_failures == attempted {
            return Err(MailerError::BatchFailed {
                attempted,
                failed: outcome.store_failures,
            });
        }

        Ok(outcome)
    }

    /// Attempt one record. Store errors are counted, never propagated.
    async fn process_record(&self, record: &QueuedEmail, outcome: &mut BatchOutcome) {
        let id = &record.id;
        match self.queue.mark_processing(id).await {
            Ok(true) => {}
            Ok(false) => {
                // Another worker got the lease between get_due and here
                debug!(id = %id, "Lost lease race, skipping");
                outcome.skipped += 1;
                return;
            }
            Err(e) => {
                warn!(id = %id, error = %e, "Failed to lease email");
                outcome.store_failures += 1;
                return;
            }
        }

        outcome.processed += 1;

        match self.transport.send(record).await {
            Ok(receipt) => {
                debug!(
                    id = %id,
                    message_id = ?receipt.message_id,
                    transport = %self.transport.name(),
                    "Delivered email"
                );
                match self.queue.acknowledge_success(id).await {
                    Ok(()) => outcome.sent += 1,
                    Err(e) => {
                        error!(id = %id, error = %e, "Failed to acknowledge success");
                        outcome.store_failures += 1;
                    }
                }
            }
            Err(send_err) => {
                warn!(
                    id = %id,
                    error = %send_err,
                    category = %send_err.category(),
                    "Delivery attempt failed"
                );
                match self.queue.acknowledge_failure(id, &send_err).await {
                    Ok(FailureDisposition::Retried { .. }) => outcome.retried += 1,
                    Ok(FailureDisposition::DeadLettered) => outcome.dead_lettered += 1,
                    Ok(FailureDisposition::Missing) => outcome.skipped += 1,
                    Err(e) => {
                        error!(id = %id, error = %e, "Failed to acknowledge failure");
                        outcome.store_failures += 1;
                    }
                }
            }
        }
    }

    /// Poll loop for the deployable binary.
    ///
    /// Processes a batch per tick, sweeps stale leases periodically, and
    /// backs off exponentially on consecutive batch errors. Stop it through
    /// the shutdown receiver.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), MailerError> {
        info!(
            consumer_id = %self.config.consumer_id,
            batch_limit = %self.config.batch_limit,
            poll_interval_ms = %self.config.poll_interval_ms,
            reclaim_interval_secs = %self.config.reclaim_interval_secs,
            transport = %self.transport.name(),
            "Starting mail worker"
        );

        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);
        let reclaim_interval = Duration::from_secs(self.config.reclaim_interval_secs);
        let mut last_reclaim = std::time::Instant::now();

        // Track consecutive errors for exponential backoff
        let mut consecutive_errors: u32 = 0;
        const MAX_BACKOFF_SECS: u64 = 30;

        loop {
            if *shutdown.borrow() {
                info!("Received shutdown signal, stopping worker");
                break;
            }

            match self.process_batch(self.config.batch_limit).await {
                Ok(outcome) => {
                    if consecutive_errors > 0 {
                        info!("Store recovered after {} errors", consecutive_errors);
                        consecutive_errors = 0;
                    }
                    if outcome.processed > 0 {
                        info!(
                            sent = %outcome.sent,
                            retried = %outcome.retried,
                            dead_lettered = %outcome.dead_lettered,
                            skipped = %outcome.skipped,
                            "Processed email batch"
                        );
                    }
                }
                Err(e) => {
                    consecutive_errors += 1;
                    let backoff_secs =
                        std::cmp::min(2u64.pow(consecutive_errors.min(5)), MAX_BACKOFF_SECS);
                    warn!(
                        error = %e,
                        consecutive_errors = %consecutive_errors,
                        backoff_secs = %backoff_secs,
                        "Batch failed, backing off"
                    );
                    tokio::time::sleep(Duration::from_secs(backoff_secs)).await;
                    continue;
                }
            }

            // Periodically return stranded leases to the pending list
            if last_reclaim.elapsed() >= reclaim_interval {
                if let Err(e) = self.queue.reclaim_stale().await {
                    debug!(error = %e, "Error reclaiming stale leases");
                }
                last_reclaim = std::time::Instant::now();
            }

            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Received shutdown signal, stopping worker");
                        break;
                    }
                }
                _ = tokio::time::sleep(poll_interval) => {}
            }
        }

        info!("Mail worker stopped");
        Ok(())
    }
}
