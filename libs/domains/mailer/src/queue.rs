//! Queue manager: the sole mutator of queue membership and record payloads.
//!
//! Three logical collections share one store: the pending list (ordered,
//! awaiting eligibility), the processing set (leased to a worker), and the
//! failed list (dead letters). A record id lives in exactly one of them;
//! membership entries whose payload has expired are pruned lazily wherever
//! they are encountered.

use crate::clock::{Clock, SystemClock};
use crate::config::{QueueConfig, QueueKeys};
use crate::error::{MailerError, SendError};
use crate::metrics;
use crate::record::{self, EmailDraft, QueuedEmail};
use crate::retry::RetryPolicy;
use crate::store::QueueStore;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What happened to a record when a delivery failure was acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureDisposition {
    /// Re-queued with backoff.
    Retried { next_retry: DateTime<Utc> },
    /// Moved to the dead-letter list (budget exhausted or permanent error).
    DeadLettered,
    /// The payload was already gone; the stale processing entry was pruned.
    Missing,
}

/// Counts of the three live collections plus cumulative totals.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: usize,
    pub processing: usize,
    pub failed: usize,
    pub enqueued_total: i64,
    pub succeeded_total: i64,
    pub dead_lettered_total: i64,
}

/// The email retry queue.
pub struct MailQueue<S: QueueStore> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    keys: QueueKeys,
    policy: RetryPolicy,
    config: QueueConfig,
}

impl<S: QueueStore> MailQueue<S> {
    /// Create a queue manager on the system clock.
    pub fn new(store: Arc<S>, config: QueueConfig) -> Self {
        Self {
            keys: config.keys(),
            store,
            clock: Arc::new(SystemClock),
            policy: RetryPolicy::default(),
            config,
        }
    }

    /// Replace the clock (tests).
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replace the retry policy.
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Accept a draft for delivery. Persists the payload with the live TTL
    /// and appends the id to the pending list; the first attempt is
    /// eligible immediately. Returns the new id.
    pub async fn enqueue(&self, draft: EmailDraft) -> Result<String, MailerError> {
        let now = self.clock.now();
        let id = record::generate_id(now);
        let record = QueuedEmail::from_draft(draft, id.clone(), now, self.config.max_retries);

        self.store
            .set_ex(&self.keys.record(&id), &record.encode()?, self.config.record_ttl_secs)
            .await?;
        self.store.list_push_back(&self.keys.pending(), &id).await?;
        self.store.incr(&self.keys.stat("enqueued")).await?;

        metrics::record_enqueued(record.kind);
        debug!(id = %id, kind = %record.kind, to = %record.to, "Enqueued email");

        Ok(id)
    }

    /// Inspect up to `limit` ids from the head of the pending list and
    /// return the records whose `next_retry` has passed, in scan order.
    /// Entries with a missing or undecodable payload are pruned and skipped.
    pub async fn get_due(&self, limit: usize) -> Result<Vec<QueuedEmail>, MailerError> {
        if limit == 0 {
            return Ok(vec![]);
        }

        let now = self.clock.now();
        let ids = self
            .store
            .list_range(&self.keys.pending(), 0, limit as isize - 1)
            .await?;

        let mut due = Vec::new();
        for id in ids {
            match self.load(&id).await? {
                Some(record) if record.is_due(now) => due.push(record),
                Some(_) => {}
                None => {
                    warn!(id = %id, "Pending entry has no payload, pruning");
                    self.store.list_remove(&self.keys.pending(), &id).await?;
                }
            }
        }

        Ok(due)
    }

    /// Lease a record for processing. Returns `true` when this caller won
    /// the lease.
    ///
    /// The relocation is race-free without a transaction: removing the id
    /// from the pending list is conditional (the store reports the removal
    /// count), so of N workers racing on the same due id exactly one
    /// observes a removal and proceeds into the processing set.
    pub async fn mark_processing(&self, id: &str) -> Result<bool, MailerError> {
        let removed = self.store.list_remove(&self.keys.pending(), id).await?;
        if removed == 0 {
            return Ok(false);
        }

        self.store.set_add(&self.keys.processing(), id).await?;

        // Stamp the lease so a reclaim sweep can spot stranded entries.
        if let Some(mut record) = self.load(id).await? {
            record.leased_at = Some(self.clock.now());
            self.store
                .set_ex(&self.keys.record(id), &record.encode()?, self.config.record_ttl_secs)
                .await?;
        }

        debug!(id = %id, "Leased email for processing");
        Ok(true)
    }

    /// Terminal success: drop the payload and the processing membership.
    /// Idempotent; a second call finds nothing to do.
    pub async fn acknowledge_success(&self, id: &str) -> Result<(), MailerError> {
        let existed = self.store.get(&self.keys.record(id)).await?.is_some();

        self.store.del(&self.keys.record(id)).await?;
        self.store.set_remove(&self.keys.processing(), id).await?;

        if existed {
            self.store.incr(&self.keys.stat("succeeded")).await?;
            metrics::record_sent();
            debug!(id = %id, "Delivered email");
        }

        Ok(())
    }

    /// Record a failed delivery attempt and decide the record's fate:
    /// re-queue with backoff, or dead-letter when the error is permanent or
    /// the retry budget is exhausted.
    pub async fn acknowledge_failure(
        &self,
        id: &str,
        error: &SendError,
    ) -> Result<FailureDisposition, MailerError> {
        let now = self.clock.now();

        let mut record = match self.load(id).await? {
            Some(record) => record,
            None => {
                warn!(id = %id, "Processing entry has no payload, pruning");
                self.store.set_remove(&self.keys.processing(), id).await?;
                return Ok(FailureDisposition::Missing);
            }
        };

        let attempt = record.retry_count;
        record.retry_count += 1;
        record.last_attempt = Some(now);
        record.error = Some(error.to_string());
        record.leased_at = None;

        let category = error.category();
        let exhausted = record.retry_count >= record.max_retries;

        if !category.is_retryable() || exhausted {
            record.next_retry = None;
            self.store
                .set_ex(&self.keys.record(id), &record.encode()?, self.config.dead_ttl_secs)
                .await?;
            self.store.list_push_back(&self.keys.failed(), id).await?;
            self.store.set_remove(&self.keys.processing(), id).await?;
            self.store.incr(&self.keys.stat("dead_lettered")).await?;

            metrics::record_dead_lettered(category);
            warn!(
                id = %id,
                retry_count = %record.retry_count,
                category = %category,
                error = %error,
                "Dead-lettered email"
            );
            return Ok(FailureDisposition::DeadLettered);
        }

        let next_retry = now + self.policy.delay_for_attempt(attempt);
        record.next_retry = Some(next_retry);
        self.store
            .set_ex(&self.keys.record(id), &record.encode()?, self.config.record_ttl_secs)
            .await?;
        self.store.list_push_back(&self.keys.pending(), id).await?;
        self.store.set_remove(&self.keys.processing(), id).await?;

        metrics::record_retried(record.retry_count);
        info!(
            id = %id,
            retry_count = %record.retry_count,
            next_retry = %next_retry,
            error = %error,
            "Scheduled email retry"
        );
        Ok(FailureDisposition::Retried { next_retry })
    }

    /// Read up to `limit` dead-lettered records, oldest first. Entries with
    /// an expired payload are pruned.
    pub async fn get_failed(&self, limit: usize) -> Result<Vec<QueuedEmail>, MailerError> {
        if limit == 0 {
            return Ok(vec![]);
        }

        let ids = self
            .store
            .list_range(&self.keys.failed(), 0, limit as isize - 1)
            .await?;

        let mut failed = Vec::new();
        for id in ids {
            match self.load(&id).await? {
                Some(record) => failed.push(record),
                None => {
                    warn!(id = %id, "Dead-letter entry has no payload, pruning");
                    self.store.list_remove(&self.keys.failed(), &id).await?;
                }
            }
        }

        Ok(failed)
    }

    /// Sizes of the three collections plus cumulative totals.
    pub async fn stats(&self) -> Result<QueueStats, MailerError> {
        let pending = self.store.list_len(&self.keys.pending()).await?;
        let processing = self.store.set_len(&self.keys.processing()).await?;
        let failed = self.store.list_len(&self.keys.failed()).await?;

        let stats = QueueStats {
            pending,
            processing,
            failed,
            enqueued_total: self.read_counter("enqueued").await?,
            succeeded_total: self.read_counter("succeeded").await?,
            dead_lettered_total: self.read_counter("dead_lettered").await?,
        };

        metrics::set_queue_depth(pending, processing, failed);
        Ok(stats)
    }

    /// Drop dead-letter entries older than the dead-letter retention window
    /// (and prune entries whose payload already expired). Returns the count
    /// removed.
    pub async fn cleanup_old(&self) -> Result<usize, MailerError> {
        let now = self.clock.now();
        let cutoff = now - Duration::seconds(self.config.dead_ttl_secs as i64);

        let ids = self.store.list_range(&self.keys.failed(), 0, -1).await?;
        let mut removed = 0;
        for id in ids {
            match self.load(&id).await? {
                None => {
                    self.store.list_remove(&self.keys.failed(), &id).await?;
                    removed += 1;
                }
                Some(record) if record.created_at < cutoff => {
                    self.store.list_remove(&self.keys.failed(), &id).await?;
                    self.store.del(&self.keys.record(&id)).await?;
                    removed += 1;
                }
                Some(_) => {}
            }
        }

        if removed > 0 {
            info!(removed = %removed, "Cleaned up expired dead-letter entries");
        }
        Ok(removed)
    }

    /// Return stranded processing entries to the pending list.
    ///
    /// A worker that crashes between leasing and acknowledging leaves its
    /// record in the processing set forever; entries whose lease is older
    /// than the configured timeout become eligible again. Returns the count
    /// reclaimed.
    pub async fn reclaim_stale(&self) -> Result<usize, MailerError> {
        let now = self.clock.now();
        let max_lease = Duration::seconds(self.config.lease_timeout_secs as i64);

        let members = self.store.set_members(&self.keys.processing()).await?;
        let mut reclaimed = 0;
        for id in members {
            match self.load(&id).await? {
                None => {
                    warn!(id = %id, "Processing entry has no payload, pruning");
                    self.store.set_remove(&self.keys.processing(), &id).await?;
                }
                Some(mut record) => {
                    let leased_at = record.leased_at.unwrap_or(record.created_at);
                    if now - leased_at < max_lease {
                        continue;
                    }

                    record.leased_at = None;
                    record.next_retry = None;
                    self.store
                        .set_ex(
                            &self.keys.record(&id),
                            &record.encode()?,
                            self.config.record_ttl_secs,
                        )
                        .await?;
                    self.store.list_push_back(&self.keys.pending(), &id).await?;
                    self.store.set_remove(&self.keys.processing(), &id).await?;
                    reclaimed += 1;
                }
            }
        }

        if reclaimed > 0 {
            metrics::record_reclaimed(reclaimed);
            warn!(reclaimed = %reclaimed, "Reclaimed stale processing leases");
        }
        Ok(reclaimed)
    }

    /// Load a record payload; a missing or undecodable payload reads as
    /// `None` (the caller prunes the membership entry).
    async fn load(&self, id: &str) -> Result<Option<QueuedEmail>, MailerError> {
        match self.store.get(&self.keys.record(id)).await? {
            Some(raw) => match QueuedEmail::decode(&raw) {
                Ok(record) => Ok(Some(record)),
                Err(e) => {
                    warn!(id = %id, error = %e, "Undecodable record payload, treating as missing");
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }

    async fn read_counter(&self, name: &str) -> Result<i64, MailerError> {
        Ok(self
            .store
            .get(&self.keys.stat(name))
            .await?
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::ErrorCategory;
    use crate::store::MemoryStore;

    fn draft() -> EmailDraft {
        EmailDraft::booking(
            "guest@example.com",
            "Booking confirmed",
            "<p>Thanks!</p>",
            "Thanks!",
            "B1",
        )
    }

    fn queue_on(clock: Arc<ManualClock>) -> MailQueue<MemoryStore> {
        let store = Arc::new(MemoryStore::with_clock(clock.clone()));
        MailQueue::new(store, QueueConfig::default()).with_clock(clock)
    }

    #[tokio::test]
    async fn test_enqueue_is_immediately_due() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let queue = queue_on(clock);

        let id = queue.enqueue(draft()).await.unwrap();

        let due = queue.get_due(10).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, id);
        assert_eq!(due[0].retry_count, 0);

        let stats = queue.stats().await.unwrap();
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.enqueued_total, 1);
    }

    #[tokio::test]
    async fn test_get_due_respects_next_retry() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let queue = queue_on(clock.clone());

        let id = queue.enqueue(draft()).await.unwrap();
        assert!(queue.mark_processing(&id).await.unwrap());
        queue
            .acknowledge_failure(&id, &SendError::timeout("timed out"))
            .await
            .unwrap();

        // Second attempt is gated by delay_for_attempt(1) = 1 minute
        assert!(queue.get_due(10).await.unwrap().is_empty());

        clock.advance(Duration::minutes(1));
        let due = queue.get_due(10).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].retry_count, 1);
    }

    #[tokio::test]
    async fn test_mark_processing_single_winner() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let queue = queue_on(clock);

        let id = queue.enqueue(draft()).await.unwrap();

        assert!(queue.mark_processing(&id).await.unwrap());
        // A racing worker that read the same due id loses the lease
        assert!(!queue.mark_processing(&id).await.unwrap());

        let stats = queue.stats().await.unwrap();
        assert_eq!(stats.pending, 0);
        assert_eq!(stats.processing, 1);
    }

    #[tokio::test]
    async fn test_acknowledge_success_is_idempotent() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let queue = queue_on(clock);

        let id = queue.enqueue(draft()).await.unwrap();
        assert!(queue.mark_processing(&id).await.unwrap());

        queue.acknowledge_success(&id).await.unwrap();
        let first = queue.stats().await.unwrap();

        // Second ack is a no-op against the missing payload
        queue.acknowledge_success(&id).await.unwrap();
        let second = queue.stats().await.unwrap();

        assert_eq!(first, second);
        assert_eq!(second.pending, 0);
        assert_eq!(second.processing, 0);
        assert_eq!(second.succeeded_total, 1);
    }

    #[tokio::test]
    async fn test_failure_requeues_with_backoff() {
        let start = Utc::now();
        let clock = Arc::new(ManualClock::new(start));
        let queue = queue_on(clock);

        let id = queue.enqueue(draft()).await.unwrap();
        assert!(queue.mark_processing(&id).await.unwrap());

        let disposition = queue
            .acknowledge_failure(&id, &SendError::timeout("connection timed out"))
            .await
            .unwrap();

        // First failure: delay_for_attempt(0) = 0s, eligible immediately
        assert_eq!(
            disposition,
            FailureDisposition::Retried { next_retry: start }
        );

        let due = queue.get_due(10).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].retry_count, 1);
        assert_eq!(due[0].error.as_deref(), Some("connection timed out"));
    }

    #[tokio::test]
    async fn test_exhausted_budget_dead_letters() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store = Arc::new(MemoryStore::with_clock(clock.clone()));
        let queue = MailQueue::new(store, QueueConfig::default().with_max_retries(2))
            .with_clock(clock.clone());

        let id = queue.enqueue(draft()).await.unwrap();

        // Attempt 1: retried
        clock.advance(Duration::hours(5));
        assert!(queue.mark_processing(&id).await.unwrap());
        let first = queue
            .acknowledge_failure(&id, &SendError::timeout("timed out"))
            .await
            .unwrap();
        assert!(matches!(first, FailureDisposition::Retried { .. }));

        // Attempt 2: budget exhausted
        clock.advance(Duration::hours(5));
        assert!(queue.mark_processing(&id).await.unwrap());
        let second = queue
            .acknowledge_failure(&id, &SendError::timeout("timed out"))
            .await
            .unwrap();
        assert_eq!(second, FailureDisposition::DeadLettered);

        let stats = queue.stats().await.unwrap();
        assert_eq!(stats.pending, 0);
        assert_eq!(stats.processing, 0);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.dead_lettered_total, 1);

        let failed = queue.get_failed(10).await.unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].retry_count, 2);
    }

    #[tokio::test]
    async fn test_permanent_error_short_circuits_to_dead_letter() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let queue = queue_on(clock);

        let id = queue.enqueue(draft()).await.unwrap();
        assert!(queue.mark_processing(&id).await.unwrap());

        let disposition = queue
            .acknowledge_failure(&id, &SendError::classified("550 no such user"))
            .await
            .unwrap();

        // One attempt, full budget remaining, still dead-lettered
        assert_eq!(disposition, FailureDisposition::DeadLettered);

        let failed = queue.get_failed(10).await.unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].retry_count, 1);
        assert_eq!(
            crate::error::classify(failed[0].error.as_deref().unwrap()),
            ErrorCategory::Permanent
        );
    }

    #[tokio::test]
    async fn test_missing_payload_is_pruned_from_pending() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store = Arc::new(MemoryStore::with_clock(clock.clone()));
        let queue = MailQueue::new(store.clone(), QueueConfig::default()).with_clock(clock.clone());

        queue.enqueue(draft()).await.unwrap();

        // Payload expires (7 days) while the list entry lingers
        clock.advance(Duration::days(8));
        assert!(queue.get_due(10).await.unwrap().is_empty());

        // The stale list entry was pruned, not just skipped
        let stats = queue.stats().await.unwrap();
        assert_eq!(stats.pending, 0);
    }

    #[tokio::test]
    async fn test_acknowledge_failure_on_missing_payload() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let queue = queue_on(clock.clone());

        let id = queue.enqueue(draft()).await.unwrap();
        assert!(queue.mark_processing(&id).await.unwrap());

        clock.advance(Duration::days(8));
        let disposition = queue
            .acknowledge_failure(&id, &SendError::timeout("timed out"))
            .await
            .unwrap();

        assert_eq!(disposition, FailureDisposition::Missing);
        assert_eq!(queue.stats().await.unwrap().processing, 0);
    }

    #[tokio::test]
    async fn test_dead_letter_retention_is_30_days() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let queue = queue_on(clock.clone());

        let id = queue.enqueue(draft()).await.unwrap();
        assert!(queue.mark_processing(&id).await.unwrap());
        queue
            .acknowledge_failure(&id, &SendError::classified("550 no such user"))
            .await
            .unwrap();

        // Well past the live TTL, within the dead-letter TTL
        clock.advance(Duration::days(29));
        assert_eq!(queue.get_failed(10).await.unwrap().len(), 1);

        clock.advance(Duration::days(2));
        assert!(queue.get_failed(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cleanup_old_removes_expired_dead_letters() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let queue = queue_on(clock.clone());

        let id = queue.enqueue(draft()).await.unwrap();
        assert!(queue.mark_processing(&id).await.unwrap());
        queue
            .acknowledge_failure(&id, &SendError::classified("550 no such user"))
            .await
            .unwrap();

        assert_eq!(queue.cleanup_old().await.unwrap(), 0);

        clock.advance(Duration::days(31));
        assert_eq!(queue.cleanup_old().await.unwrap(), 1);
        assert_eq!(queue.stats().await.unwrap().failed, 0);
    }

    #[tokio::test]
    async fn test_reclaim_stale_returns_stranded_lease_to_pending() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store = Arc::new(MemoryStore::with_clock(clock.clone()));
        let queue = MailQueue::new(store, QueueConfig::default().with_lease_timeout_secs(600))
            .with_clock(clock.clone());

        let id = queue.enqueue(draft()).await.unwrap();
        assert!(queue.mark_processing(&id).await.unwrap());

        // Fresh lease: nothing to reclaim
        assert_eq!(queue.reclaim_stale().await.unwrap(), 0);
        assert_eq!(queue.stats().await.unwrap().processing, 1);

        // Worker crashed; the lease goes stale
        clock.advance(Duration::seconds(601));
        assert_eq!(queue.reclaim_stale().await.unwrap(), 1);

        let stats = queue.stats().await.unwrap();
        assert_eq!(stats.processing, 0);
        assert_eq!(stats.pending, 1);

        // Reclaimed record is immediately eligible again
        let due = queue.get_due(10).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, id);
    }
}
