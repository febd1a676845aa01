//! Duplicate-send suppression per business correlation key.
//!
//! Orthogonal to the retry queue: the queue keeps one accepted send from
//! being lost, this guard keeps one business event (e.g. "booking B1
//! confirmed") from being sent twice by concurrent callers.

use crate::config::{QueueConfig, QueueKeys};
use crate::error::MailerError;
use crate::store::QueueStore;
use std::sync::Arc;
use tracing::{debug, info};

/// Marker TTL: 7 days.
const IDEMPOTENCY_TTL_SECS: u64 = 7 * 24 * 60 * 60;

/// Atomic create-if-absent guard over the store.
pub struct IdempotencyGuard<S: QueueStore> {
    store: Arc<S>,
    keys: QueueKeys,
    ttl_secs: u64,
}

impl<S: QueueStore> IdempotencyGuard<S> {
    pub fn new(store: Arc<S>, config: &QueueConfig) -> Self {
        Self {
            store,
            keys: config.keys(),
            ttl_secs: IDEMPOTENCY_TTL_SECS,
        }
    }

    /// Override the marker TTL.
    pub fn with_ttl_secs(mut self, ttl_secs: u64) -> Self {
        self.ttl_secs = ttl_secs;
        self
    }

    /// Try to claim the correlation key. Returns `true` when this caller
    /// won and should proceed to send; `false` when another caller already
    /// claimed it and the send must be skipped.
    pub async fn claim(&self, correlation_id: &str) -> Result<bool, MailerError> {
        let claimed = self
            .store
            .set_nx_ex(&self.keys.idempotency(correlation_id), "1", self.ttl_secs)
            .await?;

        if claimed {
            debug!(correlation_id = %correlation_id, "Claimed idempotency marker");
        } else {
            info!(correlation_id = %correlation_id, "Duplicate send suppressed");
        }
        Ok(claimed)
    }

    /// Drop the marker, re-authorizing a send (tests, manual re-send).
    pub async fn release(&self, correlation_id: &str) -> Result<(), MailerError> {
        self.store
            .del(&self.keys.idempotency(correlation_id))
            .await?;
        debug!(correlation_id = %correlation_id, "Released idempotency marker");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::MemoryStore;
    use chrono::{Duration, Utc};

    #[tokio::test]
    async fn test_claim_then_duplicate() {
        let guard = IdempotencyGuard::new(Arc::new(MemoryStore::new()), &QueueConfig::default());

        assert!(guard.claim("B1").await.unwrap());
        assert!(!guard.claim("B1").await.unwrap());
        assert!(guard.claim("B2").await.unwrap());
    }

    #[tokio::test]
    async fn test_release_reauthorizes() {
        let guard = IdempotencyGuard::new(Arc::new(MemoryStore::new()), &QueueConfig::default());

        assert!(guard.claim("B1").await.unwrap());
        guard.release("B1").await.unwrap();
        assert!(guard.claim("B1").await.unwrap());
    }

    #[tokio::test]
    async fn test_marker_expires() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store = Arc::new(MemoryStore::with_clock(clock.clone()));
        let guard = IdempotencyGuard::new(store, &QueueConfig::default());

        assert!(guard.claim("B1").await.unwrap());

        clock.advance(Duration::days(6));
        assert!(!guard.claim("B1").await.unwrap());

        clock.advance(Duration::days(2));
        assert!(guard.claim("B1").await.unwrap());
    }

    #[tokio::test]
    async fn test_concurrent_claims_have_one_winner() {
        let guard = Arc::new(IdempotencyGuard::new(
            Arc::new(MemoryStore::new()),
            &QueueConfig::default(),
        ));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let guard = guard.clone();
            handles.push(tokio::spawn(
                async move { guard.claim("B1").await.unwrap() },
            ));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }
}
