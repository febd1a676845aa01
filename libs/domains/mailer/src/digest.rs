//! Periodic failure digest for operator visibility.
//!
//! A single cursor timestamp marks the boundary of already-reported
//! failures. Digesting is at-least-once, matching the delivery guarantee of
//! the queue itself: the cursor only advances after the sink accepted the
//! digest, so a failed delivery re-reports the same entries next time.

use crate::clock::{Clock, SystemClock};
use crate::config::{QueueConfig, QueueKeys};
use crate::error::MailerError;
use crate::record::{EmailKind, QueuedEmail};
use crate::store::QueueStore;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[cfg(test)]
use mockall::automock;

/// One dead-lettered email in a digest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DigestEntry {
    pub id: String,
    pub to: String,
    pub subject: String,
    pub kind: EmailKind,
    pub error: Option<String>,
    pub failed_at: DateTime<Utc>,
    pub retry_count: u32,
}

/// Summary of failures dead-lettered since the last digest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureDigest {
    pub count: usize,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub entries: Vec<DigestEntry>,
}

/// Destination for failure digests (operator email, chat webhook, ...).
#[cfg_attr(test, automock)]
#[async_trait]
pub trait DigestSink: Send + Sync {
    /// Deliver a digest. Only a successful return advances the cursor.
    async fn deliver(&self, digest: &FailureDigest) -> Result<(), MailerError>;

    /// Sink name for logging.
    fn name(&self) -> &'static str;
}

/// Fallback sink that reports through the log stream.
pub struct TracingDigestSink;

#[async_trait]
impl DigestSink for TracingDigestSink {
    async fn deliver(&self, digest: &FailureDigest) -> Result<(), MailerError> {
        warn!(
            count = %digest.count,
            period_start = %digest.period_start,
            period_end = %digest.period_end,
            "Email delivery failures since last digest"
        );
        for entry in &digest.entries {
            warn!(
                id = %entry.id,
                to = %entry.to,
                kind = %entry.kind,
                retry_count = %entry.retry_count,
                error = ?entry.error,
                "Dead-lettered email"
            );
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "tracing"
    }
}

/// Builds failure digests from the dead-letter list.
pub struct DigestBuilder<S: QueueStore> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    keys: QueueKeys,
    /// Lookback window when no cursor exists yet.
    window_secs: u64,
    /// Maximum dead-letter entries inspected per digest.
    max_entries: usize,
}

impl<S: QueueStore> DigestBuilder<S> {
    pub fn new(store: Arc<S>, config: &QueueConfig) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            keys: config.keys(),
            window_secs: 24 * 60 * 60,
            max_entries: 50,
        }
    }

    /// Replace the clock (tests).
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Override the default lookback window.
    pub fn with_window_secs(mut self, secs: u64) -> Self {
        self.window_secs = secs;
        self
    }

    /// Override the per-digest entry cap.
    pub fn with_max_entries(mut self, max: usize) -> Self {
        self.max_entries = max.max(1);
        self
    }

    /// Summarize dead letters newer than the cursor. Returns `None` when
    /// there is nothing to report.
    pub async fn build(&self) -> Result<Option<FailureDigest>, MailerError> {
        let now = self.clock.now();
        let default_cursor = now - Duration::seconds(self.window_secs as i64);

        let cursor = match self.store.get(&self.keys.digest_cursor()).await? {
            Some(raw) => DateTime::parse_from_rfc3339(&raw)
                .map(|t| t.with_timezone(&Utc))
                .unwrap_or(default_cursor),
            None => default_cursor,
        };

        // Most recent dead letters live at the tail of the failed list
        let ids = self
            .store
            .list_range(&self.keys.failed(), -(self.max_entries as isize), -1)
            .await?;

        let mut entries = Vec::new();
        for id in ids {
            let Some(raw) = self.store.get(&self.keys.record(&id)).await? else {
                continue;
            };
            let Ok(record) = QueuedEmail::decode(&raw) else {
                warn!(id = %id, "Undecodable dead-letter payload, skipping in digest");
                continue;
            };

            let failed_at = record.last_attempt.unwrap_or(record.created_at);
            if failed_at > cursor {
                entries.push(DigestEntry {
                    id: record.id,
                    to: record.to,
                    subject: record.subject,
                    kind: record.kind,
                    error: record.error,
                    failed_at,
                    retry_count: record.retry_count,
                });
            }
        }

        if entries.is_empty() {
            return Ok(None);
        }

        Ok(Some(FailureDigest {
            count: entries.len(),
            period_start: cursor,
            period_end: now,
            entries,
        }))
    }

    /// Advance the cursor to now. Call only after the digest was delivered.
    pub async fn mark_sent(&self) -> Result<(), MailerError> {
        self.store
            .set(&self.keys.digest_cursor(), &self.clock.now().to_rfc3339())
            .await
    }

    /// Build, deliver, and mark sent. Returns the number of entries
    /// reported (zero when there was nothing to report).
    pub async fn run(&self, sink: &dyn DigestSink) -> Result<usize, MailerError> {
        match self.build().await? {
            Some(digest) => {
                sink.deliver(&digest).await?;
                self.mark_sent().await?;
                info!(count = %digest.count, sink = %sink.name(), "Delivered failure digest");
                Ok(digest.count)
            }
            None => {
                debug!("No new dead-lettered emails to report");
                Ok(0)
            }
        }
    }
}
