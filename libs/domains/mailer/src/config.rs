//! Queue and worker configuration.

use uuid::Uuid;

/// Retention for live (pending/processing) record payloads: 7 days.
pub const RECORD_TTL_SECS: u64 = 7 * 24 * 60 * 60;

/// Retention for dead-lettered record payloads: 30 days.
pub const DEAD_TTL_SECS: u64 = 30 * 24 * 60 * 60;

/// Default retry budget per email.
const DEFAULT_MAX_RETRIES: u32 = 6;

/// Default lease timeout before a processing entry is considered stranded.
const DEFAULT_LEASE_TIMEOUT_SECS: u64 = 600;

/// Configuration for the queue manager.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Prefix applied to every store key (empty in production; tests use it
    /// to isolate runs sharing one store).
    pub key_prefix: String,

    /// Retry budget fixed onto each record at enqueue time.
    pub max_retries: u32,

    /// Payload TTL while a record is pending or processing.
    pub record_ttl_secs: u64,

    /// Payload TTL once a record is dead-lettered.
    pub dead_ttl_secs: u64,

    /// Age after which a processing lease is considered stranded and the
    /// record becomes reclaimable.
    pub lease_timeout_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            key_prefix: std::env::var("MAILER_KEY_PREFIX").unwrap_or_default(),
            max_retries: std::env::var("MAILER_MAX_RETRIES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_MAX_RETRIES),
            record_ttl_secs: RECORD_TTL_SECS,
            dead_ttl_secs: DEAD_TTL_SECS,
            lease_timeout_secs: std::env::var("MAILER_LEASE_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_LEASE_TIMEOUT_SECS),
        }
    }
}

impl QueueConfig {
    /// Set the key prefix.
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Set the retry budget.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the live-payload TTL.
    pub fn with_record_ttl_secs(mut self, secs: u64) -> Self {
        self.record_ttl_secs = secs;
        self
    }

    /// Set the dead-lettered payload TTL.
    pub fn with_dead_ttl_secs(mut self, secs: u64) -> Self {
        self.dead_ttl_secs = secs;
        self
    }

    /// Set the lease timeout.
    pub fn with_lease_timeout_secs(mut self, secs: u64) -> Self {
        self.lease_timeout_secs = secs;
        self
    }

    /// Key layout for this configuration.
    pub fn keys(&self) -> QueueKeys {
        QueueKeys::new(&self.key_prefix)
    }
}

/// Store key layout.
///
/// Three membership collections plus per-record payloads, a digest cursor,
/// idempotency markers, and cumulative counters.
#[derive(Debug, Clone)]
pub struct QueueKeys {
    prefix: String,
}

impl QueueKeys {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Ordered list of ids awaiting delivery.
    pub fn pending(&self) -> String {
        format!("{}queue:pending", self.prefix)
    }

    /// Set of ids currently leased to a worker.
    pub fn processing(&self) -> String {
        format!("{}queue:processing", self.prefix)
    }

    /// Ordered list of dead-lettered ids.
    pub fn failed(&self) -> String {
        format!("{}queue:failed", self.prefix)
    }

    /// Serialized payload of one record.
    pub fn record(&self, id: &str) -> String {
        format!("{}record:{}", self.prefix, id)
    }

    /// Timestamp of the last emitted failure digest.
    pub fn digest_cursor(&self) -> String {
        format!("{}digest:cursor", self.prefix)
    }

    /// Duplicate-suppression marker for a business correlation key.
    pub fn idempotency(&self, correlation_id: &str) -> String {
        format!("{}idempotency:{}", self.prefix, correlation_id)
    }

    /// Cumulative counter.
    pub fn stat(&self, name: &str) -> String {
        format!("{}stats:{}", self.prefix, name)
    }
}

/// Configuration for the delivery worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Unique worker id for logging (auto-generated).
    pub consumer_id: String,

    /// Maximum pending records to inspect per batch.
    pub batch_limit: usize,

    /// How often the run loop polls for due records.
    pub poll_interval_ms: u64,

    /// How often the run loop sweeps for stranded processing leases.
    pub reclaim_interval_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            consumer_id: format!("worker-{}", Uuid::new_v4()),
            batch_limit: std::env::var("MAILER_BATCH_LIMIT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(25),
            poll_interval_ms: std::env::var("MAILER_POLL_INTERVAL_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(60_000),
            reclaim_interval_secs: std::env::var("MAILER_RECLAIM_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(300),
        }
    }
}

impl WorkerConfig {
    /// Set the worker id.
    pub fn with_consumer_id(mut self, id: impl Into<String>) -> Self {
        self.consumer_id = id.into();
        self
    }

    /// Set the batch limit.
    pub fn with_batch_limit(mut self, limit: usize) -> Self {
        self.batch_limit = limit.max(1);
        self
    }

    /// Set the poll interval.
    pub fn with_poll_interval_ms(mut self, interval: u64) -> Self {
        self.poll_interval_ms = interval;
        self
    }

    /// Set the stale-lease sweep interval.
    pub fn with_reclaim_interval_secs(mut self, secs: u64) -> Self {
        self.reclaim_interval_secs = secs;
        self
    }
}
