//! Email Retry Queue
//!
//! A durable, at-least-once delivery pipeline for transactional email,
//! backed by a key-value store (Redis in production, in-memory for tests).
//!
//! ## Features
//!
//! - **Durable queue**: pending list, processing set, dead-letter list
//! - **Exponential backoff**: fixed backoff table per retry attempt
//! - **Dead Letter Queue**: exhausted or permanently-failed emails
//! - **Idempotent duplicate suppression**: per business correlation key
//! - **Failure digest**: periodic operator summary of new dead letters
//! - **Prometheus metrics**: built-in observability
//!
//! ## Example
//!
//! ```ignore
//! use domain_mailer::{EmailDraft, MailQueue, MailWorker, QueueConfig, WorkerConfig};
//!
//! let store = Arc::new(RedisStore::new(redis));
//! let queue = Arc::new(MailQueue::new(store, QueueConfig::default()));
//!
//! // Enqueue from a request handler (fire-and-forget for the caller)
//! let draft = EmailDraft::booking("guest@example.com", "Booking confirmed", html, text, "B1");
//! let id = queue.enqueue(draft).await?;
//!
//! // Deliver from a timer-driven worker
//! let worker = MailWorker::new(queue, transport, WorkerConfig::default());
//! worker.process_batch(25).await?;
//! ```

mod clock;
mod config;
mod digest;
mod error;
mod idempotency;
pub mod metrics;
mod queue;
mod record;
mod retry;
mod store;
mod transport;
mod worker;

// Re-export main types
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{QueueConfig, QueueKeys, WorkerConfig, DEAD_TTL_SECS, RECORD_TTL_SECS};
pub use digest::{DigestBuilder, DigestEntry, DigestSink, FailureDigest, TracingDigestSink};
pub use error::{classify, ErrorCategory, MailerError, SendError};
pub use idempotency::IdempotencyGuard;
pub use queue::{FailureDisposition, MailQueue, QueueStats};
pub use record::{EmailDraft, EmailKind, QueuedEmail};
pub use retry::{RetryPolicy, BACKOFF_TABLE_SECS};
pub use store::{MemoryStore, QueueStore, RedisStore};
pub use transport::{MailTransport, SendReceipt, SmtpConfig, SmtpMailer};
pub use worker::{BatchOutcome, MailWorker};
