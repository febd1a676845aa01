//! Outbound mail transport boundary.
//!
//! The queue core only knows this trait; SMTP, HTTP APIs, or test doubles
//! all plug in behind it. Transport failures come back as [`SendError`]s
//! already classified for the retry policy.

mod smtp;

pub use smtp::{SmtpConfig, SmtpMailer};

use crate::error::SendError;
use crate::record::QueuedEmail;
use async_trait::async_trait;

/// Acknowledgement of an accepted delivery.
#[derive(Debug, Clone, Default)]
pub struct SendReceipt {
    /// Provider-specific message ID for tracking.
    pub message_id: Option<String>,
}

/// Single-method delivery contract: send the record or report a classified
/// failure. No timeout is imposed here; transports own their own deadlines.
#[async_trait]
pub trait MailTransport: Send + Sync {
    /// Attempt delivery of one queued email.
    async fn send(&self, email: &QueuedEmail) -> Result<SendReceipt, SendError>;

    /// Transport name for logging.
    fn name(&self) -> &'static str;
}
