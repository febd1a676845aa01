//! Error types and delivery-error classification.
//!
//! Delivery errors are classified at the transport boundary into a closed
//! set of categories. Every category except `Permanent` is retried within
//! the record's retry budget; `Permanent` short-circuits straight to the
//! dead-letter queue.

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display};
use thiserror::Error;

/// Category of a delivery error, produced by [`classify`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[derive(Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Operation or connection timed out.
    Timeout,
    /// Connection refused, reset, or otherwise dropped.
    ConnectionRefused,
    /// Hostname could not be resolved.
    DnsFailure,
    /// SMTP 4xx temporary-failure condition (mailbox busy, greylisting, quota).
    MailboxTemporary,
    /// Unrecoverable failure (SMTP 5xx, invalid recipient, bad credentials).
    Permanent,
    /// Unrecognized failure. Retried within the budget.
    Other,
}

impl ErrorCategory {
    /// Whether this category participates in the retry budget.
    pub fn is_retryable(self) -> bool {
        !matches!(self, ErrorCategory::Permanent)
    }
}

/// Classify a raw transport error message into an [`ErrorCategory`].
///
/// Matching is substring-based over a fixed set of connectivity and SMTP
/// reply-code markers. Unmatched messages are `Other` (retryable), so an
/// unknown failure never silently loses an email.
pub fn classify(message: &str) -> ErrorCategory {
    let lower = message.to_lowercase();

    if lower.contains("timed out") || lower.contains("timeout") {
        return ErrorCategory::Timeout;
    }

    if lower.contains("connection refused")
        || lower.contains("connection reset")
        || lower.contains("reset by peer")
        || lower.contains("broken pipe")
        || lower.contains("connection closed")
        || lower.contains("unreachable")
        || lower.contains("eof")
    {
        return ErrorCategory::ConnectionRefused;
    }

    if lower.contains("dns")
        || lower.contains("name resolution")
        || lower.contains("no such host")
        || lower.contains("failed to lookup")
    {
        return ErrorCategory::DnsFailure;
    }

    if contains_smtp_code(&lower, &["421", "450", "451", "452"])
        || lower.contains("mailbox busy")
        || lower.contains("try again later")
        || lower.contains("rate limit")
        || lower.contains("too many")
        || lower.contains("greylist")
    {
        return ErrorCategory::MailboxTemporary;
    }

    if contains_smtp_code(&lower, &["550", "551", "552", "553", "554"])
        || lower.contains("invalid recipient")
        || lower.contains("no such user")
        || lower.contains("mailbox unavailable")
        || lower.contains("authentication failed")
        || lower.contains("not authorized")
    {
        return ErrorCategory::Permanent;
    }

    ErrorCategory::Other
}

/// Check whether the message carries one of the given SMTP reply codes as a
/// standalone numeric token (so "4500 bytes" does not match 450).
fn contains_smtp_code(message: &str, codes: &[&str]) -> bool {
    message
        .split(|c: char| !c.is_ascii_digit())
        .any(|token| codes.contains(&token))
}

/// A failed delivery attempt, as reported by a [`crate::MailTransport`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct SendError {
    message: String,
    category: ErrorCategory,
}

impl SendError {
    /// Create a send error with an explicit category.
    pub fn new(message: impl Into<String>, category: ErrorCategory) -> Self {
        Self {
            message: message.into(),
            category,
        }
    }

    /// Create a send error, deriving the category from the message text.
    pub fn classified(message: impl Into<String>) -> Self {
        let message = message.into();
        let category = classify(&message);
        Self { message, category }
    }

    /// Create a permanent (non-retryable) send error.
    pub fn permanent(message: impl Into<String>) -> Self {
        Self::new(message, ErrorCategory::Permanent)
    }

    /// Create a timeout send error.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(message, ErrorCategory::Timeout)
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn category(&self) -> ErrorCategory {
        self.category
    }
}

/// Errors from the queue core. Store failures are infrastructure errors and
/// propagate to the caller; delivery failures are captured on the record
/// instead and never surface here.
#[derive(Debug, Error)]
pub enum MailerError {
    /// The backing store was unreachable or rejected a command.
    #[error("store error: {0}")]
    Store(String),

    /// A record payload could not be encoded or decoded.
    #[error("record codec error: {0}")]
    Codec(String),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// The digest sink rejected a failure digest.
    #[error("digest delivery failed: {0}")]
    Digest(String),

    /// Every record in a batch hit a store error.
    #[error("batch aborted: {failed} of {attempted} records hit store errors")]
    BatchFailed { attempted: usize, failed: usize },
}

impl From<redis::RedisError> for MailerError {
    fn from(err: redis::RedisError) -> Self {
        MailerError::Store(err.to_string())
    }
}

impl From<serde_json::Error> for MailerError {
    fn from(err: serde_json::Error) -> Self {
        MailerError::Codec(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_connectivity() {
        assert_eq!(classify("connection timed out"), ErrorCategory::Timeout);
        assert_eq!(
            classify("Connection refused (os error 111)"),
            ErrorCategory::ConnectionRefused
        );
        assert_eq!(
            classify("connection reset by peer"),
            ErrorCategory::ConnectionRefused
        );
        assert_eq!(
            classify("DNS error: no such host"),
            ErrorCategory::DnsFailure
        );
    }

    #[test]
    fn test_classify_smtp_codes() {
        assert_eq!(
            classify("450 4.2.1 mailbox busy"),
            ErrorCategory::MailboxTemporary
        );
        assert_eq!(classify("451 try again later"), ErrorCategory::MailboxTemporary);
        assert_eq!(classify("550 no such user"), ErrorCategory::Permanent);
        assert_eq!(
            classify("554 transaction failed"),
            ErrorCategory::Permanent
        );
    }

    #[test]
    fn test_classify_code_needs_standalone_token() {
        // "4500" must not match the 450 temporary-failure code
        assert_eq!(classify("message of 4500 bytes rejected"), ErrorCategory::Other);
    }

    #[test]
    fn test_classify_unknown_is_retryable() {
        let category = classify("something novel went wrong");
        assert_eq!(category, ErrorCategory::Other);
        assert!(category.is_retryable());
    }

    #[test]
    fn test_permanent_is_not_retryable() {
        assert!(!ErrorCategory::Permanent.is_retryable());
        assert!(ErrorCategory::Timeout.is_retryable());
        assert!(ErrorCategory::MailboxTemporary.is_retryable());
    }

    #[test]
    fn test_send_error_classified() {
        let err = SendError::classified("connection timed out after 30s");
        assert_eq!(err.category(), ErrorCategory::Timeout);
        assert!(err.to_string().contains("timed out"));
    }

    #[test]
    fn test_category_display() {
        assert_eq!(ErrorCategory::ConnectionRefused.to_string(), "connection_refused");
        assert_eq!(ErrorCategory::Permanent.as_ref(), "permanent");
    }
}
