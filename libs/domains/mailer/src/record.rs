//! The queued-email record and its store codec.

use crate::error::MailerError;
use chrono::{DateTime, Utc};
use rand::distr::Alphanumeric;
use rand::RngExt;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

/// Kinds of transactional email handled by the booking platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[derive(Display, AsRefStr, EnumString)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum EmailKind {
    /// Booking lifecycle mail (confirmation, cancellation, reminder).
    Booking,
    /// Contact-form replies.
    Contact,
    /// Internal operator notifications.
    AdminNotification,
}

/// A validated outbound email, as supplied by the enqueue caller.
///
/// The caller is responsible for validation and rendering; the queue never
/// re-validates and treats `html`/`text` as opaque rendered bodies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailDraft {
    pub to: String,
    pub subject: String,
    pub html: String,
    pub text: String,
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub reply_to: Option<String>,
    /// Business correlation key (e.g. the booking id).
    #[serde(default)]
    pub booking_id: Option<String>,
    pub kind: EmailKind,
}

impl EmailDraft {
    /// Create a new draft.
    pub fn new(
        kind: EmailKind,
        to: impl Into<String>,
        subject: impl Into<String>,
        html: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            to: to.into(),
            subject: subject.into(),
            html: html.into(),
            text: text.into(),
            from: None,
            reply_to: None,
            booking_id: None,
            kind,
        }
    }

    /// Create a booking-lifecycle draft correlated to a booking.
    pub fn booking(
        to: impl Into<String>,
        subject: impl Into<String>,
        html: impl Into<String>,
        text: impl Into<String>,
        booking_id: impl Into<String>,
    ) -> Self {
        Self::new(EmailKind::Booking, to, subject, html, text).with_booking_id(booking_id)
    }

    /// Create a contact-form reply draft.
    pub fn contact(
        to: impl Into<String>,
        subject: impl Into<String>,
        html: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self::new(EmailKind::Contact, to, subject, html, text)
    }

    /// Create an operator notification draft.
    pub fn admin(
        to: impl Into<String>,
        subject: impl Into<String>,
        html: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self::new(EmailKind::AdminNotification, to, subject, html, text)
    }

    /// Override the sender address.
    pub fn with_from(mut self, from: impl Into<String>) -> Self {
        self.from = Some(from.into());
        self
    }

    /// Set a Reply-To address.
    pub fn with_reply_to(mut self, reply_to: impl Into<String>) -> Self {
        self.reply_to = Some(reply_to.into());
        self
    }

    /// Correlate the draft with a booking.
    pub fn with_booking_id(mut self, booking_id: impl Into<String>) -> Self {
        self.booking_id = Some(booking_id.into());
        self
    }
}

/// The unit of work: one email in the retry queue.
///
/// Lives in exactly one of the pending list, the processing set, or the
/// dead-letter list; the `id` joins the membership entry to this payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedEmail {
    pub id: String,
    pub to: String,
    pub subject: String,
    pub html: String,
    pub text: String,
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub reply_to: Option<String>,
    #[serde(default)]
    pub booking_id: Option<String>,
    pub kind: EmailKind,
    /// Completed delivery attempts so far.
    #[serde(default)]
    pub retry_count: u32,
    /// Retry budget, fixed at creation.
    pub max_retries: u32,
    #[serde(default)]
    pub last_attempt: Option<DateTime<Utc>>,
    /// Absent or in the past means eligible for delivery now.
    #[serde(default)]
    pub next_retry: Option<DateTime<Utc>>,
    /// Message of the most recent failed attempt.
    #[serde(default)]
    pub error: Option<String>,
    /// When the current processing lease was taken, if any.
    #[serde(default)]
    pub leased_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl QueuedEmail {
    /// Build a fresh record from a draft. The first attempt is eligible
    /// immediately.
    pub fn from_draft(draft: EmailDraft, id: String, now: DateTime<Utc>, max_retries: u32) -> Self {
        Self {
            id,
            to: draft.to,
            subject: draft.subject,
            html: draft.html,
            text: draft.text,
            from: draft.from,
            reply_to: draft.reply_to,
            booking_id: draft.booking_id,
            kind: draft.kind,
            retry_count: 0,
            max_retries,
            last_attempt: None,
            next_retry: Some(now),
            error: None,
            leased_at: None,
            created_at: now,
        }
    }

    /// Whether the record is eligible for a delivery attempt at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_retry.is_none_or(|t| t <= now)
    }

    /// Serialize for the store.
    pub fn encode(&self) -> Result<String, MailerError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Deserialize from a store value.
    pub fn decode(raw: &str) -> Result<Self, MailerError> {
        Ok(serde_json::from_str(raw)?)
    }
}

/// Generate a queue id: millisecond timestamp plus a random alphanumeric
/// suffix. Sortable by creation time, unique enough for a queue key.
pub(crate) fn generate_id(now: DateTime<Utc>) -> String {
    let suffix: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(char::from)
        .collect();
    format!("{}-{}", now.timestamp_millis(), suffix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_draft_builders() {
        let draft = EmailDraft::booking("guest@example.com", "Booking confirmed", "<p>hi</p>", "hi", "B1")
            .with_reply_to("desk@example.com");

        assert_eq!(draft.kind, EmailKind::Booking);
        assert_eq!(draft.booking_id.as_deref(), Some("B1"));
        assert_eq!(draft.reply_to.as_deref(), Some("desk@example.com"));
        assert!(draft.from.is_none());
    }

    #[test]
    fn test_from_draft_is_immediately_due() {
        let now = Utc::now();
        let draft = EmailDraft::contact("a@b.c", "Re: question", "<p>x</p>", "x");
        let record = QueuedEmail::from_draft(draft, "1-abc".to_string(), now, 6);

        assert_eq!(record.retry_count, 0);
        assert_eq!(record.max_retries, 6);
        assert!(record.is_due(now));
        assert!(record.error.is_none());
    }

    #[test]
    fn test_due_gating() {
        let now = Utc::now();
        let draft = EmailDraft::admin("ops@example.com", "alert", "<p>x</p>", "x");
        let mut record = QueuedEmail::from_draft(draft, "1-abc".to_string(), now, 6);

        record.next_retry = Some(now + Duration::minutes(5));
        assert!(!record.is_due(now));
        assert!(record.is_due(now + Duration::minutes(5)));

        record.next_retry = None;
        assert!(record.is_due(now));
    }

    #[test]
    fn test_codec_round_trip() {
        let now = Utc::now();
        let draft = EmailDraft::booking("guest@example.com", "s", "<p>h</p>", "t", "B9");
        let record = QueuedEmail::from_draft(draft, generate_id(now), now, 6);

        let encoded = record.encode().unwrap();
        let decoded = QueuedEmail::decode(&encoded).unwrap();

        assert_eq!(decoded.id, record.id);
        assert_eq!(decoded.kind, EmailKind::Booking);
        assert_eq!(decoded.booking_id.as_deref(), Some("B9"));
    }

    #[test]
    fn test_decode_garbage_fails() {
        assert!(QueuedEmail::decode("not json").is_err());
    }

    #[test]
    fn test_generate_id_shape() {
        let now = Utc::now();
        let id = generate_id(now);
        let (millis, suffix) = id.split_once('-').unwrap();
        assert_eq!(millis, now.timestamp_millis().to_string());
        assert_eq!(suffix.len(), 8);
        assert!(suffix.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_kind_serialization() {
        assert_eq!(EmailKind::AdminNotification.to_string(), "admin_notification");
        let kind: EmailKind = "booking".parse().unwrap();
        assert_eq!(kind, EmailKind::Booking);
    }
}
