//! Requests, envelopes and outcomes passed through the engine.

use std::{num::NonZeroUsize, sync::Arc, time::Duration};

use serde::Serialize;

pub use courier_smtp::client::Attachment;

/// How a bulk request is turned into relay transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum DeliveryMode {
    /// One envelope per recipient, paced in batches.
    #[default]
    Individual,
    /// One envelope addressed to every recipient at once.
    CombinedRecipients,
}

/// Message content. At least one variant must be present to pass validation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Body {
    pub text: Option<String>,
    pub html: Option<String>,
}

impl Body {
    /// Drops empty variants.
    #[must_use]
    pub fn normalised(self) -> Self {
        Self {
            text: self.text.filter(|text| !text.is_empty()),
            html: self.html.filter(|html| !html.is_empty()),
        }
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.text.is_none() && self.html.is_none()
    }
}

/// A bulk send as received from the caller, before validation.
#[derive(Debug, Clone, Default)]
pub struct DispatchRequest {
    /// Sender override, either `addr@domain` or `Name <addr@domain>`.
    /// Defaults to the relay principal.
    pub from: Option<String>,
    pub recipients: Vec<String>,
    pub subject: String,
    pub body: Body,
    pub attachments: Vec<Attachment>,
    /// Default: [`DeliveryMode::Individual`]
    pub mode: Option<DeliveryMode>,
    /// Default: 10
    pub batch_size: Option<usize>,
    /// Default: 1000 ms
    pub pause: Option<Duration>,
}

/// A single message with explicit To/Cc/Bcc, sent as one transaction.
#[derive(Debug, Clone, Default)]
pub struct SingleMessageRequest {
    pub from: Option<String>,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
    pub subject: String,
    pub body: Body,
    pub attachments: Vec<Attachment>,
}

/// A [`DispatchRequest`] that passed validation, with defaults applied.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct ValidatedRequest {
    pub sender: String,
    pub display_name: Option<String>,
    /// Trimmed, in input order, duplicates kept.
    pub recipients: Vec<String>,
    pub subject: String,
    pub body: Body,
    pub attachments: Arc<[Attachment]>,
    pub mode: DeliveryMode,
    pub batch_size: NonZeroUsize,
    pub pause: Duration,
}

impl ValidatedRequest {
    /// The envelope for one transmission unit addressed to `to`.
    #[must_use]
    pub fn envelope(&self, to: Vec<String>) -> MessageEnvelope {
        MessageEnvelope {
            sender: self.sender.clone(),
            display_name: self.display_name.clone(),
            to,
            cc: Vec::new(),
            bcc: Vec::new(),
            subject: self.subject.clone(),
            body: self.body.clone(),
            attachments: Arc::clone(&self.attachments),
        }
    }
}

/// A [`SingleMessageRequest`] that passed validation.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct ValidatedSingle {
    pub envelope: MessageEnvelope,
}

/// Everything needed for one relay transaction.
#[derive(Debug, Clone)]
pub struct MessageEnvelope {
    /// Envelope sender (`MAIL FROM`) and From header address.
    pub sender: String,
    pub display_name: Option<String>,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    /// Envelope only; never written to headers.
    pub bcc: Vec<String>,
    pub subject: String,
    pub body: Body,
    pub attachments: Arc<[Attachment]>,
}

impl MessageEnvelope {
    /// Every address that receives a `RCPT TO`, in To, Cc, Bcc order.
    pub fn envelope_recipients(&self) -> impl Iterator<Item = &str> {
        self.to
            .iter()
            .chain(&self.cc)
            .chain(&self.bcc)
            .map(String::as_str)
    }

    /// The domain of the sender, used for the Message-ID.
    #[must_use]
    pub fn sender_domain(&self) -> &str {
        self.sender
            .rsplit_once('@')
            .map_or("localhost", |(_, domain)| domain)
    }
}

/// What the relay said when it accepted a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransmissionReceipt {
    /// The Message-ID the message was sent with, including angle brackets.
    pub message_id: String,
    /// Text of the relay's final reply to DATA.
    pub response: String,
}

/// Who a transmission was addressed to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum OutcomeTarget {
    Recipient(String),
    Recipients(Vec<String>),
}

impl OutcomeTarget {
    /// How many recipients this target stands for.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Recipient(_) => 1,
            Self::Recipients(recipients) => recipients.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The recorded result of one transmission attempt.
///
/// Serialises as `{ "recipient": .., "success": .., "messageId": .. }` or,
/// for combined sends, with `recipients` in place of `recipient`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransmissionOutcome {
    #[serde(flatten)]
    pub target: OutcomeTarget,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TransmissionOutcome {
    #[must_use]
    pub fn delivered(target: OutcomeTarget, receipt: TransmissionReceipt) -> Self {
        Self {
            target,
            success: true,
            message_id: Some(receipt.message_id),
            error: None,
        }
    }

    #[must_use]
    pub fn failed(target: OutcomeTarget, error: impl ToString) -> Self {
        Self {
            target,
            success: false,
            message_id: None,
            error: Some(error.to_string()),
        }
    }

    #[must_use]
    pub fn from_result(
        target: OutcomeTarget,
        result: Result<TransmissionReceipt, crate::RelayError>,
    ) -> Self {
        match result {
            Ok(receipt) => Self::delivered(target, receipt),
            Err(error) => Self::failed(target, error),
        }
    }
}

/// The accounting for one dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchSummary {
    pub mode: DeliveryMode,
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    /// In attempt order.
    pub outcomes: Vec<TransmissionOutcome>,
    /// Set when the dispatch was cancelled before every recipient was attempted.
    pub cancelled: bool,
}

impl DispatchSummary {
    pub fn results(&self) -> impl Iterator<Item = &TransmissionOutcome> {
        self.outcomes.iter().filter(|outcome| outcome.success)
    }

    pub fn errors(&self) -> impl Iterator<Item = &TransmissionOutcome> {
        self.outcomes.iter().filter(|outcome| !outcome.success)
    }

    /// `failed > 0`; callers must check this rather than assume success.
    #[must_use]
    pub const fn has_failures(&self) -> bool {
        self.failed > 0
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    #[test]
    fn test_outcome_wire_shape() {
        let ok = TransmissionOutcome::delivered(
            OutcomeTarget::Recipient("a@x.com".to_string()),
            TransmissionReceipt {
                message_id: "<1@x.com>".to_string(),
                response: "queued".to_string(),
            },
        );
        assert_eq!(
            serde_json::to_value(&ok).unwrap(),
            json!({ "recipient": "a@x.com", "success": true, "messageId": "<1@x.com>" })
        );

        let failed = TransmissionOutcome::failed(
            OutcomeTarget::Recipients(vec!["a@x.com".to_string(), "b@x.com".to_string()]),
            "Relay unavailable: refused",
        );
        assert_eq!(
            serde_json::to_value(&failed).unwrap(),
            json!({
                "recipients": ["a@x.com", "b@x.com"],
                "success": false,
                "error": "Relay unavailable: refused"
            })
        );
    }

    #[test]
    fn test_body_normalised_drops_empty_variants() {
        let body = Body {
            text: Some(String::new()),
            html: Some("<p>x</p>".to_string()),
        }
        .normalised();
        assert_eq!(body.text, None);
        assert!(!body.is_empty());

        assert!(
            Body {
                text: Some(String::new()),
                html: None
            }
            .normalised()
            .is_empty()
        );
    }

    #[test]
    fn test_envelope_recipients_order() {
        let envelope = MessageEnvelope {
            sender: "me@example.com".to_string(),
            display_name: None,
            to: vec!["a@x.com".to_string()],
            cc: vec!["b@x.com".to_string()],
            bcc: vec!["c@x.com".to_string()],
            subject: String::new(),
            body: Body::default(),
            attachments: Arc::from(Vec::new()),
        };
        assert_eq!(
            envelope.envelope_recipients().collect::<Vec<_>>(),
            vec!["a@x.com", "b@x.com", "c@x.com"]
        );
        assert_eq!(envelope.sender_domain(), "example.com");
    }
}
