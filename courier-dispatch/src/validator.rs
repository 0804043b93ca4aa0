//! Request validation. Pure: no I/O, no side effects.

use std::{num::NonZeroUsize, sync::Arc, time::Duration};

use courier_common::{AddressError, Mailbox, RelayConfig};

use crate::{
    config::ValidationLimits,
    error::ValidationError,
    types::{
        Attachment, DispatchRequest, MessageEnvelope, SingleMessageRequest,
        ValidatedRequest, ValidatedSingle,
    },
};

const DEFAULT_BATCH_SIZE: usize = 10;
const DEFAULT_PAUSE: Duration = Duration::from_millis(1000);

type Result<T> = std::result::Result<T, ValidationError>;

/// Checks requests against [`ValidationLimits`] and applies defaults.
#[derive(Debug, Clone, Default)]
pub struct Validator {
    limits: ValidationLimits,
}

impl Validator {
    #[must_use]
    pub const fn new(limits: ValidationLimits) -> Self {
        Self { limits }
    }

    #[must_use]
    pub const fn limits(&self) -> &ValidationLimits {
        &self.limits
    }

    /// Host present and port within 1..=65535.
    pub fn validate_relay(&self, relay: &RelayConfig) -> Result<()> {
        if relay.host.trim().is_empty() {
            return Err(ValidationError::new("smtp.host", "is required"));
        }
        if !(1..=65535).contains(&relay.port) {
            return Err(ValidationError::new(
                "smtp.port",
                format!("{} is outside 1..=65535", relay.port),
            ));
        }
        Ok(())
    }

    /// Validates a bulk request and fills in defaults: individual mode,
    /// batches of 10, one second between batches.
    pub fn validate(
        &self,
        relay: &RelayConfig,
        request: DispatchRequest,
    ) -> Result<ValidatedRequest> {
        self.validate_relay(relay)?;

        if request.recipients.is_empty() {
            return Err(ValidationError::new(
                "recipients",
                "at least one recipient is required",
            ));
        }
        let recipients = self.addresses("recipients", &request.recipients)?;
        self.check_recipient_count(recipients.len())?;

        let batch_size = match request.batch_size {
            None => DEFAULT_BATCH_SIZE.min(self.limits.max_batch_size.max(1)),
            Some(size) if size > self.limits.max_batch_size => {
                return Err(ValidationError::new(
                    "batchSize",
                    format!("must be at most {}", self.limits.max_batch_size),
                ));
            }
            Some(size) => size,
        };
        let batch_size = NonZeroUsize::new(batch_size)
            .ok_or_else(|| ValidationError::new("batchSize", "must be at least 1"))?;

        let (sender, display_name) = sender(relay, request.from.as_deref())?;
        let subject = subject(request.subject)?;

        let body = request.body.normalised();
        if body.is_empty() {
            return Err(ValidationError::new(
                "body",
                "a text or html body is required",
            ));
        }

        self.check_attachments(&request.attachments)?;

        Ok(ValidatedRequest {
            sender,
            display_name,
            recipients,
            subject,
            body,
            attachments: Arc::from(request.attachments),
            mode: request.mode.unwrap_or_default(),
            batch_size,
            pause: request.pause.unwrap_or(DEFAULT_PAUSE),
        })
    }

    /// Validates a single message with explicit To, Cc and Bcc lists.
    pub fn validate_single(
        &self,
        relay: &RelayConfig,
        request: SingleMessageRequest,
    ) -> Result<ValidatedSingle> {
        self.validate_relay(relay)?;

        if request.to.is_empty() {
            return Err(ValidationError::new("to", "at least one recipient is required"));
        }
        let to = self.addresses("to", &request.to)?;
        let cc = self.addresses("cc", &request.cc)?;
        let bcc = self.addresses("bcc", &request.bcc)?;
        self.check_recipient_count(to.len() + cc.len() + bcc.len())?;

        let (sender, display_name) = sender(relay, request.from.as_deref())?;
        let subject = subject(request.subject)?;

        let body = request.body.normalised();
        if body.is_empty() {
            return Err(ValidationError::new(
                "body",
                "a text or html body is required",
            ));
        }

        self.check_attachments(&request.attachments)?;

        Ok(ValidatedSingle {
            envelope: MessageEnvelope {
                sender,
                display_name,
                to,
                cc,
                bcc,
                subject,
                body,
                attachments: Arc::from(request.attachments),
            },
        })
    }

    /// Trims each address and checks its syntax. Order and duplicates are kept.
    #[allow(clippy::unused_self)]
    fn addresses(&self, field: &str, addresses: &[String]) -> Result<Vec<String>> {
        addresses
            .iter()
            .enumerate()
            .map(|(index, address)| {
                let trimmed = address.trim();
                Mailbox::parse(trimmed)
                    .map(|_| trimmed.to_string())
                    .map_err(|err| invalid_address(&format!("{field}[{index}]"), trimmed, &err))
            })
            .collect()
    }

    fn check_recipient_count(&self, count: usize) -> Result<()> {
        if count > self.limits.max_recipients {
            return Err(ValidationError::new(
                "recipients",
                format!(
                    "{count} recipients exceeds the limit of {}",
                    self.limits.max_recipients
                ),
            ));
        }
        Ok(())
    }

    fn check_attachments(&self, attachments: &[Attachment]) -> Result<()> {
        if attachments.len() > self.limits.max_attachments {
            return Err(ValidationError::new(
                "attachments",
                format!(
                    "{} attachments exceeds the limit of {}",
                    attachments.len(),
                    self.limits.max_attachments
                ),
            ));
        }

        let mut total = 0usize;
        for (index, attachment) in attachments.iter().enumerate() {
            if attachment.filename.trim().is_empty() {
                return Err(ValidationError::new(
                    format!("attachments[{index}].filename"),
                    "is required",
                ));
            }
            if attachment.data.len() > self.limits.max_attachment_bytes {
                return Err(ValidationError::new(
                    format!("attachments[{index}]"),
                    format!(
                        "{} is {} bytes, the limit is {}",
                        attachment.filename,
                        attachment.data.len(),
                        self.limits.max_attachment_bytes
                    ),
                ));
            }
            if attachment.content_type.contains(char::is_control) {
                return Err(ValidationError::new(
                    format!("attachments[{index}].contentType"),
                    "must not contain control characters",
                ));
            }
            if !self.content_type_allowed(&attachment.content_type) {
                return Err(ValidationError::new(
                    format!("attachments[{index}].contentType"),
                    format!("{} is not an accepted file type", attachment.content_type),
                ));
            }
            total = total.saturating_add(attachment.data.len());
        }

        if total > self.limits.max_total_attachment_bytes {
            return Err(ValidationError::new(
                "attachments",
                format!(
                    "{total} bytes in total exceeds the limit of {}",
                    self.limits.max_total_attachment_bytes
                ),
            ));
        }

        Ok(())
    }

    fn content_type_allowed(&self, content_type: &str) -> bool {
        if self.limits.allowed_content_types.is_empty() {
            return true;
        }

        let essence = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim();
        self.limits
            .allowed_content_types
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(essence))
    }
}

fn invalid_address(field: &str, address: &str, err: &AddressError) -> ValidationError {
    ValidationError::new(field, format!("'{address}' is not a valid email address: {err}"))
}

fn subject(subject: String) -> Result<String> {
    if subject.trim().is_empty() {
        Err(ValidationError::new("subject", "is required"))
    } else {
        Ok(subject)
    }
}

/// The envelope sender and the display name for the From header.
///
/// `from` may be a bare mailbox or `Name <mailbox>`; without it the relay
/// principal is used. A name in `from` wins over the relay display name.
fn sender(relay: &RelayConfig, from: Option<&str>) -> Result<(String, Option<String>)> {
    let relay_name = relay
        .display_name
        .as_ref()
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty());

    let from = from.map(str::trim).filter(|from| !from.is_empty());
    let Some(from) = from else {
        if relay.principal.trim().is_empty() {
            return Err(ValidationError::new(
                "from",
                "a sender address is required when the relay has no principal",
            ));
        }
        let principal = relay.principal.trim();
        Mailbox::parse(principal).map_err(|err| invalid_address("smtp.username", principal, &err))?;
        return Ok((principal.to_string(), relay_name));
    };

    if let Some(open) = from.rfind('<')
        && let Some(address) = from[open + 1..].strip_suffix('>')
    {
        let address = address.trim();
        Mailbox::parse(address).map_err(|err| invalid_address("from", address, &err))?;

        let name = from[..open].trim().trim_matches('"').trim();
        let name = (!name.is_empty()).then(|| name.to_string()).or(relay_name);
        Ok((address.to_string(), name))
    } else {
        Mailbox::parse(from).map_err(|err| invalid_address("from", from, &err))?;
        Ok((from.to_string(), relay_name))
    }
}
