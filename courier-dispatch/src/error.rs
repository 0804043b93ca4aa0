//! Error taxonomy for the dispatch engine.
//!
//! - [`ValidationError`]: the request is malformed; nothing was sent.
//! - [`RelayError`]: one transmission attempt failed. In individual mode these
//!   are recorded in the summary and never returned.
//! - [`DispatchError`]: what a dispatcher entry point can return.

use std::{fmt, time::Duration};

use courier_smtp::client::ClientError;
use thiserror::Error;

/// A request field that failed validation, named as it appears on the wire
/// (`recipients[3]`, `smtp.port`, `batchSize`).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {reason}")]
pub struct ValidationError {
    pub field: String,
    pub reason: String,
}

impl ValidationError {
    #[must_use]
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// The step of a relay transaction an error occurred in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Connect,
    Greeting,
    Ehlo,
    StartTls,
    Auth,
    MailFrom,
    RcptTo,
    Data,
    Quit,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Connect => "connect",
            Self::Greeting => "greeting",
            Self::Ehlo => "EHLO",
            Self::StartTls => "STARTTLS",
            Self::Auth => "AUTH",
            Self::MailFrom => "MAIL FROM",
            Self::RcptTo => "RCPT TO",
            Self::Data => "DATA",
            Self::Quit => "QUIT",
        })
    }
}

/// Why a single transmission to the relay failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RelayError {
    /// The relay could not be reached, refused the session or dropped it.
    #[error("Relay unavailable: {0}")]
    Unreachable(String),

    #[error("TLS negotiation failed: {0}")]
    TlsNegotiation(String),

    #[error("Authentication rejected: {0}")]
    AuthRejected(String),

    #[error("Recipient {recipient} rejected: {reason}")]
    RecipientRejected { recipient: String, reason: String },

    /// A 4xx reply after the greeting: quota, rate limit or greylisting.
    #[error("Relay is throttling: {0}")]
    Throttled(String),

    #[error("Message rejected: {0}")]
    MessageRejected(String),

    #[error("Relay timed out during {stage} after {after:?}")]
    Timeout { stage: Stage, after: Duration },

    /// The relay said something that is not SMTP.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The envelope could not be rendered into a message.
    #[error("Invalid message: {0}")]
    InvalidMessage(String),
}

impl RelayError {
    /// Whether the same transmission might succeed if retried later.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Unreachable(_) | Self::Throttled(_) | Self::Timeout { .. }
        )
    }

    /// Classifies a client error using the stage it happened in.
    ///
    /// `RecipientRejected` needs the recipient and is built by the caller
    /// from a 5xx at [`Stage::RcptTo`]; here such a reply becomes
    /// `MessageRejected`.
    #[must_use]
    pub fn at(stage: Stage, error: ClientError) -> Self {
        match (stage, error) {
            (Stage::Connect | Stage::Greeting, ClientError::SmtpError { code, message }) => {
                Self::Unreachable(format!("{code} {message}"))
            }
            (Stage::StartTls, ClientError::SmtpError { code, message }) if code >= 500 => {
                Self::TlsNegotiation(format!("{code} {message}"))
            }
            (Stage::Auth, ClientError::SmtpError { code, message }) if code >= 500 => {
                Self::AuthRejected(format!("{code} {message}"))
            }
            (Stage::Auth, ClientError::UnexpectedResponse { code, message }) => {
                Self::AuthRejected(format!("{code} {message}"))
            }
            (Stage::Ehlo, ClientError::SmtpError { code, message }) if code >= 500 => {
                Self::Protocol(format!("EHLO refused: {code} {message}"))
            }
            (_, error) => error.into(),
        }
    }
}

impl From<ClientError> for RelayError {
    fn from(error: ClientError) -> Self {
        match error {
            ClientError::SmtpError { code, message } if (400..500).contains(&code) => {
                Self::Throttled(format!("{code} {message}"))
            }
            ClientError::SmtpError { code, message } => {
                Self::MessageRejected(format!("{code} {message}"))
            }
            ClientError::UnexpectedResponse { code, message } => {
                Self::Protocol(format!("Unexpected SMTP response: {code} {message}"))
            }
            ClientError::Io(e) => Self::Unreachable(e.to_string()),
            ClientError::ConnectionClosed => {
                Self::Unreachable("Connection closed unexpectedly".to_string())
            }
            ClientError::TlsError(msg) => Self::TlsNegotiation(msg),
            ClientError::ParseError(msg) => Self::Protocol(msg),
            ClientError::Utf8Error(e) => Self::Protocol(format!("UTF-8 decoding error: {e}")),
            ClientError::BuilderError(msg) => Self::InvalidMessage(msg),
        }
    }
}

/// Errors returned by the [`Dispatcher`](crate::Dispatcher) entry points.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Fatal before any transmission.
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// Only returned by single-message sends and connectivity checks; bulk
    /// dispatches record relay errors in their summary instead.
    #[error(transparent)]
    Relay(#[from] RelayError),

    /// The outcomes did not add up. This is a defect, not a user error.
    #[error("Internal invariant violated: {0}")]
    InvariantViolation(String),
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn smtp(code: u16) -> ClientError {
        ClientError::SmtpError {
            code,
            message: "reply".to_string(),
        }
    }

    #[test]
    fn test_code_class_classification() {
        assert!(matches!(RelayError::from(smtp(451)), RelayError::Throttled(_)));
        assert!(matches!(
            RelayError::from(smtp(554)),
            RelayError::MessageRejected(_)
        ));
        assert!(matches!(
            RelayError::from(ClientError::ConnectionClosed),
            RelayError::Unreachable(_)
        ));
        assert!(matches!(
            RelayError::from(ClientError::TlsError("bad cert".to_string())),
            RelayError::TlsNegotiation(_)
        ));
        assert!(matches!(
            RelayError::from(ClientError::ParseError("junk".to_string())),
            RelayError::Protocol(_)
        ));
    }

    #[test]
    fn test_stage_aware_classification() {
        assert!(matches!(
            RelayError::at(Stage::Auth, smtp(535)),
            RelayError::AuthRejected(_)
        ));
        assert!(matches!(
            RelayError::at(Stage::Auth, smtp(454)),
            RelayError::Throttled(_)
        ));
        assert!(matches!(
            RelayError::at(Stage::Greeting, smtp(421)),
            RelayError::Unreachable(_)
        ));
        assert!(matches!(
            RelayError::at(Stage::StartTls, smtp(554)),
            RelayError::TlsNegotiation(_)
        ));
        assert!(matches!(
            RelayError::at(Stage::Data, smtp(552)),
            RelayError::MessageRejected(_)
        ));
    }

    #[test]
    fn test_transient_kinds() {
        assert!(RelayError::Throttled(String::new()).is_transient());
        assert!(
            RelayError::Timeout {
                stage: Stage::Data,
                after: Duration::from_secs(1)
            }
            .is_transient()
        );
        assert!(!RelayError::AuthRejected(String::new()).is_transient());
        assert!(
            !RelayError::RecipientRejected {
                recipient: "a@b.com".to_string(),
                reason: "550".to_string()
            }
            .is_transient()
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(
            ValidationError::new("smtp.port", "must be between 1 and 65535").to_string(),
            "smtp.port: must be between 1 and 65535"
        );
        assert_eq!(
            RelayError::RecipientRejected {
                recipient: "b@x.com".to_string(),
                reason: "550 No such user".to_string()
            }
            .to_string(),
            "Recipient b@x.com rejected: 550 No such user"
        );
        assert_eq!(
            RelayError::Timeout {
                stage: Stage::MailFrom,
                after: Duration::from_secs(30)
            }
            .to_string(),
            "Relay timed out during MAIL FROM after 30s"
        );
    }
}
