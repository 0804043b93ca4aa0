//! The bulk dispatch engine.
//!
//! A [`DispatchRequest`] is checked by the [`Validator`], handed to the
//! [`Dispatcher`], which drives a [`RelayTransport`] once per transmission
//! unit, and the per-attempt [`TransmissionOutcome`]s are folded into a
//! [`DispatchSummary`] by [`aggregate`]. Progress is reported to an injected
//! [`NotificationSink`].

pub mod aggregate;
pub mod config;
pub mod error;
pub mod notify;
pub mod orchestrator;
pub mod smtp_relay;
pub mod transport;
pub mod types;
pub mod validator;

pub use aggregate::aggregate;
pub use config::{DispatchConfig, SmtpTimeouts, ValidationLimits};
pub use error::{DispatchError, RelayError, Stage, ValidationError};
pub use notify::{
    ChannelSink, DispatchEvent, DispatchStarted, FanoutSink, NoopSink, NotificationSink,
    TracingSink,
};
pub use orchestrator::{CANCELLED_BEFORE_ATTEMPT, Dispatcher};
pub use smtp_relay::SmtpRelay;
pub use tokio_util::sync::CancellationToken;
pub use transport::RelayTransport;
pub use types::{
    Attachment, Body, DeliveryMode, DispatchRequest, DispatchSummary, MessageEnvelope,
    OutcomeTarget, SingleMessageRequest, TransmissionOutcome, TransmissionReceipt,
    ValidatedRequest, ValidatedSingle,
};
pub use validator::Validator;
