//! SMTP submission client used by courier to hand messages to a relay.
//!
//! The client speaks just enough ESMTP for authenticated submission: greeting,
//! EHLO, STARTTLS or implicit TLS, AUTH PLAIN / LOGIN, a single MAIL
//! transaction and QUIT. [`client::MessageBuilder`] renders the RFC 5322 /
//! MIME message that is written after DATA.

pub mod client;

pub use client::{
    Attachment, AuthMechanism, Capabilities, ClientError, MessageBuilder, Response, SmtpClient,
};
