//! Engine configuration, deserialised from the `dispatch` section of the
//! courier config file.

use serde::{Deserialize, Serialize};

/// Per-stage SMTP timeouts, in seconds.
///
/// Every network step of a relay transaction is bounded by its own timeout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmtpTimeouts {
    /// TCP connect, plus the TLS handshake for implicit TLS.
    ///
    /// Default: 30 seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_secs: u64,

    /// Default: 30 seconds
    #[serde(default = "default_greeting_timeout")]
    pub greeting_secs: u64,

    /// Default: 30 seconds
    #[serde(default = "default_ehlo_timeout")]
    pub ehlo_secs: u64,

    /// STARTTLS command and the TLS upgrade.
    ///
    /// Default: 30 seconds
    #[serde(default = "default_starttls_timeout")]
    pub starttls_secs: u64,

    /// The whole AUTH exchange.
    ///
    /// Default: 30 seconds
    #[serde(default = "default_auth_timeout")]
    pub auth_secs: u64,

    /// Default: 30 seconds
    #[serde(default = "default_mail_from_timeout")]
    pub mail_from_secs: u64,

    /// Applies to each RCPT TO separately.
    ///
    /// Default: 30 seconds
    #[serde(default = "default_rcpt_to_timeout")]
    pub rcpt_to_secs: u64,

    /// DATA command and message transmission.
    ///
    /// Default: 120 seconds (2 minutes)
    #[serde(default = "default_data_timeout")]
    pub data_secs: u64,

    /// Default: 10 seconds
    #[serde(default = "default_quit_timeout")]
    pub quit_secs: u64,
}

impl Default for SmtpTimeouts {
    fn default() -> Self {
        Self {
            connect_secs: default_connect_timeout(),
            greeting_secs: default_greeting_timeout(),
            ehlo_secs: default_ehlo_timeout(),
            starttls_secs: default_starttls_timeout(),
            auth_secs: default_auth_timeout(),
            mail_from_secs: default_mail_from_timeout(),
            rcpt_to_secs: default_rcpt_to_timeout(),
            data_secs: default_data_timeout(),
            quit_secs: default_quit_timeout(),
        }
    }
}

const fn default_connect_timeout() -> u64 {
    30
}

const fn default_greeting_timeout() -> u64 {
    30
}

const fn default_ehlo_timeout() -> u64 {
    30
}

const fn default_starttls_timeout() -> u64 {
    30
}

const fn default_auth_timeout() -> u64 {
    30
}

const fn default_mail_from_timeout() -> u64 {
    30
}

const fn default_rcpt_to_timeout() -> u64 {
    30
}

const fn default_data_timeout() -> u64 {
    120
}

const fn default_quit_timeout() -> u64 {
    10
}

/// Ceilings enforced by the [`Validator`](crate::Validator).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationLimits {
    /// Default: 1000
    #[serde(default = "default_max_recipients")]
    pub max_recipients: usize,

    /// Default: 100
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,

    /// Default: 10
    #[serde(default = "default_max_attachments")]
    pub max_attachments: usize,

    /// Per attachment. Default: 25 MiB
    #[serde(default = "default_max_attachment_bytes")]
    pub max_attachment_bytes: usize,

    /// Sum over all attachments. Default: 50 MiB
    #[serde(default = "default_max_total_attachment_bytes")]
    pub max_total_attachment_bytes: usize,

    /// Accepted attachment content types. Empty accepts anything.
    #[serde(default = "default_allowed_content_types")]
    pub allowed_content_types: Vec<String>,
}

impl Default for ValidationLimits {
    fn default() -> Self {
        Self {
            max_recipients: default_max_recipients(),
            max_batch_size: default_max_batch_size(),
            max_attachments: default_max_attachments(),
            max_attachment_bytes: default_max_attachment_bytes(),
            max_total_attachment_bytes: default_max_total_attachment_bytes(),
            allowed_content_types: default_allowed_content_types(),
        }
    }
}

const fn default_max_recipients() -> usize {
    1000
}

const fn default_max_batch_size() -> usize {
    100
}

const fn default_max_attachments() -> usize {
    10
}

const fn default_max_attachment_bytes() -> usize {
    25 * 1024 * 1024
}

const fn default_max_total_attachment_bytes() -> usize {
    50 * 1024 * 1024
}

fn default_allowed_content_types() -> Vec<String> {
    [
        "application/pdf",
        "application/msword",
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "application/vnd.ms-excel",
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "text/plain",
        "text/csv",
        "image/jpeg",
        "image/png",
        "image/gif",
        "application/zip",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

/// The `dispatch` section of the configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchConfig {
    #[serde(default)]
    pub limits: ValidationLimits,

    #[serde(default)]
    pub smtp_timeouts: SmtpTimeouts,

    /// Name announced in EHLO. Default: `localhost`
    #[serde(default = "default_helo_name")]
    pub helo_name: String,

    /// Skip relay certificate validation. Default: false
    #[serde(default)]
    pub accept_invalid_certs: bool,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            limits: ValidationLimits::default(),
            smtp_timeouts: SmtpTimeouts::default(),
            helo_name: default_helo_name(),
            accept_invalid_certs: false,
        }
    }
}

fn default_helo_name() -> String {
    String::from("localhost")
}
