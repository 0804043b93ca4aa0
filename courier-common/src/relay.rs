//! Connection parameters for an outbound SMTP relay.

use std::fmt;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

/// How to reach and authenticate against a relay.
///
/// The credential is a [`SecretString`], redacted from `Debug` output, and
/// the struct does not implement `Serialize`. Use
/// [`RelayConfig::redacted`] when the relay needs to be described to anything
/// outside the process.
#[derive(Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayConfig {
    pub host: String,

    /// Wider than `u16`; the range is checked during validation.
    pub port: u32,

    /// `true` for implicit TLS (SMTPS), `false` for plain with STARTTLS upgrade
    #[serde(default)]
    pub secure: bool,

    /// Authentication identity. Empty disables AUTH.
    #[serde(alias = "username", default)]
    pub principal: String,

    #[serde(alias = "password", default = "empty_secret")]
    pub credential: SecretString,

    #[serde(alias = "fromName", default)]
    pub display_name: Option<String>,
}

fn empty_secret() -> SecretString {
    SecretString::new(String::new())
}

impl RelayConfig {
    #[must_use]
    pub fn new(
        host: impl Into<String>,
        port: u32,
        secure: bool,
        principal: impl Into<String>,
        credential: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            secure,
            principal: principal.into(),
            credential: SecretString::new(credential.into()),
            display_name: None,
        }
    }

    #[must_use]
    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = Some(display_name.into());
        self
    }

    /// `host:port`, suitable for `TcpStream::connect`
    #[must_use]
    pub fn address(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Whether AUTH should be attempted.
    #[must_use]
    pub const fn has_credentials(&self) -> bool {
        !self.principal.is_empty()
    }

    #[must_use]
    pub fn credential(&self) -> &str {
        self.credential.expose_secret()
    }

    /// A description of this relay that is safe to log or export.
    #[must_use]
    pub fn redacted(&self) -> RedactedRelay {
        RedactedRelay {
            host: self.host.clone(),
            port: self.port,
            secure: self.secure,
            principal: self.principal.clone(),
        }
    }
}

impl fmt::Debug for RelayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("secure", &self.secure)
            .field("principal", &self.principal)
            .field("credential", &"***")
            .field("display_name", &self.display_name)
            .finish()
    }
}

/// [`RelayConfig`] without the credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RedactedRelay {
    pub host: String,
    pub port: u32,
    pub secure: bool,
    pub principal: String,
}

impl fmt::Display for RedactedRelay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scheme = if self.secure { "smtps" } else { "smtp" };
        if self.principal.is_empty() {
            write!(f, "{scheme}://{}:{}", self.host, self.port)
        } else {
            write!(f, "{scheme}://{}@{}:{}", self.principal, self.host, self.port)
        }
    }
}
