//! SASL mechanisms for SMTP AUTH (RFC 4954).

use std::fmt;

use base64::{Engine, engine::general_purpose::STANDARD};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMechanism {
    /// `AUTH PLAIN <base64(\0principal\0secret)>` in a single round trip.
    Plain,
    /// `AUTH LOGIN`, then base64 principal and base64 secret in reply to
    /// two `334` challenges.
    Login,
}

impl AuthMechanism {
    /// Maps an EHLO `AUTH` keyword to a supported mechanism.
    #[must_use]
    pub fn from_keyword(keyword: &str) -> Option<Self> {
        if keyword.eq_ignore_ascii_case("PLAIN") {
            Some(Self::Plain)
        } else if keyword.eq_ignore_ascii_case("LOGIN") {
            Some(Self::Login)
        } else {
            None
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Plain => "PLAIN",
            Self::Login => "LOGIN",
        }
    }
}

impl fmt::Display for AuthMechanism {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The initial response for `AUTH PLAIN`, with an empty authorization identity.
pub(super) fn plain_initial_response(principal: &str, secret: &str) -> String {
    STANDARD.encode(format!("\0{principal}\0{secret}"))
}

/// A single `AUTH LOGIN` answer.
pub(super) fn login_response(value: &str) -> String {
    STANDARD.encode(value)
}
