//! SMTP reply parsing and EHLO capability extraction.

use super::{
    auth::AuthMechanism,
    error::{ClientError, Result},
};

/// A single line of an SMTP reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseLine {
    pub code: u16,
    /// `false` for the `250-` continuation lines of a multi-line reply.
    pub is_last: bool,
    pub message: String,
}

/// A complete, possibly multi-line, SMTP reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub code: u16,
    pub lines: Vec<String>,
}

impl Response {
    #[must_use]
    pub const fn new(code: u16, lines: Vec<String>) -> Self {
        Self { code, lines }
    }

    /// All reply lines joined by newlines.
    #[must_use]
    pub fn message(&self) -> String {
        self.lines.join("\n")
    }

    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.code >= 200 && self.code < 300
    }

    /// 3xx, e.g. `354` after DATA or `334` during AUTH.
    #[must_use]
    pub const fn is_intermediate(&self) -> bool {
        self.code >= 300 && self.code < 400
    }

    #[must_use]
    pub const fn is_temporary_error(&self) -> bool {
        self.code >= 400 && self.code < 500
    }

    #[must_use]
    pub const fn is_permanent_error(&self) -> bool {
        self.code >= 500 && self.code < 600
    }

    #[must_use]
    pub const fn is_error(&self) -> bool {
        self.is_temporary_error() || self.is_permanent_error()
    }

    /// Turns this reply into an error unless its code is `expected`.
    ///
    /// 4xx and 5xx replies become [`ClientError::SmtpError`]; anything else
    /// that does not match becomes [`ClientError::UnexpectedResponse`].
    pub fn expect_code(self, expected: u16) -> Result<Self> {
        if self.code == expected {
            Ok(self)
        } else {
            Err(self.into_error())
        }
    }

    /// Like [`Response::expect_code`], accepting any 2xx code.
    pub fn expect_success(self) -> Result<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(self.into_error())
        }
    }

    fn into_error(self) -> ClientError {
        let message = self.message();
        if self.is_error() {
            ClientError::SmtpError {
                code: self.code,
                message,
            }
        } else {
            ClientError::UnexpectedResponse {
                code: self.code,
                message,
            }
        }
    }

    /// Parses a single reply line (without its line terminator).
    ///
    /// # Errors
    ///
    /// Returns `ClientError::ParseError` if the line doesn't match SMTP format.
    pub fn parse_line(line: &str) -> Result<ResponseLine> {
        let code = line
            .get(..3)
            .filter(|code| code.bytes().all(|b| b.is_ascii_digit()))
            .ok_or_else(|| ClientError::ParseError(format!("Invalid status line: '{line}'")))?
            .parse::<u16>()
            .map_err(|_| ClientError::ParseError(format!("Invalid status code in '{line}'")))?;

        let is_last = match line.as_bytes().get(3) {
            None | Some(b' ') => true,
            Some(b'-') => false,
            Some(c) => {
                return Err(ClientError::ParseError(format!(
                    "Invalid separator character: '{}'",
                    char::from(*c)
                )));
            }
        };

        Ok(ResponseLine {
            code,
            is_last,
            message: line.get(4..).unwrap_or_default().to_string(),
        })
    }

    /// Parses one complete reply from the front of `buffer`.
    ///
    /// Returns the reply and the number of bytes it occupied, or `None` when
    /// the buffer does not yet hold the final line.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::ParseError` if the reply is malformed or its
    /// lines disagree on the status code.
    pub fn parse_response(buffer: &[u8]) -> Result<Option<(Self, usize)>> {
        let mut consumed = 0;
        let mut code = None;
        let mut lines = Vec::new();

        while let Some(end) = buffer[consumed..].iter().position(|&b| b == b'\n') {
            let raw = &buffer[consumed..consumed + end];
            consumed += end + 1;

            let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
            if raw.is_empty() {
                continue;
            }

            let line = Self::parse_line(std::str::from_utf8(raw)?)?;
            match code {
                None => code = Some(line.code),
                Some(first) if first != line.code => {
                    return Err(ClientError::ParseError(format!(
                        "Inconsistent status codes in multi-line response: {first} and {}",
                        line.code
                    )));
                }
                Some(_) => {}
            }

            lines.push(line.message);

            if line.is_last {
                return Ok(code.map(|code| (Self::new(code, lines), consumed)));
            }
        }

        Ok(None)
    }
}

/// What a relay advertised in its EHLO reply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub starttls: bool,
    /// `None` when no `AUTH` keyword was advertised at all.
    pub auth: Option<Vec<AuthMechanism>>,
    pub size: Option<usize>,
    pub extensions: Vec<String>,
}

impl Capabilities {
    /// Extracts capabilities from a `250` EHLO reply. The first line is the
    /// relay's greeting and is skipped.
    #[must_use]
    pub fn from_ehlo(response: &Response) -> Self {
        let mut capabilities = Self::default();

        for line in response.lines.iter().skip(1) {
            let mut words = line.split(|c: char| c.is_ascii_whitespace() || c == '=');
            let Some(keyword) = words.next().map(str::to_ascii_uppercase) else {
                continue;
            };

            match keyword.as_str() {
                "STARTTLS" => capabilities.starttls = true,
                "AUTH" => capabilities
                    .auth
                    .get_or_insert_with(Vec::new)
                    .extend(words.filter_map(AuthMechanism::from_keyword)),
                "SIZE" => capabilities.size = words.next().and_then(|s| s.parse().ok()),
                _ => {}
            }

            if !capabilities.extensions.contains(&keyword) {
                capabilities.extensions.push(keyword);
            }
        }

        capabilities
    }

    /// The mechanism to authenticate with: PLAIN when offered, LOGIN
    /// otherwise, and PLAIN when the relay did not advertise `AUTH`.
    #[must_use]
    pub fn preferred_auth(&self) -> Option<AuthMechanism> {
        match &self.auth {
            None => Some(AuthMechanism::Plain),
            Some(mechanisms) => [AuthMechanism::Plain, AuthMechanism::Login]
                .into_iter()
                .find(|mechanism| mechanisms.contains(mechanism)),
        }
    }
}
