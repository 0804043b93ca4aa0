//! RFC 5322 message rendering with MIME bodies and attachments.

use std::{borrow::Cow, io::Write};

use base64::{Engine, engine::general_purpose::STANDARD};
use chrono::{DateTime, Utc};
use ulid::Ulid;

use super::error::{ClientError, Result};

/// Longest line allowed before a text part is sent base64 encoded (RFC 5322 2.1.1).
const MAX_LINE_LENGTH: usize = 998;

/// Raw bytes per RFC 2047 encoded-word, keeping each word under 75 columns.
const ENCODED_WORD_CHUNK: usize = 45;

/// A file attached to a message.
#[derive(Clone, PartialEq, Eq)]
pub struct Attachment {
    pub filename: String,
    pub content_type: String,
    pub data: Vec<u8>,
}

impl Attachment {
    #[must_use]
    pub fn new(
        filename: impl Into<String>,
        content_type: impl Into<String>,
        data: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            filename: filename.into(),
            content_type: content_type.into(),
            data: data.into(),
        }
    }
}

impl std::fmt::Debug for Attachment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Attachment")
            .field("filename", &self.filename)
            .field("content_type", &self.content_type)
            .field("len", &self.data.len())
            .finish()
    }
}

/// Builds the message written after `DATA`.
///
/// Bcc recipients belong to the SMTP envelope only and have no setter here.
///
/// ```
/// use courier_smtp::client::MessageBuilder;
///
/// let message = MessageBuilder::new()
///     .from("sender@example.com")
///     .from_name("Newsletter")
///     .to("recipient@example.com")
///     .subject("Hello")
///     .text("Plain body")
///     .html("<p>Rich body</p>")
///     .build()
///     .unwrap();
///
/// assert!(message.contains("multipart/alternative"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct MessageBuilder {
    from: Option<String>,
    from_name: Option<String>,
    to: Vec<String>,
    cc: Vec<String>,
    subject: Option<String>,
    message_id: Option<String>,
    date: Option<DateTime<Utc>>,
    headers: Vec<(String, String)>,
    text: Option<String>,
    html: Option<String>,
    attachments: Vec<Attachment>,
}

impl MessageBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the From address.
    #[must_use]
    pub fn from(mut self, address: impl Into<String>) -> Self {
        self.from = Some(address.into());
        self
    }

    /// Sets the display name shown alongside the From address.
    #[must_use]
    pub fn from_name(mut self, name: impl Into<String>) -> Self {
        self.from_name = Some(name.into());
        self
    }

    #[must_use]
    pub fn to(mut self, address: impl Into<String>) -> Self {
        self.to.push(address.into());
        self
    }

    #[must_use]
    pub fn to_multiple(mut self, addresses: &[impl AsRef<str>]) -> Self {
        self.to
            .extend(addresses.iter().map(|a| a.as_ref().to_string()));
        self
    }

    #[must_use]
    pub fn cc(mut self, address: impl Into<String>) -> Self {
        self.cc.push(address.into());
        self
    }

    #[must_use]
    pub fn cc_multiple(mut self, addresses: &[impl AsRef<str>]) -> Self {
        self.cc
            .extend(addresses.iter().map(|a| a.as_ref().to_string()));
        self
    }

    #[must_use]
    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    /// Sets the Message-ID, including angle brackets. One is generated from
    /// the From domain when unset.
    #[must_use]
    pub fn message_id(mut self, id: impl Into<String>) -> Self {
        self.message_id = Some(id.into());
        self
    }

    /// Sets the Date header, defaulting to the time of [`MessageBuilder::build`].
    #[must_use]
    pub const fn date(mut self, date: DateTime<Utc>) -> Self {
        self.date = Some(date);
        self
    }

    /// Adds an extra header, written after the standard ones in insertion order.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn text(mut self, body: impl Into<String>) -> Self {
        self.text = Some(body.into());
        self
    }

    #[must_use]
    pub fn html(mut self, body: impl Into<String>) -> Self {
        self.html = Some(body.into());
        self
    }

    #[must_use]
    pub fn attach(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    /// Renders the message with CRLF line endings.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::BuilderError`] when there is no From address or
    /// neither a text nor an HTML body.
    pub fn build(self) -> Result<String> {
        let from = self
            .from
            .as_deref()
            .ok_or_else(|| ClientError::BuilderError("missing From address".to_string()))?;
        if self.text.is_none() && self.html.is_none() {
            return Err(ClientError::BuilderError(
                "message needs a text or HTML body".to_string(),
            ));
        }

        let boundary = Ulid::new().to_string();
        let message_id = self
            .message_id
            .clone()
            .unwrap_or_else(|| new_message_id(from.rsplit('@').next().unwrap_or("localhost")));
        let date = self.date.unwrap_or_else(Utc::now);

        let mut message = Vec::with_capacity(
            2048 + self.attachments.iter().map(|a| a.data.len() * 4 / 3).sum::<usize>(),
        );

        write!(&mut message, "Date: {}\r\n", date.to_rfc2822())?;
        match &self.from_name {
            Some(name) if !name.trim().is_empty() => {
                write!(&mut message, "From: {} <{from}>\r\n", display_name(name.trim()))?;
            }
            _ => write!(&mut message, "From: {from}\r\n")?,
        }
        if !self.to.is_empty() {
            write!(&mut message, "To: {}\r\n", self.to.join(", "))?;
        }
        if !self.cc.is_empty() {
            write!(&mut message, "Cc: {}\r\n", self.cc.join(", "))?;
        }
        if let Some(subject) = &self.subject {
            write!(&mut message, "Subject: {}\r\n", encode_header_word(subject))?;
        }
        write!(&mut message, "Message-ID: {message_id}\r\n")?;
        for (name, value) in &self.headers {
            write!(&mut message, "{name}: {value}\r\n")?;
        }
        write!(&mut message, "MIME-Version: 1.0\r\n")?;

        if self.attachments.is_empty() {
            self.write_body(&mut message, &boundary)?;
        } else {
            let mixed = format!("mixed_{boundary}");
            write!(
                &mut message,
                "Content-Type: multipart/mixed; boundary=\"{mixed}\"\r\n\r\n"
            )?;

            write!(&mut message, "--{mixed}\r\n")?;
            self.write_body(&mut message, &boundary)?;

            for attachment in &self.attachments {
                write!(&mut message, "\r\n--{mixed}\r\n")?;
                write!(
                    &mut message,
                    "Content-Type: {}; name=\"{}\"\r\n",
                    header_value(&attachment.content_type),
                    quoted_param(&attachment.filename)
                )?;
                write!(&mut message, "Content-Transfer-Encoding: base64\r\n")?;
                write!(
                    &mut message,
                    "Content-Disposition: attachment; filename=\"{}\"\r\n\r\n",
                    quoted_param(&attachment.filename)
                )?;
                write!(&mut message, "{}", wrap_base64(&attachment.data))?;
            }

            write!(&mut message, "\r\n--{mixed}--\r\n")?;
        }

        String::from_utf8(message).map_err(|e| ClientError::Utf8Error(e.utf8_error()))
    }

    /// Writes the Content-Type of the body entity and the body itself.
    fn write_body(&self, message: &mut Vec<u8>, boundary: &str) -> Result<()> {
        match (&self.text, &self.html) {
            (Some(text), Some(html)) => {
                let alternative = format!("alt_{boundary}");
                write!(
                    message,
                    "Content-Type: multipart/alternative; boundary=\"{alternative}\"\r\n\r\n"
                )?;
                write!(message, "--{alternative}\r\n")?;
                write_text_part(message, "text/plain", text)?;
                write!(message, "\r\n--{alternative}\r\n")?;
                write_text_part(message, "text/html", html)?;
                write!(message, "\r\n--{alternative}--\r\n")?;
            }
            (Some(text), None) => write_text_part(message, "text/plain", text)?,
            (None, Some(html)) => write_text_part(message, "text/html", html)?,
            (None, None) => {}
        }
        Ok(())
    }
}

fn write_text_part(message: &mut Vec<u8>, content_type: &str, body: &str) -> Result<()> {
    write!(message, "Content-Type: {content_type}; charset=utf-8\r\n")?;

    if body.is_ascii() && body.lines().all(|line| line.len() <= MAX_LINE_LENGTH) {
        write!(message, "Content-Transfer-Encoding: 7bit\r\n\r\n")?;
        for line in body.lines() {
            write!(message, "{line}\r\n")?;
        }
    } else {
        write!(message, "Content-Transfer-Encoding: base64\r\n\r\n")?;
        write!(message, "{}", wrap_base64(body.as_bytes()))?;
    }

    Ok(())
}

/// A fresh `<ULID@domain>` Message-ID.
#[must_use]
pub fn new_message_id(domain: &str) -> String {
    format!("<{}@{domain}>", Ulid::new())
}

/// Base64 with CRLF line breaks every 76 columns (RFC 2045 6.8).
fn wrap_base64(data: &[u8]) -> String {
    let encoded = STANDARD.encode(data);
    let mut wrapped = String::with_capacity(encoded.len() + encoded.len() / 38 + 2);

    let mut rest = encoded.as_str();
    while !rest.is_empty() {
        let (line, tail) = rest.split_at(rest.len().min(76));
        wrapped.push_str(line);
        wrapped.push_str("\r\n");
        rest = tail;
    }

    wrapped
}

/// Encodes a header value as RFC 2047 encoded-words when it is not plain
/// printable ASCII. Long values are split across folded lines.
#[must_use]
pub fn encode_header_word(value: &str) -> Cow<'_, str> {
    if value.bytes().all(|b| (0x20..0x7f).contains(&b)) {
        return Cow::Borrowed(value);
    }

    let mut words = Vec::new();
    let mut start = 0;
    let mut end = 0;
    for (index, ch) in value.char_indices() {
        let next = index + ch.len_utf8();
        if next - start > ENCODED_WORD_CHUNK {
            words.push(&value[start..end]);
            start = end;
        }
        end = next;
    }
    if start < value.len() {
        words.push(&value[start..]);
    }

    Cow::Owned(
        words
            .into_iter()
            .map(|word| format!("=?utf-8?B?{}?=", STANDARD.encode(word)))
            .collect::<Vec<_>>()
            .join("\r\n "),
    )
}

/// A display name as a quoted string, or encoded-words when not ASCII.
fn display_name(name: &str) -> Cow<'_, str> {
    match encode_header_word(name) {
        Cow::Borrowed(plain) => Cow::Owned(format!("\"{}\"", quoted_param(plain))),
        encoded @ Cow::Owned(_) => encoded,
    }
}

/// Drops control characters so a value cannot start a new header line.
fn header_value(value: &str) -> Cow<'_, str> {
    if value.contains(char::is_control) {
        Cow::Owned(value.chars().filter(|c| !c.is_control()).collect())
    } else {
        Cow::Borrowed(value)
    }
}

fn quoted_param(value: &str) -> Cow<'_, str> {
    if value.contains(['"', '\\', '\r', '\n']) {
        Cow::Owned(
            value
                .chars()
                .filter(|c| *c != '\r' && *c != '\n')
                .flat_map(|c| match c {
                    '"' | '\\' => vec!['\\', c],
                    _ => vec![c],
                })
                .collect(),
        )
    } else {
        Cow::Borrowed(value)
    }
}
