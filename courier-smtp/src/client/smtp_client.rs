//! A single SMTP connection to a relay, plain or TLS.

use std::sync::Arc;

use courier_common::{incoming, outgoing, tracing};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
};
use tokio_rustls::{
    TlsConnector,
    rustls::{
        ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme,
        client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
        pki_types::{CertificateDer, ServerName, UnixTime},
    },
};

use super::{
    auth::{self, AuthMechanism},
    error::{ClientError, Result},
    response::{Capabilities, Response},
};

/// Initial size of the read buffer for SMTP responses.
const BUFFER_SIZE: usize = 8192;

/// Maximum size of the read buffer to prevent unbounded growth (1MB).
const MAX_BUFFER_SIZE: usize = 1024 * 1024;

enum ClientConnection {
    Plain(TcpStream),
    Tls(Box<tokio_rustls::client::TlsStream<TcpStream>>),
}

impl ClientConnection {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        match self {
            Self::Plain(stream) => stream.write_all(data).await?,
            Self::Tls(stream) => stream.write_all(data).await?,
        }
        Ok(())
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let n = match self {
            Self::Plain(stream) => stream.read(buf).await?,
            Self::Tls(stream) => stream.read(buf).await?,
        };
        if n == 0 {
            return Err(ClientError::ConnectionClosed);
        }
        Ok(n)
    }

    async fn upgrade_to_tls(self, domain: &str, accept_invalid_certs: bool) -> Result<Self> {
        match self {
            Self::Plain(stream) => Ok(Self::Tls(Box::new(
                handshake(stream, domain, accept_invalid_certs).await?,
            ))),
            Self::Tls(_) => Err(ClientError::TlsError(
                "Connection is already TLS".to_string(),
            )),
        }
    }
}

async fn handshake(
    stream: TcpStream,
    domain: &str,
    accept_invalid_certs: bool,
) -> Result<tokio_rustls::client::TlsStream<TcpStream>> {
    let mut root_store = RootCertStore::empty();

    let certs = rustls_native_certs::load_native_certs();
    for cert in certs.certs {
        root_store
            .add(cert)
            .map_err(|e| ClientError::TlsError(format!("Failed to add certificate: {e}")))?;
    }
    if !certs.errors.is_empty() {
        tracing::warn!(?certs.errors, "Some certificates could not be loaded");
    }

    let mut config = ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();

    if accept_invalid_certs {
        config
            .dangerous()
            .set_certificate_verifier(Arc::new(NoVerifier));
    }

    let server_name = ServerName::try_from(domain.to_string())
        .map_err(|e| ClientError::TlsError(format!("Invalid domain: {e}")))?;

    TlsConnector::from(Arc::new(config))
        .connect(server_name, stream)
        .await
        .map_err(|e| ClientError::TlsError(e.to_string()))
}

/// Accepts any server certificate. Only installed when the operator opts in.
#[derive(Debug)]
struct NoVerifier;

impl ServerCertVerifier for NoVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, tokio_rustls::rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, tokio_rustls::rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, tokio_rustls::rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::ED25519,
        ]
    }
}

/// Normalises line endings to CRLF and doubles leading dots (RFC 5321 4.5.2).
fn dot_stuff(data: &str) -> String {
    let mut stuffed = String::with_capacity(data.len() + data.len() / 64 + 2);
    for line in data.lines() {
        if line.starts_with('.') {
            stuffed.push('.');
        }
        stuffed.push_str(line);
        stuffed.push_str("\r\n");
    }
    stuffed
}

/// One connection to a relay.
///
/// Each method performs a single protocol step and checks the reply code
/// that step requires; a mismatching reply is returned as an error carrying
/// the relay's code and text.
pub struct SmtpClient {
    connection: Option<ClientConnection>,
    buffer: Vec<u8>,
    buffer_pos: usize,
    server_domain: String,
    accept_invalid_certs: bool,
    capabilities: Capabilities,
}

impl SmtpClient {
    fn with_connection(connection: ClientConnection, server_domain: String) -> Self {
        Self {
            connection: Some(connection),
            buffer: vec![0u8; BUFFER_SIZE],
            buffer_pos: 0,
            server_domain,
            accept_invalid_certs: false,
            capabilities: Capabilities::default(),
        }
    }

    /// Opens a plain TCP connection. `server_domain` is the name the
    /// certificate is checked against should the session later STARTTLS.
    pub async fn connect(addr: &str, server_domain: impl Into<String>) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        Ok(Self::with_connection(
            ClientConnection::Plain(stream),
            server_domain.into(),
        ))
    }

    /// Opens a connection and performs the TLS handshake immediately (SMTPS).
    pub async fn connect_tls(
        addr: &str,
        server_domain: impl Into<String>,
        accept_invalid_certs: bool,
    ) -> Result<Self> {
        let server_domain = server_domain.into();
        let stream = TcpStream::connect(addr).await?;
        let tls = handshake(stream, &server_domain, accept_invalid_certs).await?;

        Ok(Self::with_connection(
            ClientConnection::Tls(Box::new(tls)),
            server_domain,
        )
        .accept_invalid_certs(accept_invalid_certs))
    }

    /// Whether certificate validation is skipped on STARTTLS.
    #[must_use]
    pub const fn accept_invalid_certs(mut self, accept: bool) -> Self {
        self.accept_invalid_certs = accept;
        self
    }

    /// What the relay advertised in its most recent EHLO reply.
    #[must_use]
    pub const fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    /// Reads the `220` greeting.
    pub async fn read_greeting(&mut self) -> Result<Response> {
        self.read_response().await?.expect_code(220)
    }

    async fn write_line(&mut self, line: &str) -> Result<()> {
        self.connection
            .as_mut()
            .ok_or(ClientError::ConnectionClosed)?
            .send(format!("{line}\r\n").as_bytes())
            .await
    }

    /// Sends a command without waiting for the reply.
    pub async fn send_command(&mut self, command: &str) -> Result<()> {
        outgoing!("{command}");
        self.write_line(command).await
    }

    /// Sends a command and reads the reply, whatever its code.
    pub async fn command(&mut self, command: &str) -> Result<Response> {
        self.send_command(command).await?;
        self.read_response().await
    }

    /// Like [`SmtpClient::command`], but logs `redacted` in place of the line.
    async fn secret_command(&mut self, line: &str, redacted: &str) -> Result<Response> {
        outgoing!("{redacted}");
        self.write_line(line).await?;
        self.read_response().await
    }

    /// Sends EHLO and records the advertised capabilities.
    pub async fn ehlo(&mut self, domain: &str) -> Result<Response> {
        let response = self
            .command(&format!("EHLO {domain}"))
            .await?
            .expect_code(250)?;
        self.capabilities = Capabilities::from_ehlo(&response);
        Ok(response)
    }

    /// Sends STARTTLS and, on `220`, upgrades the connection.
    ///
    /// Capabilities are cleared; the caller must EHLO again (RFC 3207).
    pub async fn starttls(&mut self) -> Result<Response> {
        let response = self.command("STARTTLS").await?.expect_code(220)?;

        let connection = self.connection.take().ok_or(ClientError::ConnectionClosed)?;
        self.connection = Some(
            connection
                .upgrade_to_tls(&self.server_domain, self.accept_invalid_certs)
                .await?,
        );
        self.buffer_pos = 0;
        self.capabilities = Capabilities::default();

        Ok(response)
    }

    /// Authenticates with `mechanism`. The secret never reaches the log.
    pub async fn authenticate(
        &mut self,
        mechanism: AuthMechanism,
        principal: &str,
        secret: &str,
    ) -> Result<Response> {
        match mechanism {
            AuthMechanism::Plain => {
                let payload = auth::plain_initial_response(principal, secret);
                self.secret_command(&format!("AUTH PLAIN {payload}"), "AUTH PLAIN ***")
                    .await?
                    .expect_code(235)
            }
            AuthMechanism::Login => {
                self.command("AUTH LOGIN").await?.expect_code(334)?;
                self.secret_command(&auth::login_response(principal), "***")
                    .await?
                    .expect_code(334)?;
                self.secret_command(&auth::login_response(secret), "***")
                    .await?
                    .expect_code(235)
            }
        }
    }

    pub async fn mail_from(&mut self, from: &str) -> Result<Response> {
        self.command(&format!("MAIL FROM:<{from}>"))
            .await?
            .expect_success()
    }

    pub async fn rcpt_to(&mut self, to: &str) -> Result<Response> {
        self.command(&format!("RCPT TO:<{to}>"))
            .await?
            .expect_success()
    }

    /// Sends DATA and expects `354`.
    pub async fn data(&mut self) -> Result<Response> {
        self.command("DATA").await?.expect_code(354)
    }

    /// Writes the dot-stuffed message followed by the end-of-data marker and
    /// returns the relay's acceptance reply.
    pub async fn send_data(&mut self, message: &str) -> Result<Response> {
        let stuffed = dot_stuff(message);
        outgoing!("<{} bytes of message data>", stuffed.len());

        let connection = self
            .connection
            .as_mut()
            .ok_or(ClientError::ConnectionClosed)?;
        connection.send(stuffed.as_bytes()).await?;
        connection.send(b".\r\n").await?;

        self.read_response().await?.expect_success()
    }

    pub async fn quit(&mut self) -> Result<Response> {
        self.command("QUIT").await?.expect_code(221)
    }

    async fn read_response(&mut self) -> Result<Response> {
        loop {
            if let Some((response, consumed)) =
                Response::parse_response(&self.buffer[..self.buffer_pos])?
            {
                self.buffer.copy_within(consumed..self.buffer_pos, 0);
                self.buffer_pos -= consumed;

                incoming!("{} {}", response.code, response.message());
                return Ok(response);
            }

            if self.buffer_pos >= self.buffer.len() {
                let new_size = self.buffer.len() * 2;
                if new_size > MAX_BUFFER_SIZE {
                    return Err(ClientError::ParseError(format!(
                        "Response too large (exceeds {MAX_BUFFER_SIZE} bytes)"
                    )));
                }
                self.buffer.resize(new_size, 0);
            }

            let connection = self
                .connection
                .as_mut()
                .ok_or(ClientError::ConnectionClosed)?;
            let n = connection.read(&mut self.buffer[self.buffer_pos..]).await?;
            self.buffer_pos += n;
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_dot_stuff_doubles_leading_dots() {
        assert_eq!(
            dot_stuff("Hello\n.hidden\n..two\nend"),
            "Hello\r\n..hidden\r\n...two\r\nend\r\n"
        );
    }

    #[test]
    fn test_dot_stuff_normalises_line_endings() {
        assert_eq!(dot_stuff("a\r\nb\nc\r\n"), "a\r\nb\r\nc\r\n");
        assert_eq!(dot_stuff(""), "");
    }

    #[test]
    fn test_lone_dot_line_cannot_end_data_early() {
        let stuffed = dot_stuff("before\n.\nafter");
        assert!(!stuffed.contains("\r\n.\r\n"));
        assert_eq!(stuffed, "before\r\n..\r\nafter\r\n");
    }
}
