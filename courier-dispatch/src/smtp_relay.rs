//! [`RelayTransport`] over a real SMTP connection.
//!
//! Every call opens its own connection: connect (with TLS for implicit-TLS
//! relays), read the greeting, EHLO, upgrade with STARTTLS when advertised,
//! authenticate, then run one MAIL transaction and QUIT. Each stage is bounded
//! by its entry in [`SmtpTimeouts`].

use std::{future::Future, time::Duration};

use async_trait::async_trait;
use courier_common::{RelayConfig, internal, tracing};
use courier_smtp::client::{ClientError, MessageBuilder, SmtpClient, new_message_id};
use courier_tracing::traced;

use crate::{
    config::{DispatchConfig, SmtpTimeouts},
    error::{RelayError, Stage},
    transport::RelayTransport,
    types::{MessageEnvelope, TransmissionReceipt},
};

/// Runs `operation` under the timeout for `stage`, classifying failures.
async fn within<T, F>(stage: Stage, secs: u64, operation: F) -> Result<T, RelayError>
where
    F: Future<Output = courier_smtp::client::Result<T>>,
{
    let after = Duration::from_secs(secs);
    tokio::time::timeout(after, operation)
        .await
        .map_err(|_| RelayError::Timeout { stage, after })?
        .map_err(|err| RelayError::at(stage, err))
}

/// Renders the envelope into the message written after DATA.
fn render(envelope: &MessageEnvelope, message_id: &str) -> Result<String, RelayError> {
    let mut builder = MessageBuilder::new()
        .from(&envelope.sender)
        .to_multiple(&envelope.to)
        .cc_multiple(&envelope.cc)
        .subject(&envelope.subject)
        .message_id(message_id)
        .header("X-Mailer", concat!("courier/", env!("CARGO_PKG_VERSION")));

    if let Some(name) = &envelope.display_name {
        builder = builder.from_name(name);
    }
    if let Some(text) = &envelope.body.text {
        builder = builder.text(text);
    }
    if let Some(html) = &envelope.body.html {
        builder = builder.html(html);
    }
    for attachment in envelope.attachments.iter() {
        builder = builder.attach(attachment.clone());
    }

    Ok(builder.build()?)
}

/// One relay session, from connect to QUIT.
struct SmtpTransaction<'a> {
    relay: &'a RelayConfig,
    timeouts: &'a SmtpTimeouts,
    helo_name: &'a str,
    accept_invalid_certs: bool,
}

impl SmtpTransaction<'_> {
    /// Connects, greets, secures and authenticates.
    async fn open(&self) -> Result<SmtpClient, RelayError> {
        let address = self.relay.address();
        let timeouts = self.timeouts;

        if self.accept_invalid_certs {
            tracing::warn!(
                relay = %self.relay.redacted(),
                "SECURITY WARNING: TLS certificate validation is disabled for this connection"
            );
        }

        let connect = async {
            if self.relay.secure {
                SmtpClient::connect_tls(&address, self.relay.host.clone(), self.accept_invalid_certs)
                    .await
            } else {
                Ok(SmtpClient::connect(&address, self.relay.host.clone())
                    .await?
                    .accept_invalid_certs(self.accept_invalid_certs))
            }
        };
        let mut client = within(Stage::Connect, timeouts.connect_secs, connect)
            .await
            .map_err(|err| match err {
                RelayError::Unreachable(reason) => {
                    RelayError::Unreachable(format!("Failed to connect to {address}: {reason}"))
                }
                other => other,
            })?;

        within(Stage::Greeting, timeouts.greeting_secs, client.read_greeting()).await?;
        within(Stage::Ehlo, timeouts.ehlo_secs, client.ehlo(self.helo_name)).await?;

        if !self.relay.secure {
            if client.capabilities().starttls {
                within(Stage::StartTls, timeouts.starttls_secs, client.starttls()).await?;
                within(Stage::Ehlo, timeouts.ehlo_secs, client.ehlo(self.helo_name)).await?;
                internal!(level = DEBUG, relay = %self.relay.redacted(), "TLS negotiated via STARTTLS");
            } else if self.relay.has_credentials() {
                tracing::warn!(
                    relay = %self.relay.redacted(),
                    "Relay does not offer STARTTLS; credentials will be sent unencrypted"
                );
            }
        }

        if self.relay.has_credentials() {
            let mechanism = client.capabilities().preferred_auth().ok_or_else(|| {
                RelayError::AuthRejected(
                    "relay offers no supported AUTH mechanism (PLAIN, LOGIN)".to_string(),
                )
            })?;

            within(
                Stage::Auth,
                timeouts.auth_secs,
                client.authenticate(mechanism, &self.relay.principal, self.relay.credential()),
            )
            .await?;
            internal!(level = DEBUG, relay = %self.relay.redacted(), %mechanism, "Authenticated");
        }

        Ok(client)
    }

    /// QUIT after the work is done. Failure here does not undo the delivery.
    async fn close(&self, mut client: SmtpClient) {
        if let Err(err) = within(Stage::Quit, self.timeouts.quit_secs, client.quit()).await {
            tracing::warn!(relay = %self.relay.redacted(), %err, "QUIT failed after completed transaction");
        }
    }

    #[traced(instrument(level = tracing::Level::DEBUG, skip_all, fields(relay = %self.relay.redacted())), timing(precision = "ms"))]
    async fn verify(self) -> Result<(), RelayError> {
        let client = self.open().await?;
        self.close(client).await;
        Ok(())
    }

    #[traced(instrument(level = tracing::Level::DEBUG, skip_all, fields(relay = %self.relay.redacted(), recipients = envelope.to.len() + envelope.cc.len() + envelope.bcc.len())), timing(precision = "ms"))]
    async fn deliver(self, envelope: &MessageEnvelope) -> Result<TransmissionReceipt, RelayError> {
        let message_id = new_message_id(envelope.sender_domain());
        let message = render(envelope, &message_id)?;

        let mut client = self.open().await?;
        let timeouts = self.timeouts;

        within(
            Stage::MailFrom,
            timeouts.mail_from_secs,
            client.mail_from(&envelope.sender),
        )
        .await?;

        for recipient in envelope.envelope_recipients() {
            let after = Duration::from_secs(timeouts.rcpt_to_secs);
            match tokio::time::timeout(after, client.rcpt_to(recipient)).await {
                Err(_) => {
                    return Err(RelayError::Timeout {
                        stage: Stage::RcptTo,
                        after,
                    });
                }
                Ok(Err(ClientError::SmtpError { code, message })) if code >= 500 => {
                    return Err(RelayError::RecipientRejected {
                        recipient: recipient.to_string(),
                        reason: format!("{code} {message}"),
                    });
                }
                Ok(Err(err)) => return Err(RelayError::at(Stage::RcptTo, err)),
                Ok(Ok(_)) => {}
            }
        }

        within(Stage::Data, timeouts.data_secs, client.data()).await?;
        let accepted = within(Stage::Data, timeouts.data_secs, client.send_data(&message)).await?;

        self.close(client).await;

        Ok(TransmissionReceipt {
            message_id,
            response: accepted.message(),
        })
    }
}

/// Delivers over SMTP, reconnecting for every message.
#[derive(Debug, Clone)]
pub struct SmtpRelay {
    timeouts: SmtpTimeouts,
    helo_name: String,
    accept_invalid_certs: bool,
}

impl SmtpRelay {
    #[must_use]
    pub fn new(config: &DispatchConfig) -> Self {
        Self {
            timeouts: config.smtp_timeouts.clone(),
            helo_name: config.helo_name.clone(),
            accept_invalid_certs: config.accept_invalid_certs,
        }
    }

    const fn transaction<'a>(&'a self, relay: &'a RelayConfig) -> SmtpTransaction<'a> {
        SmtpTransaction {
            relay,
            timeouts: &self.timeouts,
            helo_name: self.helo_name.as_str(),
            accept_invalid_certs: self.accept_invalid_certs,
        }
    }
}

impl Default for SmtpRelay {
    fn default() -> Self {
        Self::new(&DispatchConfig::default())
    }
}

#[async_trait]
impl RelayTransport for SmtpRelay {
    async fn verify(&self, relay: &RelayConfig) -> Result<(), RelayError> {
        self.transaction(relay).verify().await
    }

    async fn deliver(
        &self,
        relay: &RelayConfig,
        envelope: &MessageEnvelope,
    ) -> Result<TransmissionReceipt, RelayError> {
        self.transaction(relay).deliver(envelope).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use mailparse::{MailHeaderMap, parse_mail};
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::types::{Attachment, Body};

    fn envelope() -> MessageEnvelope {
        MessageEnvelope {
            sender: "news@example.com".to_string(),
            display_name: Some("Newsletter".to_string()),
            to: vec!["a@x.com".to_string(), "b@x.com".to_string()],
            cc: vec!["c@x.com".to_string()],
            bcc: vec!["hidden@x.com".to_string()],
            subject: "Monthly".to_string(),
            body: Body {
                text: Some("plain".to_string()),
                html: Some("<p>rich</p>".to_string()),
            },
            attachments: Arc::from(vec![Attachment::new("a.txt", "text/plain", b"hello".to_vec())]),
        }
    }

    #[test]
    fn test_render_headers() {
        let message = render(&envelope(), "<id@example.com>").unwrap();
        let parsed = parse_mail(message.as_bytes()).unwrap();

        assert_eq!(
            parsed.headers.get_first_value("To").unwrap(),
            "a@x.com, b@x.com"
        );
        assert_eq!(parsed.headers.get_first_value("Cc").unwrap(), "c@x.com");
        assert_eq!(
            parsed.headers.get_first_value("Message-ID").unwrap(),
            "<id@example.com>"
        );
        assert!(
            parsed
                .headers
                .get_first_value("From")
                .unwrap()
                .contains("Newsletter")
        );
        assert!(!message.contains("hidden@x.com"));
        assert_eq!(parsed.ctype.mimetype, "multipart/mixed");
    }

    #[test]
    fn test_timeouts_come_from_config() {
        let config = DispatchConfig {
            helo_name: "mailer.example.com".to_string(),
            ..DispatchConfig::default()
        };
        let relay = SmtpRelay::new(&config);
        assert_eq!(relay.helo_name, "mailer.example.com");
        assert_eq!(relay.timeouts, SmtpTimeouts::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_within_reports_the_stage() {
        let err = within(Stage::Data, 5, async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok::<_, ClientError>(())
        })
        .await
        .unwrap_err();

        assert_eq!(
            err,
            RelayError::Timeout {
                stage: Stage::Data,
                after: Duration::from_secs(5)
            }
        );
    }
}
