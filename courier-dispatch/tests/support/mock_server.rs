//! A scriptable SMTP relay for exercising the dispatch engine end to end.
//!
//! ```rust,no_run
//! use support::mock_server::MockRelay;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let relay = MockRelay::builder()
//!     .rejecting_recipient("nobody@example.com")
//!     .with_credentials("me@example.com", "secret")
//!     .build()
//!     .await?;
//!
//! // point a RelayConfig at relay.addr() ...
//! # Ok(())
//! # }
//! ```
#![allow(dead_code)]

use std::{
    collections::HashMap,
    fmt::Write,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use base64::{Engine, engine::general_purpose::STANDARD};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream, tcp::WriteHalf},
    sync::RwLock,
    task::JoinHandle,
};

/// What the relay saw, in order, across every connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SmtpCommand {
    Ehlo(String),
    /// Mechanism only; credentials are never recorded.
    Auth(String),
    MailFrom(String),
    RcptTo(String),
    Data,
    /// The message as received, dot-unstuffed, without the terminator.
    Message(String),
    Rset,
    Quit,
    Other(String),
}

#[derive(Debug, Clone)]
struct Reply {
    code: u16,
    message: String,
}

impl Reply {
    fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    fn to_bytes(&self) -> Vec<u8> {
        format!("{} {}\r\n", self.code, self.message).into_bytes()
    }
}

#[derive(Clone)]
struct RelayBehaviour {
    greeting: Reply,
    capabilities: Vec<String>,
    credentials: Option<(String, String)>,
    mail_from: Reply,
    rejected_recipients: HashMap<String, Reply>,
    data_end: Reply,
    hang_on: Option<String>,
    drop_after_commands: Option<usize>,
}

impl Default for RelayBehaviour {
    fn default() -> Self {
        Self {
            greeting: Reply::new(220, "mock.relay ESMTP ready"),
            capabilities: vec![
                "mock.relay".to_string(),
                "SIZE 52428800".to_string(),
                "AUTH PLAIN LOGIN".to_string(),
            ],
            credentials: None,
            mail_from: Reply::new(250, "2.1.0 Sender OK"),
            rejected_recipients: HashMap::new(),
            data_end: Reply::new(250, "2.0.0 Queued"),
            hang_on: None,
            drop_after_commands: None,
        }
    }
}

impl RelayBehaviour {
    fn ehlo_reply(&self) -> Vec<u8> {
        let mut reply = String::new();
        let last = self.capabilities.len().saturating_sub(1);
        for (i, line) in self.capabilities.iter().enumerate() {
            let separator = if i == last { ' ' } else { '-' };
            let _ = write!(reply, "250{separator}{line}\r\n");
        }
        reply.into_bytes()
    }

    fn accepts(&self, principal: &str, secret: &str) -> bool {
        self.credentials
            .as_ref()
            .is_none_or(|(p, s)| p == principal && s == secret)
    }
}

/// A relay listening on a random local port until dropped.
pub struct MockRelay {
    addr: SocketAddr,
    commands: Arc<RwLock<Vec<SmtpCommand>>>,
    connections: Arc<AtomicUsize>,
    task: JoinHandle<()>,
}

impl MockRelay {
    #[must_use]
    pub fn builder() -> MockRelayBuilder {
        MockRelayBuilder::default()
    }

    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    #[must_use]
    pub fn port(&self) -> u32 {
        u32::from(self.addr.port())
    }

    pub async fn commands(&self) -> Vec<SmtpCommand> {
        self.commands.read().await.clone()
    }

    /// Every message body accepted with DATA.
    pub async fn messages(&self) -> Vec<String> {
        self.commands
            .read()
            .await
            .iter()
            .filter_map(|command| match command {
                SmtpCommand::Message(message) => Some(message.clone()),
                _ => None,
            })
            .collect()
    }

    pub async fn count(&self, predicate: impl Fn(&SmtpCommand) -> bool) -> usize {
        self.commands.read().await.iter().filter(|c| predicate(c)).count()
    }

    #[must_use]
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::Relaxed)
    }

    async fn reply(writer: &mut WriteHalf<'_>, bytes: &[u8]) -> std::io::Result<()> {
        writer.write_all(bytes).await?;
        writer.flush().await
    }

    #[allow(clippy::too_many_lines)]
    async fn handle_client(
        mut stream: TcpStream,
        behaviour: Arc<RelayBehaviour>,
        commands: Arc<RwLock<Vec<SmtpCommand>>>,
    ) -> std::io::Result<()> {
        let (reader, mut writer) = stream.split();
        let mut reader = BufReader::new(reader);
        let mut line = String::new();
        let mut handled = 0;

        Self::reply(&mut writer, &behaviour.greeting.to_bytes()).await?;
        if behaviour.greeting.code != 220 {
            return Ok(());
        }

        loop {
            if behaviour
                .drop_after_commands
                .is_some_and(|limit| handled >= limit)
            {
                return Ok(());
            }

            line.clear();
            if reader.read_line(&mut line).await? == 0 {
                return Ok(());
            }
            handled += 1;

            let raw = line.trim_end().to_string();
            let (verb, argument) = raw.split_once(' ').unwrap_or((raw.as_str(), ""));
            let verb = verb.to_ascii_uppercase();

            if behaviour.hang_on.as_deref() == Some(verb.as_str()) {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                return Ok(());
            }

            match verb.as_str() {
                "EHLO" => {
                    commands
                        .write()
                        .await
                        .push(SmtpCommand::Ehlo(argument.to_string()));
                    Self::reply(&mut writer, &behaviour.ehlo_reply()).await?;
                }
                "AUTH" => {
                    let (mechanism, initial) =
                        argument.split_once(' ').unwrap_or((argument, ""));
                    let mechanism = mechanism.to_ascii_uppercase();
                    commands
                        .write()
                        .await
                        .push(SmtpCommand::Auth(mechanism.clone()));

                    let (principal, secret) = match mechanism.as_str() {
                        "PLAIN" => {
                            let decoded = STANDARD.decode(initial).unwrap_or_default();
                            let decoded = String::from_utf8_lossy(&decoded).into_owned();
                            let mut parts = decoded.split('\0').skip(1);
                            (
                                parts.next().unwrap_or_default().to_string(),
                                parts.next().unwrap_or_default().to_string(),
                            )
                        }
                        "LOGIN" => {
                            Self::reply(&mut writer, b"334 VXNlcm5hbWU6\r\n").await?;
                            let principal = read_base64_line(&mut reader).await?;
                            Self::reply(&mut writer, b"334 UGFzc3dvcmQ6\r\n").await?;
                            let secret = read_base64_line(&mut reader).await?;
                            (principal, secret)
                        }
                        _ => {
                            Self::reply(&mut writer, b"504 5.5.4 Unrecognized mechanism\r\n")
                                .await?;
                            continue;
                        }
                    };

                    let reply: &[u8] = if behaviour.accepts(&principal, &secret) {
                        b"235 2.7.0 Authentication successful\r\n"
                    } else {
                        b"535 5.7.8 Authentication credentials invalid\r\n"
                    };
                    Self::reply(&mut writer, reply).await?;
                }
                "MAIL" => {
                    commands
                        .write()
                        .await
                        .push(SmtpCommand::MailFrom(address_of(argument)));
                    Self::reply(&mut writer, &behaviour.mail_from.to_bytes()).await?;
                }
                "RCPT" => {
                    let recipient = address_of(argument);
                    let reply = behaviour
                        .rejected_recipients
                        .get(&recipient)
                        .cloned()
                        .unwrap_or_else(|| Reply::new(250, "2.1.5 Recipient OK"));
                    commands.write().await.push(SmtpCommand::RcptTo(recipient));
                    Self::reply(&mut writer, &reply.to_bytes()).await?;
                }
                "DATA" => {
                    commands.write().await.push(SmtpCommand::Data);
                    Self::reply(&mut writer, b"354 End data with <CR><LF>.<CR><LF>\r\n").await?;

                    let mut message = String::new();
                    loop {
                        line.clear();
                        if reader.read_line(&mut line).await? == 0 {
                            return Ok(());
                        }
                        if line == ".\r\n" {
                            break;
                        }
                        message.push_str(line.strip_prefix('.').unwrap_or(&line));
                    }

                    commands.write().await.push(SmtpCommand::Message(message));
                    Self::reply(&mut writer, &behaviour.data_end.to_bytes()).await?;
                }
                "RSET" => {
                    commands.write().await.push(SmtpCommand::Rset);
                    Self::reply(&mut writer, b"250 2.0.0 OK\r\n").await?;
                }
                "QUIT" => {
                    commands.write().await.push(SmtpCommand::Quit);
                    Self::reply(&mut writer, b"221 2.0.0 Bye\r\n").await?;
                    return Ok(());
                }
                _ => {
                    commands.write().await.push(SmtpCommand::Other(raw.clone()));
                    Self::reply(&mut writer, b"500 5.5.2 Unknown command\r\n").await?;
                }
            }
        }
    }
}

impl Drop for MockRelay {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn read_base64_line(
    reader: &mut BufReader<tokio::net::tcp::ReadHalf<'_>>,
) -> std::io::Result<String> {
    let mut line = String::new();
    reader.read_line(&mut line).await?;
    let decoded = STANDARD.decode(line.trim_end()).unwrap_or_default();
    Ok(String::from_utf8_lossy(&decoded).into_owned())
}

/// `FROM:<a@b.c> SIZE=10` to `a@b.c`
fn address_of(argument: &str) -> String {
    argument
        .split_once('<')
        .and_then(|(_, rest)| rest.split_once('>'))
        .map_or_else(|| argument.to_string(), |(address, _)| address.to_string())
}

#[derive(Default)]
pub struct MockRelayBuilder {
    behaviour: RelayBehaviour,
}

impl MockRelayBuilder {
    #[must_use]
    pub fn with_greeting(mut self, code: u16, message: impl Into<String>) -> Self {
        self.behaviour.greeting = Reply::new(code, message);
        self
    }

    /// Replaces the EHLO lines after the greeting line.
    #[must_use]
    pub fn with_capabilities(mut self, capabilities: &[&str]) -> Self {
        self.behaviour.capabilities = std::iter::once("mock.relay")
            .chain(capabilities.iter().copied())
            .map(ToString::to_string)
            .collect();
        self
    }

    /// Only these credentials will authenticate.
    #[must_use]
    pub fn with_credentials(mut self, principal: &str, secret: &str) -> Self {
        self.behaviour.credentials = Some((principal.to_string(), secret.to_string()));
        self
    }

    #[must_use]
    pub fn with_mail_from_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.behaviour.mail_from = Reply::new(code, message);
        self
    }

    #[must_use]
    pub fn rejecting_recipient(mut self, recipient: &str) -> Self {
        self.behaviour.rejected_recipients.insert(
            recipient.to_string(),
            Reply::new(550, "5.1.1 Mailbox unavailable"),
        );
        self
    }

    #[must_use]
    pub fn deferring_recipient(mut self, recipient: &str) -> Self {
        self.behaviour.rejected_recipients.insert(
            recipient.to_string(),
            Reply::new(451, "4.7.1 Try again later"),
        );
        self
    }

    #[must_use]
    pub fn with_data_end_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.behaviour.data_end = Reply::new(code, message);
        self
    }

    /// Stop answering once a command with this verb arrives.
    #[must_use]
    pub fn hanging_on(mut self, verb: &str) -> Self {
        self.behaviour.hang_on = Some(verb.to_ascii_uppercase());
        self
    }

    /// Close the connection after this many commands.
    #[must_use]
    pub const fn dropping_after_commands(mut self, count: usize) -> Self {
        self.behaviour.drop_after_commands = Some(count);
        self
    }

    pub async fn build(self) -> std::io::Result<MockRelay> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let behaviour = Arc::new(self.behaviour);
        let commands = Arc::new(RwLock::new(Vec::new()));
        let connections = Arc::new(AtomicUsize::new(0));

        let task = {
            let commands = Arc::clone(&commands);
            let connections = Arc::clone(&connections);
            tokio::spawn(async move {
                while let Ok((stream, _peer)) = listener.accept().await {
                    connections.fetch_add(1, Ordering::Relaxed);
                    let behaviour = Arc::clone(&behaviour);
                    let commands = Arc::clone(&commands);
                    tokio::spawn(async move {
                        if let Err(err) = MockRelay::handle_client(stream, behaviour, commands).await
                        {
                            eprintln!("mock relay client error: {err}");
                        }
                    });
                }
            })
        };

        Ok(MockRelay {
            addr,
            commands,
            connections,
            task,
        })
    }
}
