//! SMTP submission client.
//!
//! [`SmtpClient`] owns one connection to a relay and exposes one method per
//! protocol step, leaving the ordering and timeouts to the caller:
//!
//! ```no_run
//! use courier_smtp::client::{MessageBuilder, SmtpClient};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut client = SmtpClient::connect("localhost:2525", "localhost").await?;
//! client.read_greeting().await?;
//! client.ehlo("client.example.com").await?;
//! client.mail_from("sender@example.com").await?;
//! client.rcpt_to("recipient@example.com").await?;
//! client.data().await?;
//!
//! let message = MessageBuilder::new()
//!     .from("sender@example.com")
//!     .to("recipient@example.com")
//!     .subject("Hello")
//!     .text("Hello World")
//!     .build()?;
//! client.send_data(&message).await?;
//! client.quit().await?;
//! # Ok(())
//! # }
//! ```

mod auth;
mod error;
mod message;
mod response;
mod smtp_client;

pub use auth::AuthMechanism;
pub use error::{ClientError, Result};
pub use message::{Attachment, MessageBuilder, encode_header_word, new_message_id};
pub use response::{Capabilities, Response, ResponseLine};
pub use smtp_client::SmtpClient;
