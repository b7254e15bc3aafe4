/*
 * Copyright Stalwart Labs Ltd. See the COPYING
 * file at the top-level directory of this distribution.
 *
 * Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
 * https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
 * <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
 * option. This file may not be copied, modified, or distributed
 * except according to those terms.
 */

//! # smtpsend
//!
//! _smtpsend_ builds a single e-mail message and delivers it to one SMTP server
//! in one attempt. It includes the following features:
//!
//! - Generates plain text messages, or **multipart/mixed** messages carrying a
//!   single base64 encoded attachment.
//! - Simple Mail Transfer Protocol (**SMTP**; _RFC 5321_) delivery with
//!   **RSET**/**QUIT** rollback on every failed step.
//! - Opportunistic SMTP Service Extension for Secure SMTP over **TLS**
//!   (_RFC 3207_), falling back to plain text when the server does not
//!   advertise `STARTTLS`.
//! - Full async (requires Tokio).
//!
//! ## Usage Example
//!
//! Send a message with an attachment, upgrading the connection when possible:
//!
//! ```rust
//!     let draft = Draft::new("john@example.com", "jane@example.com,james@test.com")
//!         .subject("Hi!")
//!         .body("These pretzels are making me thirsty.")
//!         .attachment("./pretzels.png");
//!
//!     SmtpClientBuilder::new("mail.example.com", 25)
//!         .starttls(true)
//!         .send(draft)
//!         .await
//!         .unwrap();
//! ```
//!
//! Certificates presented during `STARTTLS` are checked against the server
//! name only; call `verify_certs(true)` to also require a trusted chain.
//!
//! ## License
//!
//! Licensed under either of
//!
//!  * Apache License, Version 2.0 ([LICENSE-APACHE](LICENSE-APACHE) or <http://www.apache.org/licenses/LICENSE-2.0>)
//!  * MIT license ([LICENSE-MIT](LICENSE-MIT) or <http://opensource.org/licenses/MIT>)
//!
//! at your option.
//!

pub mod message;
pub mod mime;
pub mod smtp;

use std::{fmt::Display, path::PathBuf, time::Duration};

use smtp_proto::Response;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::TlsConnector;

pub use message::{Attachment, Draft, IntoMessage, MailMessage};
pub use mime::MessageBuilder;
pub use smtp::session::{SessionState, SmtpSession};

/// Default SMTP submission port.
pub const DEFAULT_PORT: u16 = 25;

#[derive(Debug)]
pub enum Error {
    /// I/O error
    Io(std::io::Error),

    /// TLS error
    Tls(Box<rustls::Error>),

    /// Failure parsing SMTP reply
    UnparseableReply,

    /// Unexpected SMTP reply.
    UnexpectedReply(Response<String>),

    /// Invalid TLS name provided.
    InvalidTLSName,

    /// Connection timeout.
    Timeout,

    /// Missing message sender.
    MissingMailFrom,

    /// Missing message recipients.
    MissingRcptTo,

    /// Attachment could not be read.
    AttachmentRead(PathBuf, std::io::Error),

    /// Connecting, reading the greeting or greeting the server failed.
    Connection(Box<Error>),

    /// The server advertised STARTTLS but the upgrade failed.
    TlsNegotiation(Box<Error>),

    /// MAIL FROM or RCPT TO was rejected.
    Envelope(Party, String, Box<Error>),

    /// The DATA command was rejected.
    Data(Box<Error>),

    /// Writing the message or closing the DATA stream failed.
    Transfer(Box<Error>),

    /// A session step was called out of order.
    OutOfSequence(SessionState),
}

/// Which side of the envelope was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Party {
    Sender,
    Recipient,
}

pub type Result<T> = std::result::Result<T, Error>;

/// SMTP client.
pub struct SmtpClient<T: AsyncRead + AsyncWrite> {
    pub stream: T,
    pub timeout: Duration,
}

/// Connection and delivery settings for a single send attempt.
pub struct SmtpClientBuilder<T: AsRef<str>> {
    pub timeout: Duration,
    pub tls_connector: TlsConnector,
    pub tls_hostname: T,
    pub port: u16,
    pub starttls: bool,
    pub local_host: String,
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) | Error::AttachmentRead(_, err) => Some(err),
            Error::Tls(err) => Some(err.as_ref()),
            Error::Connection(err)
            | Error::TlsNegotiation(err)
            | Error::Envelope(_, _, err)
            | Error::Data(err)
            | Error::Transfer(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {e}"),
            Error::Tls(e) => write!(f, "TLS error: {e}"),
            Error::UnparseableReply => write!(f, "Unparseable SMTP reply"),
            Error::UnexpectedReply(e) => {
                write!(f, "Unexpected reply: {} {}", e.code(), e.message())
            }
            Error::InvalidTLSName => write!(f, "Invalid TLS name provided"),
            Error::Timeout => write!(f, "Connection timeout"),
            Error::MissingMailFrom => write!(f, "Mail sender required"),
            Error::MissingRcptTo => write!(f, "Mail recipient(s) required"),
            Error::AttachmentRead(path, e) => write!(
                f,
                "Problem reading the given attachment {}: {e}",
                path.display()
            ),
            Error::Connection(e) => write!(f, "Error creating SMTP connection: {e}"),
            Error::TlsNegotiation(e) => write!(f, "Failed to establish TLS session: {e}"),
            Error::Envelope(Party::Sender, addr, e) => {
                write!(f, "Failed to set the From address {addr:?}: {e}")
            }
            Error::Envelope(Party::Recipient, addr, e) => {
                write!(f, "Failed to set recipient {addr:?}: {e}")
            }
            Error::Data(e) => write!(f, "Failed to issue DATA command: {e}"),
            Error::Transfer(e) => write!(f, "Failed to write DATA: {e}"),
            Error::OutOfSequence(state) => {
                write!(f, "SMTP step not allowed in state {state:?}")
            }
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<rustls::Error> for Error {
    fn from(err: rustls::Error) -> Self {
        Error::Tls(Box::new(err))
    }
}
