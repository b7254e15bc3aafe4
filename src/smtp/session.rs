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

use std::time::Duration;

use smtp_proto::{EhloResponse, EXT_START_TLS};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::TlsConnector;

use crate::{message::MailMessage, Error, Party, SmtpClient};

use super::{stream::SmtpStream, AssertReply};

/// Progress of a single delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connected,
    TlsNegotiated,
    EnvelopeSet,
    RecipientsAccepted,
    DataOpen,
    Closed,
    Aborted,
}

/// One SMTP transaction over an exclusively owned stream.
///
/// Each step checks that it runs in the expected state. A step that fails
/// issues `RSET` and then `QUIT`, moves the session to
/// [`SessionState::Aborted`] and returns the error of the step; failures of
/// the rollback commands themselves are only logged.
pub struct SmtpSession<T: AsyncRead + AsyncWrite + Unpin> {
    client: SmtpClient<SmtpStream<T>>,
    capabilities: EhloResponse<String>,
    local_host: String,
    state: SessionState,
}

impl<T: AsyncRead + AsyncWrite + Unpin> SmtpSession<T> {
    /// Reads the server greeting and introduces the client with EHLO (or HELO).
    pub async fn connect(
        stream: T,
        local_host: impl Into<String>,
        timeout: Duration,
    ) -> crate::Result<Self> {
        let local_host = local_host.into();
        let mut client = SmtpClient {
            stream: SmtpStream::Plain(stream),
            timeout,
        };

        let result = async {
            // Read greeting
            tokio::time::timeout(timeout, client.read())
                .await
                .map_err(|_| crate::Error::Timeout)??
                .assert_positive_completion()?;

            client.hello(&local_host).await
        }
        .await;

        match result {
            Ok(capabilities) => Ok(SmtpSession {
                client,
                capabilities,
                local_host,
                state: SessionState::Connected,
            }),
            Err(err) => Err(Error::Connection(Box::new(err))),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn capabilities(&self) -> &EhloResponse<String> {
        &self.capabilities
    }

    pub fn is_secure(&self) -> bool {
        self.client.stream.is_secure()
    }

    fn expect(&self, states: &[SessionState]) -> crate::Result<()> {
        if states.contains(&self.state) {
            Ok(())
        } else {
            Err(Error::OutOfSequence(self.state))
        }
    }

    /// Resets the transaction and closes the session, then hands back `err`.
    async fn abort(&mut self, err: Error) -> Error {
        if let Err(rset) = self.client.rset().await {
            log::debug!("RSET failed during rollback: {rset}");
        }
        if let Err(quit) = self.client.quit().await {
            log::debug!("QUIT failed during rollback: {quit}");
        }
        self.state = SessionState::Aborted;
        err
    }

    /// Upgrades the connection when the server advertises STARTTLS. Servers
    /// without the extension are used in plain text.
    pub async fn start_tls(
        &mut self,
        tls_connector: &TlsConnector,
        hostname: &str,
    ) -> crate::Result<()> {
        self.expect(&[SessionState::Connected])?;

        if !self.capabilities.has_capability(EXT_START_TLS) {
            log::warn!("Server doesn't support TLS.. Sending over an unencrypted channel");
            return Ok(());
        }

        let result = async {
            self.client.start_tls(tls_connector, hostname).await?;
            self.client.ehlo(&self.local_host).await
        }
        .await;

        match result {
            Ok(capabilities) => {
                log::info!("TLS negotiated, sending over an encrypted channel");
                self.capabilities = capabilities;
                self.state = SessionState::TlsNegotiated;
                Ok(())
            }
            Err(err) => Err(self.abort(Error::TlsNegotiation(Box::new(err))).await),
        }
    }

    /// Sets the envelope sender.
    pub async fn mail_from(&mut self, sender: &str) -> crate::Result<()> {
        self.expect(&[SessionState::Connected, SessionState::TlsNegotiated])?;

        match self.client.mail_from(sender).await {
            Ok(()) => {
                self.state = SessionState::EnvelopeSet;
                Ok(())
            }
            Err(err) => Err(self
                .abort(Error::Envelope(Party::Sender, sender.to_string(), Box::new(err)))
                .await),
        }
    }

    /// Adds the recipients in order, stopping at the first one the server
    /// rejects.
    pub async fn rcpt_to<I, R>(&mut self, recipients: I) -> crate::Result<()>
    where
        I: IntoIterator<Item = R>,
        R: AsRef<str>,
    {
        self.expect(&[SessionState::EnvelopeSet])?;

        let mut accepted = 0;
        for rcpt in recipients {
            let rcpt = rcpt.as_ref();
            if let Err(err) = self.client.rcpt_to(rcpt).await {
                return Err(self
                    .abort(Error::Envelope(Party::Recipient, rcpt.to_string(), Box::new(err)))
                    .await);
            }
            accepted += 1;
        }

        if accepted == 0 {
            return Err(self.abort(Error::MissingRcptTo).await);
        }

        self.state = SessionState::RecipientsAccepted;
        Ok(())
    }

    /// Sends DATA and waits for the server to start accepting the message.
    pub async fn open_data(&mut self) -> crate::Result<()> {
        self.expect(&[SessionState::RecipientsAccepted])?;

        match self.client.data_start().await {
            Ok(()) => {
                self.state = SessionState::DataOpen;
                Ok(())
            }
            Err(err) => Err(self.abort(Error::Data(Box::new(err))).await),
        }
    }

    /// Writes the message, closes the data stream and waits for the server
    /// to accept it.
    pub async fn transfer(&mut self, message: &[u8]) -> crate::Result<()> {
        self.expect(&[SessionState::DataOpen])?;

        match self.client.data_transfer(message).await {
            Ok(()) => {
                self.state = SessionState::Closed;
                Ok(())
            }
            Err(err) => Err(self.abort(Error::Transfer(Box::new(err))).await),
        }
    }

    /// Ends the session. Errors are logged and otherwise ignored.
    pub async fn quit(mut self) {
        if self.state != SessionState::Aborted {
            if let Err(err) = self.client.quit().await {
                log::debug!("QUIT failed: {err}");
            }
        }
    }

    /// Runs the envelope and data steps for `message`, whose serialized form
    /// is `body`, then quits.
    pub async fn send(mut self, message: &MailMessage, body: &[u8]) -> crate::Result<()> {
        self.mail_from(&message.sender).await?;
        self.rcpt_to(&message.recipients).await?;
        self.open_data().await?;
        self.transfer(body).await?;
        self.quit().await;
        Ok(())
    }
}
