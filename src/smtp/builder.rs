/*
 * Copyright Stalwart Labs Ltd.
 *
 * Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
 * https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
 * <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
 * option. This file may not be copied, modified, or distributed
 * except according to those terms.
 */

use std::time::Duration;

use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpStream,
};

use crate::{
    message::{IntoMessage, MailMessage},
    mime::MessageBuilder,
    SmtpClientBuilder, SmtpSession,
};

use super::tls::build_tls_connector;

impl<T: AsRef<str>> SmtpClientBuilder<T> {
    pub fn new(hostname: T, port: u16) -> Self {
        SmtpClientBuilder {
            timeout: Duration::from_secs(60 * 60),
            tls_connector: build_tls_connector(false),
            tls_hostname: hostname,
            port,
            starttls: false,
            local_host: gethostname::gethostname()
                .to_str()
                .unwrap_or("[127.0.0.1]")
                .to_string(),
        }
    }

    /// Require a trusted certificate chain when upgrading to TLS
    pub fn verify_certs(mut self, verify_certs: bool) -> Self {
        self.tls_connector = build_tls_connector(verify_certs);
        self
    }

    /// Upgrade the connection with STARTTLS when the server supports it
    pub fn starttls(mut self, starttls: bool) -> Self {
        self.starttls = starttls;
        self
    }

    /// Set the EHLO/HELO hostname
    pub fn helo_host(mut self, host: impl Into<String>) -> Self {
        self.local_host = host.into();
        self
    }

    /// Sets the SMTP connection timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Connect over clear text
    pub async fn connect(&self) -> crate::Result<SmtpSession<TcpStream>> {
        let addr = format!("{}:{}", self.tls_hostname.as_ref(), self.port);
        let stream = match tokio::time::timeout(self.timeout, TcpStream::connect(&addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(err)) => return Err(crate::Error::Connection(Box::new(err.into()))),
            Err(_) => return Err(crate::Error::Connection(Box::new(crate::Error::Timeout))),
        };

        self.connect_with(stream).await
    }

    /// Starts a session over an already established stream
    pub async fn connect_with<S: AsyncRead + AsyncWrite + Unpin>(
        &self,
        stream: S,
    ) -> crate::Result<SmtpSession<S>> {
        SmtpSession::connect(stream, self.local_host.as_str(), self.timeout).await
    }

    /// Builds the message, connects to the server and delivers it. The
    /// attachment is read before any connection is made.
    pub async fn send(&self, message: impl IntoMessage) -> crate::Result<()> {
        let message = message.into_message()?;
        let body = MessageBuilder::new(&message).build();
        let session = self.connect().await?;

        self.deliver(session, &message, &body).await
    }

    /// Negotiates TLS if requested and runs the transaction on `session`.
    pub async fn deliver<S: AsyncRead + AsyncWrite + Unpin>(
        &self,
        mut session: SmtpSession<S>,
        message: &MailMessage,
        body: &[u8],
    ) -> crate::Result<()> {
        if self.starttls {
            session
                .start_tls(&self.tls_connector, self.tls_hostname.as_ref())
                .await?;
        }

        session.send(message, body).await
    }
}
