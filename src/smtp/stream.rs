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

use std::{
    io,
    pin::Pin,
    task::{Context, Poll},
};

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio_rustls::client::TlsStream;

use crate::SmtpClient;

/// A byte stream that can be upgraded to TLS in place.
#[allow(clippy::large_enum_variant)]
pub enum SmtpStream<T> {
    Plain(T),
    Tls(TlsStream<T>),
    #[doc(hidden)]
    None,
}

impl<T> SmtpStream<T> {
    pub fn is_secure(&self) -> bool {
        matches!(self, SmtpStream::Tls(_))
    }
}

impl<T> Default for SmtpStream<T> {
    fn default() -> Self {
        SmtpStream::None
    }
}

fn not_connected() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "stream was lost during TLS upgrade")
}

impl<T: AsyncRead + AsyncWrite + Unpin> AsyncRead for SmtpStream<T> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            SmtpStream::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            SmtpStream::Tls(stream) => Pin::new(stream).poll_read(cx, buf),
            SmtpStream::None => Poll::Ready(Err(not_connected())),
        }
    }
}

impl<T: AsyncRead + AsyncWrite + Unpin> AsyncWrite for SmtpStream<T> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            SmtpStream::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
            SmtpStream::Tls(stream) => Pin::new(stream).poll_write(cx, buf),
            SmtpStream::None => Poll::Ready(Err(not_connected())),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            SmtpStream::Plain(stream) => Pin::new(stream).poll_flush(cx),
            SmtpStream::Tls(stream) => Pin::new(stream).poll_flush(cx),
            SmtpStream::None => Poll::Ready(Err(not_connected())),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            SmtpStream::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            SmtpStream::Tls(stream) => Pin::new(stream).poll_shutdown(cx),
            SmtpStream::None => Poll::Ready(Ok(())),
        }
    }
}

impl<T: AsyncRead + AsyncWrite + Unpin> SmtpClient<T> {
    /// Writes a message body in the DATA phase, followed by the end of data
    /// marker. Leading dots are doubled and bare LF line endings are sent as
    /// CRLF.
    pub async fn write_message(&mut self, message: &[u8]) -> io::Result<()> {
        // Transparency procedure
        #[derive(Debug)]
        enum State {
            Begin,
            Data,
            Cr,
        }

        let mut state = State::Begin;
        let mut last_pos = 0;
        for (pos, byte) in message.iter().enumerate() {
            let insert: Option<&[u8]> = match (&state, byte) {
                (State::Begin, b'.') => Some(b"."),
                (State::Begin | State::Data, b'\n') => Some(b"\r"),
                _ => None,
            };
            if let Some(insert) = insert {
                self.stream.write_all(&message[last_pos..pos]).await?;
                self.stream.write_all(insert).await?;
                last_pos = pos;
            }
            state = match byte {
                b'\r' => State::Cr,
                b'\n' => State::Begin,
                _ => State::Data,
            };
        }
        self.stream.write_all(&message[last_pos..]).await?;
        match state {
            State::Begin => (),
            State::Cr => self.stream.write_all(b"\n").await?,
            State::Data => self.stream.write_all(b"\r\n").await?,
        }
        self.stream.write_all(b".\r\n").await?;
        self.stream.flush().await
    }
}
