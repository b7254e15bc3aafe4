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

//! Scripted SMTP peer used by the session tests.

use std::{
    io,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use rustls::ServerConfig;
use rustls_pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream, ReadBuf},
    task::JoinHandle,
};
use tokio_rustls::TlsAcceptor;

/// Everything the peer received, one entry per command. The end of the DATA
/// phase is recorded as `"."`.
#[derive(Debug, Default)]
pub(crate) struct Transcript {
    pub commands: Vec<String>,
    pub data: Vec<u8>,
}

impl Transcript {
    pub fn verbs(&self) -> Vec<&str> {
        self.commands
            .iter()
            .map(|command| command.split(' ').next().unwrap_or_default())
            .collect()
    }

    pub fn count(&self, verb: &str) -> usize {
        self.verbs().iter().filter(|v| **v == verb).count()
    }
}

pub(crate) struct MockServer {
    greeting: String,
    ehlo: String,
    replies: Vec<(String, String)>,
    acceptor: Option<TlsAcceptor>,
}

impl MockServer {
    pub fn new() -> Self {
        MockServer {
            greeting: "220 mock.example.org ESMTP ready\r\n".to_string(),
            ehlo: "250-mock.example.org\r\n250-PIPELINING\r\n250 8BITMIME\r\n".to_string(),
            replies: Vec::new(),
            acceptor: None,
        }
    }

    pub fn greeting(mut self, greeting: &str) -> Self {
        self.greeting = greeting.to_string();
        self
    }

    pub fn advertise_starttls(mut self) -> Self {
        self.ehlo = "250-mock.example.org\r\n250-PIPELINING\r\n250 STARTTLS\r\n".to_string();
        self
    }

    /// Completes STARTTLS with a real handshake instead of a broken record.
    pub fn tls(mut self, acceptor: TlsAcceptor) -> Self {
        self.acceptor = Some(acceptor);
        self
    }

    /// Answers commands starting with `prefix` with `reply`.
    pub fn reply(mut self, prefix: &str, reply: &str) -> Self {
        self.replies.push((prefix.to_string(), reply.to_string()));
        self
    }

    pub fn spawn(self) -> (DuplexStream, JoinHandle<Transcript>) {
        let (client, server) = tokio::io::duplex(65536);
        (client, tokio::spawn(self.serve(server)))
    }

    fn reply_for(&self, command: &str) -> String {
        if let Some((_, reply)) = self
            .replies
            .iter()
            .find(|(prefix, _)| command.starts_with(prefix.as_str()))
        {
            return reply.clone();
        }

        match command
            .split(' ')
            .next()
            .unwrap_or_default()
            .to_ascii_uppercase()
            .as_str()
        {
            "EHLO" => self.ehlo.clone(),
            "HELO" => "250 mock.example.org\r\n".to_string(),
            "STARTTLS" => "220 2.0.0 Ready to start TLS\r\n".to_string(),
            "MAIL" | "RCPT" | "RSET" | "NOOP" => "250 2.0.0 Ok\r\n".to_string(),
            "DATA" => "354 End data with <CR><LF>.<CR><LF>\r\n".to_string(),
            "." => "250 2.0.0 Ok: queued\r\n".to_string(),
            "QUIT" => "221 2.0.0 Bye\r\n".to_string(),
            _ => "502 5.5.2 Command not recognized\r\n".to_string(),
        }
    }

    pub async fn serve<S: AsyncRead + AsyncWrite + Unpin>(self, mut stream: S) -> Transcript {
        let mut transcript = Transcript::default();
        let mut buf = Vec::new();

        if stream.write_all(self.greeting.as_bytes()).await.is_err()
            || !self.dialogue(&mut stream, &mut transcript, &mut buf).await
        {
            return transcript;
        }

        let Some(acceptor) = self.acceptor.clone() else {
            return transcript;
        };
        match acceptor.accept(Recorder::new(stream)).into_fallible().await {
            Ok(mut stream) => {
                self.dialogue(&mut stream, &mut transcript, &mut buf).await;
            }
            Err((_, recorder)) => {
                // Keep whatever plain text followed the aborted handshake
                let Recorder { inner: mut stream, read } = recorder;
                buf.extend_from_slice(skip_records(&read));
                self.dialogue(&mut stream, &mut transcript, &mut buf).await;
            }
        }

        transcript
    }

    /// Serves commands until the client quits or the connection breaks.
    /// Returns `true` when the stream must be handed over to the TLS acceptor.
    async fn dialogue<S: AsyncRead + AsyncWrite + Unpin>(
        &self,
        stream: &mut S,
        transcript: &mut Transcript,
        buf: &mut Vec<u8>,
    ) -> bool {
        while let Some(line) = read_until(stream, buf, b"\r\n").await {
            let command = command_text(&line);
            let reply = self.reply_for(&command);
            let verb = command
                .split(' ')
                .next()
                .unwrap_or_default()
                .to_ascii_uppercase();
            transcript.commands.push(command);

            if stream.write_all(reply.as_bytes()).await.is_err() {
                break;
            }

            match verb.as_str() {
                "DATA" if reply.starts_with("354") => {
                    let Some(data) = read_data(stream, buf).await else {
                        break;
                    };
                    transcript.data = data;
                    transcript.commands.push(".".to_string());
                    if stream.write_all(self.reply_for(".").as_bytes()).await.is_err() {
                        break;
                    }
                }
                "STARTTLS" if reply.starts_with("220") => {
                    if self.acceptor.is_some() {
                        return true;
                    }
                    // Swallow the ClientHello and answer with an oversized record
                    if read_record(stream, buf).await.is_none()
                        || stream.write_all(b"\x16\x03\x03\xff\xff").await.is_err()
                    {
                        break;
                    }
                }
                "QUIT" => break,
                _ => (),
            }
        }

        false
    }
}

/// Acceptor presenting a fresh self-signed certificate issued for `name`.
pub(crate) fn tls_acceptor(name: &str) -> TlsAcceptor {
    let cert = rcgen::generate_simple_self_signed(vec![name.to_string()]).unwrap();
    let config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(
            vec![CertificateDer::from(cert.serialize_der().unwrap())],
            PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(cert.serialize_private_key_der())),
        )
        .unwrap();
    TlsAcceptor::from(Arc::new(config))
}

/// Server side stream keeping a copy of everything read through it.
struct Recorder<S> {
    inner: S,
    read: Vec<u8>,
}

impl<S> Recorder<S> {
    fn new(inner: S) -> Self {
        Recorder {
            inner,
            read: Vec::new(),
        }
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for Recorder<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let start = buf.filled().len();
        let result = Pin::new(&mut this.inner).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = result {
            this.read.extend_from_slice(&buf.filled()[start..]);
        }
        result
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for Recorder<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

/// Skips the complete TLS records at the start of `bytes`.
fn skip_records(mut bytes: &[u8]) -> &[u8] {
    while bytes.len() >= 5 && (0x14..=0x17).contains(&bytes[0]) && bytes[1] == 0x03 {
        let len = 5 + u16::from_be_bytes([bytes[3], bytes[4]]) as usize;
        if bytes.len() < len {
            return &[];
        }
        bytes = &bytes[len..];
    }
    bytes
}

/// Drops anything preceding the command verb, such as a TLS alert sent by a
/// failed handshake.
fn command_text(line: &[u8]) -> String {
    let start = line
        .iter()
        .position(|b| b.is_ascii_uppercase())
        .unwrap_or(line.len());
    String::from_utf8_lossy(&line[start..]).into_owned()
}

async fn fill<S: AsyncRead + Unpin>(stream: &mut S, buf: &mut Vec<u8>, len: usize) -> Option<()> {
    let mut chunk = vec![0u8; 4096];
    while buf.len() < len {
        match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => return None,
            Ok(br) => buf.extend_from_slice(&chunk[..br]),
        }
    }
    Some(())
}

async fn read_until<S: AsyncRead + Unpin>(
    stream: &mut S,
    buf: &mut Vec<u8>,
    terminator: &[u8],
) -> Option<Vec<u8>> {
    loop {
        if let Some(pos) = buf
            .windows(terminator.len())
            .position(|window| window == terminator)
        {
            let mut line = buf.drain(..pos + terminator.len()).collect::<Vec<_>>();
            line.truncate(pos);
            return Some(line);
        }
        let len = buf.len() + 1;
        fill(stream, buf, len).await?;
    }
}

async fn read_data<S: AsyncRead + Unpin>(stream: &mut S, buf: &mut Vec<u8>) -> Option<Vec<u8>> {
    fill(stream, buf, 3).await?;
    if buf.starts_with(b".\r\n") {
        buf.drain(..3);
        Some(Vec::new())
    } else {
        read_until(stream, buf, b"\r\n.\r\n").await
    }
}

async fn read_record<S: AsyncRead + Unpin>(stream: &mut S, buf: &mut Vec<u8>) -> Option<()> {
    fill(stream, buf, 5).await?;
    let len = 5 + u16::from_be_bytes([buf[3], buf[4]]) as usize;
    fill(stream, buf, len).await?;
    buf.drain(..len);
    Some(())
}
