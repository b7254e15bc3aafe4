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

use smtp_proto::{
    response::parser::{ResponseReceiver, MAX_RESPONSE_LENGTH},
    EhloResponse,
};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::SmtpClient;

use super::AssertReply;

impl<T: AsyncRead + AsyncWrite + Unpin> SmtpClient<T> {
    /// Sends a EHLO command to the server.
    pub async fn ehlo(&mut self, hostname: &str) -> crate::Result<EhloResponse<String>> {
        log::trace!("> EHLO {hostname}");

        tokio::time::timeout(self.timeout, async {
            self.stream
                .write_all(format!("EHLO {hostname}\r\n").as_bytes())
                .await?;
            self.stream.flush().await?;
            self.read_ehlo().await
        })
        .await
        .map_err(|_| crate::Error::Timeout)?
    }

    /// Sends a HELO command to the server. The returned response carries no
    /// extensions.
    pub async fn helo(&mut self, hostname: &str) -> crate::Result<EhloResponse<String>> {
        self.cmd(format!("HELO {hostname}\r\n").as_bytes())
            .await?
            .assert_positive_completion()?;
        Ok(EhloResponse::default())
    }

    /// Greets the server with EHLO, retrying with HELO when the server
    /// rejects the extended greeting.
    pub async fn hello(&mut self, hostname: &str) -> crate::Result<EhloResponse<String>> {
        match self.ehlo(hostname).await {
            Err(crate::Error::UnexpectedReply(reply)) => {
                log::debug!(
                    "EHLO rejected ({} {}), falling back to HELO",
                    reply.code(),
                    reply.message()
                );
                self.helo(hostname).await
            }
            result => result,
        }
    }

    pub async fn read_ehlo(&mut self) -> crate::Result<EhloResponse<String>> {
        let mut buf = vec![0u8; 1024];
        let mut buf_concat = Vec::with_capacity(0);

        loop {
            let br = self.stream.read(&mut buf).await?;

            if br == 0 {
                return Err(crate::Error::UnparseableReply);
            }
            if !buf_concat.is_empty() {
                if br + buf_concat.len() < MAX_RESPONSE_LENGTH {
                    buf_concat.extend_from_slice(&buf[..br]);
                } else {
                    return Err(crate::Error::UnparseableReply);
                }
            }
            let mut iter = if buf_concat.is_empty() {
                buf[..br].iter()
            } else {
                buf_concat.iter()
            };

            match EhloResponse::parse(&mut iter) {
                Ok(reply) => return Ok(reply),
                Err(err) => match err {
                    smtp_proto::Error::NeedsMoreData { .. } => {
                        if buf_concat.is_empty() {
                            buf_concat = buf[..br].to_vec();
                        }
                    }
                    smtp_proto::Error::InvalidResponse { code } => {
                        match ResponseReceiver::from_code(code).parse(&mut iter) {
                            Ok(response) => {
                                return Err(crate::Error::UnexpectedReply(response));
                            }
                            Err(smtp_proto::Error::NeedsMoreData { .. }) => {
                                if buf_concat.is_empty() {
                                    buf_concat = buf[..br].to_vec();
                                }
                            }
                            Err(_) => return Err(crate::Error::UnparseableReply),
                        }
                    }
                    _ => {
                        return Err(crate::Error::UnparseableReply);
                    }
                },
            }
        }
    }
}
