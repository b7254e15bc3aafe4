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

use base64::{engine::general_purpose::STANDARD, Engine};

use crate::message::MailMessage;

/// Serializes a [`MailMessage`] into a MIME message.
///
/// Messages without an attachment are sent as a single `text/plain` part.
/// With an attachment the message becomes `multipart/mixed`, holding the
/// text part followed by the base64 encoded file. Header lines are not
/// folded.
pub struct MessageBuilder<'x> {
    message: &'x MailMessage,
    boundary: Option<String>,
}

impl<'x> MessageBuilder<'x> {
    pub fn new(message: &'x MailMessage) -> Self {
        MessageBuilder {
            message,
            boundary: None,
        }
    }

    /// Use a fixed multipart boundary instead of a random one.
    pub fn boundary(mut self, boundary: impl Into<String>) -> Self {
        self.boundary = Some(boundary.into());
        self
    }

    pub fn build(self) -> Vec<u8> {
        let message = self.message;
        let mut buf = String::with_capacity(
            message.body.len()
                + message
                    .attachment
                    .as_ref()
                    .map_or(0, |a| a.contents.len() * 4 / 3 + 512)
                + 256,
        );

        buf.push_str(&format!("From: {}\r\n", message.sender));
        buf.push_str(&format!("To: {}\r\n", message.to));
        buf.push_str(&format!("Subject: {}\r\n", message.subject));
        buf.push_str("MIME-version: 1.0;\r\n");

        let attachment = match &message.attachment {
            Some(attachment) => attachment,
            None => {
                write_text_part(&mut buf, &message.body);
                return buf.into_bytes();
            }
        };

        let boundary = self.boundary.unwrap_or_else(random_boundary);
        buf.push_str(&format!(
            "Content-Type: multipart/mixed; boundary=\"{boundary}\"\r\n\r\n"
        ));
        buf.push_str(&format!("--{boundary}\r\n"));
        write_text_part(&mut buf, &message.body);

        let encoded = STANDARD.encode(&attachment.contents);
        let name = &attachment.filename;
        buf.push_str(&format!("\r\n\r\n--{boundary}\r\n"));
        buf.push_str(&format!(
            "Content-Type: application/octet-stream; name=\"{name}\"\r\n"
        ));
        buf.push_str(&format!("Content-Description: {name}\r\n"));
        buf.push_str(&format!(
            "Content-Disposition: attachment; filename=\"{name}\"; size={}\r\n",
            encoded.len()
        ));
        buf.push_str("Content-Transfer-Encoding: base64\r\n\r\n");
        buf.push_str(&encoded);
        buf.push_str(&format!("\r\n--{boundary}--"));

        buf.into_bytes()
    }
}

fn write_text_part(buf: &mut String, body: &str) {
    buf.push_str("Content-Type: text/plain; charset=\"UTF-8\";\r\n\r\n");
    buf.push_str(body);
}

/// Returns a random base-36 token.
pub fn random_boundary() -> String {
    to_base36(rand::random::<u64>())
}

fn to_base36(mut value: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

    let mut token = Vec::with_capacity(13);
    loop {
        token.push(DIGITS[(value % 36) as usize]);
        value /= 36;
        if value == 0 {
            break;
        }
    }
    token.reverse();
    String::from_utf8(token).unwrap_or_default()
}
