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

use std::path::{Path, PathBuf};

/// A message ready to be built and delivered.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MailMessage {
    pub sender: String,
    /// Envelope recipients, in the order they were given.
    pub recipients: Vec<String>,
    /// Recipient list exactly as given, used for the `To` header.
    pub to: String,
    pub subject: String,
    pub body: String,
    pub attachment: Option<Attachment>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attachment {
    pub filename: String,
    pub contents: Vec<u8>,
}

/// A message whose attachment, if any, has not been read yet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Draft {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
    pub attachment: Option<PathBuf>,
}

impl MailMessage {
    /// Create a new message. `to` is a comma separated list of recipients,
    /// which are not trimmed or otherwise interpreted.
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        let to = to.into();
        MailMessage {
            sender: from.into(),
            recipients: to.split(',').map(str::to_string).collect(),
            to,
            ..Default::default()
        }
    }

    /// Set the subject of the message.
    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }

    /// Set the plain text body.
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// Attach a file.
    pub fn attachment(mut self, attachment: Attachment) -> Self {
        self.attachment = Some(attachment);
        self
    }
}

impl Attachment {
    pub fn new(filename: impl Into<String>, contents: impl Into<Vec<u8>>) -> Self {
        Attachment {
            filename: filename.into(),
            contents: contents.into(),
        }
    }

    /// Reads an attachment from disk, naming it after the last path component.
    pub fn from_path(path: impl AsRef<Path>) -> crate::Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read(path)
            .map_err(|err| crate::Error::AttachmentRead(path.to_path_buf(), err))?;
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        Ok(Attachment { filename, contents })
    }
}

impl Draft {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Draft {
            from: from.into(),
            to: to.into(),
            ..Default::default()
        }
    }

    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    pub fn attachment(mut self, path: impl Into<PathBuf>) -> Self {
        self.attachment = Some(path.into());
        self
    }
}

pub trait IntoMessage {
    fn into_message(self) -> crate::Result<MailMessage>;
}

impl IntoMessage for MailMessage {
    fn into_message(self) -> crate::Result<MailMessage> {
        if self.sender.is_empty() {
            Err(crate::Error::MissingMailFrom)
        } else if self.recipients.iter().all(|rcpt| rcpt.is_empty()) {
            Err(crate::Error::MissingRcptTo)
        } else {
            Ok(self)
        }
    }
}

impl IntoMessage for Draft {
    fn into_message(self) -> crate::Result<MailMessage> {
        let message = MailMessage::new(self.from, self.to)
            .subject(self.subject)
            .body(self.body)
            .into_message()?;

        match self.attachment {
            Some(path) => Ok(message.attachment(Attachment::from_path(path)?)),
            None => Ok(message),
        }
    }
}
