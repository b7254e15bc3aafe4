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

//! Sends one message to an SMTP server and reports whether it was accepted.

use std::{path::PathBuf, process::ExitCode, time::Duration};

use clap::Parser;
use smtpsend::{Draft, SmtpClientBuilder, DEFAULT_PORT};

/// Send a single e-mail message over SMTP
#[derive(Parser, Debug)]
#[command(name = "smtpsend")]
#[command(about = "Send a single e-mail message over SMTP", long_about = None)]
#[command(version)]
struct Cli {
    /// Set the SMTP server
    #[arg(long)]
    server: String,

    /// Set the SMTP server port
    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Set the mail sender
    #[arg(long)]
    from: String,

    /// Set the mail recipient(s). Separate multiple entries with commas
    #[arg(long)]
    to: String,

    /// Set the mail subject
    #[arg(long)]
    subject: Option<String>,

    /// Set the body of the message
    #[arg(long, default_value = "This is a test message")]
    body: String,

    /// Include the attachment with the message
    #[arg(long)]
    attachment: Option<PathBuf>,

    /// Try to send the message with STARTTLS
    #[arg(long)]
    tls: bool,

    /// Require a trusted certificate chain when using STARTTLS
    #[arg(long)]
    verify_certs: bool,

    /// Hostname announced in EHLO/HELO (defaults to the local host name)
    #[arg(long)]
    helo: Option<String>,

    /// Seconds to wait for each server reply
    #[arg(long, default_value_t = 60 * 60)]
    timeout: u64,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    if cli.server.is_empty() {
        log::error!("SMTP server required");
        return ExitCode::FAILURE;
    }

    let mut draft = Draft::new(cli.from, cli.to)
        .subject(
            cli.subject
                .unwrap_or_else(|| format!("smtpsend test - {}", chrono::Local::now().to_rfc2822())),
        )
        .body(cli.body);
    if let Some(attachment) = cli.attachment {
        draft = draft.attachment(attachment);
    }

    let mut client = SmtpClientBuilder::new(cli.server, cli.port)
        .starttls(cli.tls)
        .verify_certs(cli.verify_certs)
        .timeout(Duration::from_secs(cli.timeout));
    if let Some(helo) = cli.helo {
        client = client.helo_host(helo);
    }

    match client.send(draft).await {
        Ok(()) => {
            println!("Message Sent");
            ExitCode::SUCCESS
        }
        Err(err) => {
            log::error!("{err}");
            ExitCode::FAILURE
        }
    }
}
