use std::path::PathBuf;
use std::process::Stdio;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

/// An outgoing notification message
#[derive(Debug, Clone)]
pub struct Email {
    pub to: String,
    pub from: String,
    pub reply_to: String,
    pub subject: String,
    pub body: String,
    pub html: bool,
}

/// Mail delivery collaborator
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: &Email) -> Result<()>;
}

/// Delivers mail by piping an RFC 5322 message to a local sendmail binary.
/// Queueing, retries, and actual SMTP delivery are sendmail's problem.
pub struct SendmailMailer {
    command: PathBuf,
}

impl SendmailMailer {
    pub fn new(command: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

impl Default for SendmailMailer {
    fn default() -> Self {
        Self::new("/usr/sbin/sendmail")
    }
}

fn format_message(email: &Email) -> String {
    let content_type = if email.html {
        "text/html; charset=utf-8"
    } else {
        "text/plain; charset=utf-8"
    };

    format!(
        "To: {}\r\nFrom: {}\r\nReply-To: {}\r\nSubject: {}\r\nMIME-Version: 1.0\r\nContent-Type: {}\r\n\r\n{}",
        email.to, email.from, email.reply_to, email.subject, content_type, email.body
    )
}

#[async_trait]
impl Mailer for SendmailMailer {
    async fn send(&self, email: &Email) -> Result<()> {
        debug!(to = %email.to, subject = %email.subject, "Handing message to sendmail");

        let mut child = Command::new(&self.command)
            .arg("-t")
            .stdin(Stdio::piped())
            .spawn()
            .with_context(|| format!("Failed to spawn {}", self.command.display()))?;

        let mut stdin = child.stdin.take().context("sendmail stdin unavailable")?;
        stdin
            .write_all(format_message(email).as_bytes())
            .await
            .context("Failed to write message to sendmail")?;
        drop(stdin);

        let status = child.wait().await.context("Failed to wait for sendmail")?;
        if !status.success() {
            anyhow::bail!("sendmail exited with {status}");
        }

        info!(to = %email.to, "Notification mail sent");
        Ok(())
    }
}
