use std::io::Write;
use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::warn;

use crate::message::{Attachment, Message, ReferencedMessage};

/// Where rendered output goes. Shared by the input loop and the active poller.
#[async_trait]
pub trait Screen: Send + Sync {
    /// Wipe everything shown so far.
    fn clear(&self);

    fn render(&self, message: &Message);

    /// Out-of-band text: command output, errors, status.
    fn notice(&self, text: &str);

    /// Show a downloaded attachment. Does nothing unless the sink supports it.
    async fn preview(&self, _path: &Path) {}
}

/// One message as it appears on screen:
/// `[date - time] author : content`, then attachment URLs and the quoted reply.
pub fn format_message(message: &Message) -> String {
    let mut body = with_attachments(&message.content, &message.attachments);
    if let Some(referenced) = &message.referenced {
        body.push_str("\n> ");
        body.push_str(&format_quote(referenced));
    }
    format!(
        "[{}] {} : {}",
        message.timestamp.format("%Y-%m-%d - %H:%M:%S"),
        message.author,
        body
    )
}

fn format_quote(referenced: &ReferencedMessage) -> String {
    let quoted = with_attachments(&referenced.content, &referenced.attachments);
    format!("{}: {}", referenced.author, quoted.replace('\n', "\n> "))
}

fn with_attachments(content: &str, attachments: &[Attachment]) -> String {
    let mut body = content.to_string();
    for attachment in attachments {
        if !body.is_empty() {
            body.push('\n');
        }
        body.push_str(&attachment.url);
    }
    body
}

/// Plain stdout sink. Each write holds the stdout lock for the whole block,
/// so concurrent writers never interleave within a message.
pub struct TerminalScreen {
    preview_command: Vec<String>,
}

impl TerminalScreen {
    pub fn new(preview_command: Vec<String>) -> Self {
        Self { preview_command }
    }

    fn write_block(&self, text: &str) {
        let mut out = std::io::stdout().lock();
        if let Err(e) = writeln!(out, "{text}").and_then(|_| out.flush()) {
            warn!("Failed to write to terminal: {e}");
        }
    }
}

#[async_trait]
impl Screen for TerminalScreen {
    fn clear(&self) {
        let mut out = std::io::stdout().lock();
        if let Err(e) = write!(out, "\x1b[2J\x1b[H").and_then(|_| out.flush()) {
            warn!("Failed to clear terminal: {e}");
        }
    }

    fn render(&self, message: &Message) {
        self.write_block(&format_message(message));
    }

    fn notice(&self, text: &str) {
        self.write_block(text);
    }

    /// Runs the preview command as a child process and waits for it without
    /// tying up a runtime worker. The child writes straight to the terminal.
    async fn preview(&self, path: &Path) {
        let Some((program, args)) = self.preview_command.split_first() else {
            return;
        };
        let status = Command::new(program)
            .args(args)
            .arg(path)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .status()
            .await;
        match status {
            Ok(s) if s.success() => {}
            Ok(s) => warn!("Preview command exited with {s} for {}", path.display()),
            Err(e) => warn!("Failed to run preview command {program}: {e}"),
        }
    }
}
