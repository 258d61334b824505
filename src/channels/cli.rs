//! CLI channel — stdin/stdout REPL for local testing.
//!
//! Besides plain text, two line prefixes stand in for Telegram features:
//! `/rate N` presses rating button N and `/upload PATH` sends a file.

use async_trait::async_trait;
use futures::stream;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::channels::{
    Channel, IncomingMessage, Keyboard, MessageStream, OutgoingResponse,
};
use crate::error::ChannelError;

const CLI_USER: &str = "local-user";

/// A simple CLI channel that reads from stdin and writes to stdout.
pub struct CliChannel;

impl CliChannel {
    pub fn new() -> Self {
        Self
    }
}

impl Default for CliChannel {
    fn default() -> Self {
        Self::new()
    }
}

/// Map one input line to a message.
fn parse_line(line: &str) -> IncomingMessage {
    if let Some(rating) = line.strip_prefix("/rate ") {
        return IncomingMessage::callback("cli", CLI_USER, rating.trim(), "cli");
    }
    if let Some(path) = line.strip_prefix("/upload ") {
        let path = path.trim();
        let file_name = std::path::Path::new(path)
            .file_name()
            .and_then(|n| n.to_str());
        return IncomingMessage::document("cli", CLI_USER, path, file_name);
    }
    IncomingMessage::new("cli", CLI_USER, line)
}

/// Render a response as terminal text.
fn render(response: &OutgoingResponse) -> String {
    let mut out = String::new();

    if response.alert {
        out.push_str("(!) ");
    }
    out.push_str(&response.content);

    if let Some(doc) = &response.document {
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(&format!("📎 {} ({} bytes)\n", doc.file_name, doc.bytes.len()));
        out.push_str(&String::from_utf8_lossy(&doc.bytes));
    }

    match &response.keyboard {
        Keyboard::Reply(rows) => {
            for row in rows {
                let buttons: Vec<String> = row.iter().map(|b| format!("[{b}]")).collect();
                out.push('\n');
                out.push_str(&buttons.join(" "));
            }
        }
        Keyboard::Inline(rows) => {
            for row in rows {
                let buttons: Vec<String> = row
                    .iter()
                    .map(|b| format!("[{} → /rate {}]", b.text, b.data))
                    .collect();
                out.push('\n');
                out.push_str(&buttons.join(" "));
            }
        }
        Keyboard::Keep | Keyboard::Remove => {}
    }

    out
}

#[async_trait]
impl Channel for CliChannel {
    fn name(&self) -> &str {
        "cli"
    }

    async fn start(&self) -> Result<MessageStream, ChannelError> {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();

        tokio::spawn(async move {
            let stdin = tokio::io::stdin();
            let reader = BufReader::new(stdin);
            let mut lines = reader.lines();

            // Print prompt
            eprint!("> ");

            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let line = line.trim().to_string();
                        if line.is_empty() {
                            eprint!("> ");
                            continue;
                        }
                        if tx.send(parse_line(&line)).is_err() {
                            break;
                        }
                    }
                    Ok(None) => break, // EOF
                    Err(e) => {
                        tracing::error!("Error reading stdin: {}", e);
                        break;
                    }
                }
            }
        });

        let stream = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|msg| (msg, rx))
        });

        Ok(Box::pin(stream))
    }

    async fn respond(
        &self,
        _msg: &IncomingMessage,
        response: OutgoingResponse,
    ) -> Result<(), ChannelError> {
        let rendered = render(&response);
        if rendered.is_empty() {
            return Ok(());
        }
        println!("\n{rendered}\n");
        eprint!("> ");
        Ok(())
    }

    async fn download(&self, _msg: &IncomingMessage, file_id: &str) -> Result<Vec<u8>, ChannelError> {
        tokio::fs::read(file_id)
            .await
            .map_err(|e| ChannelError::DownloadFailed {
                name: "cli".into(),
                reason: format!("{file_id}: {e}"),
            })
    }

    async fn health_check(&self) -> Result<(), ChannelError> {
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), ChannelError> {
        Ok(())
    }
}
