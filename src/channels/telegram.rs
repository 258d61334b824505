//! Telegram channel — long-polls the Bot API for updates.
//!
//! Handles text messages, document uploads and inline keyboard callbacks.
//! Replies may carry a reply keyboard, an inline keyboard or a keyboard
//! removal, and callback answers can be shown as alerts.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde_json::Value;

use crate::channels::{
    Channel, IncomingMessage, Keyboard, MessageKind, MessageStream, OutgoingResponse, ParseMode,
};
use crate::error::ChannelError;

/// Maximum message length for Telegram's sendMessage API.
const TELEGRAM_MAX_MESSAGE_LENGTH: usize = 4096;

const API_BASE: &str = "https://api.telegram.org";

/// Telegram channel — connects to the Bot API via long-polling.
pub struct TelegramChannel {
    bot_token: String,
    allowed_users: Vec<String>,
    client: reqwest::Client,
}

impl TelegramChannel {
    pub fn new(bot_token: String, allowed_users: Vec<String>) -> Self {
        Self {
            bot_token,
            allowed_users,
            client: reqwest::Client::new(),
        }
    }

    fn api_url(&self, method: &str) -> String {
        format!("{API_BASE}/bot{}/{method}", self.bot_token)
    }

    fn file_url(&self, file_path: &str) -> String {
        format!("{API_BASE}/file/bot{}/{file_path}", self.bot_token)
    }

    /// Send a text message, splitting anything over Telegram's 4096 char
    /// limit. The keyboard goes on the last chunk.
    async fn send_message(
        &self,
        chat_id: &str,
        text: &str,
        parse_mode: Option<ParseMode>,
        keyboard: &Keyboard,
    ) -> Result<(), ChannelError> {
        let chunks = split_message(text, TELEGRAM_MAX_MESSAGE_LENGTH);
        let last = chunks.len().saturating_sub(1);

        for (i, chunk) in chunks.iter().enumerate() {
            let markup = if i == last {
                reply_markup(keyboard)
            } else {
                None
            };
            self.send_message_chunk(chat_id, chunk, parse_mode, markup)
                .await?;
        }
        Ok(())
    }

    /// Send a single message chunk (≤4096 chars). If the formatted send is
    /// refused, retry as plain text.
    async fn send_message_chunk(
        &self,
        chat_id: &str,
        text: &str,
        parse_mode: Option<ParseMode>,
        markup: Option<Value>,
    ) -> Result<(), ChannelError> {
        let mut body = serde_json::json!({
            "chat_id": chat_id,
            "text": text,
        });
        if let Some(markup) = markup {
            body["reply_markup"] = markup;
        }

        if let Some(mode) = parse_mode {
            let mut formatted = body.clone();
            formatted["parse_mode"] = Value::String(mode.as_str().to_string());

            let resp = self.post_json("sendMessage", &formatted).await?;
            if resp.status().is_success() {
                return Ok(());
            }
            tracing::warn!(
                status = ?resp.status(),
                parse_mode = mode.as_str(),
                "Telegram sendMessage with parse_mode failed; retrying as plain text"
            );
        }

        let resp = self.post_json("sendMessage", &body).await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let err = resp.text().await.unwrap_or_default();
            return Err(ChannelError::SendFailed {
                name: "telegram".into(),
                reason: format!("sendMessage failed ({status}): {err}"),
            });
        }
        Ok(())
    }

    async fn post_json(&self, method: &str, body: &Value) -> Result<reqwest::Response, ChannelError> {
        self.client
            .post(self.api_url(method))
            .json(body)
            .send()
            .await
            .map_err(|e| ChannelError::SendFailed {
                name: "telegram".into(),
                reason: e.to_string(),
            })
    }

    /// Answer an inline keyboard press, optionally as a modal alert.
    async fn answer_callback_query(
        &self,
        callback_id: &str,
        text: &str,
        show_alert: bool,
    ) -> Result<(), ChannelError> {
        let body = serde_json::json!({
            "callback_query_id": callback_id,
            "text": text,
            "show_alert": show_alert,
        });
        let resp = self.post_json("answerCallbackQuery", &body).await?;
        if !resp.status().is_success() {
            let err = resp.text().await.unwrap_or_default();
            return Err(ChannelError::SendFailed {
                name: "telegram".into(),
                reason: format!("answerCallbackQuery failed: {err}"),
            });
        }
        Ok(())
    }

    // ── Rich media methods ─────────────────────────────────────────

    /// Send a document from bytes (in-memory).
    pub async fn send_document_bytes(
        &self,
        chat_id: &str,
        file_bytes: Vec<u8>,
        file_name: &str,
        caption: Option<&str>,
    ) -> anyhow::Result<()> {
        let part = Part::bytes(file_bytes).file_name(file_name.to_string());

        let mut form = Form::new()
            .text("chat_id", chat_id.to_string())
            .part("document", part);

        if let Some(cap) = caption {
            form = form.text("caption", cap.to_string());
        }

        let resp = self
            .client
            .post(self.api_url("sendDocument"))
            .multipart(form)
            .send()
            .await?;

        if !resp.status().is_success() {
            let err = resp.text().await?;
            anyhow::bail!("Telegram sendDocument failed: {err}");
        }

        tracing::info!("Telegram document sent to {chat_id}: {file_name}");
        Ok(())
    }

    /// Resolve a file id with `getFile` and download its contents.
    pub async fn download_file(&self, file_id: &str) -> anyhow::Result<Vec<u8>> {
        let resp = self
            .client
            .post(self.api_url("getFile"))
            .json(&serde_json::json!({ "file_id": file_id }))
            .send()
            .await?;

        if !resp.status().is_success() {
            let err = resp.text().await?;
            anyhow::bail!("Telegram getFile failed: {err}");
        }

        let data: Value = resp.json().await?;
        let Some(file_path) = data
            .get("result")
            .and_then(|r| r.get("file_path"))
            .and_then(Value::as_str)
        else {
            anyhow::bail!("Telegram getFile returned no file_path for {file_id}");
        };

        let resp = self.client.get(self.file_url(file_path)).send().await?;
        if !resp.status().is_success() {
            anyhow::bail!("Telegram file download failed: {}", resp.status());
        }

        let bytes = resp.bytes().await?;
        tracing::info!(file_id, size = bytes.len(), "Telegram file downloaded");
        Ok(bytes.to_vec())
    }
}

// ── Channel trait implementation ────────────────────────────────────

#[async_trait]
impl Channel for TelegramChannel {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn start(&self) -> Result<MessageStream, ChannelError> {
        // Updates queued while the bot was down are stale.
        let drop_pending = serde_json::json!({ "drop_pending_updates": true });
        if let Err(e) = self.post_json("deleteWebhook", &drop_pending).await {
            tracing::warn!("Telegram deleteWebhook failed: {e}");
        }

        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let url = self.api_url("getUpdates");
        let allowed_users = self.allowed_users.clone();
        let client = self.client.clone();

        tokio::spawn(async move {
            let mut offset: i64 = 0;

            tracing::info!("Telegram channel listening for messages...");

            loop {
                let body = serde_json::json!({
                    "offset": offset,
                    "timeout": 30,
                    "allowed_updates": ["message", "callback_query"]
                });

                let resp = match client.post(&url).json(&body).send().await {
                    Ok(r) => r,
                    Err(e) => {
                        tracing::warn!("Telegram poll error: {e}");
                        tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                        continue;
                    }
                };

                let data: Value = match resp.json().await {
                    Ok(d) => d,
                    Err(e) => {
                        tracing::warn!("Telegram parse error: {e}");
                        tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                        continue;
                    }
                };

                if let Some(results) = data.get("result").and_then(Value::as_array) {
                    for update in results {
                        // Advance offset past this update
                        if let Some(uid) = update.get("update_id").and_then(Value::as_i64) {
                            offset = uid + 1;
                        }

                        let Some(incoming) = parse_update(update, &allowed_users) else {
                            continue;
                        };

                        if tx.send(incoming).is_err() {
                            tracing::info!("Telegram listener channel closed");
                            return;
                        }
                    }
                }
            }
        });

        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|msg| (msg, rx))
        });

        Ok(Box::pin(stream))
    }

    async fn respond(
        &self,
        msg: &IncomingMessage,
        response: OutgoingResponse,
    ) -> Result<(), ChannelError> {
        if let Some(callback_id) = callback_answer(msg, &response) {
            return self
                .answer_callback_query(callback_id, &response.content, response.alert)
                .await;
        }

        let chat_id = msg
            .metadata
            .get("chat_id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ChannelError::SendFailed {
                name: "telegram".into(),
                reason: "No chat_id in message metadata".into(),
            })?;

        if let Some(document) = response.document {
            let caption = (!response.content.is_empty()).then_some(response.content.as_str());
            return self
                .send_document_bytes(chat_id, document.bytes, &document.file_name, caption)
                .await
                .map_err(|e| ChannelError::SendFailed {
                    name: "telegram".into(),
                    reason: e.to_string(),
                });
        }

        self.send_message(
            chat_id,
            &response.content,
            response.parse_mode,
            &response.keyboard,
        )
        .await
    }

    async fn download(&self, _msg: &IncomingMessage, file_id: &str) -> Result<Vec<u8>, ChannelError> {
        self.download_file(file_id)
            .await
            .map_err(|e| ChannelError::DownloadFailed {
                name: "telegram".into(),
                reason: e.to_string(),
            })
    }

    async fn health_check(&self) -> Result<(), ChannelError> {
        let resp = self
            .client
            .get(self.api_url("getMe"))
            .send()
            .await
            .map_err(|e| ChannelError::StartupFailed {
                name: "telegram".into(),
                reason: e.to_string(),
            })?;

        if resp.status().is_success() {
            Ok(())
        } else {
            Err(ChannelError::StartupFailed {
                name: "telegram".into(),
                reason: format!("getMe returned {}", resp.status()),
            })
        }
    }

    async fn shutdown(&self) -> Result<(), ChannelError> {
        tracing::info!("Telegram channel shutting down");
        Ok(())
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

/// Turn one `getUpdates` entry into an `IncomingMessage`.
///
/// Returns `None` for unsupported update types and unauthorized senders.
fn parse_update(update: &Value, allowed_users: &[String]) -> Option<IncomingMessage> {
    let (from, chat, kind) = if let Some(message) = update.get("message") {
        let from = message.get("from")?;
        let chat = message.get("chat")?;
        (from, chat, UpdateKind::Message(message))
    } else if let Some(callback) = update.get("callback_query") {
        let from = callback.get("from")?;
        let chat = callback.get("message").and_then(|m| m.get("chat"))?;
        (from, chat, UpdateKind::Callback(callback))
    } else {
        return None;
    };

    // Extract user info
    let username = from
        .get("username")
        .and_then(Value::as_str)
        .unwrap_or("unknown");
    let user_id = from.get("id").and_then(Value::as_i64)?.to_string();

    // Check allowlist against both username and numeric ID
    if !check_user_allowed(allowed_users, [username, user_id.as_str()]) {
        tracing::warn!(
            "Telegram: ignoring update from unauthorized user: \
             username={username}, user_id={user_id}"
        );
        return None;
    }

    // Extract chat_id for respond()
    let chat_id = chat
        .get("id")
        .and_then(Value::as_i64)
        .map(|id| id.to_string())
        .unwrap_or_default();

    let incoming = match kind {
        UpdateKind::Message(message) => {
            if let Some(text) = message.get("text").and_then(Value::as_str) {
                IncomingMessage::new("telegram", &user_id, text)
            } else if let Some(document) = message.get("document") {
                let file_id = document.get("file_id").and_then(Value::as_str)?;
                let file_name = document.get("file_name").and_then(Value::as_str);
                IncomingMessage::document("telegram", &user_id, file_id, file_name)
            } else {
                return None;
            }
        }
        UpdateKind::Callback(callback) => {
            let data = callback.get("data").and_then(Value::as_str)?;
            let callback_id = callback.get("id").and_then(Value::as_str)?;
            IncomingMessage::callback("telegram", &user_id, data, callback_id)
        }
    };

    let first_name = from.get("first_name").and_then(Value::as_str);

    Some(
        incoming
            .with_metadata(serde_json::json!({
                "chat_id": chat_id,
                "username": username,
            }))
            .with_user_name(first_name.unwrap_or(username)),
    )
}

enum UpdateKind<'a> {
    Message(&'a Value),
    Callback(&'a Value),
}

/// Bot API `reply_markup` for a keyboard, or `None` to leave it alone.
fn reply_markup(keyboard: &Keyboard) -> Option<Value> {
    match keyboard {
        Keyboard::Keep => None,
        Keyboard::Reply(rows) => {
            let rows: Vec<Vec<Value>> = rows
                .iter()
                .map(|row| {
                    row.iter()
                        .map(|text| serde_json::json!({ "text": text }))
                        .collect()
                })
                .collect();
            Some(serde_json::json!({
                "keyboard": rows,
                "resize_keyboard": true,
            }))
        }
        Keyboard::Inline(rows) => {
            let rows: Vec<Vec<Value>> = rows
                .iter()
                .map(|row| {
                    row.iter()
                        .map(|b| serde_json::json!({ "text": b.text, "callback_data": b.data }))
                        .collect()
                })
                .collect();
            Some(serde_json::json!({ "inline_keyboard": rows }))
        }
        Keyboard::Remove => Some(serde_json::json!({ "remove_keyboard": true })),
    }
}

/// The callback to answer instead of sending a chat message: alerts and
/// empty replies to a button press.
fn callback_answer<'a>(msg: &'a IncomingMessage, response: &OutgoingResponse) -> Option<&'a str> {
    match &msg.kind {
        MessageKind::Callback { callback_id, .. } if response.alert || response.is_empty() => {
            Some(callback_id.as_str())
        }
        _ => None,
    }
}

/// Check if any identity in the iterator matches the allowed users list.
fn check_user_allowed<'a>(
    allowed_users: &[String],
    identities: impl IntoIterator<Item = &'a str>,
) -> bool {
    let ids: Vec<&str> = identities.into_iter().collect();
    allowed_users
        .iter()
        .any(|u| u == "*" || ids.contains(&u.as_str()))
}

/// Split a message into chunks that fit Telegram's character limit.
/// Tries to split on newlines, then spaces, then hard-cuts.
fn split_message(text: &str, max_len: usize) -> Vec<String> {
    if text.len() <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut remaining = text;

    while !remaining.is_empty() {
        if remaining.len() <= max_len {
            chunks.push(remaining.to_string());
            break;
        }

        // Find a good split point on a char boundary
        let mut limit = max_len;
        while !remaining.is_char_boundary(limit) {
            limit -= 1;
        }
        let chunk = &remaining[..limit];
        let split_at = chunk
            .rfind('\n')
            .or_else(|| chunk.rfind(' '))
            .unwrap_or(limit);

        // Don't split at position 0 (infinite loop guard)
        let split_at = if split_at == 0 { limit } else { split_at };

        chunks.push(remaining[..split_at].to_string());
        remaining = remaining[split_at..].trim_start();
    }

    chunks
}

// ── Tests ───────────────────────────────────────────────────────────
