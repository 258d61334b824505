//! Channel trait and the message types that cross it.

use std::pin::Pin;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::Stream;

use crate::error::ChannelError;

/// Stream of inbound messages produced by a channel.
pub type MessageStream = Pin<Box<dyn Stream<Item = IncomingMessage> + Send>>;

/// What the user sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageKind {
    Text(String),
    /// An uploaded file, fetched later through [`Channel::download`].
    Document {
        file_id: String,
        file_name: Option<String>,
    },
    /// A press on an inline keyboard button.
    Callback { data: String, callback_id: String },
}

/// A message received from any channel.
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    /// Name of the channel that produced it.
    pub channel: String,
    /// Stable per-user identifier within the channel.
    pub user_id: String,
    pub user_name: Option<String>,
    pub kind: MessageKind,
    /// Channel-specific routing data (e.g. Telegram `chat_id`).
    pub metadata: serde_json::Value,
    pub received_at: DateTime<Utc>,
}

impl IncomingMessage {
    /// A plain text message.
    pub fn new(channel: &str, user_id: &str, content: &str) -> Self {
        Self::with_kind(channel, user_id, MessageKind::Text(content.to_string()))
    }

    pub fn document(channel: &str, user_id: &str, file_id: &str, file_name: Option<&str>) -> Self {
        Self::with_kind(
            channel,
            user_id,
            MessageKind::Document {
                file_id: file_id.to_string(),
                file_name: file_name.map(String::from),
            },
        )
    }

    pub fn callback(channel: &str, user_id: &str, data: &str, callback_id: &str) -> Self {
        Self::with_kind(
            channel,
            user_id,
            MessageKind::Callback {
                data: data.to_string(),
                callback_id: callback_id.to_string(),
            },
        )
    }

    fn with_kind(channel: &str, user_id: &str, kind: MessageKind) -> Self {
        Self {
            channel: channel.to_string(),
            user_id: user_id.to_string(),
            user_name: None,
            kind,
            metadata: serde_json::Value::Null,
            received_at: Utc::now(),
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_user_name(mut self, name: &str) -> Self {
        self.user_name = Some(name.to_string());
        self
    }

    /// Text content, if this is a text message.
    pub fn text(&self) -> Option<&str> {
        match &self.kind {
            MessageKind::Text(text) => Some(text),
            _ => None,
        }
    }
}

/// One inline keyboard button.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineButton {
    pub text: String,
    pub data: String,
}

/// Keyboard attached to an outgoing message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Keyboard {
    /// Leave whatever keyboard the user currently has.
    #[default]
    Keep,
    /// Persistent reply keyboard, one inner Vec per row.
    Reply(Vec<Vec<String>>),
    /// Buttons attached to the message that send callback data.
    Inline(Vec<Vec<InlineButton>>),
    /// Hide the reply keyboard.
    Remove,
}

impl Keyboard {
    /// A reply keyboard with all options in a single row.
    pub fn row(options: &[&str]) -> Self {
        Keyboard::Reply(vec![options.iter().map(|o| o.to_string()).collect()])
    }
}

/// Formatting applied to outgoing text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseMode {
    Markdown,
    Html,
}

impl ParseMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParseMode::Markdown => "Markdown",
            ParseMode::Html => "HTML",
        }
    }
}

/// A file sent back to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingDocument {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

/// A response to send back through the originating channel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutgoingResponse {
    pub content: String,
    pub keyboard: Keyboard,
    pub parse_mode: Option<ParseMode>,
    pub document: Option<OutgoingDocument>,
    /// Answer a callback with a pop-up instead of a chat message.
    pub alert: bool,
}

impl OutgoingResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }

    /// A pop-up answer to a callback.
    pub fn alert(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            alert: true,
            ..Self::default()
        }
    }

    /// An empty, silent answer. On a callback it only clears the client's
    /// pending state.
    pub fn acknowledge() -> Self {
        Self::default()
    }

    /// No text and no attachment.
    pub fn is_empty(&self) -> bool {
        self.content.is_empty() && self.document.is_none()
    }

    pub fn document(file_name: &str, bytes: Vec<u8>) -> Self {
        Self {
            document: Some(OutgoingDocument {
                file_name: file_name.to_string(),
                bytes,
            }),
            ..Self::default()
        }
    }

    pub fn with_keyboard(mut self, keyboard: Keyboard) -> Self {
        self.keyboard = keyboard;
        self
    }

    pub fn with_parse_mode(mut self, mode: ParseMode) -> Self {
        self.parse_mode = Some(mode);
        self
    }
}

/// A bidirectional message transport.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Unique channel name, used to route responses.
    fn name(&self) -> &str;

    /// Begin receiving messages.
    async fn start(&self) -> Result<MessageStream, ChannelError>;

    /// Send a response to the sender of `msg`.
    async fn respond(
        &self,
        msg: &IncomingMessage,
        response: OutgoingResponse,
    ) -> Result<(), ChannelError>;

    /// Fetch the contents of an uploaded file.
    async fn download(&self, _msg: &IncomingMessage, _file_id: &str) -> Result<Vec<u8>, ChannelError> {
        Err(ChannelError::DownloadFailed {
            name: self.name().to_string(),
            reason: "file uploads are not supported on this channel".into(),
        })
    }

    async fn health_check(&self) -> Result<(), ChannelError>;

    async fn shutdown(&self) -> Result<(), ChannelError>;
}
