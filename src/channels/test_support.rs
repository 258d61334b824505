//! In-memory channel for tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::channels::{Channel, IncomingMessage, MessageStream, OutgoingResponse};
use crate::error::ChannelError;

/// Replays preset inbound messages, records responses, serves files.
pub struct StubChannel {
    name: String,
    inbound: Mutex<Vec<IncomingMessage>>,
    sent: Arc<Mutex<Vec<OutgoingResponse>>>,
    files: HashMap<String, Vec<u8>>,
}

impl StubChannel {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            inbound: Mutex::new(Vec::new()),
            sent: Arc::new(Mutex::new(Vec::new())),
            files: HashMap::new(),
        }
    }

    pub fn with_inbound(self, messages: Vec<IncomingMessage>) -> Self {
        *self.inbound.lock().unwrap() = messages;
        self
    }

    pub fn with_file(mut self, file_id: &str, bytes: Vec<u8>) -> Self {
        self.files.insert(file_id.to_string(), bytes);
        self
    }

    /// Handle on the recorded responses.
    pub fn sent(&self) -> Arc<Mutex<Vec<OutgoingResponse>>> {
        Arc::clone(&self.sent)
    }
}

#[async_trait]
impl Channel for StubChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn start(&self) -> Result<MessageStream, ChannelError> {
        let messages = std::mem::take(&mut *self.inbound.lock().unwrap());
        Ok(Box::pin(futures::stream::iter(messages)))
    }

    async fn respond(
        &self,
        _msg: &IncomingMessage,
        response: OutgoingResponse,
    ) -> Result<(), ChannelError> {
        self.sent.lock().unwrap().push(response);
        Ok(())
    }

    async fn download(&self, _msg: &IncomingMessage, file_id: &str) -> Result<Vec<u8>, ChannelError> {
        self.files
            .get(file_id)
            .cloned()
            .ok_or_else(|| ChannelError::DownloadFailed {
                name: self.name.clone(),
                reason: format!("no file {file_id}"),
            })
    }

    async fn health_check(&self) -> Result<(), ChannelError> {
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), ChannelError> {
        Ok(())
    }
}
