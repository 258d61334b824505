//! Channel manager — merges inbound streams and routes replies.

use futures::stream;
use tracing::{error, info, warn};

use crate::channels::{Channel, IncomingMessage, MessageStream, OutgoingResponse};
use crate::error::ChannelError;

/// Owns every active channel.
#[derive(Default)]
pub struct ChannelManager {
    channels: Vec<Box<dyn Channel>>,
}

impl ChannelManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a channel. A later channel with the same name is ignored.
    pub fn add(&mut self, channel: Box<dyn Channel>) {
        if self.get(channel.name()).is_some() {
            warn!(channel = channel.name(), "Channel already registered, ignoring");
            return;
        }
        self.channels.push(channel);
    }

    pub fn names(&self) -> Vec<&str> {
        self.channels.iter().map(|c| c.name()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    fn get(&self, name: &str) -> Option<&dyn Channel> {
        self.channels
            .iter()
            .find(|c| c.name() == name)
            .map(|c| &**c)
    }

    fn route(&self, msg: &IncomingMessage) -> Result<&dyn Channel, ChannelError> {
        self.get(&msg.channel)
            .ok_or_else(|| ChannelError::UnknownChannel(msg.channel.clone()))
    }

    /// Start every channel and merge their streams.
    ///
    /// A channel that fails to start is logged and skipped; it is an error
    /// only when none start.
    pub async fn start_all(&self) -> Result<MessageStream, ChannelError> {
        let mut streams = Vec::with_capacity(self.channels.len());
        for channel in &self.channels {
            match channel.start().await {
                Ok(s) => {
                    info!(channel = channel.name(), "Channel started");
                    streams.push(s);
                }
                Err(e) => error!(channel = channel.name(), "Channel failed to start: {e}"),
            }
        }

        if streams.is_empty() {
            return Err(ChannelError::StartupFailed {
                name: "all".into(),
                reason: "no channel could be started".into(),
            });
        }

        Ok(Box::pin(stream::select_all(streams)))
    }

    /// Send a response through the channel the message came from.
    pub async fn respond(
        &self,
        msg: &IncomingMessage,
        response: OutgoingResponse,
    ) -> Result<(), ChannelError> {
        self.route(msg)?.respond(msg, response).await
    }

    /// Download an uploaded file through the channel the message came from.
    pub async fn download(
        &self,
        msg: &IncomingMessage,
        file_id: &str,
    ) -> Result<Vec<u8>, ChannelError> {
        self.route(msg)?.download(msg, file_id).await
    }

    /// Health of every channel, by name.
    pub async fn health_check_all(&self) -> Vec<(String, Result<(), ChannelError>)> {
        let mut results = Vec::with_capacity(self.channels.len());
        for channel in &self.channels {
            results.push((channel.name().to_string(), channel.health_check().await));
        }
        results
    }

    pub async fn shutdown_all(&self) -> Result<(), ChannelError> {
        for channel in &self.channels {
            if let Err(e) = channel.shutdown().await {
                warn!(channel = channel.name(), "Channel shutdown failed: {e}");
            }
        }
        Ok(())
    }
}
