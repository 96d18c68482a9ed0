//! Transport trait for chat-platform adapters.

use crate::message::{InboundMessage, OutgoingMessage};
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Result type for transport operations.
pub type ChannelResult<T> = Result<T, ChannelError>;

/// Transport error type.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Message send failed: {0}")]
    SendFailed(String),

    #[error("Channel not ready")]
    NotReady,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<ChannelError> for parley_common::Error {
    fn from(e: ChannelError) -> Self {
        parley_common::Error::Internal(e.to_string()).with_context("transport")
    }
}

/// Chat-platform adapter.
///
/// Implement this trait to connect the relay to a new messaging platform.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Transport name.
    fn name(&self) -> &str;

    /// Longest message the platform accepts, in characters.
    fn max_message_len(&self) -> Option<usize> {
        None
    }

    /// Send a message. Returns the platform id of the sent message.
    async fn send(&self, message: OutgoingMessage) -> ChannelResult<String>;

    /// Receive messages until the platform disconnects or `tx` closes.
    async fn listen(&self, tx: mpsc::Sender<InboundMessage>) -> ChannelResult<()>;

    /// Check if the transport is healthy.
    async fn health_check(&self) -> ChannelResult<()>;

    /// Shutdown the transport gracefully.
    async fn shutdown(&self) -> ChannelResult<()>;
}
