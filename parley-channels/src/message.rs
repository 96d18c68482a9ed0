//! Message types exchanged with transports.

use parley_memory::HistoryItem;
use serde::{Deserialize, Serialize};

/// A user referenced in a message, with the name to render in its place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mention {
    pub user_id: String,
    pub display_name: String,
}

impl Mention {
    pub fn new(user_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            display_name: display_name.into(),
        }
    }
}

/// Inbound chat event from a transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Conversation (channel/thread) key
    pub conversation_id: String,
    /// Platform id of the author
    pub sender_id: String,
    /// Display name of the author
    pub sender_name: String,
    /// Author is a bot account
    #[serde(default)]
    pub is_bot: bool,
    /// Private conversation with the bot; every message is addressed to it
    #[serde(default)]
    pub is_direct: bool,
    /// Raw message text, possibly containing `<@id>` mention tokens
    pub text: String,
    /// Platform message id
    pub message_id: String,
    /// Users mentioned in the text
    #[serde(default)]
    pub mentions: Vec<Mention>,
    /// Message this one replies to, if any
    #[serde(default)]
    pub reply_to: Option<String>,
    /// Seconds since the Unix epoch
    pub timestamp: f64,
}

impl InboundMessage {
    /// History item for this message as spoken by its author.
    pub fn to_history_item(&self) -> HistoryItem {
        HistoryItem::new(
            self.conversation_id.clone(),
            self.message_id.clone(),
            self.sender_name.clone(),
            self.text.clone(),
        )
        .at(self.timestamp)
    }

    /// Whether `user_id` is among the mentioned users.
    pub fn mentions_user(&self, user_id: &str) -> bool {
        self.mentions.iter().any(|m| m.user_id == user_id)
    }
}

/// Outgoing message to send to a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingMessage {
    pub conversation_id: String,
    pub text: String,
    /// Message to reply to
    #[serde(default)]
    pub reply_to: Option<String>,
}

impl OutgoingMessage {
    pub fn new(conversation_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            text: text.into(),
            reply_to: None,
        }
    }

    pub fn replying_to(mut self, message_id: impl Into<String>) -> Self {
        self.reply_to = Some(message_id.into());
        self
    }
}
