use parley_common::util::now_timestamp;
use serde::{Deserialize, Serialize};

/// One remembered utterance in a conversation.
///
/// Items are immutable once stored; they leave a conversation only by
/// trimming or clearing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryItem {
    /// Owning conversation key
    pub conversation_id: String,
    /// Platform message id, unique within the conversation
    pub message_id: String,
    /// Display name used when rendering into a prompt
    pub speaker_name: String,
    /// Message text
    pub content: String,
    /// Wall-clock seconds since the Unix epoch
    pub timestamp: f64,
}

impl HistoryItem {
    /// Create an item stamped with the current time.
    pub fn new(
        conversation_id: impl Into<String>,
        message_id: impl Into<String>,
        speaker_name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            message_id: message_id.into(),
            speaker_name: speaker_name.into(),
            content: content.into(),
            timestamp: now_timestamp(),
        }
    }

    /// Override the timestamp.
    pub fn at(mut self, timestamp: f64) -> Self {
        self.timestamp = timestamp;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn item_serializes_all_fields() {
        let item = HistoryItem::new("chan", "m1", "alice", "hello").at(1700000000.25);
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["conversation_id"], "chan");
        assert_eq!(json["message_id"], "m1");
        assert_eq!(json["speaker_name"], "alice");
        assert_eq!(json["timestamp"], 1700000000.25);

        let back: HistoryItem = serde_json::from_value(json).unwrap();
        assert_eq!(back, item);
    }
}
