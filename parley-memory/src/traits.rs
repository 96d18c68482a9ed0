//! Seams between the history store and the outside world.

use crate::item::HistoryItem;
use async_trait::async_trait;
use parley_common::Result;

/// Durable storage for conversation history.
#[async_trait]
pub trait HistoryBackend: Send + Sync {
    /// Backend name
    fn name(&self) -> &str;

    /// Load a conversation's items in arrival order.
    async fn load(&self, conversation_id: &str) -> Result<Vec<HistoryItem>>;

    /// Insert one item. Fails with `Error::DuplicateItem` when the
    /// conversation already holds the item's message id.
    async fn insert(&self, item: &HistoryItem) -> Result<()>;

    /// Delete a batch of items from one conversation. Returns rows removed.
    async fn delete(&self, conversation_id: &str, items: &[HistoryItem]) -> Result<usize>;

    /// Delete every item of a conversation. Returns rows removed.
    async fn clear(&self, conversation_id: &str) -> Result<usize>;

    /// Health check
    async fn health_check(&self) -> bool;
}

/// Counts how many model tokens a sequence of items occupies once rendered
/// into a prompt. Implementations own the prompt formatting.
#[async_trait]
pub trait TokenCounter: Send + Sync {
    async fn count(&self, items: &[HistoryItem]) -> Result<usize>;
}

/// Offline counter: roughly four characters per token over
/// `"{speaker}: {content}\n"` lines.
#[derive(Debug, Default, Clone, Copy)]
pub struct EstimatingCounter;

impl EstimatingCounter {
    /// Estimate tokens for a piece of text.
    pub fn estimate(text: &str) -> usize {
        text.chars().count().div_ceil(4)
    }

    fn render(item: &HistoryItem) -> String {
        format!("{}: {}\n", item.speaker_name, item.content)
    }
}

#[async_trait]
impl TokenCounter for EstimatingCounter {
    async fn count(&self, items: &[HistoryItem]) -> Result<usize> {
        Ok(items
            .iter()
            .map(|item| Self::estimate(&Self::render(item)))
            .sum())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimate_rounds_up() {
        assert_eq!(EstimatingCounter::estimate(""), 0);
        assert_eq!(EstimatingCounter::estimate("abc"), 1);
        assert_eq!(EstimatingCounter::estimate("abcdefgh"), 2);
        assert_eq!(EstimatingCounter::estimate("😀😀😀😀😀"), 2);
    }

    #[tokio::test]
    async fn estimating_counter_sums_items() {
        let items = vec![
            // "al: hi\n" is 7 chars -> 2
            HistoryItem::new("c", "1", "al", "hi"),
            // "bo: hello there\n" is 16 chars -> 4
            HistoryItem::new("c", "2", "bo", "hello there"),
        ];
        assert_eq!(EstimatingCounter.count(&items).await.unwrap(), 6);
        assert_eq!(EstimatingCounter.count(&[]).await.unwrap(), 0);
    }
}
