//! Offline provider that repeats the message back.
//!
//! Useful for exercising a transport without a model backend.

use crate::prompt::PromptBuilder;
use crate::provider::ModelProvider;
use async_trait::async_trait;
use parley_common::Result;
use parley_memory::{EstimatingCounter, HistoryItem};

pub struct EchoProvider {
    model: String,
    prompt: PromptBuilder,
}

impl EchoProvider {
    pub fn new(model: impl Into<String>, prompt: PromptBuilder) -> Self {
        Self {
            model: model.into(),
            prompt,
        }
    }
}

#[async_trait]
impl ModelProvider for EchoProvider {
    fn name(&self) -> &str {
        "echo"
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, history: &[HistoryItem], new_message: &HistoryItem) -> Result<String> {
        tracing::debug!(
            history_len = history.len(),
            message_id = %new_message.message_id,
            "Echoing message"
        );
        Ok(new_message.content.clone())
    }

    async fn count_tokens(&self, items: &[HistoryItem]) -> Result<usize> {
        Ok(items
            .iter()
            .map(|item| EstimatingCounter::estimate(&self.format_item(item)))
            .sum())
    }

    async fn count_text(&self, text: &str) -> Result<usize> {
        Ok(EstimatingCounter::estimate(text))
    }

    async fn prompt_overhead(&self) -> Result<usize> {
        Ok(EstimatingCounter::estimate(&self.prompt.system_message()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn echoes_message_content() {
        let provider = EchoProvider::new("echo", PromptBuilder::new("parley", None));
        let msg = HistoryItem::new("c", "1", "alice", "ping");
        assert_eq!(provider.generate(&[msg.clone()], &msg).await.unwrap(), "ping");
        assert_eq!(provider.model_name(), "echo");
    }

    #[tokio::test]
    async fn counts_by_estimate() {
        let provider = EchoProvider::new("echo", PromptBuilder::new("parley", None));
        // "al: abcd\n" is 9 chars -> 3
        let msg = HistoryItem::new("c", "1", "al", "abcd");
        assert_eq!(provider.count_tokens(&[msg]).await.unwrap(), 3);
        assert_eq!(provider.count_text("abcdefgh").await.unwrap(), 2);
        assert!(provider.prompt_overhead().await.unwrap() > 0);
    }
}
