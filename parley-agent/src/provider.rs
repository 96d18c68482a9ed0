//! Provider trait for language-model backends.
//!
//! Defines the interface that all model providers must implement.

use async_trait::async_trait;
use parley_common::Result;
use parley_memory::{HistoryItem, TokenCounter};
use std::sync::Arc;

/// Language-model backend.
///
/// Implementations handle request formatting, transport and response
/// parsing for one backend API. They also own token counting, because only
/// the backend knows how history is rendered into its prompt.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Provider name (e.g., "openai", "vllm").
    fn name(&self) -> &str;

    /// Model identifier used for generation.
    fn model_name(&self) -> &str;

    /// Generate a reply.
    ///
    /// # Arguments
    /// - `history`: Trimmed conversation history, oldest first. Already
    ///   contains `new_message` as its last item.
    /// - `new_message`: The message being replied to
    ///
    /// # Returns
    /// The complete reply text
    async fn generate(&self, history: &[HistoryItem], new_message: &HistoryItem) -> Result<String>;

    /// Tokens the given items occupy once rendered into this provider's prompt.
    async fn count_tokens(&self, items: &[HistoryItem]) -> Result<usize>;

    /// Tokens in a piece of raw text.
    async fn count_text(&self, text: &str) -> Result<usize>;

    /// Render one history item as it appears in the prompt.
    fn format_item(&self, item: &HistoryItem) -> String {
        format!("{}: {}\n", item.speaker_name, item.content)
    }

    /// Tokens taken by the fixed parts of every prompt (system message,
    /// instructions, response primer).
    async fn prompt_overhead(&self) -> Result<usize> {
        Ok(0)
    }

    /// Warm up the provider (e.g., pre-connect, verify reachability).
    async fn warmup(&self) -> Result<()> {
        Ok(())
    }
}

/// Adapts a provider into the history store's [`TokenCounter`].
pub struct ProviderTokenCounter {
    provider: Arc<dyn ModelProvider>,
}

impl ProviderTokenCounter {
    pub fn new(provider: Arc<dyn ModelProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl TokenCounter for ProviderTokenCounter {
    async fn count(&self, items: &[HistoryItem]) -> Result<usize> {
        self.provider.count_tokens(items).await
    }
}
