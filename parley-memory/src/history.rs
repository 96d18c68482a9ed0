//! Per-conversation history with token-budget trimming.

use crate::item::HistoryItem;
use crate::traits::{HistoryBackend, TokenCounter};
use parley_common::{Error, Result};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

#[derive(Default)]
struct Conversation {
    items: VecDeque<HistoryItem>,
    loaded: bool,
    /// Highest timestamp stored so far; appends never go below it.
    last_timestamp: f64,
}

/// Ordered message log for every conversation, kept within a token budget.
///
/// Each conversation has its own async mutex, so append, trim, load and clear
/// for one conversation never interleave while different conversations
/// proceed independently.
pub struct HistoryStore {
    counter: Arc<dyn TokenCounter>,
    backend: Option<Arc<dyn HistoryBackend>>,
    max_tokens: usize,
    evict_oversized: bool,
    conversations: RwLock<HashMap<String, Arc<Mutex<Conversation>>>>,
}

impl HistoryStore {
    /// In-memory store trimming to `max_tokens` as measured by `counter`.
    pub fn new(counter: Arc<dyn TokenCounter>, max_tokens: usize) -> Self {
        Self {
            counter,
            backend: None,
            max_tokens,
            evict_oversized: true,
            conversations: RwLock::new(HashMap::new()),
        }
    }

    /// Persist through `backend` and lazily recover from it.
    pub fn with_backend(mut self, backend: Arc<dyn HistoryBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Whether a single item larger than the whole budget is evicted.
    pub fn with_evict_oversized(mut self, evict: bool) -> Self {
        self.evict_oversized = evict;
        self
    }

    pub fn max_tokens(&self) -> usize {
        self.max_tokens
    }

    pub fn is_durable(&self) -> bool {
        self.backend.is_some()
    }

    async fn conversation(&self, conversation_id: &str) -> Arc<Mutex<Conversation>> {
        if let Some(conv) = self.conversations.read().await.get(conversation_id) {
            return conv.clone();
        }
        self.conversations
            .write()
            .await
            .entry(conversation_id.to_string())
            .or_default()
            .clone()
    }

    /// Recover a conversation from the backend on first access.
    ///
    /// A failed load leaves the conversation unloaded so the next access
    /// tries again. Items appended in the meantime are kept after the
    /// recovered ones.
    async fn ensure_loaded(&self, conversation_id: &str, conv: &mut Conversation) {
        if conv.loaded {
            return;
        }

        let Some(backend) = &self.backend else {
            conv.loaded = true;
            return;
        };

        match backend.load(conversation_id).await {
            Ok(items) => {
                tracing::debug!(
                    conversation_id,
                    count = items.len(),
                    backend = backend.name(),
                    "Recovered conversation history"
                );
                let pending: Vec<HistoryItem> = std::mem::take(&mut conv.items)
                    .into_iter()
                    .filter(|p| !items.iter().any(|i| i.message_id == p.message_id))
                    .collect();
                conv.items = items.into();
                conv.items.extend(pending);
                conv.last_timestamp = conv
                    .items
                    .iter()
                    .map(|i| i.timestamp)
                    .fold(conv.last_timestamp, f64::max);
                conv.loaded = true;

                let evicted = self.trim(conversation_id, &mut conv.items).await;
                self.delete_evicted(conversation_id, &evicted).await;
            }
            Err(e) => {
                tracing::warn!(
                    conversation_id,
                    error = %e,
                    transient = e.is_transient(),
                    "Failed to load history, will retry on next access"
                );
            }
        }
    }

    /// Pop the oldest items until the remainder fits the budget.
    async fn trim(
        &self,
        conversation_id: &str,
        items: &mut VecDeque<HistoryItem>,
    ) -> Vec<HistoryItem> {
        let mut evicted = Vec::new();

        while !items.is_empty() {
            if !self.evict_oversized && items.len() == 1 {
                break;
            }

            let tokens = match self.counter.count(items.make_contiguous()).await {
                Ok(n) => n,
                Err(e) => {
                    tracing::warn!(
                        conversation_id,
                        error = %e,
                        "Token counting failed, skipping trim"
                    );
                    break;
                }
            };
            if tokens <= self.max_tokens {
                break;
            }

            if let Some(oldest) = items.pop_front() {
                tracing::debug!(
                    conversation_id,
                    message_id = %oldest.message_id,
                    tokens,
                    max_tokens = self.max_tokens,
                    "Evicted history item"
                );
                evicted.push(oldest);
            }
        }

        evicted
    }

    async fn delete_evicted(&self, conversation_id: &str, evicted: &[HistoryItem]) {
        let Some(backend) = &self.backend else {
            return;
        };
        if evicted.is_empty() {
            return;
        }
        if let Err(e) = backend.delete(conversation_id, evicted).await {
            tracing::warn!(
                conversation_id,
                count = evicted.len(),
                error = %e,
                "Failed to delete evicted history"
            );
        }
    }

    /// Snapshot of a conversation's items, oldest first.
    pub async fn get_history(&self, conversation_id: &str) -> Vec<HistoryItem> {
        let conv = self.conversation(conversation_id).await;
        let mut conv = conv.lock().await;
        self.ensure_loaded(conversation_id, &mut conv).await;
        conv.items.iter().cloned().collect()
    }

    /// Append an item and trim. Returns the items evicted by the trim.
    ///
    /// The item is filed under `conversation_id` regardless of its own
    /// `conversation_id` field. Its timestamp is raised to the newest stored
    /// one if it is older, so recovery order matches arrival order. Fails with
    /// `Error::DuplicateItem` when the conversation already holds the item's
    /// message id; nothing is written.
    pub async fn append(
        &self,
        conversation_id: &str,
        mut item: HistoryItem,
    ) -> Result<Vec<HistoryItem>> {
        item.conversation_id = conversation_id.to_string();

        let conv = self.conversation(conversation_id).await;
        let mut conv = conv.lock().await;
        self.ensure_loaded(conversation_id, &mut conv).await;

        if conv.items.iter().any(|i| i.message_id == item.message_id) {
            return Err(Error::DuplicateItem {
                conversation_id: conversation_id.to_string(),
                message_id: item.message_id,
            });
        }

        if item.timestamp < conv.last_timestamp {
            item.timestamp = conv.last_timestamp;
        }

        if let Some(backend) = &self.backend {
            match backend.insert(&item).await {
                Ok(()) => {}
                Err(e) if e.is_duplicate() => return Err(e),
                Err(e) => {
                    tracing::warn!(
                        conversation_id,
                        message_id = %item.message_id,
                        error = %e,
                        transient = e.is_transient(),
                        "Failed to persist history item"
                    );
                }
            }
        }

        conv.last_timestamp = item.timestamp;
        conv.items.push_back(item);
        let evicted = self.trim(conversation_id, &mut conv.items).await;
        self.delete_evicted(conversation_id, &evicted).await;

        Ok(evicted)
    }

    /// Drop every item of a conversation, including persisted ones.
    pub async fn clear(&self, conversation_id: &str) {
        let conv = self.conversation(conversation_id).await;
        let mut conv = conv.lock().await;
        conv.items.clear();
        conv.loaded = true;

        if let Some(backend) = &self.backend {
            if let Err(e) = backend.clear(conversation_id).await {
                tracing::warn!(conversation_id, error = %e, "Failed to clear persisted history");
            }
        }
        tracing::debug!(conversation_id, "Cleared conversation history");
    }

    /// Number of items currently remembered.
    pub async fn len(&self, conversation_id: &str) -> usize {
        let conv = self.conversation(conversation_id).await;
        let mut conv = conv.lock().await;
        self.ensure_loaded(conversation_id, &mut conv).await;
        conv.items.len()
    }

    pub async fn is_empty(&self, conversation_id: &str) -> bool {
        self.len(conversation_id).await == 0
    }

    /// Token length of the conversation as the counter sees it.
    pub async fn token_count(&self, conversation_id: &str) -> Result<usize> {
        let conv = self.conversation(conversation_id).await;
        let mut conv = conv.lock().await;
        self.ensure_loaded(conversation_id, &mut conv).await;
        self.counter.count(conv.items.make_contiguous()).await
    }
}
