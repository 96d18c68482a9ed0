//! OpenAI-compatible chat completions provider.

use super::{api_error, http_client, normalize_base_url, request_error};
use crate::prompt::{ChatMessage, PromptBuilder};
use crate::provider::ModelProvider;
use crate::stream;
use async_trait::async_trait;
use parley_common::{Error, ProviderConfig, Result};
use parley_memory::HistoryItem;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tiktoken_rs::CoreBPE;

const DEFAULT_BASE_URL: &str = "https://api.openai.com";

// Chat format accounting for cl100k_base models.
const TOKENS_PER_MESSAGE: usize = 3;
const TOKENS_PER_NAME: usize = 1;
const REPLY_PRIMING_TOKENS: usize = 3;

const STREAM_CHUNK_TIMEOUT: Duration = Duration::from_secs(60);

/// OpenAI chat completions provider.
pub struct OpenAiProvider {
    client: reqwest::Client,
    base_url: String,
    model: String,
    temperature: f64,
    max_tokens: usize,
    stream: bool,
    prompt: PromptBuilder,
    bpe: Arc<CoreBPE>,
}

impl OpenAiProvider {
    /// Create a provider from configuration.
    pub fn new(config: &ProviderConfig, prompt: PromptBuilder) -> Result<Self> {
        let bpe = tiktoken_rs::cl100k_base()
            .map_err(|e| Error::Config(format!("failed to load cl100k_base tokenizer: {e}")))?;

        Ok(Self {
            client: http_client(config)?,
            base_url: normalize_base_url(config.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL)),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_response_tokens,
            stream: config.stream,
            prompt,
            bpe: Arc::new(bpe),
        })
    }

    fn encode_len(&self, text: &str) -> usize {
        self.bpe.encode_with_special_tokens(text).len()
    }

    /// Tokens one chat message costs, including the per-message framing.
    fn message_tokens(&self, message: &ChatMessage) -> usize {
        let mut tokens =
            TOKENS_PER_MESSAGE + self.encode_len(&message.role) + self.encode_len(&message.content);
        if let Some(name) = &message.name {
            tokens += self.encode_len(name) + TOKENS_PER_NAME;
        }
        tokens
    }

    async fn send(&self, messages: Vec<ChatMessage>) -> Result<reqwest::Response> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let request = ChatRequest {
            model: &self.model,
            messages,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            stream: self.stream,
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| request_error("openai", e))?;

        if !response.status().is_success() {
            return Err(api_error("openai", response).await);
        }
        Ok(response)
    }
}

#[async_trait]
impl ModelProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, history: &[HistoryItem], new_message: &HistoryItem) -> Result<String> {
        let start = Instant::now();
        let messages = self.prompt.chat_messages(history);
        let response = self.send(messages).await?;

        let content = if self.stream {
            stream::accumulate(response.bytes_stream(), STREAM_CHUNK_TIMEOUT, |data| {
                let chunk: StreamChunk = serde_json::from_str(data)
                    .map_err(|e| Error::Provider(format!("bad stream chunk: {e}")))?;
                Ok(chunk
                    .choices
                    .into_iter()
                    .next()
                    .and_then(|c| c.delta.content))
            })
            .await?
        } else {
            let body: ChatResponse = response
                .json()
                .await
                .map_err(|e| Error::Provider(format!("Failed to parse openai response: {e}")))?;
            body.choices
                .into_iter()
                .next()
                .and_then(|c| c.message.content)
                .ok_or_else(|| Error::Provider("openai response had no choices".into()))?
        };

        tracing::debug!(
            model = %self.model,
            message_id = %new_message.message_id,
            history_len = history.len(),
            latency_ms = start.elapsed().as_millis() as u64,
            streamed = self.stream,
            "Generated reply"
        );

        Ok(content.trim().to_string())
    }

    async fn count_tokens(&self, items: &[HistoryItem]) -> Result<usize> {
        let body: usize = items
            .iter()
            .map(|item| self.message_tokens(&self.prompt.chat_message(item)))
            .sum();
        Ok(body + REPLY_PRIMING_TOKENS)
    }

    async fn count_text(&self, text: &str) -> Result<usize> {
        Ok(self.encode_len(text))
    }

    fn format_item(&self, item: &HistoryItem) -> String {
        self.prompt.chat_message(item).content
    }

    async fn prompt_overhead(&self) -> Result<usize> {
        Ok(self.message_tokens(&ChatMessage::system(self.prompt.system_message())))
    }
}

// ============================================================================
// OpenAI API Types
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    max_tokens: usize,
    temperature: f64,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Delta,
}

#[derive(Debug, Default, Deserialize)]
struct Delta {
    content: Option<String>,
}
