//! OpenAI-compatible legacy completions provider for instruct models.
//!
//! Sends the same single instruction prompt the vLLM backend uses to
//! `/v1/completions` and counts tokens locally with `cl100k_base`.

use super::{api_error, http_client, normalize_base_url, request_error};
use crate::prompt::PromptBuilder;
use crate::provider::ModelProvider;
use async_trait::async_trait;
use parley_common::{Error, ProviderConfig, Result};
use parley_memory::HistoryItem;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tiktoken_rs::CoreBPE;

const DEFAULT_BASE_URL: &str = "https://api.openai.com";

pub struct OpenAiInstructProvider {
    client: reqwest::Client,
    base_url: String,
    model: String,
    max_tokens: usize,
    temperature: f64,
    stop: Vec<String>,
    prompt: PromptBuilder,
    bpe: Arc<CoreBPE>,
}

impl OpenAiInstructProvider {
    pub fn new(config: &ProviderConfig, prompt: PromptBuilder) -> Result<Self> {
        let bpe = tiktoken_rs::cl100k_base()
            .map_err(|e| Error::Config(format!("failed to load cl100k_base tokenizer: {e}")))?;

        Ok(Self {
            client: http_client(config)?,
            base_url: normalize_base_url(config.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL)),
            model: config.model.clone(),
            max_tokens: config.max_response_tokens,
            temperature: config.temperature,
            stop: config.stop_sequences.clone(),
            prompt,
            bpe: Arc::new(bpe),
        })
    }

    fn encode_len(&self, text: &str) -> usize {
        self.bpe.encode_with_special_tokens(text).len()
    }
}

#[async_trait]
impl ModelProvider for OpenAiInstructProvider {
    fn name(&self) -> &str {
        "openai-instruct"
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, history: &[HistoryItem], new_message: &HistoryItem) -> Result<String> {
        let start = Instant::now();
        let prompt = self
            .prompt
            .completion_prompt(history, Some(&new_message.message_id));

        let request = CompletionRequest {
            model: &self.model,
            prompt: &prompt,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            stop: &self.stop,
        };

        let url = format!("{}/v1/completions", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| request_error("openai-instruct", e))?;

        if !response.status().is_success() {
            return Err(api_error("openai-instruct", response).await);
        }

        let body: CompletionResponse = response
            .json()
            .await
            .map_err(|e| Error::Provider(format!("Failed to parse openai-instruct response: {e}")))?;
        let text = body
            .choices
            .into_iter()
            .next()
            .map(|c| c.text)
            .ok_or_else(|| Error::Provider("openai-instruct response had no choices".into()))?;

        tracing::debug!(
            model = %self.model,
            message_id = %new_message.message_id,
            history_len = history.len(),
            latency_ms = start.elapsed().as_millis() as u64,
            "Generated reply"
        );

        Ok(text.trim().to_string())
    }

    async fn count_tokens(&self, items: &[HistoryItem]) -> Result<usize> {
        Ok(items
            .iter()
            .map(|item| self.encode_len(&self.format_item(item)))
            .sum())
    }

    async fn count_text(&self, text: &str) -> Result<usize> {
        Ok(self.encode_len(text))
    }

    fn format_item(&self, item: &HistoryItem) -> String {
        PromptBuilder::format_line(item)
    }

    async fn prompt_overhead(&self) -> Result<usize> {
        Ok(self
            .prompt
            .completion_overhead_parts()
            .iter()
            .map(|part| self.encode_len(part))
            .sum())
    }
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    max_tokens: usize,
    temperature: f64,
    #[serde(skip_serializing_if = "<[String]>::is_empty")]
    stop: &'a [String],
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    text: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> OpenAiInstructProvider {
        let config = ProviderConfig {
            name: "openai-instruct".into(),
            model: "gpt-3.5-turbo-instruct".into(),
            ..Default::default()
        };
        OpenAiInstructProvider::new(&config, PromptBuilder::new("parley", None)).unwrap()
    }

    #[tokio::test]
    async fn counts_formatted_lines() {
        let p = provider();
        assert_eq!(p.count_tokens(&[]).await.unwrap(), 0);

        let item = HistoryItem::new("c", "42", "alice", "hello");
        let expected = p.encode_len("<messageID=42> alice: hello\n");
        assert_eq!(p.count_tokens(&[item.clone(), item]).await.unwrap(), expected * 2);
    }

    #[tokio::test]
    async fn overhead_covers_instruction_and_tail() {
        let p = provider();
        let tail = p.encode_len(&p.prompt.response_tail());
        assert!(p.prompt_overhead().await.unwrap() > tail);
    }

    #[test]
    fn request_omits_empty_stop() {
        let req = CompletionRequest {
            model: "m",
            prompt: "p",
            max_tokens: 10,
            temperature: 0.5,
            stop: &[],
        };
        let json = serde_json::to_value(&req).unwrap();
        assert!(json.get("stop").is_none());
    }
}
