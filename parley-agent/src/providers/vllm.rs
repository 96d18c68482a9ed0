//! Completion-style provider for a vLLM server.
//!
//! Uses the server's `/generate` endpoint with a single instruction prompt
//! and its `/token_usage` endpoint for token counting, so counts always
//! match the served model's tokenizer.

use super::{api_error, http_client, normalize_base_url, request_error};
use crate::prompt::PromptBuilder;
use crate::provider::ModelProvider;
use async_trait::async_trait;
use parley_common::{Error, ProviderConfig, Result};
use parley_memory::HistoryItem;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Instant;

const DEFAULT_BASE_URL: &str = "http://localhost:8000";

pub struct VllmProvider {
    client: reqwest::Client,
    base_url: String,
    model: String,
    max_tokens: usize,
    temperature: f64,
    stop: Vec<String>,
    prompt: PromptBuilder,
}

impl VllmProvider {
    pub fn new(config: &ProviderConfig, prompt: PromptBuilder) -> Result<Self> {
        Ok(Self {
            client: http_client(config)?,
            base_url: normalize_base_url(config.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL)),
            model: config.model.clone(),
            max_tokens: config.max_response_tokens,
            temperature: config.temperature,
            stop: config.stop_sequences.clone(),
            prompt,
        })
    }

    async fn post<T: Serialize + ?Sized, R: DeserializeOwned>(&self, path: &str, body: &T) -> Result<R> {
        let url = format!("{}{path}", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| request_error("vllm", e))?;

        if !response.status().is_success() {
            return Err(api_error("vllm", response).await);
        }

        response
            .json()
            .await
            .map_err(|e| Error::Provider(format!("Failed to parse vllm {path} response: {e}")))
    }

    async fn token_usage(&self, prompt: TokenPrompt<'_>) -> Result<usize> {
        let resp: TokenUsageResponse = self.post("/token_usage", &TokenUsageRequest { prompt }).await?;
        Ok(resp.token_count)
    }
}

#[async_trait]
impl ModelProvider for VllmProvider {
    fn name(&self) -> &str {
        "vllm"
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, history: &[HistoryItem], new_message: &HistoryItem) -> Result<String> {
        let start = Instant::now();
        let prompt = self
            .prompt
            .completion_prompt(history, Some(&new_message.message_id));

        let request = GenerateRequest {
            prompt: &prompt,
            stream: false,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            stop: &self.stop,
        };
        let resp: GenerateResponse = self.post("/generate", &request).await?;

        let text = resp
            .text
            .into_iter()
            .next()
            .ok_or_else(|| Error::Provider("vllm response had no text".into()))?;

        // The reference api_server echoes the prompt ahead of the completion.
        let reply = text.strip_prefix(prompt.as_str()).unwrap_or(&text).trim();

        tracing::debug!(
            model = %self.model,
            message_id = %new_message.message_id,
            history_len = history.len(),
            latency_ms = start.elapsed().as_millis() as u64,
            "Generated reply"
        );

        Ok(reply.to_string())
    }

    async fn count_tokens(&self, items: &[HistoryItem]) -> Result<usize> {
        if items.is_empty() {
            return Ok(0);
        }
        let lines: Vec<String> = items.iter().map(|item| self.format_item(item)).collect();
        self.token_usage(TokenPrompt::Many(&lines)).await
    }

    async fn count_text(&self, text: &str) -> Result<usize> {
        if text.is_empty() {
            return Ok(0);
        }
        self.token_usage(TokenPrompt::One(text)).await
    }

    fn format_item(&self, item: &HistoryItem) -> String {
        PromptBuilder::format_line(item)
    }

    async fn prompt_overhead(&self) -> Result<usize> {
        let mut total = 0;
        for part in self.prompt.completion_overhead_parts() {
            total += self.count_text(&part).await?;
        }
        Ok(total)
    }

    async fn warmup(&self) -> Result<()> {
        let tokens = self.count_text(self.prompt.bot_name()).await?;
        tracing::info!(base_url = %self.base_url, tokens, "vllm server reachable");
        Ok(())
    }
}

// ============================================================================
// vLLM API Types
// ============================================================================

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    prompt: &'a str,
    stream: bool,
    max_tokens: usize,
    temperature: f64,
    #[serde(skip_serializing_if = "<[String]>::is_empty")]
    stop: &'a [String],
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    text: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum TokenPrompt<'a> {
    One(&'a str),
    Many(&'a [String]),
}

#[derive(Debug, Serialize)]
struct TokenUsageRequest<'a> {
    prompt: TokenPrompt<'a>,
}

#[derive(Debug, Deserialize)]
struct TokenUsageResponse {
    #[serde(default)]
    token_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_prompt_serializes_untagged() {
        let lines = vec!["a".to_string(), "b".to_string()];
        let one = serde_json::to_value(TokenUsageRequest { prompt: TokenPrompt::One("x") }).unwrap();
        let many = serde_json::to_value(TokenUsageRequest { prompt: TokenPrompt::Many(&lines) }).unwrap();
        assert_eq!(one, serde_json::json!({ "prompt": "x" }));
        assert_eq!(many, serde_json::json!({ "prompt": ["a", "b"] }));
    }

    #[test]
    fn generate_request_omits_empty_stop() {
        let req = GenerateRequest {
            prompt: "p",
            stream: false,
            max_tokens: 250,
            temperature: 0.7,
            stop: &[],
        };
        let json = serde_json::to_value(&req).unwrap();
        assert!(json.get("stop").is_none());
        assert_eq!(json["max_tokens"], 250);
    }

    #[tokio::test]
    async fn empty_inputs_count_zero_without_network() {
        let config = ProviderConfig {
            base_url: Some("http://127.0.0.1:9".into()),
            ..Default::default()
        };
        let p = VllmProvider::new(&config, PromptBuilder::new("parley", None)).unwrap();
        assert_eq!(p.count_tokens(&[]).await.unwrap(), 0);
        assert_eq!(p.count_text("").await.unwrap(), 0);
    }
}
