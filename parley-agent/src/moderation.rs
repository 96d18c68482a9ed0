//! Content moderation of inbound messages and generated replies.
//!
//! A [`Moderator`] reads a piece of text together with the last few history
//! items and returns a [`Verdict`]. The OpenAI moderation endpoint is the
//! built-in implementation; a category only blocks when the API flags the
//! input and the category's score is above the configured threshold.

use crate::providers::{api_error, authorized_client, normalize_base_url, request_error};
use async_trait::async_trait;
use parley_common::{Error, ModerationConfig, ProviderConfig, Result};
use parley_memory::HistoryItem;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const DEFAULT_BASE_URL: &str = "https://api.openai.com";

/// Categories answered with the support notice rather than the block notice.
pub const SELF_HARM_CATEGORIES: [&str; 3] = ["self-harm", "self-harm/intent", "self-harm/instructions"];

/// Outcome of a moderation check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Allowed,
    /// Blocked for the listed categories.
    Blocked { reasons: Vec<String> },
}

impl Verdict {
    pub fn is_blocked(&self) -> bool {
        matches!(self, Self::Blocked { .. })
    }

    pub fn reasons(&self) -> &[String] {
        match self {
            Self::Allowed => &[],
            Self::Blocked { reasons } => reasons,
        }
    }

    pub fn concerns_self_harm(&self) -> bool {
        self.reasons()
            .iter()
            .any(|r| SELF_HARM_CATEGORIES.contains(&r.as_str()))
    }
}

#[async_trait]
pub trait Moderator: Send + Sync {
    fn name(&self) -> &str;

    /// Check `text`, read as the continuation of `context` (oldest first).
    async fn check(&self, context: &[HistoryItem], text: &str) -> Result<Verdict>;
}

pub struct OpenAiModerator {
    client: reqwest::Client,
    base_url: String,
    model: String,
    threshold: f64,
    context_items: usize,
}

impl OpenAiModerator {
    /// The API key falls back to the model provider's.
    pub fn new(config: &ModerationConfig, provider: &ProviderConfig) -> Result<Self> {
        let threshold = config
            .threshold
            .filter(|t| *t > 0.0)
            .ok_or_else(|| Error::Config("moderation.threshold must be set to enable moderation".into()))?;
        let api_key = config.api_key.as_deref().or(provider.api_key.as_deref());

        Ok(Self {
            client: authorized_client(api_key, provider.timeout_secs)?,
            base_url: normalize_base_url(config.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL)),
            model: config.model.clone(),
            threshold,
            context_items: config.context_items,
        })
    }

    /// The last `context_items` items as `name: content` lines, then `text`.
    fn moderation_input(&self, context: &[HistoryItem], text: &str) -> String {
        let start = context.len().saturating_sub(self.context_items);
        let mut input: String = context[start..]
            .iter()
            .map(|item| format!("{}: {}\n", item.speaker_name, item.content))
            .collect();
        input.push_str(text);
        input
    }

    fn verdict(&self, result: ModerationResult) -> Verdict {
        if !result.flagged {
            return Verdict::Allowed;
        }
        let reasons: Vec<String> = result
            .categories
            .into_iter()
            .filter(|(category, hit)| {
                *hit && result
                    .category_scores
                    .get(category)
                    .is_some_and(|score| *score > self.threshold)
            })
            .map(|(category, _)| category)
            .collect();

        if reasons.is_empty() {
            Verdict::Allowed
        } else {
            Verdict::Blocked { reasons }
        }
    }
}

#[async_trait]
impl Moderator for OpenAiModerator {
    fn name(&self) -> &str {
        "openai"
    }

    async fn check(&self, context: &[HistoryItem], text: &str) -> Result<Verdict> {
        let input = self.moderation_input(context, text);
        let url = format!("{}/v1/moderations", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&ModerationRequest {
                input: &input,
                model: &self.model,
            })
            .send()
            .await
            .map_err(|e| request_error("moderation", e))?;

        if !response.status().is_success() {
            return Err(api_error("moderation", response).await);
        }

        let body: ModerationResponse = response
            .json()
            .await
            .map_err(|e| Error::Provider(format!("Failed to parse moderation response: {e}")))?;
        let result = body
            .results
            .into_iter()
            .next()
            .ok_or_else(|| Error::Provider("moderation response had no results".into()))?;

        let verdict = self.verdict(result);
        tracing::debug!(
            model = %self.model,
            blocked = verdict.is_blocked(),
            reasons = ?verdict.reasons(),
            "Moderated text"
        );
        Ok(verdict)
    }
}

#[derive(Debug, Serialize)]
struct ModerationRequest<'a> {
    input: &'a str,
    model: &'a str,
}

#[derive(Debug, Deserialize)]
struct ModerationResponse {
    results: Vec<ModerationResult>,
}

#[derive(Debug, Deserialize)]
struct ModerationResult {
    flagged: bool,
    #[serde(default)]
    categories: BTreeMap<String, bool>,
    #[serde(default)]
    category_scores: BTreeMap<String, f64>,
}
