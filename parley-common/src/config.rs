//! Configuration management for the Parley relay.
//!
//! The relay reads a single configuration file at `~/.parley/config.json`.
//! Every section is optional and falls back to defaults.
//!
//! # Configuration Priority
//!
//! 1. Environment variables (PARLEY_* prefix)
//! 2. Explicit config file values
//! 3. Default values
//!
//! # Environment Variable Mapping
//!
//! - `PARLEY_LOG_LEVEL` → observability.log_level
//! - `PARLEY_LOG_FORMAT` → observability.log_format
//! - `PARLEY_BOT_NAME` → bot.name
//! - `PARLEY_BOT_USER_ID` → bot.user_id
//! - `PARLEY_PROVIDER` → provider.name
//! - `PARLEY_MODEL` → provider.model
//! - `PARLEY_PROVIDER_URL` → provider.base_url
//! - `PARLEY_API_KEY` / `OPENAI_API_KEY` → provider.api_key
//! - `PARLEY_MAX_CONTEXT_LEN` → provider.max_context_len
//! - `PARLEY_MAX_CONCURRENT_CALLS` → dispatcher.max_concurrent_model_calls
//! - `PARLEY_HISTORY_DB` → history.db_path (also enables durability)
//! - `PARLEY_UNRESTRICTED_SENDER` → rate_limit.unrestricted_sender
//! - `PARLEY_MODERATION_THRESHOLD` / `OPENAI_MODERATION_THRESHOLD` → moderation.threshold

use crate::error::{Error, Result};
use crate::source::ConfigSource;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Get the configuration directory path.
pub fn config_dir() -> PathBuf {
    directories::UserDirs::new().map_or_else(
        || PathBuf::from(".parley"),
        |dirs| dirs.home_dir().join(".parley"),
    )
}

/// Get the configuration file path.
pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

// ============================================================================
// Bot identity
// ============================================================================

/// How the relay identifies itself inside conversations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    /// Display name used in prompts and for name-match addressing.
    #[serde(default = "default_bot_name")]
    pub name: String,

    /// Platform user id of the bot account. Messages from this id are dropped
    /// and mentions of it address the bot.
    #[serde(default)]
    pub user_id: Option<String>,

    /// Respond when the bot name appears in a message, not only on mention.
    #[serde(default = "default_true")]
    pub respond_to_name: bool,

    /// Sent to the sender when the rate limiter rejects a message.
    #[serde(default = "default_rate_limit_notice")]
    pub rate_limit_notice: String,

    /// Sent when response generation fails for any reason.
    #[serde(default = "default_failure_notice")]
    pub failure_notice: String,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            name: default_bot_name(),
            user_id: None,
            respond_to_name: true,
            rate_limit_notice: default_rate_limit_notice(),
            failure_notice: default_failure_notice(),
        }
    }
}

fn default_bot_name() -> String {
    "parley".into()
}

fn default_rate_limit_notice() -> String {
    "You're sending messages too quickly. Please wait a bit before trying again.".into()
}

fn default_failure_notice() -> String {
    "Sorry, something went wrong while generating a response.".into()
}

// ============================================================================
// Model provider
// ============================================================================

/// Model backend selection and sampling settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Registry key of the provider (echo, openai, openai-instruct, vllm).
    #[serde(default = "default_provider_name")]
    pub name: String,

    /// Model identifier passed to the backend.
    #[serde(default = "default_model")]
    pub model: String,

    /// Base URL of the backend. Provider-specific default when unset.
    #[serde(default)]
    pub base_url: Option<String>,

    /// API key, if the backend needs one.
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,

    /// Total context window of the model in tokens.
    #[serde(default = "default_max_context_len")]
    pub max_context_len: usize,

    /// Tokens reserved for the generated reply.
    #[serde(default = "default_max_response_tokens")]
    pub max_response_tokens: usize,

    /// Sampling temperature.
    #[serde(default = "default_temperature")]
    pub temperature: f64,

    /// Stop sequences for completion-style backends.
    #[serde(default)]
    pub stop_sequences: Vec<String>,

    /// Stream the reply and accumulate it at the provider boundary.
    #[serde(default)]
    pub stream: bool,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Character description prepended to every prompt.
    #[serde(default)]
    pub system_prompt: Option<String>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            name: default_provider_name(),
            model: default_model(),
            base_url: None,
            api_key: None,
            max_context_len: default_max_context_len(),
            max_response_tokens: default_max_response_tokens(),
            temperature: default_temperature(),
            stop_sequences: Vec::new(),
            stream: false,
            timeout_secs: default_timeout_secs(),
            system_prompt: None,
        }
    }
}

fn default_provider_name() -> String {
    "echo".into()
}

fn default_model() -> String {
    "echo".into()
}

fn default_max_context_len() -> usize {
    4096
}

fn default_max_response_tokens() -> usize {
    250
}

fn default_temperature() -> f64 {
    0.7
}

fn default_timeout_secs() -> u64 {
    120
}

// ============================================================================
// History
// ============================================================================

/// Conversation history settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Explicit history token budget. When unset the budget is derived from
    /// the provider context length minus prompt and response reservations.
    #[serde(default)]
    pub max_tokens: Option<usize>,

    /// Evict a single item that alone exceeds the budget, even if that leaves
    /// the conversation empty.
    #[serde(default = "default_true")]
    pub evict_oversized: bool,

    /// Persist history to SQLite.
    #[serde(default)]
    pub durable: bool,

    /// SQLite database path. Defaults to `~/.parley/history.db`.
    #[serde(default)]
    pub db_path: Option<PathBuf>,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_tokens: None,
            evict_oversized: true,
            durable: false,
            db_path: None,
        }
    }
}

impl HistoryConfig {
    /// Resolved database path.
    pub fn db_path(&self) -> PathBuf {
        self.db_path
            .clone()
            .unwrap_or_else(|| config_dir().join("history.db"))
    }
}

// ============================================================================
// Rate limiting
// ============================================================================

/// One sliding-window rule: at most `max_messages` within `window_secs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateTier {
    pub window_secs: u64,
    pub max_messages: usize,
}

impl RateTier {
    pub const fn new(window_secs: u64, max_messages: usize) -> Self {
        Self {
            window_secs,
            max_messages,
        }
    }
}

/// Per-sender admission control settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Tiers checked independently. Empty means no limit.
    #[serde(default = "default_tiers")]
    pub tiers: Vec<RateTier>,

    /// Sender id that bypasses rate limiting (operator/developer).
    #[serde(default)]
    pub unrestricted_sender: Option<String>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            tiers: default_tiers(),
            unrestricted_sender: None,
        }
    }
}

fn default_tiers() -> Vec<RateTier> {
    vec![RateTier::new(60, 8), RateTier::new(300, 15)]
}

// ============================================================================
// Dispatcher
// ============================================================================

/// Dispatcher and lane settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Global cap on concurrent model calls across all conversations.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_model_calls: usize,

    /// Fallback maximum outgoing message length when the transport does not
    /// report one.
    #[serde(default = "default_max_message_len")]
    pub max_message_len: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_concurrent_model_calls: default_max_concurrent(),
            max_message_len: default_max_message_len(),
        }
    }
}

fn default_max_concurrent() -> usize {
    4
}

fn default_max_message_len() -> usize {
    2000
}

// ============================================================================
// Moderation
// ============================================================================

/// Content moderation of inbound messages and generated replies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModerationConfig {
    /// Category score above which flagged content is blocked. Unset or zero
    /// disables moderation.
    #[serde(default)]
    pub threshold: Option<f64>,

    /// Moderation model name.
    #[serde(default = "default_moderation_model")]
    pub model: String,

    /// Base URL of the moderation API. Defaults to OpenAI.
    #[serde(default)]
    pub base_url: Option<String>,

    /// API key; falls back to `provider.api_key`.
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,

    /// Preceding history items moderated together with a message.
    #[serde(default = "default_moderation_context")]
    pub context_items: usize,

    /// Sent when an inbound message is blocked; the reasons are appended.
    #[serde(default = "default_blocked_notice")]
    pub blocked_notice: String,

    /// Sent instead of a generated reply that was blocked; the reasons are
    /// appended.
    #[serde(default = "default_reply_blocked_notice")]
    pub reply_blocked_notice: String,

    /// Sent instead of the blocked notice when a self-harm category fired.
    #[serde(default = "default_support_notice")]
    pub support_notice: String,
}

impl ModerationConfig {
    pub fn enabled(&self) -> bool {
        self.threshold.is_some_and(|t| t > 0.0)
    }
}

impl Default for ModerationConfig {
    fn default() -> Self {
        Self {
            threshold: None,
            model: default_moderation_model(),
            base_url: None,
            api_key: None,
            context_items: default_moderation_context(),
            blocked_notice: default_blocked_notice(),
            reply_blocked_notice: default_reply_blocked_notice(),
            support_notice: default_support_notice(),
        }
    }
}

fn default_moderation_model() -> String {
    "text-moderation-latest".into()
}

fn default_moderation_context() -> usize {
    4
}

fn default_blocked_notice() -> String {
    "Your message has been blocked by content moderation and will be ignored.".into()
}

fn default_reply_blocked_notice() -> String {
    "The generated response to your message has been blocked by content moderation and will not be shown.".into()
}

fn default_support_notice() -> String {
    "It sounds like you might be going through something really hard. You don't have to handle it alone: \
     please reach out to someone you trust or a local crisis line. https://findahelpline.com lists free, \
     confidential services by country."
        .into()
}

// ============================================================================
// Observability
// ============================================================================

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level", alias = "level")]
    pub log_level: String,

    /// Log format (json, pretty)
    #[serde(default = "default_log_format", alias = "format")]
    pub log_format: String,

    /// Additional module targets to force to `warn`.
    #[serde(default)]
    pub excluded_targets: Vec<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
            excluded_targets: Vec::new(),
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "pretty".into()
}

fn default_true() -> bool {
    true
}

// ============================================================================
// Root
// ============================================================================

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub bot: BotConfig,

    #[serde(default)]
    pub provider: ProviderConfig,

    #[serde(default)]
    pub history: HistoryConfig,

    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    #[serde(default)]
    pub dispatcher: DispatcherConfig,

    #[serde(default)]
    pub moderation: ModerationConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Load configuration from the default path, falling back to defaults
    /// when the file does not exist.
    pub fn load() -> Result<Self> {
        let path = config_path();
        if !path.exists() {
            tracing::info!("Config file not found, using defaults");
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))
            .map_err(|e| Error::Config(format!("{e:#}")))?;

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))
            .map_err(|e| Error::Config(format!("{e:#}")))
    }

    /// Load, apply overrides from `source`, and validate.
    pub fn load_with<S: ConfigSource>(path: Option<&Path>, source: &S) -> Result<Self> {
        let mut config = match path {
            Some(p) => Self::load_from(p)?,
            None => Self::load()?,
        };
        config.apply_overrides(source)?;
        config
            .validate()
            .map_err(|e| Error::Config(e.to_string()))?;
        Ok(config)
    }

    /// Apply parameter overrides. Unparseable numeric values are configuration
    /// errors rather than being silently ignored.
    pub fn apply_overrides<S: ConfigSource>(&mut self, source: &S) -> Result<()> {
        if let Some(level) = source.get("PARLEY_LOG_LEVEL") {
            self.observability.log_level = level;
        }
        if let Some(format) = source.get("PARLEY_LOG_FORMAT") {
            self.observability.log_format = format;
        }

        if let Some(name) = source.get("PARLEY_BOT_NAME") {
            self.bot.name = name;
        }
        if let Some(id) = source.get("PARLEY_BOT_USER_ID") {
            self.bot.user_id = Some(id);
        }

        if let Some(name) = source.get("PARLEY_PROVIDER") {
            self.provider.name = name;
        }
        if let Some(model) = source.get("PARLEY_MODEL") {
            self.provider.model = model;
        }
        if let Some(url) = source.get("PARLEY_PROVIDER_URL") {
            self.provider.base_url = Some(url);
        }
        if let Some(key) = source
            .get("PARLEY_API_KEY")
            .or_else(|| source.get("OPENAI_API_KEY"))
        {
            self.provider.api_key = Some(key);
        }
        if let Some(len) = source.parse::<usize>("PARLEY_MAX_CONTEXT_LEN")? {
            self.provider.max_context_len = len;
        }

        if let Some(n) = source.parse::<usize>("PARLEY_MAX_CONCURRENT_CALLS")? {
            self.dispatcher.max_concurrent_model_calls = n;
        }

        if let Some(path) = source.get("PARLEY_HISTORY_DB") {
            self.history.db_path = Some(PathBuf::from(path));
            self.history.durable = true;
        }

        if let Some(sender) = source.get("PARLEY_UNRESTRICTED_SENDER") {
            self.rate_limit.unrestricted_sender = Some(sender);
        }

        if let Some(threshold) = source.parse::<f64>("PARLEY_MODERATION_THRESHOLD")? {
            self.moderation.threshold = Some(threshold);
        } else if let Some(threshold) = source.parse::<f64>("OPENAI_MODERATION_THRESHOLD")? {
            self.moderation.threshold = Some(threshold);
        }

        Ok(())
    }
}
