//! Prompt rendering and token budgeting.
//!
//! Completion backends get a single instruction-style prompt:
//!
//! ```text
//! ### Instruction:
//! <character and rules> <reply instruction> <message id>
//! <messageID=1> alice: hi
//! <messageID=2> bob: hey parley
//! ### Response:
//! <messageID=TBD> parley:
//! ```
//!
//! Chat backends get a system message followed by one message per item.

use crate::provider::ModelProvider;
use parley_common::{Error, ProviderConfig, Result};
use parley_memory::HistoryItem;
use serde::Serialize;

pub const RESPONSE_PRIMER: &str = "### Response:\n";

const INSTRUCTION_HEADER: &str = "### Instruction:\n";

/// One chat-completion message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".into(),
            name: None,
            content: content.into(),
        }
    }
}

/// Renders conversation history into prompts for a given bot identity.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    bot_name: String,
    character: String,
}

impl PromptBuilder {
    /// `system_prompt` replaces the default character description.
    pub fn new(bot_name: impl Into<String>, system_prompt: Option<&str>) -> Self {
        let bot_name = bot_name.into();
        let character = system_prompt
            .map(str::to_string)
            .unwrap_or_else(|| default_character(&bot_name));
        Self {
            bot_name,
            character,
        }
    }

    pub fn bot_name(&self) -> &str {
        &self.bot_name
    }

    /// Whether an item was spoken by the bot itself.
    pub fn is_bot(&self, item: &HistoryItem) -> bool {
        item.speaker_name == self.bot_name
    }

    /// Character description plus the rules for staying in character.
    pub fn system_message(&self) -> String {
        format!(
            "{character}\nContinue the chat dialogue below by writing only a single reply in character as {bot}. \
             Do not write messages for other users. Do not tag users with the @ symbol. \
             Do not write narration or anything other than dialogue from {bot}.",
            character = self.character,
            bot = self.bot_name,
        )
    }

    /// Sentence telling the model which message it is answering.
    pub fn reply_instruction(&self, reply_id: &str) -> String {
        format!(
            " Do not mention message ID numbers or say that you are replying, but keep in mind that {} is replying to messageID: {}",
            self.bot_name, reply_id
        )
    }

    /// One history line of a completion prompt.
    pub fn format_line(item: &HistoryItem) -> String {
        format!(
            "<messageID={}> {}: {}\n",
            item.message_id, item.speaker_name, item.content
        )
    }

    /// Trailing line the model continues from.
    pub fn response_tail(&self) -> String {
        format!("{RESPONSE_PRIMER}<messageID=TBD> {}:", self.bot_name)
    }

    /// Full completion prompt for `history`, optionally replying to `reply_to`.
    pub fn completion_prompt(&self, history: &[HistoryItem], reply_to: Option<&str>) -> String {
        let mut prompt = String::from(INSTRUCTION_HEADER);
        prompt.push_str(&self.system_message());
        if let Some(id) = reply_to {
            prompt.push_str(&self.reply_instruction(id));
        }
        prompt.push('\n');
        for item in history {
            prompt.push_str(&Self::format_line(item));
        }
        prompt.push_str(&self.response_tail());
        prompt
    }

    /// Fixed text of a completion prompt, excluding history lines.
    pub fn completion_overhead_parts(&self) -> Vec<String> {
        vec![
            format!("{INSTRUCTION_HEADER}{}", self.system_message()),
            self.reply_instruction("0000000000000000000"),
            self.response_tail(),
        ]
    }

    /// Chat message for one history item. The bot's own lines become
    /// assistant turns; everyone else is a named user.
    pub fn chat_message(&self, item: &HistoryItem) -> ChatMessage {
        if self.is_bot(item) {
            ChatMessage {
                role: "assistant".into(),
                name: None,
                content: item.content.clone(),
            }
        } else {
            ChatMessage {
                role: "user".into(),
                name: chat_name(&item.speaker_name),
                content: item.content.clone(),
            }
        }
    }

    /// System message followed by the rendered history.
    pub fn chat_messages(&self, history: &[HistoryItem]) -> Vec<ChatMessage> {
        std::iter::once(ChatMessage::system(self.system_message()))
            .chain(history.iter().map(|item| self.chat_message(item)))
            .collect()
    }
}

fn default_character(bot_name: &str) -> String {
    format!(
        "[character info]: {bot_name} is a regular in this chat: laid back and friendly, \
         opinionated when it matters, honest with friends and quick with a joke."
    )
}

/// Chat APIs restrict `name` to `[a-zA-Z0-9_-]{1,64}`.
fn chat_name(display_name: &str) -> Option<String> {
    let name: String = display_name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .take(64)
        .collect();
    if name.trim_matches('_').is_empty() {
        None
    } else {
        Some(name)
    }
}

/// Token budget left for history once the response reservation and the
/// fixed prompt parts are taken out of the context window.
pub async fn history_budget(provider: &dyn ModelProvider, config: &ProviderConfig) -> Result<usize> {
    let overhead = provider.prompt_overhead().await?;
    let reserved = config.max_response_tokens + overhead;

    match config.max_context_len.checked_sub(reserved) {
        Some(budget) if budget > 0 => {
            tracing::info!(
                provider = provider.name(),
                max_context_len = config.max_context_len,
                max_response_tokens = config.max_response_tokens,
                prompt_overhead = overhead,
                budget,
                "Computed history token budget"
            );
            Ok(budget)
        }
        _ => Err(Error::Config(format!(
            "max_context_len {} leaves no room for history after reserving {} tokens",
            config.max_context_len, reserved
        ))),
    }
}
