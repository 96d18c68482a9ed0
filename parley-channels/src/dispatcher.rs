//! Inbound message dispatch.
//!
//! The dispatcher decides what happens to each inbound message: bots are
//! ignored, mentions are rewritten, the sender's rate limit is checked, and
//! the message is queued on its conversation lane either to be answered or
//! only remembered. The [`ResponseWorker`] running on the lanes produces and
//! sends replies, passing messages and replies through the optional
//! [`Moderator`] first.

use crate::message::{InboundMessage, Mention, OutgoingMessage};
use crate::queue::{ConversationQueue, LaneProcessor, WorkItem, WorkKind};
use crate::rate_limiter::RateLimiter;
use crate::traits::Transport;
use async_trait::async_trait;
use parley_agent::{ModelProvider, Moderator, Verdict};
use parley_common::util::{sanitize_for_log, split_message, truncate_with_ellipsis};
use parley_common::{BotConfig, Config, Error, ModerationConfig, Result};
use parley_memory::{HistoryItem, HistoryStore};
use regex::Regex;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// What [`Dispatcher::handle_inbound`] did with a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Sent by a bot or by the relay itself.
    IgnoredBot,
    /// Sender is over a rate-limit tier; a notice was sent.
    RateLimited,
    /// Queued for history only.
    Remembered,
    /// Queued for a response.
    Enqueued,
    /// The queue is shut down.
    Rejected,
}

// ============================================================================
// Dispatcher
// ============================================================================

pub struct Dispatcher {
    bot: BotConfig,
    name_pattern: Option<Regex>,
    limiter: RateLimiter,
    queue: ConversationQueue,
    transport: Arc<dyn Transport>,
}

impl Dispatcher {
    pub fn new(
        config: &Config,
        history: Arc<HistoryStore>,
        provider: Arc<dyn ModelProvider>,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        Self::with_moderator(config, history, provider, transport, None)
    }

    /// Like [`new`](Self::new), screening messages and replies with
    /// `moderator` when one is given.
    pub fn with_moderator(
        config: &Config,
        history: Arc<HistoryStore>,
        provider: Arc<dyn ModelProvider>,
        transport: Arc<dyn Transport>,
        moderator: Option<Arc<dyn Moderator>>,
    ) -> Result<Self> {
        let limiter = RateLimiter::new(&config.rate_limit)?;

        let name_pattern = if config.bot.respond_to_name {
            name_pattern(&config.bot.name)?
        } else {
            None
        };

        let max_message_len = transport
            .max_message_len()
            .unwrap_or(config.dispatcher.max_message_len);

        let worker = Arc::new(ResponseWorker {
            bot_name: config.bot.name.clone(),
            failure_notice: config.bot.failure_notice.clone(),
            max_message_len,
            history,
            provider,
            transport: transport.clone(),
            moderator,
            moderation: config.moderation.clone(),
        });

        Ok(Self {
            bot: config.bot.clone(),
            name_pattern,
            limiter,
            queue: ConversationQueue::new(worker, config.dispatcher.max_concurrent_model_calls),
            transport,
        })
    }

    /// Route one inbound message.
    pub async fn handle_inbound(&self, mut message: InboundMessage) -> DispatchOutcome {
        if message.is_bot || self.bot.user_id.as_deref() == Some(message.sender_id.as_str()) {
            tracing::debug!(
                conversation_id = %message.conversation_id,
                sender_id = %message.sender_id,
                "Ignoring message from bot"
            );
            return DispatchOutcome::IgnoredBot;
        }

        message.text = rewrite_mentions(&message.text, &message.mentions);

        if self.limiter.check_and_record(&message.sender_id) {
            tracing::info!(
                conversation_id = %message.conversation_id,
                sender_id = %message.sender_id,
                message_id = %message.message_id,
                "Rate limited message"
            );
            let notice = OutgoingMessage::new(message.conversation_id.clone(), self.bot.rate_limit_notice.clone())
                .replying_to(message.message_id.clone());
            if let Err(e) = self.transport.send(notice).await {
                tracing::warn!(error = %e, "Failed to send rate limit notice");
            }
            return DispatchOutcome::RateLimited;
        }

        let kind = if self.is_directed(&message) {
            WorkKind::Respond
        } else {
            WorkKind::Remember
        };

        tracing::debug!(
            conversation_id = %message.conversation_id,
            message_id = %message.message_id,
            ?kind,
            "Queueing message"
        );

        match self.queue.enqueue(WorkItem::new(message, kind)) {
            Ok(()) if kind.needs_model() => DispatchOutcome::Enqueued,
            Ok(()) => DispatchOutcome::Remembered,
            Err(e) => {
                tracing::warn!(error = %e, "Queue rejected message");
                DispatchOutcome::Rejected
            }
        }
    }

    /// Whether the bot should answer this message.
    fn is_directed(&self, message: &InboundMessage) -> bool {
        if message.is_direct {
            return true;
        }
        if let Some(user_id) = &self.bot.user_id {
            if message.mentions_user(user_id) {
                return true;
            }
        }
        self.name_pattern
            .as_ref()
            .is_some_and(|re| re.is_match(&message.text))
    }

    /// Drain `rx` until every sender is dropped.
    pub fn spawn(self: Arc<Self>, mut rx: mpsc::Receiver<InboundMessage>) -> JoinHandle<()> {
        tokio::spawn(async move {
            tracing::info!("Dispatcher started");

            while let Some(message) = rx.recv().await {
                self.handle_inbound(message).await;
            }

            tracing::info!("Dispatcher stopped");
        })
    }

    pub fn lane_count(&self) -> usize {
        self.queue.lane_count()
    }

    /// Wait for queued work to finish. Returns `false` on timeout.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        self.queue.wait_idle(timeout).await
    }

    /// Stop all lanes and the transport.
    pub async fn shutdown(&self) {
        self.queue.shutdown();
        if let Err(e) = self.transport.shutdown().await {
            tracing::warn!(transport = self.transport.name(), error = %e, "Transport shutdown failed");
        }
    }
}

// ============================================================================
// Response worker
// ============================================================================

/// Lane processor that remembers messages and answers directed ones.
pub struct ResponseWorker {
    bot_name: String,
    failure_notice: String,
    max_message_len: usize,
    history: Arc<HistoryStore>,
    provider: Arc<dyn ModelProvider>,
    transport: Arc<dyn Transport>,
    moderator: Option<Arc<dyn Moderator>>,
    moderation: ModerationConfig,
}

impl ResponseWorker {
    /// Moderate `text` against the conversation so far. Moderation failures
    /// are errors, so nothing unchecked is remembered or shown.
    async fn moderate(&self, context: &[HistoryItem], text: &str) -> Result<Verdict> {
        match &self.moderator {
            Some(moderator) => moderator.check(context, text).await,
            None => Ok(Verdict::Allowed),
        }
    }

    async fn moderate_inbound(&self, message: &InboundMessage) -> Result<Verdict> {
        if self.moderator.is_none() {
            return Ok(Verdict::Allowed);
        }
        let context = self.history.get_history(&message.conversation_id).await;
        self.moderate(&context, &message.text).await
    }

    async fn send_notice(&self, message: &InboundMessage, text: String) -> Result<()> {
        let notice = OutgoingMessage::new(message.conversation_id.clone(), text).replying_to(message.message_id.clone());
        self.transport.send(notice).await?;
        Ok(())
    }

    async fn remember(&self, message: &InboundMessage) -> Result<()> {
        let verdict = self.moderate_inbound(message).await?;
        if verdict.is_blocked() {
            tracing::warn!(
                conversation_id = %message.conversation_id,
                message_id = %message.message_id,
                reasons = ?verdict.reasons(),
                "Not remembering moderated message"
            );
            return Ok(());
        }

        match self
            .history
            .append(&message.conversation_id, message.to_history_item())
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if e.is_duplicate() => {
                tracing::info!(error = %e, "Skipping duplicate message");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn respond(&self, message: &InboundMessage) -> Result<()> {
        let conversation_id = message.conversation_id.as_str();

        let verdict = self.moderate_inbound(message).await?;
        if verdict.is_blocked() {
            tracing::warn!(
                conversation_id,
                message_id = %message.message_id,
                reasons = ?verdict.reasons(),
                "Message blocked by moderation"
            );
            let notice = if verdict.concerns_self_harm() {
                self.moderation.support_notice.clone()
            } else {
                format!("{} Reason: {}", self.moderation.blocked_notice, verdict.reasons().join(", "))
            };
            return self.send_notice(message, notice).await;
        }

        let user_item = message.to_history_item();

        self.history.append(conversation_id, user_item.clone()).await?;

        let mut history = self.history.get_history(conversation_id).await;
        // An oversized message may already have been trimmed away.
        if history.last().map(|i| &i.message_id) != Some(&user_item.message_id) {
            history.push(user_item.clone());
        }

        let reply = self.provider.generate(&history, &user_item).await?;
        let reply = reply.trim();
        if reply.is_empty() {
            return Err(Error::Provider("model returned an empty reply".into()));
        }

        let verdict = self.moderate(&history, reply).await?;
        if verdict.is_blocked() {
            tracing::warn!(
                conversation_id,
                message_id = %message.message_id,
                reasons = ?verdict.reasons(),
                "Reply blocked by moderation"
            );
            let notice = format!(
                "{} Reason: {}",
                self.moderation.reply_blocked_notice,
                verdict.reasons().join(", ")
            );
            return self.send_notice(message, notice).await;
        }

        // Once the first chunk is out the reply counts as sent; later chunk
        // failures are logged and the reply is still remembered.
        let mut chunks = split_message(reply, self.max_message_len).into_iter();
        let Some(first) = chunks.next() else {
            return Err(Error::Provider("model returned an empty reply".into()));
        };
        let first_id = self
            .transport
            .send(OutgoingMessage::new(conversation_id, first).replying_to(message.message_id.clone()))
            .await?;

        for (i, chunk) in chunks.enumerate() {
            if let Err(e) = self.transport.send(OutgoingMessage::new(conversation_id, chunk)).await {
                tracing::warn!(
                    conversation_id,
                    message_id = %message.message_id,
                    chunk = i + 1,
                    error = %e,
                    "Failed to send reply chunk, dropping the rest"
                );
                break;
            }
        }

        let bot_item = HistoryItem::new(conversation_id, first_id, self.bot_name.clone(), reply);
        if let Err(e) = self.history.append(conversation_id, bot_item).await {
            tracing::warn!(conversation_id, error = %e, "Failed to remember reply");
        }

        tracing::info!(
            conversation_id,
            message_id = %message.message_id,
            provider = self.provider.name(),
            reply = %truncate_with_ellipsis(&sanitize_for_log(reply), 80),
            "Sent reply"
        );
        Ok(())
    }
}

#[async_trait]
impl LaneProcessor for ResponseWorker {
    async fn process(&self, item: WorkItem) -> Result<()> {
        let message = &item.message;
        match item.kind {
            WorkKind::Remember => self.remember(message).await,
            WorkKind::Respond => {
                match self.respond(message).await {
                    Ok(()) => {}
                    Err(e) if e.is_duplicate() => {
                        tracing::info!(error = %e, "Skipping duplicate message");
                    }
                    Err(e) => {
                        tracing::error!(
                            conversation_id = %message.conversation_id,
                            message_id = %message.message_id,
                            provider = self.provider.name(),
                            error = %e,
                            "Failed to respond"
                        );
                        if let Err(e) = self.send_notice(message, self.failure_notice.clone()).await {
                            tracing::warn!(error = %e, "Failed to send failure notice");
                        }
                    }
                }
                Ok(())
            }
        }
    }
}

// ============================================================================
// Text helpers
// ============================================================================

fn mention_token() -> Option<&'static Regex> {
    static TOKEN: OnceLock<Option<Regex>> = OnceLock::new();
    TOKEN
        .get_or_init(|| Regex::new(r"<@!?([^>\s]+)>").ok())
        .as_ref()
}

/// Replace `<@id>` and `<@!id>` tokens with `@display_name`.
///
/// Tokens for users not in `mentions` are left as they are.
pub fn rewrite_mentions(text: &str, mentions: &[Mention]) -> String {
    let Some(token) = mention_token() else {
        tracing::warn!("Mention pattern unavailable, leaving text unchanged");
        return text.to_string();
    };

    token
        .replace_all(text, |caps: &regex::Captures<'_>| {
            let id = &caps[1];
            match mentions.iter().find(|m| m.user_id == id) {
                Some(m) => format!("@{}", m.display_name),
                None => {
                    tracing::debug!(user_id = id, "Unknown mention");
                    caps[0].to_string()
                }
            }
        })
        .into_owned()
}

/// Case-insensitive whole-word pattern for the bot's name. `None` for an empty
/// name.
fn name_pattern(name: &str) -> Result<Option<Regex>> {
    let name = name.trim();
    if name.is_empty() {
        return Ok(None);
    }
    Regex::new(&format!(r"(?i)(^|[^\w]){}($|[^\w])", regex::escape(name)))
        .map(Some)
        .map_err(|e| Error::Config(format!("invalid bot name pattern: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewrites_known_mentions() {
        let mentions = vec![Mention::new("42", "alice"), Mention::new("7", "parley")];
        assert_eq!(
            rewrite_mentions("hey <@7>, ask <@!42> about <@99>", &mentions),
            "hey @parley, ask @alice about <@99>"
        );
        assert_eq!(rewrite_mentions("no mentions here", &mentions), "no mentions here");
    }

    #[test]
    fn name_matches_whole_words_only() {
        let re = name_pattern("Parley").unwrap().unwrap();
        assert!(re.is_match("parley, you there?"));
        assert!(re.is_match("hi @Parley"));
        assert!(re.is_match("ask PARLEY"));
        assert!(!re.is_match("parleying is fun"));
        assert!(!re.is_match("nothing to see"));
    }

    #[test]
    fn name_with_regex_characters_is_escaped() {
        let re = name_pattern("bot.v2").unwrap().unwrap();
        assert!(re.is_match("hello bot.v2!"));
        assert!(!re.is_match("hello botxv2"));
        assert!(name_pattern("  ").unwrap().is_none());
    }
}
