//! Parley Channels - Transports and dispatch for the Parley relay.
//!
//! This crate provides:
//! - Inbound/outbound message types and the [`Transport`] trait
//! - A CLI transport for local use
//! - Per-sender rate limiting
//! - Per-conversation processing lanes
//! - The [`Dispatcher`] tying transports, history, moderation and model
//!   providers together
//!
//! ## Architecture
//!
//! ```text
//! Transport::listen → Dispatcher → RateLimiter
//!                         ↓
//!               ConversationQueue lane → HistoryStore → ModelProvider
//!                         ↓
//! Transport::send  ←── ResponseWorker
//! ```

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod cli;
pub mod dispatcher;
pub mod message;
pub mod queue;
pub mod rate_limiter;
pub mod traits;

pub use cli::CliTransport;
pub use dispatcher::{rewrite_mentions, DispatchOutcome, Dispatcher, ResponseWorker};
pub use message::{InboundMessage, Mention, OutgoingMessage};
pub use queue::{ConversationQueue, LaneProcessor, LaneState, WorkItem, WorkKind};
pub use rate_limiter::RateLimiter;
pub use traits::{ChannelError, ChannelResult, Transport};

use parley_agent::{
    history_budget, ModelProvider, Moderator, OpenAiModerator, PromptBuilder, ProviderRegistry, ProviderTokenCounter,
};
use parley_common::config::Config;
use parley_memory::{HistoryStore, SqliteHistory};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// How long shutdown waits for queued work before cancelling it.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Resolve the configured model provider and warm it up.
pub async fn build_provider(config: &Config) -> parley_common::Result<Arc<dyn ModelProvider>> {
    let registry = ProviderRegistry::with_builtin();
    let prompt = PromptBuilder::new(&config.bot.name, config.provider.system_prompt.as_deref());
    let provider = registry.create(&config.provider, &prompt)?;

    if let Err(e) = provider.warmup().await {
        tracing::warn!(provider = provider.name(), error = %e, "Provider warmup failed");
    }
    Ok(provider)
}

/// Build the history store for `provider`, with durable storage when enabled.
pub async fn build_history(
    config: &Config,
    provider: Arc<dyn ModelProvider>,
) -> parley_common::Result<Arc<HistoryStore>> {
    let max_tokens = match config.history.max_tokens {
        Some(explicit) => explicit,
        None => history_budget(provider.as_ref(), &config.provider).await?,
    };

    let mut store = HistoryStore::new(Arc::new(ProviderTokenCounter::new(provider)), max_tokens)
        .with_evict_oversized(config.history.evict_oversized);

    if config.history.durable {
        let path = config.history.db_path();
        store = store.with_backend(Arc::new(SqliteHistory::new(&path)?));
        tracing::info!(path = %path.display(), "Durable history enabled");
    }

    tracing::info!(max_tokens, "History token budget");
    Ok(Arc::new(store))
}

/// Content moderator, when a moderation threshold is configured.
pub fn build_moderator(config: &Config) -> parley_common::Result<Option<Arc<dyn Moderator>>> {
    if !config.moderation.enabled() {
        return Ok(None);
    }
    let moderator = OpenAiModerator::new(&config.moderation, &config.provider)?;
    tracing::info!(
        model = %config.moderation.model,
        threshold = ?config.moderation.threshold,
        "Content moderation enabled"
    );
    Ok(Some(Arc::new(moderator) as Arc<dyn Moderator>))
}

/// Run the relay on the CLI transport until stdin closes or Ctrl-C.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let provider = build_provider(&config).await?;
    let history = build_history(&config, provider.clone()).await?;

    let transport: Arc<dyn Transport> = Arc::new(CliTransport::new(config.bot.name.clone()));
    let moderator = build_moderator(&config)?;
    let dispatcher = Arc::new(Dispatcher::with_moderator(
        &config,
        history,
        provider.clone(),
        transport.clone(),
        moderator,
    )?);

    tracing::info!(
        transport = transport.name(),
        provider = provider.name(),
        model = provider.model_name(),
        "Parley relay started"
    );

    let (tx, rx) = mpsc::channel(64);
    let dispatch_handle = dispatcher.clone().spawn(rx);

    let listener = {
        let transport = transport.clone();
        tokio::spawn(async move { transport.listen(tx).await })
    };

    tokio::select! {
        result = listener => {
            match result {
                Ok(Ok(())) => tracing::info!("Transport closed"),
                Ok(Err(e)) => tracing::error!(error = %e, "Transport failed"),
                Err(e) => tracing::error!(error = %e, "Transport task panicked"),
            }
            // The listener dropped its sender; let the dispatcher drain.
            if let Err(e) = dispatch_handle.await {
                tracing::error!(error = %e, "Dispatcher task failed");
            }
            if !dispatcher.wait_idle(DRAIN_TIMEOUT).await {
                tracing::warn!("Timed out waiting for queued messages");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted, shutting down");
            dispatch_handle.abort();
        }
    }

    dispatcher.shutdown().await;
    tracing::info!("Parley relay stopped");
    Ok(())
}
