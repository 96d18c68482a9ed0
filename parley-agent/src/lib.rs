//! Parley Agent - Language-model backends for the Parley relay.
//!
//! This crate provides:
//! - The [`ModelProvider`] trait every backend implements
//! - Prompt rendering shared by completion and chat backends
//! - Server-sent-event accumulation for streaming backends
//! - A [`ProviderRegistry`] mapping configuration keys to factories
//! - Built-in providers: `echo`, `openai`, `openai-instruct`, `vllm`
//! - Content moderation through the [`Moderator`] trait

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod moderation;
pub mod prompt;
pub mod provider;
pub mod providers;
pub mod registry;
pub mod stream;

pub use moderation::{Moderator, OpenAiModerator, Verdict};
pub use prompt::{history_budget, ChatMessage, PromptBuilder};
pub use provider::{ModelProvider, ProviderTokenCounter};
pub use providers::{EchoProvider, OpenAiInstructProvider, OpenAiProvider, VllmProvider};
pub use registry::{ProviderFactory, ProviderRegistry};
