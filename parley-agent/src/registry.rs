//! Provider selection by configuration key.

use crate::prompt::PromptBuilder;
use crate::provider::ModelProvider;
use crate::providers::{EchoProvider, OpenAiInstructProvider, OpenAiProvider, VllmProvider};
use parley_common::{Error, ProviderConfig, Result};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Builds a provider from configuration and the shared prompt builder.
pub type ProviderFactory =
    Arc<dyn Fn(&ProviderConfig, &PromptBuilder) -> Result<Arc<dyn ModelProvider>> + Send + Sync>;

/// Name → factory map, resolved once at startup.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    factories: BTreeMap<String, ProviderFactory>,
}

impl ProviderRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with `echo`, `openai`, `openai-instruct` and `vllm` registered.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register("echo", |config, prompt| {
            Ok(Arc::new(EchoProvider::new(config.model.clone(), prompt.clone())) as Arc<dyn ModelProvider>)
        });
        registry.register("openai", |config, prompt| {
            Ok(Arc::new(OpenAiProvider::new(config, prompt.clone())?) as Arc<dyn ModelProvider>)
        });
        registry.register("openai-instruct", |config, prompt| {
            Ok(Arc::new(OpenAiInstructProvider::new(config, prompt.clone())?) as Arc<dyn ModelProvider>)
        });
        registry.register("vllm", |config, prompt| {
            Ok(Arc::new(VllmProvider::new(config, prompt.clone())?) as Arc<dyn ModelProvider>)
        });
        registry
    }

    /// Register (or replace) a factory under `name`.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(&ProviderConfig, &PromptBuilder) -> Result<Arc<dyn ModelProvider>> + Send + Sync + 'static,
    {
        self.factories.insert(name.into().to_lowercase(), Arc::new(factory));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(&name.to_lowercase())
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    /// Build the provider named by `config.name`.
    pub fn create(&self, config: &ProviderConfig, prompt: &PromptBuilder) -> Result<Arc<dyn ModelProvider>> {
        let key = config.name.to_lowercase();
        let factory = self.factories.get(&key).ok_or_else(|| {
            Error::Config(format!(
                "Unknown provider: {}. Available: {}",
                config.name,
                self.names().join(", ")
            ))
        })?;

        let provider = factory(config, prompt)?;
        tracing::info!(
            provider = provider.name(),
            model = provider.model_name(),
            "Model provider created"
        );
        Ok(provider)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(name: &str) -> ProviderConfig {
        ProviderConfig {
            name: name.into(),
            ..Default::default()
        }
    }

    #[test]
    fn builtin_names() {
        let registry = ProviderRegistry::with_builtin();
        assert_eq!(registry.names(), vec!["echo", "openai", "openai-instruct", "vllm"]);
        assert!(registry.contains("OpenAI"));
    }

    #[test]
    fn creates_echo() {
        let registry = ProviderRegistry::with_builtin();
        let provider = registry
            .create(&config("Echo"), &PromptBuilder::new("parley", None))
            .unwrap();
        assert_eq!(provider.name(), "echo");
    }

    #[test]
    fn unknown_provider_is_config_error() {
        let registry = ProviderRegistry::with_builtin();
        let err = registry
            .create(&config("ooba"), &PromptBuilder::new("parley", None))
            .err()
            .unwrap();
        assert!(err.is_config());
        assert!(err.to_string().contains("ooba"));
    }

    #[test]
    fn custom_factory_overrides_builtin() {
        let mut registry = ProviderRegistry::with_builtin();
        registry.register("vllm", |_, prompt| {
            Ok(Arc::new(EchoProvider::new("stub", prompt.clone())) as Arc<dyn ModelProvider>)
        });
        let provider = registry
            .create(&config("vllm"), &PromptBuilder::new("parley", None))
            .unwrap();
        assert_eq!(provider.model_name(), "stub");
    }
}
