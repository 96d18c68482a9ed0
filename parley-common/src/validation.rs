//! Configuration validation for Parley.
//!
//! Provides validation logic for configuration fields to ensure
//! all required values are present and within valid ranges.

use thiserror::Error;

use crate::config::{
    BotConfig, Config, DispatcherConfig, HistoryConfig, ModerationConfig, ObservabilityConfig,
    ProviderConfig, RateLimitConfig,
};

/// Configuration validation error.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Configuration conflict: {reason}")]
    Conflict { reason: String },

    #[error("Multiple validation errors: {0:?}")]
    Multiple(Vec<ValidationError>),
}

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Trait for validatable configuration sections.
pub trait Validate {
    /// Validate this configuration section.
    fn validate(&self) -> ValidationResult<()>;
}

impl Config {
    /// Validate the entire configuration.
    pub fn validate(&self) -> ValidationResult<()> {
        let mut errors: Vec<ValidationError> = [
            self.bot.validate(),
            self.provider.validate(),
            self.history.validate(),
            self.rate_limit.validate(),
            self.dispatcher.validate(),
            self.moderation.validate(),
            self.observability.validate(),
            self.check_budget(),
        ]
        .into_iter()
        .filter_map(Result::err)
        .collect();

        if errors.is_empty() {
            Ok(())
        } else if errors.len() == 1 {
            Err(errors.remove(0))
        } else {
            Err(ValidationError::Multiple(errors))
        }
    }

    /// The reply reservation must leave room for history.
    fn check_budget(&self) -> ValidationResult<()> {
        if self.history.max_tokens.is_none()
            && self.provider.max_response_tokens >= self.provider.max_context_len
        {
            return Err(ValidationError::Conflict {
                reason: format!(
                    "provider.max_response_tokens ({}) leaves no room in provider.max_context_len ({})",
                    self.provider.max_response_tokens, self.provider.max_context_len
                ),
            });
        }
        Ok(())
    }
}

impl Validate for BotConfig {
    fn validate(&self) -> ValidationResult<()> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::MissingField {
                field: "bot.name".into(),
            });
        }
        Ok(())
    }
}

impl Validate for ProviderConfig {
    fn validate(&self) -> ValidationResult<()> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::MissingField {
                field: "provider.name".into(),
            });
        }
        if self.max_context_len == 0 {
            return Err(ValidationError::InvalidValue {
                field: "provider.max_context_len".into(),
                reason: "must be greater than 0".into(),
            });
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ValidationError::InvalidValue {
                field: "provider.temperature".into(),
                reason: format!("{} is outside 0.0..=2.0", self.temperature),
            });
        }
        if self.timeout_secs == 0 {
            return Err(ValidationError::InvalidValue {
                field: "provider.timeout_secs".into(),
                reason: "must be greater than 0".into(),
            });
        }
        if let Some(url) = &self.base_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(ValidationError::InvalidValue {
                    field: "provider.base_url".into(),
                    reason: format!("'{url}' is not an http(s) URL"),
                });
            }
        }
        Ok(())
    }
}

impl Validate for HistoryConfig {
    fn validate(&self) -> ValidationResult<()> {
        if self.max_tokens == Some(0) {
            return Err(ValidationError::InvalidValue {
                field: "history.max_tokens".into(),
                reason: "must be greater than 0".into(),
            });
        }
        Ok(())
    }
}

impl Validate for RateLimitConfig {
    fn validate(&self) -> ValidationResult<()> {
        for (i, tier) in self.tiers.iter().enumerate() {
            if tier.window_secs == 0 {
                return Err(ValidationError::InvalidValue {
                    field: format!("rate_limit.tiers[{i}].window_secs"),
                    reason: "must be greater than 0".into(),
                });
            }
            if tier.max_messages == 0 {
                return Err(ValidationError::InvalidValue {
                    field: format!("rate_limit.tiers[{i}].max_messages"),
                    reason: "must be greater than 0".into(),
                });
            }
        }
        Ok(())
    }
}

impl Validate for DispatcherConfig {
    fn validate(&self) -> ValidationResult<()> {
        if self.max_concurrent_model_calls == 0 {
            return Err(ValidationError::InvalidValue {
                field: "dispatcher.max_concurrent_model_calls".into(),
                reason: "must be greater than 0".into(),
            });
        }
        if self.max_message_len == 0 {
            return Err(ValidationError::InvalidValue {
                field: "dispatcher.max_message_len".into(),
                reason: "must be greater than 0".into(),
            });
        }
        Ok(())
    }
}

impl Validate for ModerationConfig {
    fn validate(&self) -> ValidationResult<()> {
        if let Some(threshold) = self.threshold {
            if !(0.0..=1.0).contains(&threshold) {
                return Err(ValidationError::InvalidValue {
                    field: "moderation.threshold".into(),
                    reason: format!("{threshold} is outside 0.0..=1.0"),
                });
            }
        }
        if self.enabled() && self.model.trim().is_empty() {
            return Err(ValidationError::MissingField {
                field: "moderation.model".into(),
            });
        }
        if let Some(url) = &self.base_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(ValidationError::InvalidValue {
                    field: "moderation.base_url".into(),
                    reason: format!("'{url}' is not an http(s) URL"),
                });
            }
        }
        Ok(())
    }
}

impl Validate for ObservabilityConfig {
    fn validate(&self) -> ValidationResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(ValidationError::InvalidValue {
                field: "observability.log_level".into(),
                reason: format!(
                    "'{}' is not valid, expected one of: {}",
                    self.log_level,
                    valid_levels.join(", ")
                ),
            });
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.log_format.to_lowercase().as_str()) {
            return Err(ValidationError::InvalidValue {
                field: "observability.log_format".into(),
                reason: format!(
                    "'{}' is not valid, expected one of: {}",
                    self.log_format,
                    valid_formats.join(", ")
                ),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RateTier;

    #[test]
    fn test_default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_zero_window_tier_rejected() {
        let mut config = Config::default();
        config.rate_limit.tiers = vec![RateTier::new(0, 5)];
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("rate_limit.tiers[0].window_secs"));
    }

    #[test]
    fn test_empty_tiers_allowed() {
        let mut config = Config::default();
        config.rate_limit.tiers.clear();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = Config::default();
        config.observability.log_level = "loud".into();
        assert!(matches!(
            config.validate(),
            Err(ValidationError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_multiple_errors_collected() {
        let mut config = Config::default();
        config.dispatcher.max_concurrent_model_calls = 0;
        config.bot.name = "  ".into();
        assert!(matches!(
            config.validate(),
            Err(ValidationError::Multiple(errs)) if errs.len() == 2
        ));
    }

    #[test]
    fn test_response_reservation_conflict() {
        let mut config = Config::default();
        config.provider.max_context_len = 200;
        config.provider.max_response_tokens = 250;
        assert!(matches!(
            config.validate(),
            Err(ValidationError::Conflict { .. })
        ));

        config.history.max_tokens = Some(100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_moderation_threshold_range() {
        let mut config = Config::default();
        config.moderation.threshold = Some(1.5);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("moderation.threshold"));

        config.moderation.threshold = Some(0.0);
        assert!(config.validate().is_ok());
    }
}
