//! Parley Common - Shared types, utilities, and configuration for the Parley relay.
//!
//! This crate provides:
//! - Configuration types, loading, and environment overrides
//! - Configuration validation
//! - Error types and handling utilities
//! - Logging setup
//! - Text utilities used across Parley crates

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod config;
pub mod error;
pub mod logging;
pub mod source;
pub mod util;
pub mod validation;

pub use config::{
    BotConfig, Config, DispatcherConfig, HistoryConfig, ModerationConfig, ObservabilityConfig,
    ProviderConfig, RateLimitConfig, RateTier,
};
pub use error::{Error, Result, ResultExt};
pub use source::{ConfigSource, EnvSource, MapSource};
pub use validation::{Validate, ValidationError, ValidationResult};

/// Re-export commonly used types for convenience
pub mod prelude {
    pub use crate::config::{Config, ProviderConfig, RateTier};
    pub use crate::error::{Error, Result, ResultExt};
    pub use crate::logging::init_logging;
    pub use crate::source::ConfigSource;
}
