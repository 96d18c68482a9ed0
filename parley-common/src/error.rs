//! Error types for the Parley relay.

use thiserror::Error;

/// Result type alias using the Parley error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for Parley components.
#[derive(Error, Debug)]
pub enum Error {
    /// Missing or invalid configuration. Fatal at startup.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A history item with this message id already exists in the conversation.
    #[error("Duplicate history item {message_id} in conversation {conversation_id}")]
    DuplicateItem {
        conversation_id: String,
        message_id: String,
    },

    /// Model backend unreachable, timed out, or returned a bad response.
    #[error("Provider error: {0}")]
    Provider(String),

    /// Durable history backend failure. The in-memory view stays authoritative.
    #[error("Store error: {0}")]
    Store(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Channel send error (queue or lane closed)
    #[error("Channel send error")]
    ChannelSend,

    /// Timeout error
    #[error("Operation timed out")]
    Timeout,

    /// Other error with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Create an error with additional context.
    pub fn with_context(self, context: impl Into<String>) -> Self {
        Self::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Strip any context wrappers and return the underlying error.
    pub fn root(&self) -> &Error {
        match self {
            Self::WithContext { source, .. } => source.root(),
            other => other,
        }
    }

    /// Check if this is a configuration error.
    pub fn is_config(&self) -> bool {
        matches!(self.root(), Self::Config(_))
    }

    /// Check if this is a duplicate history item error.
    pub fn is_duplicate(&self) -> bool {
        matches!(self.root(), Self::DuplicateItem { .. })
    }

    /// Check if this error is a transient backend failure that should not
    /// affect user-facing behaviour.
    pub fn is_transient(&self) -> bool {
        matches!(self.root(), Self::Store(_) | Self::Timeout | Self::Io(_))
    }
}

/// Extension trait for adding context to any error type.
pub trait ResultExt<T> {
    /// Add context to an error.
    fn context(self, context: impl Into<String>) -> Result<T>;
}

impl<T, E: Into<Error>> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.into().with_context(context))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_item_message() {
        let err = Error::DuplicateItem {
            conversation_id: "chan-1".into(),
            message_id: "42".into(),
        };
        assert_eq!(
            err.to_string(),
            "Duplicate history item 42 in conversation chan-1"
        );
        assert!(err.is_duplicate());
        assert!(!err.is_transient());
    }

    #[test]
    fn test_error_with_context() {
        let err = Error::Store("disk full".into());
        let with_ctx = err.with_context("persisting history");
        assert!(matches!(with_ctx, Error::WithContext { .. }));
        assert!(with_ctx.is_transient());
        assert_eq!(with_ctx.to_string(), "persisting history: Store error: disk full");
    }

    #[test]
    fn test_config_error_classification() {
        let err = Error::Config("missing provider".into()).with_context("startup");
        assert!(err.is_config());
        assert!(!err.is_duplicate());
    }

    #[test]
    fn test_result_ext_context() {
        let res: std::result::Result<(), std::io::Error> = Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "gone",
        ));
        let err = res.context("reading config").unwrap_err();
        assert!(err.to_string().starts_with("reading config"));
        assert!(err.is_transient());
    }
}
