//! Built-in model providers.

pub mod echo;
pub mod instruct;
pub mod openai;
pub mod vllm;

pub use echo::EchoProvider;
pub use instruct::OpenAiInstructProvider;
pub use openai::OpenAiProvider;
pub use vllm::VllmProvider;

use parley_common::util::{sanitize_for_log, truncate_with_ellipsis};
use parley_common::{Error, ProviderConfig};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use std::time::Duration;

const MAX_API_ERROR_CHARS: usize = 200;

/// Sanitize API error text by scrubbing secrets and truncating length.
pub fn sanitize_api_error(input: &str) -> String {
    truncate_with_ellipsis(&sanitize_for_log(input), MAX_API_ERROR_CHARS)
}

/// Build a sanitized provider error from a failed HTTP response.
pub async fn api_error(provider: &str, response: reqwest::Response) -> Error {
    let status = response.status();
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<failed to read provider error body>".to_string());
    Error::Provider(format!(
        "{provider} API error ({status}): {}",
        sanitize_api_error(&body)
    ))
}

/// Map a transport failure to a provider error.
pub(crate) fn request_error(provider: &str, e: reqwest::Error) -> Error {
    if e.is_timeout() {
        return Error::Timeout;
    }
    Error::Provider(format!(
        "{provider} request failed: {}",
        sanitize_api_error(&e.to_string())
    ))
}

/// HTTP client with JSON content type, optional bearer auth and the
/// configured timeout.
pub(crate) fn http_client(config: &ProviderConfig) -> parley_common::Result<reqwest::Client> {
    authorized_client(config.api_key.as_deref(), config.timeout_secs)
}

pub(crate) fn authorized_client(api_key: Option<&str>, timeout_secs: u64) -> parley_common::Result<reqwest::Client> {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    if let Some(key) = api_key.filter(|k| !k.is_empty()) {
        let value = HeaderValue::from_str(&format!("Bearer {key}"))
            .map_err(|_| Error::Config("api_key contains invalid characters".into()))?;
        headers.insert(AUTHORIZATION, value);
    }

    reqwest::Client::builder()
        .default_headers(headers)
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))
}

/// Strip a trailing slash so paths can be appended with `/`.
pub(crate) fn normalize_base_url(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_api_error_redacts_and_truncates() {
        let body = format!("bad key sk-{} {}", "a".repeat(30), "x".repeat(400));
        let out = sanitize_api_error(&body);
        assert!(!out.contains(&"a".repeat(30)));
        assert!(out.ends_with("..."));
        assert!(out.chars().count() <= MAX_API_ERROR_CHARS + 3);
    }

    #[test]
    fn http_client_rejects_bad_key() {
        let config = ProviderConfig {
            api_key: Some("bad\nkey".into()),
            ..Default::default()
        };
        assert!(http_client(&config).unwrap_err().is_config());
    }

    #[test]
    fn base_url_normalized() {
        assert_eq!(normalize_base_url("http://h:8000/"), "http://h:8000");
    }
}
