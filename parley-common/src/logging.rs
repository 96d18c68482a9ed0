//! Logging setup for the Parley relay.
//!
//! Library crates only emit `tracing` events; the binary installs the
//! subscriber once at startup through [`init_logging`]. Events go to stderr;
//! stdout belongs to the CLI transport.
//!
//! # Noise Filtering
//!
//! HTTP and TLS internals pulled in by the model providers (hyper, reqwest,
//! h2, rustls) are set to `warn` so per-message relay logs stay readable.
//! `RUST_LOG` overrides everything.

use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Library modules forced to `warn`.
pub const NOISY_MODULES: &[&str] = &["hyper", "hyper_util", "reqwest", "h2", "rustls", "tokio_util"];

/// Build the filter directive string for a base level plus exclusions.
fn directives(log_level: &str, excluded_targets: &[String]) -> String {
    let mut directives = log_level.to_lowercase();
    for module in NOISY_MODULES
        .iter()
        .copied()
        .chain(excluded_targets.iter().map(String::as_str))
    {
        directives.push_str(&format!(",{module}=warn"));
    }
    directives
}

fn build_filter(log_level: &str, excluded_targets: &[String]) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(directives(log_level, excluded_targets)))
}

/// Initialize logging.
///
/// * `log_level` - Base log level (trace, debug, info, warn, error)
/// * `log_format` - "json" for structured JSON, anything else for human-readable
///
/// Calling this more than once is harmless; later calls are ignored.
pub fn init_logging(log_level: &str, log_format: &str) {
    init_logging_with_exclusions(log_level, log_format, &[]);
}

/// Like [`init_logging`], with additional targets forced to `warn`.
pub fn init_logging_with_exclusions(log_level: &str, log_format: &str, excluded_targets: &[String]) {
    let subscriber = tracing_subscriber::registry().with(build_filter(log_level, excluded_targets));

    if log_format.eq_ignore_ascii_case("json") {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_span_events(FmtSpan::CLOSE)
            .with_current_span(true)
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .with_writer(std::io::stderr);
        let _ = subscriber.with(fmt_layer).try_init();
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_ansi(true)
            .with_target(true)
            .with_file(false)
            .with_line_number(false)
            .with_writer(std::io::stderr);
        let _ = subscriber.with(fmt_layer).try_init();
    }

    tracing::info!(
        log_level = %log_level,
        log_format = %log_format,
        noise_filtered = NOISY_MODULES.len() + excluded_targets.len(),
        "Logging initialized"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_noisy_modules_list() {
        assert!(NOISY_MODULES.contains(&"hyper"));
        assert!(NOISY_MODULES.contains(&"reqwest"));
        assert!(NOISY_MODULES.contains(&"rustls"));
    }

    #[test]
    fn test_directives_include_exclusions() {
        let d = directives("DEBUG", &["parley_agent::providers".to_string()]);
        assert!(d.starts_with("debug,"));
        assert!(d.contains("hyper=warn"));
        assert!(d.ends_with("parley_agent::providers=warn"));
    }

    #[test]
    fn test_init_logging_twice_is_harmless() {
        init_logging("info", "pretty");
        init_logging("debug", "json");
    }
}
