//! Text and time helpers shared across Parley crates.

use std::sync::OnceLock;

use regex::Regex;

/// Truncate a string to at most `max_chars` characters, appending "..." if truncated.
///
/// Works on character boundaries so multi-byte text is never cut mid-character.
pub fn truncate_with_ellipsis(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", s[..idx].trim_end()),
        None => s.to_string(),
    }
}

fn secret_patterns() -> &'static [(Regex, &'static str)] {
    static PATTERNS: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            (r"(?i)(api[_-]?key|apikey)[=:]\s*\S{20,}", "$1=***REDACTED***"),
            (r"(?i)(password|passwd|pwd)[=:]\s*\S+", "$1=***REDACTED***"),
            (r"(?i)(token|secret|bearer)\s*[=:]\s*\S{10,}", "$1=***REDACTED***"),
            (r"sk-[a-zA-Z0-9_-]{20,}", "***REDACTED_API_KEY***"),
            (r"(?i)Bearer\s+[a-zA-Z0-9._-]{10,}", "Bearer ***REDACTED***"),
        ]
        .into_iter()
        .filter_map(|(p, r)| Regex::new(p).ok().map(|re| (re, r)))
        .collect()
    })
}

/// Redact secret-looking substrings so the text is safe to log.
pub fn sanitize_for_log(s: &str) -> String {
    let mut result = s.to_string();
    for (re, replacement) in secret_patterns() {
        result = re.replace_all(&result, *replacement).into_owned();
    }
    result
}

/// Split `text` into chunks of at most `max_len` characters.
///
/// Prefers breaking after a newline, then after a space; falls back to a hard
/// cut at `max_len` characters. Chunks are never split inside a UTF-8
/// character and whitespace at break points is kept with the earlier chunk.
pub fn split_message(text: &str, max_len: usize) -> Vec<String> {
    if max_len == 0 || text.is_empty() {
        return if text.is_empty() { Vec::new() } else { vec![text.to_string()] };
    }

    let mut chunks = Vec::new();
    let mut remaining = text;

    while !remaining.is_empty() {
        // byte offset just past the max_len-th char, or the whole remainder
        let limit = match remaining.char_indices().nth(max_len) {
            Some((idx, _)) => idx,
            None => {
                chunks.push(remaining.to_string());
                break;
            }
        };

        let window = &remaining[..limit];
        let split_at = find_split_point(window).unwrap_or(limit);
        let (chunk, rest) = remaining.split_at(split_at);
        chunks.push(chunk.to_string());
        remaining = rest;
    }

    chunks
}

/// Byte offset just after the last newline, else the last space, in `window`.
fn find_split_point(window: &str) -> Option<usize> {
    window
        .rfind('\n')
        .or_else(|| window.rfind(' '))
        .map(|i| i + 1)
        .filter(|&i| i > 0 && i <= window.len())
}

/// Current wall-clock time as fractional seconds since the Unix epoch.
pub fn now_timestamp() -> f64 {
    let now = chrono::Utc::now();
    now.timestamp() as f64 + f64::from(now.timestamp_subsec_micros()) / 1_000_000.0
}
