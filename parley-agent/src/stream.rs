//! Server-sent-event parsing and reply accumulation.
//!
//! Streaming backends deliver a reply as many small `data:` events. The relay
//! only ever deals in complete replies, so providers fold the stream into one
//! string here.

use futures_util::{Stream, StreamExt};
use parley_common::{Error, Result};
use std::time::Duration;

/// Data line sent by OpenAI-compatible servers to end a stream.
pub const DONE_MARKER: &str = "[DONE]";

/// One parsed SSE event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
}

/// Parse one event block (the text between blank lines).
pub fn parse_sse_event(block: &str) -> Option<SseEvent> {
    let mut event = None;
    let mut data: Vec<&str> = Vec::new();

    for line in block.lines() {
        if line.starts_with(':') {
            continue;
        }
        let (field, value) = match line.split_once(':') {
            Some((f, v)) => (f, v.strip_prefix(' ').unwrap_or(v)),
            None => (line, ""),
        };
        match field {
            "event" => event = Some(value.to_string()),
            "data" => data.push(value),
            _ => {}
        }
    }

    if data.is_empty() {
        return None;
    }
    Some(SseEvent {
        event,
        data: data.join("\n"),
    })
}

/// Incremental SSE decoder over raw byte chunks.
///
/// Bytes are buffered until a full event is available, so multi-byte
/// characters split across chunks decode correctly.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return every event it completes.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend(chunk.iter().copied().filter(|&b| b != b'\r'));

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.windows(2).position(|w| w == b"\n\n") {
            let block: Vec<u8> = self.buffer.drain(..pos + 2).collect();
            let text = String::from_utf8_lossy(&block[..pos]);
            if let Some(event) = parse_sse_event(&text) {
                events.push(event);
            }
        }
        events
    }

    /// Flush a trailing event that was not followed by a blank line.
    pub fn finish(self) -> Option<SseEvent> {
        let text = String::from_utf8_lossy(&self.buffer);
        if text.trim().is_empty() {
            None
        } else {
            parse_sse_event(&text)
        }
    }
}

/// Fold an SSE byte stream into a single reply.
///
/// `extract` maps each event's data to the text fragment it carries, if any.
/// The stream ends at the `[DONE]` marker or when the body ends. Each chunk
/// must arrive within `chunk_timeout`.
pub async fn accumulate<S, B, E, F>(stream: S, chunk_timeout: Duration, mut extract: F) -> Result<String>
where
    S: Stream<Item = std::result::Result<B, E>>,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
    F: FnMut(&str) -> Result<Option<String>>,
{
    futures_util::pin_mut!(stream);
    let mut decoder = SseDecoder::new();
    let mut reply = String::new();

    loop {
        let chunk = match tokio::time::timeout(chunk_timeout, stream.next()).await {
            Ok(Some(Ok(chunk))) => chunk,
            Ok(Some(Err(e))) => return Err(Error::Provider(format!("stream interrupted: {e}"))),
            Ok(None) => break,
            Err(_) => {
                tracing::warn!(received = reply.len(), "Stream chunk timed out");
                return Err(Error::Timeout);
            }
        };

        for event in decoder.push(chunk.as_ref()) {
            if event.data.trim() == DONE_MARKER {
                return Ok(reply);
            }
            if let Some(piece) = extract(&event.data)? {
                reply.push_str(&piece);
            }
        }
    }

    if let Some(event) = decoder.finish() {
        if event.data.trim() != DONE_MARKER {
            if let Some(piece) = extract(&event.data)? {
                reply.push_str(&piece);
            }
        }
    }

    Ok(reply)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;

    fn chunks(parts: &[&'static [u8]]) -> impl Stream<Item = std::result::Result<&'static [u8], String>> {
        stream::iter(parts.iter().copied().map(Ok).collect::<Vec<_>>())
    }

    fn data_as_text(data: &str) -> Result<Option<String>> {
        Ok(Some(data.to_string()))
    }

    #[test]
    fn parse_event_with_name_and_multiline_data() {
        let ev = parse_sse_event("event: delta\ndata: one\ndata: two").unwrap();
        assert_eq!(ev.event.as_deref(), Some("delta"));
        assert_eq!(ev.data, "one\ntwo");
        assert!(parse_sse_event(": keep-alive").is_none());
    }

    #[test]
    fn decoder_handles_split_events_and_crlf() {
        let mut dec = SseDecoder::new();
        assert!(dec.push(b"data: hel").is_empty());
        let events = dec.push(b"lo\r\n\r\ndata: x\n\n");
        let data: Vec<_> = events.into_iter().map(|e| e.data).collect();
        assert_eq!(data, vec!["hello", "x"]);
    }

    #[test]
    fn decoder_keeps_multibyte_chars_across_chunks() {
        let bytes = "data: héllo\n\n".as_bytes();
        let split = bytes.iter().position(|&b| b == 0xC3).unwrap() + 1;
        let mut dec = SseDecoder::new();
        assert!(dec.push(&bytes[..split]).is_empty());
        assert_eq!(dec.push(&bytes[split..])[0].data, "héllo");
    }

    #[tokio::test]
    async fn accumulate_stops_at_done() {
        let s = chunks(&[b"data: Hel\n\ndata: lo", b"\n\ndata: [DONE]\n\ndata: ignored\n\n"]);
        let reply = accumulate(s, Duration::from_secs(1), data_as_text).await.unwrap();
        assert_eq!(reply, "Hello");
    }

    #[tokio::test]
    async fn accumulate_flushes_trailing_event() {
        let s = chunks(&[b"data: a\n\ndata: b"]);
        let reply = accumulate(s, Duration::from_secs(1), data_as_text).await.unwrap();
        assert_eq!(reply, "ab");
    }

    #[tokio::test]
    async fn accumulate_propagates_stream_error() {
        let s = stream::iter(vec![Ok(&b"data: a\n\n"[..]), Err("reset".to_string())]);
        let err = accumulate(s, Duration::from_secs(1), data_as_text).await.unwrap_err();
        assert!(err.to_string().contains("reset"));
    }

    #[tokio::test]
    async fn accumulate_times_out() {
        let s = stream::pending::<std::result::Result<&'static [u8], String>>();
        let err = accumulate(s, Duration::from_millis(10), data_as_text).await.unwrap_err();
        assert!(matches!(err, Error::Timeout));
    }
}
