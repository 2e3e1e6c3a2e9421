//! Incremental decoding of streamed HTTP bodies.
//!
//! Remote providers answer with Server-Sent Events, the local daemon with
//! newline-delimited JSON. Both arrive as arbitrary byte chunks; these
//! decoders only yield complete lines and events.

use futures::{Stream, StreamExt};
use guestlink_application::GatewayError;
use tokio_util::sync::CancellationToken;

/// Splits a byte stream into lines. `\r\n` and `\n` both end a line.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buf: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes, returning every line they complete.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            lines.push(String::from_utf8_lossy(&line).into_owned());
        }
        lines
    }

    /// The unterminated last line, if any.
    pub fn finish(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.buf);
        Some(String::from_utf8_lossy(&rest).trim_end_matches('\r').to_string())
    }
}

/// One Server-Sent Event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
}

/// Server-Sent Events decoder (the `event:` and `data:` fields only).
#[derive(Debug, Default)]
pub struct SseDecoder {
    lines: LineBuffer,
    event: Option<String>,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        let mut events = Vec::new();
        for line in self.lines.push(bytes) {
            if let Some(event) = self.line(&line) {
                events.push(event);
            }
        }
        events
    }

    /// Flush a final event that was not followed by a blank line.
    pub fn finish(&mut self) -> Option<SseEvent> {
        if let Some(line) = self.lines.finish()
            && let Some(event) = self.line(&line)
        {
            return Some(event);
        }
        self.dispatch()
    }

    fn line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        if self.data.is_empty() {
            self.event = None;
            return None;
        }
        Some(SseEvent {
            event: self.event.take(),
            data: std::mem::take(&mut self.data).join("\n"),
        })
    }
}

/// Send `request`, giving up as soon as `cancel` fires.
pub async fn send(
    provider: &str,
    request: reqwest::RequestBuilder,
    cancel: &CancellationToken,
) -> Result<reqwest::Response, GatewayError> {
    let response = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(GatewayError::Cancelled),
        response = request.send() => response,
    }
    .map_err(|e| GatewayError::transport(provider, format!("request failed: {}", e)))?;

    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(GatewayError::transport(
        provider,
        format!("HTTP {}: {}", status.as_u16(), error_detail(&body)),
    ))
}

/// Next body chunk, or `None` at end of stream.
pub async fn next_chunk<S, B>(
    provider: &str,
    body: &mut S,
    cancel: &CancellationToken,
) -> Result<Option<B>, GatewayError>
where
    S: Stream<Item = reqwest::Result<B>> + Unpin,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(GatewayError::Cancelled),
        next = body.next() => match next {
            None => Ok(None),
            Some(Ok(bytes)) => Ok(Some(bytes)),
            Some(Err(e)) => Err(GatewayError::transport(provider, format!("stream interrupted: {}", e))),
        },
    }
}

/// Best human-readable message from an error body.
pub fn error_detail(body: &str) -> String {
    const MAX: usize = 300;
    if let Ok(json) = serde_json::from_str::<serde_json::Value>(body) {
        let message = json
            .pointer("/error/message")
            .or_else(|| json.get("error"))
            .or_else(|| json.get("message"))
            .and_then(|v| v.as_str());
        if let Some(message) = message {
            return message.to_string();
        }
    }
    let trimmed = body.trim();
    match trimmed.char_indices().nth(MAX) {
        Some((idx, _)) => format!("{}...", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lines_split_across_chunks() {
        let mut lines = LineBuffer::new();
        assert!(lines.push(b"{\"a\":").is_empty());
        assert_eq!(lines.push(b"1}\r\n{\"b\""), vec!["{\"a\":1}"]);
        assert_eq!(lines.push(b":2}\n"), vec!["{\"b\":2}"]);
        assert_eq!(lines.finish(), None);
    }

    #[test]
    fn multibyte_characters_survive_splits() {
        let text = "héllo\n".as_bytes();
        let mut lines = LineBuffer::new();
        assert!(lines.push(&text[..2]).is_empty());
        assert_eq!(lines.push(&text[2..]), vec!["héllo"]);
    }

    #[test]
    fn sse_events_are_dispatched_on_blank_lines() {
        let mut sse = SseDecoder::new();
        let events = sse.push(b"event: content_block_delta\ndata: {\"x\":1}\n\n: keep-alive\n\ndata: [DONE]\n\n");
        assert_eq!(
            events,
            vec![
                SseEvent {
                    event: Some("content_block_delta".into()),
                    data: "{\"x\":1}".into()
                },
                SseEvent {
                    event: None,
                    data: "[DONE]".into()
                },
            ]
        );
    }

    #[test]
    fn sse_multi_line_data_is_joined() {
        let mut sse = SseDecoder::new();
        let events = sse.push(b"data: a\ndata: b\n\n");
        assert_eq!(events[0].data, "a\nb");
    }

    #[test]
    fn sse_finish_flushes_trailing_event() {
        let mut sse = SseDecoder::new();
        assert!(sse.push(b"data: tail").is_empty());
        assert_eq!(sse.finish().unwrap().data, "tail");
        assert!(sse.finish().is_none());
    }

    #[test]
    fn error_detail_prefers_json_message() {
        assert_eq!(
            error_detail(r#"{"error":{"message":"invalid api key","type":"auth"}}"#),
            "invalid api key"
        );
        assert_eq!(error_detail(r#"{"error":"model not found"}"#), "model not found");
        assert_eq!(error_detail("  upstream down \n"), "upstream down");
    }
}
