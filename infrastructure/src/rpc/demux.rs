//! Stream demultiplexer.
//!
//! Splits a chunked byte stream into ordinary output and control messages.
//! Chunk boundaries are arbitrary: a marker or a body may be split anywhere,
//! and the concatenated output and message sequence must not depend on where
//! the splits fall.

use super::codec::{END, FrameCodec, MAX_FRAME_BODY, START};
use super::protocol::Message;
use tracing::{trace, warn};

/// Result of feeding one chunk.
#[derive(Debug, Default, PartialEq)]
pub struct Demuxed {
    /// Bytes that are not part of any frame, in stream order.
    pub output: Vec<u8>,
    /// Messages completed by this chunk, in stream order.
    pub messages: Vec<Message>,
}

/// Stateful reassembler for one direction of the channel.
pub struct StreamDemultiplexer {
    buffer: Vec<u8>,
    max_body: usize,
}

impl Default for StreamDemultiplexer {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamDemultiplexer {
    pub fn new() -> Self {
        Self::with_max_body(MAX_FRAME_BODY)
    }

    pub fn with_max_body(max_body: usize) -> Self {
        Self {
            buffer: Vec::new(),
            max_body,
        }
    }

    /// Bytes currently held back (a partial marker or an incomplete frame).
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Feed one chunk of the stream.
    pub fn parse(&mut self, chunk: &[u8]) -> Demuxed {
        self.buffer.extend_from_slice(chunk);
        let mut out = Demuxed::default();
        let mut cursor = 0;

        loop {
            let rest = &self.buffer[cursor..];
            let Some(start) = find(rest, START) else {
                // Hold back a tail that could still become a start marker.
                let keep = partial_prefix_len(rest, START);
                let flush = rest.len() - keep;
                out.output.extend_from_slice(&rest[..flush]);
                cursor += flush;
                break;
            };

            out.output.extend_from_slice(&rest[..start]);
            cursor += start;
            let body_start = cursor + START.len();

            let Some(end) = find(&self.buffer[body_start..], END) else {
                // The tail may hold all but the last byte of END.
                let body_len = self.buffer.len() - body_start;
                if body_len.saturating_sub(END.len() - 1) > self.max_body {
                    warn!(
                        "Frame body exceeds {} bytes without terminator, treating marker as output",
                        self.max_body
                    );
                    out.output.extend_from_slice(START);
                    cursor = body_start;
                    continue;
                }
                break;
            };

            let body = &self.buffer[body_start..body_start + end];
            if end > self.max_body || find(body, START).is_some() {
                // Stray marker: another frame starts before this one ends,
                // or the body is larger than any encoder produces.
                warn!("Discarding stray frame marker ({} byte body)", end);
                out.output.extend_from_slice(START);
                cursor = body_start;
                continue;
            }

            match FrameCodec::decode(body) {
                Ok(message) => {
                    trace!("Demux: decoded {}", message.kind());
                    out.messages.push(message);
                }
                Err(e) => {
                    warn!("Dropping undecodable frame: {}", e);
                }
            }
            cursor = body_start + end + END.len();
        }

        self.buffer.drain(..cursor);
        out
    }

    /// Release everything still held back. Call at end of stream.
    pub fn flush(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buffer)
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Length of the longest suffix of `haystack` that is a proper prefix of `needle`.
fn partial_prefix_len(haystack: &[u8], needle: &[u8]) -> usize {
    (1..needle.len())
        .rev()
        .find(|&k| haystack.ends_with(&needle[..k]))
        .unwrap_or(0)
}
