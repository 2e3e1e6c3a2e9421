//! Streaming output of a generation.
//!
//! Every backend, whatever its native wire format, is normalised into a
//! sequence of [`GenerationChunk`]s followed by one [`CompletionResult`].
//! Chunks are the partial values; the result is the single final value.

use serde::{Deserialize, Serialize};

/// One piece of streamed output for a request.
///
/// A chunk with `terminal = true` and an empty delta signals normal
/// completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationChunk {
    pub request_id: u64,
    pub content_delta: String,
    pub terminal: bool,
}

impl GenerationChunk {
    /// A non-terminal chunk carrying `delta`.
    pub fn delta(request_id: u64, delta: impl Into<String>) -> Self {
        Self {
            request_id,
            content_delta: delta.into(),
            terminal: false,
        }
    }

    /// The terminal chunk for `request_id` (empty delta).
    pub fn terminal(request_id: u64) -> Self {
        Self {
            request_id,
            content_delta: String::new(),
            terminal: true,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.content_delta.is_empty()
    }
}

/// Final outcome of a successful generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionResult {
    pub request_id: u64,
    /// Id of the backend that produced the text (e.g. `cpu-local`, `openai`).
    pub backend_id: String,
    /// Model that produced the text.
    pub model_id: String,
    /// Concatenation of every delta that was emitted.
    pub content: String,
    pub chunk_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_chunk_has_empty_delta() {
        let chunk = GenerationChunk::terminal(7);
        assert!(chunk.terminal);
        assert!(chunk.is_empty());
        assert_eq!(chunk.request_id, 7);
    }

    #[test]
    fn delta_chunk_is_not_terminal() {
        let chunk = GenerationChunk::delta(7, "Hel");
        assert!(!chunk.terminal);
        assert_eq!(chunk.content_delta, "Hel");
    }
}
