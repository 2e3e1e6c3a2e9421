//! Transcript logging port
//!
//! Every guest request leaves a short trail: it was received, then it either
//! completed, failed or was cancelled. [`ConversationLogger`] adapters persist
//! that trail in a machine-readable form; `tracing` remains the place for
//! human-readable diagnostics.

use serde_json::{Value, json};

/// Stage of a request recorded in the transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscriptKind {
    Request,
    Done,
    Error,
    Cancel,
}

impl TranscriptKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TranscriptKind::Request => "request",
            TranscriptKind::Done => "done",
            TranscriptKind::Error => "error",
            TranscriptKind::Cancel => "cancel",
        }
    }
}

/// One transcript record. Adapters add the timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationEvent {
    pub kind: TranscriptKind,
    pub request_id: u64,
    /// Stage-specific fields. Prompt text is never included.
    pub payload: Value,
}

impl ConversationEvent {
    pub fn new(kind: TranscriptKind, request_id: u64, payload: Value) -> Self {
        Self {
            kind,
            request_id,
            payload,
        }
    }

    pub fn request(request_id: u64, messages: usize, model_hint: Option<&str>) -> Self {
        Self::new(
            TranscriptKind::Request,
            request_id,
            json!({ "messages": messages, "model_hint": model_hint }),
        )
    }

    pub fn done(request_id: u64, backend: &str, model: &str, chunks: usize, bytes: usize) -> Self {
        Self::new(
            TranscriptKind::Done,
            request_id,
            json!({ "backend": backend, "model": model, "chunks": chunks, "bytes": bytes }),
        )
    }

    pub fn error(request_id: u64, message: &str) -> Self {
        Self::new(TranscriptKind::Error, request_id, json!({ "error": message }))
    }

    pub fn cancel(request_id: u64) -> Self {
        Self::new(TranscriptKind::Cancel, request_id, Value::Null)
    }
}

/// Sink for transcript records.
///
/// `log` never fails from the caller's point of view: a broken log must not
/// break request handling.
pub trait ConversationLogger: Send + Sync {
    fn log(&self, event: ConversationEvent);
}

/// Logger used when no transcript is configured.
pub struct NoConversationLogger;

impl ConversationLogger for NoConversationLogger {
    fn log(&self, _event: ConversationEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn done_event_carries_backend_and_counts() {
        let event = ConversationEvent::done(7, "openai", "gpt-4o-mini", 3, 42);
        assert_eq!(event.kind, TranscriptKind::Done);
        assert_eq!(event.request_id, 7);
        assert_eq!(event.payload["backend"], "openai");
        assert_eq!(event.payload["chunks"], 3);
    }

    #[test]
    fn request_event_omits_prompt_text() {
        let event = ConversationEvent::request(1, 2, None);
        let fields: Vec<&String> = event.payload.as_object().unwrap().keys().collect();
        assert_eq!(fields, vec!["messages", "model_hint"]);
    }
}
