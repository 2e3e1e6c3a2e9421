//! Generation gateway port
//!
//! Defines the interface every remote inference backend implements, the
//! sink backends push streamed deltas into, and the error taxonomy shared by
//! the router and its backends.

use async_trait::async_trait;
use guestlink_domain::{CompletionResult, GenerationChunk, GenerationRequest, ModelDescriptor};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Why no backend could serve a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NoBackendReason {
    /// No local model is loaded or recorded and no remote provider has a
    /// credential.
    NothingConfigured,
    /// Several backends were tried and all of them failed.
    AllAttemptsFailed(Vec<String>),
}

impl std::fmt::Display for NoBackendReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NoBackendReason::NothingConfigured => write!(
                f,
                "no AI backend is available: configure an API key for a provider \
                 (e.g. OPENAI_API_KEY) or load a local model with `guestlink load`"
            ),
            NoBackendReason::AllAttemptsFailed(attempts) => {
                write!(f, "all backends failed: {}", attempts.join("; "))
            }
        }
    }
}

/// Errors that can occur while routing or serving a generation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// The caller asked for something that does not exist (unknown model id).
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The backend exists but cannot be used on this host.
    #[error("Backend unavailable: {0}")]
    Availability(String),

    /// The backend was reached (or attempted) and failed.
    #[error("{provider}: {message}")]
    Transport { provider: String, message: String },

    #[error("Generation cancelled")]
    Cancelled,

    #[error("A local model is already loading")]
    AlreadyLoading,

    #[error("{0}")]
    NoBackendAvailable(NoBackendReason),
}

impl GatewayError {
    pub fn transport(provider: impl Into<String>, message: impl Into<String>) -> Self {
        GatewayError::Transport {
            provider: provider.into(),
            message: message.into(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, GatewayError::Cancelled)
    }
}

/// Destination for the streamed deltas of one request.
///
/// Cloning a sink shares the emitted-chunk counter, so the router can tell
/// whether a failed attempt already produced visible output.
#[derive(Debug, Clone)]
pub struct ChunkSink {
    request_id: u64,
    tx: Option<mpsc::UnboundedSender<GenerationChunk>>,
    emitted: Arc<AtomicUsize>,
}

impl ChunkSink {
    /// A sink paired with the receiver the caller drains.
    pub fn channel(request_id: u64) -> (Self, mpsc::UnboundedReceiver<GenerationChunk>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = Self {
            request_id,
            tx: Some(tx),
            emitted: Arc::new(AtomicUsize::new(0)),
        };
        (sink, rx)
    }

    /// A sink that only counts. Used when the caller wants the final text only.
    pub fn discard(request_id: u64) -> Self {
        Self {
            request_id,
            tx: None,
            emitted: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn request_id(&self) -> u64 {
        self.request_id
    }

    /// Push one delta. Empty deltas are skipped.
    pub fn emit(&self, delta: &str) {
        if delta.is_empty() {
            return;
        }
        self.emitted.fetch_add(1, Ordering::SeqCst);
        if let Some(tx) = &self.tx
            && tx
                .send(GenerationChunk::delta(self.request_id, delta))
                .is_err()
        {
            tracing::trace!(request_id = self.request_id, "chunk receiver dropped");
        }
    }

    /// Number of non-empty deltas emitted so far.
    pub fn emitted(&self) -> usize {
        self.emitted.load(Ordering::SeqCst)
    }
}

/// A backend that can stream a completion for a request.
///
/// Implementations (adapters) live in the infrastructure layer. Each
/// adapter normalises its native wire format into [`ChunkSink::emit`] calls
/// and returns the full text once the stream ends.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Stable backend id (`openai`, `anthropic`, ...).
    fn id(&self) -> &str;

    fn display_name(&self) -> &str;

    /// Models this backend offers. The first entry is the default.
    fn models(&self) -> Vec<ModelDescriptor>;

    /// Stream a completion. Must return [`GatewayError::Cancelled`] promptly
    /// once `cancel` fires.
    async fn generate(
        &self,
        request: &GenerationRequest,
        sink: &ChunkSink,
        cancel: &CancellationToken,
    ) -> Result<String, GatewayError>;
}

/// Entry point for serving a generation request.
///
/// The router implements this by picking a backend; the RPC host only
/// depends on this trait.
#[async_trait]
pub trait GenerationService: Send + Sync {
    async fn generate(
        &self,
        request: &GenerationRequest,
        sink: &ChunkSink,
        cancel: &CancellationToken,
    ) -> Result<CompletionResult, GatewayError>;
}
