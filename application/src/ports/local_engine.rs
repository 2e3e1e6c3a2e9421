//! Local inference engine port
//!
//! A local engine runs models on this host, either with hardware
//! acceleration or on the CPU. The router owns the lifecycle bookkeeping;
//! an engine only does the work it is told to do.

use super::llm_gateway::{ChunkSink, GatewayError};
use super::progress::LoadProgressNotifier;
use async_trait::async_trait;
use guestlink_domain::{BackendKind, GenerationRequest, ModelDescriptor};
use tokio_util::sync::CancellationToken;

/// Engine capable of loading one model and streaming completions from it.
#[async_trait]
pub trait LocalEngine: Send + Sync {
    /// Which local kind this engine serves.
    fn kind(&self) -> BackendKind;

    /// Fetch (if needed) and initialise `model`, reporting progress as it goes.
    async fn load(
        &self,
        model: &ModelDescriptor,
        progress: &dyn LoadProgressNotifier,
        cancel: &CancellationToken,
    ) -> Result<(), GatewayError>;

    /// Release whatever resources `model_id` holds.
    async fn unload(&self, model_id: &str) -> Result<(), GatewayError>;

    /// Stream a completion from the loaded `model_id`, returning the full text.
    async fn generate(
        &self,
        model_id: &str,
        request: &GenerationRequest,
        sink: &ChunkSink,
        cancel: &CancellationToken,
    ) -> Result<String, GatewayError>;
}
