//! Scripted generation service shared by the host and client tests.

use async_trait::async_trait;
use guestlink_application::{ChunkSink, GatewayError, GenerationService};
use guestlink_domain::{CompletionResult, GenerationRequest};
use tokio_util::sync::CancellationToken;

pub(crate) enum Script {
    Stream(Vec<&'static str>),
    Fail(&'static str),
    /// Emit the deltas, then wait until cancelled.
    Hang(Vec<&'static str>),
}

pub(crate) struct ScriptedService {
    pub script: Script,
}

#[async_trait]
impl GenerationService for ScriptedService {
    async fn generate(
        &self,
        request: &GenerationRequest,
        sink: &ChunkSink,
        cancel: &CancellationToken,
    ) -> Result<CompletionResult, GatewayError> {
        match &self.script {
            Script::Stream(deltas) => {
                for delta in deltas {
                    sink.emit(delta);
                }
                Ok(CompletionResult {
                    request_id: request.id,
                    backend_id: "mock".into(),
                    model_id: "mock-model".into(),
                    content: deltas.concat(),
                    chunk_count: deltas.len(),
                })
            }
            Script::Fail(message) => Err(GatewayError::transport("openai", *message)),
            Script::Hang(deltas) => {
                for delta in deltas {
                    sink.emit(delta);
                }
                cancel.cancelled().await;
                Err(GatewayError::Cancelled)
            }
        }
    }
}
