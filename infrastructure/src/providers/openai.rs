//! OpenAI-compatible chat completions adapter.
//!
//! Works against any endpoint that speaks the `/chat/completions` streaming
//! dialect (OpenAI itself, Azure deployments behind a proxy, vLLM, LM Studio).

use super::stream::{self, SseDecoder, SseEvent};
use super::{credential, endpoint, http_client, select_model};
use async_trait::async_trait;
use guestlink_application::{ChunkSink, ConfigStore, GatewayError, GenerationBackend};
use guestlink_domain::{GenerationRequest, ModelDescriptor};
use serde_json::{Value, json};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

pub struct OpenAiCompatibleProvider {
    id: String,
    display_name: String,
    base_url: String,
    models: Vec<ModelDescriptor>,
    store: Arc<dyn ConfigStore>,
    client: reqwest::Client,
}

impl OpenAiCompatibleProvider {
    pub fn new(
        id: impl Into<String>,
        display_name: impl Into<String>,
        base_url: impl Into<String>,
        models: Vec<ModelDescriptor>,
        store: Arc<dyn ConfigStore>,
    ) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            base_url: base_url.into(),
            models,
            store,
            client: http_client(),
        }
    }

    fn request_body(&self, model: &str, request: &GenerationRequest) -> Value {
        json!({
            "model": model,
            "messages": request.messages,
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
            "stream": true,
        })
    }

    /// Handle one SSE event. Returns true once the stream is finished.
    fn on_event(
        &self,
        event: &SseEvent,
        sink: &ChunkSink,
        text: &mut String,
    ) -> Result<bool, GatewayError> {
        let data = event.data.trim();
        if data == "[DONE]" {
            return Ok(true);
        }
        let json: Value = serde_json::from_str(data).map_err(|e| {
            GatewayError::transport(&self.id, format!("malformed response: {}", e))
        })?;
        if let Some(error) = json.get("error") {
            let message = error
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("unknown error");
            return Err(GatewayError::transport(&self.id, message));
        }
        if let Some(delta) = json
            .pointer("/choices/0/delta/content")
            .and_then(|c| c.as_str())
        {
            sink.emit(delta);
            text.push_str(delta);
        }
        Ok(false)
    }
}

#[async_trait]
impl GenerationBackend for OpenAiCompatibleProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn display_name(&self) -> &str {
        &self.display_name
    }

    fn models(&self) -> Vec<ModelDescriptor> {
        self.models.clone()
    }

    async fn generate(
        &self,
        request: &GenerationRequest,
        sink: &ChunkSink,
        cancel: &CancellationToken,
    ) -> Result<String, GatewayError> {
        let api_key = credential(self.store.as_ref(), &self.id).await?;
        let model = select_model(&self.id, &self.models, request.model_hint.as_deref())?;
        let body = self.request_body(model, request);
        trace!("{} request body: {}", self.id, body);

        let http = self
            .client
            .post(endpoint(&self.base_url, "chat/completions"))
            .bearer_auth(api_key)
            .json(&body);
        let response = stream::send(&self.id, http, cancel).await?;
        debug!(request_id = request.id, "{} streaming {}", self.id, model);

        let mut body = response.bytes_stream();
        let mut sse = SseDecoder::new();
        let mut text = String::new();
        while let Some(bytes) = stream::next_chunk(&self.id, &mut body, cancel).await? {
            for event in sse.push(&bytes) {
                if self.on_event(&event, sink, &mut text)? {
                    return Ok(text);
                }
            }
        }
        if let Some(event) = sse.finish()
            && self.on_event(&event, sink, &mut text)?
        {
            return Ok(text);
        }
        Err(GatewayError::transport(
            &self.id,
            "stream ended without [DONE]",
        ))
    }
}
