//! Anthropic Messages API adapter.

use super::stream::{self, SseDecoder, SseEvent};
use super::{credential, endpoint, http_client, select_model};
use async_trait::async_trait;
use guestlink_application::{ChunkSink, ConfigStore, GatewayError, GenerationBackend};
use guestlink_domain::{GenerationRequest, ModelDescriptor};
use serde_json::{Value, json};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
pub const DEFAULT_API_VERSION: &str = "2023-06-01";

pub struct AnthropicProvider {
    id: String,
    display_name: String,
    base_url: String,
    api_version: String,
    models: Vec<ModelDescriptor>,
    store: Arc<dyn ConfigStore>,
    client: reqwest::Client,
}

impl AnthropicProvider {
    /// `id` names the credential key (`provider.<id>.api_key`) and the
    /// registry entry, so two Anthropic-dialect entries stay distinct.
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
            api_version: DEFAULT_API_VERSION.to_string(),
            models,
            store,
            client: http_client(),
        }
    }

    pub fn with_api_version(mut self, version: impl Into<String>) -> Self {
        self.api_version = version.into();
        self
    }

    /// System messages go to the top-level `system` field; the rest stay in
    /// order.
    fn request_body(&self, model: &str, request: &GenerationRequest) -> Value {
        let system: Vec<&str> = request
            .system_messages()
            .map(|m| m.content.as_str())
            .collect();
        let messages: Vec<_> = request.conversation_messages().collect();

        let mut body = json!({
            "model": model,
            "messages": messages,
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
            "stream": true,
        });
        if !system.is_empty() {
            body["system"] = Value::String(system.join("\n\n"));
        }
        body
    }

    /// Handle one SSE event. Returns true on `message_stop`.
    fn on_event(
        &self,
        event: &SseEvent,
        sink: &ChunkSink,
        text: &mut String,
    ) -> Result<bool, GatewayError> {
        let json: Value = serde_json::from_str(&event.data).map_err(|e| {
            GatewayError::transport(&self.id, format!("malformed response: {}", e))
        })?;
        let kind = json
            .get("type")
            .and_then(|t| t.as_str())
            .or(event.event.as_deref())
            .unwrap_or_default();

        match kind {
            "content_block_delta" => {
                if json.pointer("/delta/type").and_then(|t| t.as_str()) == Some("text_delta")
                    && let Some(delta) = json.pointer("/delta/text").and_then(|t| t.as_str())
                {
                    sink.emit(delta);
                    text.push_str(delta);
                }
                Ok(false)
            }
            "message_stop" => Ok(true),
            "error" => {
                let message = json
                    .pointer("/error/message")
                    .and_then(|m| m.as_str())
                    .unwrap_or("unknown error");
                Err(GatewayError::transport(&self.id, message))
            }
            _ => Ok(false),
        }
    }
}

#[async_trait]
impl GenerationBackend for AnthropicProvider {
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
            .post(endpoint(&self.base_url, "v1/messages"))
            .header("x-api-key", api_key)
            .header("anthropic-version", &self.api_version)
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
            "stream ended without message_stop",
        ))
    }
}
