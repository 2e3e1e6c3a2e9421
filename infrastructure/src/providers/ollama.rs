//! Local inference through an Ollama-compatible daemon.
//!
//! One engine instance serves one local kind. The cpu kind disables GPU
//! offload (`num_gpu: 0`); the accelerated kind lets the daemon decide.

use super::stream::{self, LineBuffer};
use super::{endpoint, http_client};
use async_trait::async_trait;
use guestlink_application::{ChunkSink, GatewayError, LoadProgressNotifier, LocalEngine};
use guestlink_domain::{BackendKind, GenerationRequest, LoadProgress, LoadStage, ModelDescriptor};
use serde_json::{Map, Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{info, trace};

pub const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:11434";

/// How long the daemon keeps a loaded model resident between requests.
const KEEP_ALIVE: &str = "30m";

pub struct OllamaEngine {
    kind: BackendKind,
    base_url: String,
    client: reqwest::Client,
}

impl OllamaEngine {
    pub fn new(kind: BackendKind, base_url: impl Into<String>) -> Self {
        Self {
            kind,
            base_url: base_url.into(),
            client: http_client(),
        }
    }

    fn label(&self) -> &'static str {
        self.kind.as_str()
    }

    fn options(&self) -> Map<String, Value> {
        let mut options = Map::new();
        if self.kind == BackendKind::CpuLocal {
            options.insert("num_gpu".into(), json!(0));
        }
        options
    }

    /// Feed every complete NDJSON line of the response to `on_line` until it
    /// returns true. A body that ends before that is an error.
    async fn read_lines<F>(
        &self,
        response: reqwest::Response,
        cancel: &CancellationToken,
        terminator: &str,
        mut on_line: F,
    ) -> Result<(), GatewayError>
    where
        F: FnMut(Value) -> Result<bool, GatewayError>,
    {
        let mut body = response.bytes_stream();
        let mut lines = LineBuffer::new();
        while let Some(bytes) = stream::next_chunk(self.label(), &mut body, cancel).await? {
            for line in lines.push(&bytes) {
                if let Some(json) = self.parse_line(&line)?
                    && on_line(json)?
                {
                    return Ok(());
                }
            }
        }
        if let Some(line) = lines.finish()
            && let Some(json) = self.parse_line(&line)?
            && on_line(json)?
        {
            return Ok(());
        }
        Err(GatewayError::transport(
            self.label(),
            format!("stream ended without {}", terminator),
        ))
    }

    fn parse_line(&self, line: &str) -> Result<Option<Value>, GatewayError> {
        if line.trim().is_empty() {
            return Ok(None);
        }
        let json: Value = serde_json::from_str(line).map_err(|e| {
            GatewayError::transport(self.label(), format!("malformed response: {}", e))
        })?;
        if let Some(error) = json.get("error").and_then(|e| e.as_str()) {
            return Err(GatewayError::transport(self.label(), error));
        }
        Ok(Some(json))
    }

    async fn pull(
        &self,
        model: &ModelDescriptor,
        progress: &dyn LoadProgressNotifier,
        cancel: &CancellationToken,
    ) -> Result<(), GatewayError> {
        let http = self
            .client
            .post(endpoint(&self.base_url, "api/pull"))
            .json(&json!({ "model": model.id, "stream": true }));
        let response = stream::send(self.label(), http, cancel).await?;

        self.read_lines(response, cancel, "status success", |line| {
            let total = line.get("total").and_then(|v| v.as_u64()).unwrap_or(0);
            let completed = line.get("completed").and_then(|v| v.as_u64()).unwrap_or(0);
            if total > 0 {
                progress.on_progress(
                    self.kind,
                    &model.id,
                    LoadProgress::new(LoadStage::Downloading, completed as f32 / total as f32),
                );
            }
            if let Some(status) = line.get("status").and_then(|s| s.as_str()) {
                trace!("{} pull {}: {}", self.label(), model.id, status);
                return Ok(status == "success");
            }
            Ok(false)
        })
        .await
    }
}

#[async_trait]
impl LocalEngine for OllamaEngine {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    async fn load(
        &self,
        model: &ModelDescriptor,
        progress: &dyn LoadProgressNotifier,
        cancel: &CancellationToken,
    ) -> Result<(), GatewayError> {
        progress.on_progress(
            self.kind,
            &model.id,
            LoadProgress::new(LoadStage::Downloading, 0.0),
        );
        self.pull(model, progress, cancel).await?;

        progress.on_progress(
            self.kind,
            &model.id,
            LoadProgress::new(LoadStage::Initializing, 0.0),
        );
        // An empty generate makes the daemon load the weights.
        let http = self
            .client
            .post(endpoint(&self.base_url, "api/generate"))
            .json(&json!({
                "model": model.id,
                "keep_alive": KEEP_ALIVE,
                "stream": false,
                "options": self.options(),
            }));
        let response = stream::send(self.label(), http, cancel).await?;
        let body = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(GatewayError::Cancelled),
            body = response.text() => body,
        }
        .map_err(|e| GatewayError::transport(self.label(), e.to_string()))?;
        if self.parse_line(&body)?.is_none() {
            return Err(GatewayError::transport(
                self.label(),
                "malformed response: empty body",
            ));
        }

        progress.on_progress(
            self.kind,
            &model.id,
            LoadProgress::new(LoadStage::Initializing, 1.0),
        );
        info!("{}: {} resident", self.label(), model.id);
        Ok(())
    }

    async fn unload(&self, model_id: &str) -> Result<(), GatewayError> {
        let response = self
            .client
            .post(endpoint(&self.base_url, "api/generate"))
            .json(&json!({ "model": model_id, "keep_alive": 0, "stream": false }))
            .send()
            .await
            .map_err(|e| GatewayError::transport(self.label(), e.to_string()))?;
        if !response.status().is_success() {
            return Err(GatewayError::transport(
                self.label(),
                format!("unload failed: HTTP {}", response.status().as_u16()),
            ));
        }
        info!("{}: {} released", self.label(), model_id);
        Ok(())
    }

    async fn generate(
        &self,
        model_id: &str,
        request: &GenerationRequest,
        sink: &ChunkSink,
        cancel: &CancellationToken,
    ) -> Result<String, GatewayError> {
        let mut options = self.options();
        options.insert("temperature".into(), json!(request.temperature));
        options.insert("num_predict".into(), json!(request.max_tokens));

        let body = json!({
            "model": model_id,
            "messages": request.messages,
            "stream": true,
            "keep_alive": KEEP_ALIVE,
            "options": options,
        });
        trace!("{} request body: {}", self.label(), body);

        let http = self
            .client
            .post(endpoint(&self.base_url, "api/chat"))
            .json(&body);
        let response = stream::send(self.label(), http, cancel).await?;

        let mut text = String::new();
        self.read_lines(response, cancel, "done", |line| {
            if let Some(delta) = line.pointer("/message/content").and_then(|c| c.as_str()) {
                sink.emit(delta);
                text.push_str(delta);
            }
            Ok(line.get("done").and_then(|d| d.as_bool()).unwrap_or(false))
        })
        .await?;
        Ok(text)
    }
}
