use super::registry::{BackendRegistry, LocalCatalogs};
use super::select_model;
use async_trait::async_trait;
use guestlink_application::{
    ACTIVE_MODEL_KEY, CapabilityProbe, ChunkSink, ConfigStore, GatewayError, GenerationBackend,
    GenerationService, LoadProgressNotifier, LocalEngine, NoBackendReason, NoLoadProgress,
};
use guestlink_domain::{
    BackendDescriptor, BackendKind, CompletionResult, GenerationRequest, LoadProgress, LoadStage,
    LocalModelState, credential_key,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Routes each generation to exactly one backend.
///
/// Owns the backend registry and the single local model slot. Selection
/// order per request:
///
///  1. the local model that is `Ready`
///  2. otherwise the recorded active model, loaded on demand
///  3. otherwise remote providers in registration order, skipping those
///     the last `initialize` marked unavailable or whose credential has
///     since been removed
///
/// Non-cancellation failures fall through to the next candidate unless the
/// failed attempt already streamed output. Cancellation stops everything.
pub struct GenerationRouter {
    probe: Arc<dyn CapabilityProbe>,
    store: Arc<dyn ConfigStore>,
    remotes: Vec<Arc<dyn GenerationBackend>>,
    engines: HashMap<BackendKind, Arc<dyn LocalEngine>>,
    catalogs: LocalCatalogs,
    registry: RwLock<BackendRegistry>,
    state: Mutex<LocalModelState>,
    progress: Arc<dyn LoadProgressNotifier>,
}

impl GenerationRouter {
    pub fn new(probe: Arc<dyn CapabilityProbe>, store: Arc<dyn ConfigStore>) -> Self {
        Self {
            probe,
            store,
            remotes: Vec::new(),
            engines: HashMap::new(),
            catalogs: LocalCatalogs::default(),
            registry: RwLock::new(BackendRegistry::default()),
            state: Mutex::new(LocalModelState::Unloaded),
            progress: Arc::new(NoLoadProgress),
        }
    }

    /// Register a remote provider. Registration order is priority order.
    pub fn with_remote(mut self, backend: Arc<dyn GenerationBackend>) -> Self {
        self.remotes.push(backend);
        self
    }

    pub fn with_local_engine(mut self, engine: Arc<dyn LocalEngine>) -> Self {
        self.engines.insert(engine.kind(), engine);
        self
    }

    pub fn with_catalogs(mut self, catalogs: LocalCatalogs) -> Self {
        self.catalogs = catalogs;
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn LoadProgressNotifier>) -> Self {
        self.progress = progress;
        self
    }

    /// Recompute the registry from the probe and the store.
    pub async fn initialize(&self) {
        let engine_kinds: Vec<BackendKind> = self.engines.keys().copied().collect();
        let registry = BackendRegistry::probe(
            self.probe.as_ref(),
            self.store.as_ref(),
            &self.remotes,
            &self.catalogs,
            &engine_kinds,
        )
        .await;
        let available = registry
            .list_backends()
            .iter()
            .filter(|d| d.available)
            .count();
        info!(
            "Router initialised: {} of {} backends available",
            available,
            registry.list_backends().len()
        );
        *self.registry.write().unwrap_or_else(|e| e.into_inner()) = registry;
    }

    pub fn list_backends(&self) -> Vec<BackendDescriptor> {
        self.registry
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .list_backends()
            .to_vec()
    }

    pub fn local_state(&self) -> LocalModelState {
        self.lock_state().clone()
    }

    /// Load `model_id` on the `kind` engine, replacing any resident model.
    pub async fn load_model(&self, kind: BackendKind, model_id: &str) -> Result<(), GatewayError> {
        self.load_model_cancellable(kind, model_id, &CancellationToken::new())
            .await
    }

    pub async fn load_model_cancellable(
        &self,
        kind: BackendKind,
        model_id: &str,
        cancel: &CancellationToken,
    ) -> Result<(), GatewayError> {
        if !kind.is_local() {
            return Err(GatewayError::Configuration(format!(
                "{} is not a local backend",
                kind
            )));
        }
        let model = self
            .catalogs
            .find(kind, model_id)
            .cloned()
            .ok_or_else(|| {
                GatewayError::Configuration(format!("unknown model '{}' for {}", model_id, kind))
            })?;
        self.ensure_local_available(kind)?;
        let engine = self.engine(kind)?;

        let previous = {
            let mut state = self.lock_state();
            match &*state {
                LocalModelState::Loading { .. } => return Err(GatewayError::AlreadyLoading),
                LocalModelState::Ready {
                    kind: k,
                    model_id: m,
                } if *k == kind && m == model_id => {
                    debug!("{} already resident on {}", model_id, kind);
                    return Ok(());
                }
                _ => {}
            }
            let previous = state.unload().map_err(|_| GatewayError::AlreadyLoading)?;
            state
                .begin_load(kind, model_id)
                .map_err(|_| GatewayError::AlreadyLoading)?;
            previous
        };

        if let Some((previous_kind, previous_id)) = previous {
            self.release(previous_kind, &previous_id).await;
        }

        info!("Loading {} on {}", model_id, kind);
        self.progress
            .on_progress(kind, model_id, LoadProgress::new(LoadStage::Preparing, 0.0));

        let outcome = if cancel.is_cancelled() {
            Err(GatewayError::Cancelled)
        } else {
            engine.load(&model, self.progress.as_ref(), cancel).await
        };

        match outcome {
            Ok(()) => {
                if let Err(e) = self.lock_state().finish_load(kind, model_id) {
                    warn!("Load bookkeeping out of step: {}", e);
                }
                self.progress
                    .on_progress(kind, model_id, LoadProgress::new(LoadStage::Ready, 1.0));
                if let Err(e) = self.store.set_value(ACTIVE_MODEL_KEY, model_id).await {
                    warn!("Could not record active model: {}", e);
                }
                info!("{} ready on {}", model_id, kind);
                Ok(())
            }
            Err(e) => {
                self.lock_state().fail_load(kind, model_id);
                self.progress.on_failed(kind, model_id, &e.to_string());
                warn!("Loading {} on {} failed: {}", model_id, kind, e);
                Err(e)
            }
        }
    }

    /// Drop the resident model. The slot is free as soon as this returns,
    /// even if the engine fails to release it.
    pub async fn unload(&self) -> Result<(), GatewayError> {
        let previous = self
            .lock_state()
            .unload()
            .map_err(|_| GatewayError::AlreadyLoading)?;
        if let Some((kind, model_id)) = previous {
            self.release(kind, &model_id).await;
        }
        Ok(())
    }

    pub async fn generate(
        &self,
        request: &GenerationRequest,
        sink: &ChunkSink,
        cancel: &CancellationToken,
    ) -> Result<CompletionResult, GatewayError> {
        request
            .validate()
            .map_err(|e| GatewayError::Configuration(e.to_string()))?;

        let mut failures: Vec<GatewayError> = Vec::new();

        if let Some((kind, model_id)) = self.local_candidate(cancel, &mut failures).await? {
            check_cancelled(cancel)?;
            let engine = self.engine(kind)?;
            debug!(request_id = request.id, "Routing to {} ({})", kind, model_id);
            match engine.generate(&model_id, request, sink, cancel).await {
                Ok(content) => {
                    return Ok(completion(request, kind.as_str(), &model_id, content, sink));
                }
                Err(e) => self.record_failure(e, sink, &mut failures)?,
            }
        }

        for backend in &self.remotes {
            check_cancelled(cancel)?;
            if !self.is_available(backend.id()) {
                debug!("Skipping {}: unavailable", backend.id());
                continue;
            }
            if !self.has_credential(backend.id()).await {
                debug!("Skipping {}: credential removed", backend.id());
                continue;
            }
            let model_id = select_model(
                backend.id(),
                &backend.models(),
                request.model_hint.as_deref(),
            )
            .map(str::to_string)
            .unwrap_or_default();
            debug!(request_id = request.id, "Routing to {}", backend.id());
            match backend.generate(request, sink, cancel).await {
                Ok(content) => {
                    return Ok(completion(request, backend.id(), &model_id, content, sink));
                }
                Err(e) => self.record_failure(e, sink, &mut failures)?,
            }
        }

        Err(exhausted(failures))
    }

    /// The local model to use, loading the recorded one if nothing is
    /// resident. Load failures are recorded and yield `None`.
    async fn local_candidate(
        &self,
        cancel: &CancellationToken,
        failures: &mut Vec<GatewayError>,
    ) -> Result<Option<(BackendKind, String)>, GatewayError> {
        let ready = self
            .lock_state()
            .ready()
            .map(|(kind, id)| (kind, id.to_string()));
        if ready.is_some() {
            return Ok(ready);
        }

        let recorded = match self.store.get_value(ACTIVE_MODEL_KEY).await {
            Ok(Some(id)) if !id.is_empty() => id,
            Ok(_) => return Ok(None),
            Err(e) => {
                warn!("Could not read recorded model: {}", e);
                return Ok(None);
            }
        };
        let Some(kind) = self.kind_for_recorded(&recorded) else {
            debug!("Recorded model {} has no usable local backend", recorded);
            return Ok(None);
        };

        check_cancelled(cancel)?;
        match self.load_model_cancellable(kind, &recorded, cancel).await {
            Ok(()) => Ok(Some((kind, recorded))),
            Err(GatewayError::Cancelled) => Err(GatewayError::Cancelled),
            Err(e) => {
                failures.push(e);
                Ok(None)
            }
        }
    }

    /// Accelerated when that catalog holds the id and the kind is
    /// available, else cpu under the same conditions.
    fn kind_for_recorded(&self, model_id: &str) -> Option<BackendKind> {
        [BackendKind::AcceleratedLocal, BackendKind::CpuLocal]
            .into_iter()
            .find(|&kind| {
                self.catalogs.find(kind, model_id).is_some()
                    && self.engines.contains_key(&kind)
                    && self.ensure_local_available(kind).is_ok()
            })
    }

    /// Keep a failure for the final report, or stop routing when the
    /// failure must not be retried elsewhere.
    fn record_failure(
        &self,
        error: GatewayError,
        sink: &ChunkSink,
        failures: &mut Vec<GatewayError>,
    ) -> Result<(), GatewayError> {
        if error.is_cancelled() {
            return Err(error);
        }
        if sink.emitted() > 0 {
            // The caller already saw output from this attempt.
            warn!("Backend failed mid-stream: {}", error);
            return Err(error);
        }
        warn!("Backend attempt failed: {}", error);
        failures.push(error);
        Ok(())
    }

    fn ensure_local_available(&self, kind: BackendKind) -> Result<(), GatewayError> {
        let registry = self.registry.read().unwrap_or_else(|e| e.into_inner());
        match registry.local(kind) {
            Some(d) if d.available => Ok(()),
            Some(d) => Err(GatewayError::Availability(match &d.unavailable_reason {
                Some(reason) => format!("{}: {}", kind, reason),
                None => format!("{} is unavailable", kind),
            })),
            None => Err(GatewayError::Availability(format!(
                "{} has not been probed",
                kind
            ))),
        }
    }

    fn engine(&self, kind: BackendKind) -> Result<Arc<dyn LocalEngine>, GatewayError> {
        self.engines
            .get(&kind)
            .cloned()
            .ok_or_else(|| GatewayError::Availability(format!("{} has no engine", kind)))
    }

    fn is_available(&self, id: &str) -> bool {
        self.registry
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .is_available(id)
    }

    async fn has_credential(&self, provider_id: &str) -> bool {
        matches!(
            self.store.get_value(&credential_key(provider_id)).await,
            Ok(Some(key)) if !key.trim().is_empty()
        )
    }

    async fn release(&self, kind: BackendKind, model_id: &str) {
        if let Some(engine) = self.engines.get(&kind)
            && let Err(e) = engine.unload(model_id).await
        {
            warn!("Releasing {} on {} failed: {}", model_id, kind, e);
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, LocalModelState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl GenerationService for GenerationRouter {
    async fn generate(
        &self,
        request: &GenerationRequest,
        sink: &ChunkSink,
        cancel: &CancellationToken,
    ) -> Result<CompletionResult, GatewayError> {
        GenerationRouter::generate(self, request, sink, cancel).await
    }
}

fn check_cancelled(cancel: &CancellationToken) -> Result<(), GatewayError> {
    if cancel.is_cancelled() {
        Err(GatewayError::Cancelled)
    } else {
        Ok(())
    }
}

fn completion(
    request: &GenerationRequest,
    backend_id: &str,
    model_id: &str,
    content: String,
    sink: &ChunkSink,
) -> CompletionResult {
    CompletionResult {
        request_id: request.id,
        backend_id: backend_id.to_string(),
        model_id: model_id.to_string(),
        content,
        chunk_count: sink.emitted(),
    }
}

/// Zero attempts: nothing configured. One: that attempt's error. More: all
/// of them.
fn exhausted(mut failures: Vec<GatewayError>) -> GatewayError {
    match failures.len() {
        0 => GatewayError::NoBackendAvailable(NoBackendReason::NothingConfigured),
        1 => failures.remove(0),
        _ => GatewayError::NoBackendAvailable(NoBackendReason::AllAttemptsFailed(
            failures.iter().map(|e| e.to_string()).collect(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::registry::tests::FixedProbe;
    use crate::store::MemoryConfigStore;
    use guestlink_domain::{ChatMessage, ModelDescriptor};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    // -- Mock backends ---------------------------------------------------------

    #[derive(Clone)]
    enum Behaviour {
        Stream(Vec<&'static str>),
        Fail(&'static str),
        FailAfter(Vec<&'static str>, &'static str),
        Hang,
    }

    async fn perform(
        name: &str,
        behaviour: &Behaviour,
        sink: &ChunkSink,
        cancel: &CancellationToken,
    ) -> Result<String, GatewayError> {
        match behaviour {
            Behaviour::Stream(chunks) => {
                for chunk in chunks {
                    sink.emit(chunk);
                }
                Ok(chunks.concat())
            }
            Behaviour::Fail(message) => Err(GatewayError::transport(name, *message)),
            Behaviour::FailAfter(chunks, message) => {
                for chunk in chunks {
                    sink.emit(chunk);
                }
                Err(GatewayError::transport(name, *message))
            }
            Behaviour::Hang => {
                cancel.cancelled().await;
                Err(GatewayError::Cancelled)
            }
        }
    }

    struct MockRemote {
        id: &'static str,
        behaviour: Behaviour,
        calls: AtomicUsize,
    }

    impl MockRemote {
        fn new(id: &'static str, behaviour: Behaviour) -> Arc<Self> {
            Arc::new(Self {
                id,
                behaviour,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl GenerationBackend for MockRemote {
        fn id(&self) -> &str {
            self.id
        }

        fn display_name(&self) -> &str {
            self.id
        }

        fn models(&self) -> Vec<ModelDescriptor> {
            vec![ModelDescriptor::remote(format!("{}-default", self.id), "Default")]
        }

        async fn generate(
            &self,
            _request: &GenerationRequest,
            sink: &ChunkSink,
            cancel: &CancellationToken,
        ) -> Result<String, GatewayError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            perform(self.id, &self.behaviour, sink, cancel).await
        }
    }

    struct MockEngine {
        kind: BackendKind,
        load_error: Option<&'static str>,
        behaviour: Behaviour,
        loads: Mutex<Vec<String>>,
        unloads: Mutex<Vec<String>>,
    }

    impl MockEngine {
        fn new(kind: BackendKind, behaviour: Behaviour) -> Arc<Self> {
            Arc::new(Self {
                kind,
                load_error: None,
                behaviour,
                loads: Mutex::new(Vec::new()),
                unloads: Mutex::new(Vec::new()),
            })
        }

        fn failing_load(kind: BackendKind, error: &'static str) -> Arc<Self> {
            Arc::new(Self {
                kind,
                load_error: Some(error),
                behaviour: Behaviour::Stream(vec![]),
                loads: Mutex::new(Vec::new()),
                unloads: Mutex::new(Vec::new()),
            })
        }

        fn loads(&self) -> Vec<String> {
            self.loads.lock().unwrap().clone()
        }

        fn unloads(&self) -> Vec<String> {
            self.unloads.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl LocalEngine for MockEngine {
        fn kind(&self) -> BackendKind {
            self.kind
        }

        async fn load(
            &self,
            model: &ModelDescriptor,
            progress: &dyn LoadProgressNotifier,
            _cancel: &CancellationToken,
        ) -> Result<(), GatewayError> {
            self.loads.lock().unwrap().push(model.id.clone());
            if let Some(error) = self.load_error {
                return Err(GatewayError::transport(self.kind.as_str(), error));
            }
            progress.on_progress(
                self.kind,
                &model.id,
                LoadProgress::new(LoadStage::Downloading, 0.5),
            );
            Ok(())
        }

        async fn unload(&self, model_id: &str) -> Result<(), GatewayError> {
            self.unloads.lock().unwrap().push(model_id.to_string());
            Ok(())
        }

        async fn generate(
            &self,
            _model_id: &str,
            _request: &GenerationRequest,
            sink: &ChunkSink,
            cancel: &CancellationToken,
        ) -> Result<String, GatewayError> {
            perform(self.kind.as_str(), &self.behaviour, sink, cancel).await
        }
    }

    #[derive(Default)]
    struct RecordingProgress {
        events: Mutex<Vec<(LoadStage, f32)>>,
        failures: Mutex<Vec<String>>,
    }

    impl LoadProgressNotifier for RecordingProgress {
        fn on_progress(&self, _kind: BackendKind, _model_id: &str, progress: LoadProgress) {
            self.events
                .lock()
                .unwrap()
                .push((progress.stage, progress.fraction));
        }

        fn on_failed(&self, _kind: BackendKind, _model_id: &str, error: &str) {
            self.failures.lock().unwrap().push(error.to_string());
        }
    }

    // -- Helpers -----------------------------------------------------------------

    async fn store_with_keys(ids: &[&str]) -> Arc<MemoryConfigStore> {
        let store = Arc::new(MemoryConfigStore::new());
        for id in ids {
            store.set_value(&credential_key(id), "key").await.unwrap();
        }
        store
    }

    fn request() -> GenerationRequest {
        GenerationRequest::new(1, vec![ChatMessage::user("hi")])
    }

    async fn router(
        store: Arc<MemoryConfigStore>,
        build: impl FnOnce(GenerationRouter) -> GenerationRouter,
    ) -> GenerationRouter {
        let router = build(GenerationRouter::new(
            Arc::new(FixedProbe::everything()),
            store,
        ));
        router.initialize().await;
        router
    }

    // -- Priority and fallback ---------------------------------------------------

    #[tokio::test]
    async fn first_credentialed_remote_wins() {
        let openai = MockRemote::new("openai", Behaviour::Stream(vec!["from openai"]));
        let anthropic = MockRemote::new("anthropic", Behaviour::Stream(vec!["from anthropic"]));
        let store = store_with_keys(&["openai", "anthropic"]).await;
        let router = router(store, |r| {
            r.with_remote(openai.clone()).with_remote(anthropic.clone())
        })
        .await;

        let result = router
            .generate(&request(), &ChunkSink::discard(1), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.backend_id, "openai");
        assert_eq!(result.model_id, "openai-default");
        assert_eq!(result.content, "from openai");
        assert_eq!(anthropic.calls(), 0);
    }

    #[tokio::test]
    async fn providers_without_credentials_are_skipped() {
        let openai = MockRemote::new("openai", Behaviour::Stream(vec!["x"]));
        let anthropic = MockRemote::new("anthropic", Behaviour::Stream(vec!["y"]));
        let store = store_with_keys(&["anthropic"]).await;
        let router = router(store, |r| {
            r.with_remote(openai.clone()).with_remote(anthropic.clone())
        })
        .await;

        let result = router
            .generate(&request(), &ChunkSink::discard(1), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.backend_id, "anthropic");
        assert_eq!(openai.calls(), 0);
    }

    #[tokio::test]
    async fn failing_provider_falls_back_to_the_next() {
        let openai = MockRemote::new("openai", Behaviour::Fail("HTTP 500: boom"));
        let anthropic = MockRemote::new("anthropic", Behaviour::Stream(vec!["Hel", "lo"]));
        let store = store_with_keys(&["openai", "anthropic"]).await;
        let router = router(store, |r| {
            r.with_remote(openai.clone()).with_remote(anthropic.clone())
        })
        .await;
        let (sink, mut rx) = ChunkSink::channel(1);

        let result = router
            .generate(&request(), &sink, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.backend_id, "anthropic");
        assert_eq!(result.chunk_count, 2);
        assert_eq!(rx.recv().await.unwrap().content_delta, "Hel");
        assert_eq!(openai.calls(), 1);
    }

    #[tokio::test]
    async fn malformed_ok_response_falls_back_to_the_next_provider() {
        use crate::providers::anthropic::AnthropicProvider;
        use crate::providers::openai::OpenAiCompatibleProvider;
        use crate::providers::test_server::serve_once;

        let (openai_url, _openai_request) = serve_once(
            200,
            "text/html",
            "<html><body>captive portal</body></html>".to_string(),
        )
        .await;
        let anthropic_body = concat!(
            "event: content_block_delta\n",
            r#"data: {"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"fine"}}"#,
            "\n\n",
            "event: message_stop\n",
            r#"data: {"type":"message_stop"}"#,
            "\n\n",
        );
        let (anthropic_url, _anthropic_request) =
            serve_once(200, "text/event-stream", anthropic_body.to_string()).await;

        let store = store_with_keys(&["openai", "anthropic"]).await;
        let openai = OpenAiCompatibleProvider::new(
            "openai",
            "OpenAI",
            &openai_url,
            vec![ModelDescriptor::remote("gpt-4o-mini", "GPT-4o mini")],
            store.clone(),
        );
        let anthropic = AnthropicProvider::new(
            "anthropic",
            "Anthropic",
            &anthropic_url,
            vec![ModelDescriptor::remote("claude-3-5-haiku-latest", "Claude 3.5 Haiku")],
            store.clone(),
        );
        let router = router(store, |r| {
            r.with_remote(Arc::new(openai)).with_remote(Arc::new(anthropic))
        })
        .await;

        let result = router
            .generate(&request(), &ChunkSink::discard(1), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.backend_id, "anthropic");
        assert_eq!(result.content, "fine");
    }

    #[tokio::test]
    async fn single_failing_provider_returns_its_own_error() {
        let openai = MockRemote::new("openai", Behaviour::Fail("HTTP 500: Internal Server Error"));
        let store = store_with_keys(&["openai"]).await;
        let router = router(store, |r| r.with_remote(openai.clone())).await;

        let err = router
            .generate(&request(), &ChunkSink::discard(1), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            GatewayError::transport("openai", "HTTP 500: Internal Server Error")
        );
    }

    #[tokio::test]
    async fn several_failures_are_all_reported() {
        let openai = MockRemote::new("openai", Behaviour::Fail("HTTP 500"));
        let anthropic = MockRemote::new("anthropic", Behaviour::Fail("HTTP 529"));
        let store = store_with_keys(&["openai", "anthropic"]).await;
        let router = router(store, |r| {
            r.with_remote(openai.clone()).with_remote(anthropic.clone())
        })
        .await;

        let err = router
            .generate(&request(), &ChunkSink::discard(1), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            GatewayError::NoBackendAvailable(NoBackendReason::AllAttemptsFailed(vec![
                "openai: HTTP 500".into(),
                "anthropic: HTTP 529".into(),
            ]))
        );
    }

    #[tokio::test]
    async fn nothing_configured_is_actionable() {
        let openai = MockRemote::new("openai", Behaviour::Stream(vec!["x"]));
        let router = router(Arc::new(MemoryConfigStore::new()), |r| {
            r.with_remote(openai.clone())
        })
        .await;

        let err = router
            .generate(&request(), &ChunkSink::discard(1), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            GatewayError::NoBackendAvailable(NoBackendReason::NothingConfigured)
        );
        assert_eq!(openai.calls(), 0);
    }

    #[tokio::test]
    async fn failure_after_output_does_not_fall_back() {
        let openai = MockRemote::new("openai", Behaviour::FailAfter(vec!["half"], "reset"));
        let anthropic = MockRemote::new("anthropic", Behaviour::Stream(vec!["whole"]));
        let store = store_with_keys(&["openai", "anthropic"]).await;
        let router = router(store, |r| {
            r.with_remote(openai.clone()).with_remote(anthropic.clone())
        })
        .await;

        let err = router
            .generate(&request(), &ChunkSink::discard(1), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err, GatewayError::transport("openai", "reset"));
        assert_eq!(anthropic.calls(), 0);
    }

    #[tokio::test]
    async fn cancellation_stops_without_fallback() {
        let openai = MockRemote::new("openai", Behaviour::Hang);
        let anthropic = MockRemote::new("anthropic", Behaviour::Stream(vec!["y"]));
        let store = store_with_keys(&["openai", "anthropic"]).await;
        let router = Arc::new(
            router(store, |r| {
                r.with_remote(openai.clone()).with_remote(anthropic.clone())
            })
            .await,
        );
        let cancel = CancellationToken::new();

        let task = {
            let router = Arc::clone(&router);
            let cancel = cancel.clone();
            tokio::spawn(async move {
                router
                    .generate(&request(), &ChunkSink::discard(1), &cancel)
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();

        let result = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result, Err(GatewayError::Cancelled));
        assert_eq!(anthropic.calls(), 0);
    }

    #[tokio::test]
    async fn already_cancelled_token_tries_nothing() {
        let openai = MockRemote::new("openai", Behaviour::Stream(vec!["x"]));
        let store = store_with_keys(&["openai"]).await;
        let router = router(store, |r| r.with_remote(openai.clone())).await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = router
            .generate(&request(), &ChunkSink::discard(1), &cancel)
            .await;
        assert_eq!(result, Err(GatewayError::Cancelled));
        assert_eq!(openai.calls(), 0);
    }

    #[tokio::test]
    async fn invalid_request_is_rejected_up_front() {
        let openai = MockRemote::new("openai", Behaviour::Stream(vec!["x"]));
        let store = store_with_keys(&["openai"]).await;
        let router = router(store, |r| r.with_remote(openai.clone())).await;

        let empty = GenerationRequest::new(1, vec![]);
        let err = router
            .generate(&empty, &ChunkSink::discard(1), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Configuration(_)));
        assert_eq!(openai.calls(), 0);
    }

    // -- Local lifecycle ---------------------------------------------------------

    #[tokio::test]
    async fn ready_local_model_takes_priority() {
        let engine = MockEngine::new(BackendKind::CpuLocal, Behaviour::Stream(vec!["local"]));
        let openai = MockRemote::new("openai", Behaviour::Stream(vec!["remote"]));
        let store = store_with_keys(&["openai"]).await;
        let router = router(store, |r| {
            r.with_local_engine(engine.clone())
                .with_remote(openai.clone())
        })
        .await;

        router
            .load_model(BackendKind::CpuLocal, "qwen2.5:0.5b")
            .await
            .unwrap();
        let result = router
            .generate(&request(), &ChunkSink::discard(1), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.backend_id, "cpu-local");
        assert_eq!(result.model_id, "qwen2.5:0.5b");
        assert_eq!(openai.calls(), 0);
    }

    #[tokio::test]
    async fn local_failure_falls_through_to_remote() {
        let engine = MockEngine::new(BackendKind::CpuLocal, Behaviour::Fail("out of memory"));
        let openai = MockRemote::new("openai", Behaviour::Stream(vec!["remote"]));
        let store = store_with_keys(&["openai"]).await;
        let router = router(store, |r| {
            r.with_local_engine(engine.clone())
                .with_remote(openai.clone())
        })
        .await;
        router
            .load_model(BackendKind::CpuLocal, "qwen2.5:0.5b")
            .await
            .unwrap();

        let result = router
            .generate(&request(), &ChunkSink::discard(1), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.backend_id, "openai");
    }

    #[tokio::test]
    async fn load_emits_progress_and_records_the_model() {
        let engine = MockEngine::new(BackendKind::AcceleratedLocal, Behaviour::Stream(vec![]));
        let progress = Arc::new(RecordingProgress::default());
        let store = Arc::new(MemoryConfigStore::new());
        let router = router(store.clone(), |r| {
            r.with_local_engine(engine.clone())
                .with_progress(progress.clone())
        })
        .await;

        router
            .load_model(BackendKind::AcceleratedLocal, "llama3.2:3b")
            .await
            .unwrap();

        assert_eq!(
            router.local_state(),
            LocalModelState::Ready {
                kind: BackendKind::AcceleratedLocal,
                model_id: "llama3.2:3b".into()
            }
        );
        assert_eq!(
            *progress.events.lock().unwrap(),
            vec![
                (LoadStage::Preparing, 0.0),
                (LoadStage::Downloading, 0.5),
                (LoadStage::Ready, 1.0),
            ]
        );
        assert_eq!(
            store.get_value(ACTIVE_MODEL_KEY).await.unwrap().as_deref(),
            Some("llama3.2:3b")
        );
    }

    #[tokio::test]
    async fn loading_a_different_model_unloads_the_previous_one() {
        let engine = MockEngine::new(BackendKind::CpuLocal, Behaviour::Stream(vec![]));
        let router = router(Arc::new(MemoryConfigStore::new()), |r| {
            r.with_local_engine(engine.clone())
        })
        .await;

        router
            .load_model(BackendKind::CpuLocal, "qwen2.5:0.5b")
            .await
            .unwrap();
        router
            .load_model(BackendKind::CpuLocal, "qwen2.5:0.5b")
            .await
            .unwrap();
        router
            .load_model(BackendKind::CpuLocal, "llama3.2:1b")
            .await
            .unwrap();

        assert_eq!(engine.loads(), vec!["qwen2.5:0.5b", "llama3.2:1b"]);
        assert_eq!(engine.unloads(), vec!["qwen2.5:0.5b"]);
    }

    #[tokio::test]
    async fn unknown_model_and_unavailable_kind_are_rejected() {
        let engine = MockEngine::new(BackendKind::CpuLocal, Behaviour::Stream(vec![]));
        let router = router(Arc::new(MemoryConfigStore::new()), |r| {
            r.with_local_engine(engine.clone())
        })
        .await;

        assert!(matches!(
            router.load_model(BackendKind::CpuLocal, "gpt-9").await,
            Err(GatewayError::Configuration(_))
        ));
        // No accelerated engine registered.
        assert!(matches!(
            router
                .load_model(BackendKind::AcceleratedLocal, "llama3.2:3b")
                .await,
            Err(GatewayError::Availability(_))
        ));
        assert!(matches!(
            router.load_model(BackendKind::Remote, "x").await,
            Err(GatewayError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn failed_load_returns_to_unloaded() {
        let engine = MockEngine::failing_load(BackendKind::CpuLocal, "download interrupted");
        let progress = Arc::new(RecordingProgress::default());
        let store = Arc::new(MemoryConfigStore::new());
        let router = router(store.clone(), |r| {
            r.with_local_engine(engine.clone())
                .with_progress(progress.clone())
        })
        .await;

        let err = router
            .load_model(BackendKind::CpuLocal, "qwen2.5:0.5b")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("download interrupted"));
        assert_eq!(router.local_state(), LocalModelState::Unloaded);
        assert_eq!(progress.failures.lock().unwrap().len(), 1);
        assert_eq!(store.get_value(ACTIVE_MODEL_KEY).await.unwrap(), None);
    }

    #[tokio::test]
    async fn second_load_while_loading_is_rejected() {
        let engine = MockEngine::new(BackendKind::CpuLocal, Behaviour::Stream(vec![]));
        let router = router(Arc::new(MemoryConfigStore::new()), |r| {
            r.with_local_engine(engine.clone())
        })
        .await;
        router
            .lock_state()
            .begin_load(BackendKind::CpuLocal, "qwen2.5:0.5b")
            .unwrap();

        assert_eq!(
            router.load_model(BackendKind::CpuLocal, "llama3.2:1b").await,
            Err(GatewayError::AlreadyLoading)
        );
        assert_eq!(router.unload().await, Err(GatewayError::AlreadyLoading));
    }

    #[tokio::test]
    async fn recorded_model_is_loaded_on_demand() {
        let engine = MockEngine::new(BackendKind::CpuLocal, Behaviour::Stream(vec!["auto"]));
        let store = Arc::new(MemoryConfigStore::new());
        store
            .set_value(ACTIVE_MODEL_KEY, "llama3.2:1b")
            .await
            .unwrap();
        let router = router(store, |r| r.with_local_engine(engine.clone())).await;

        let result = router
            .generate(&request(), &ChunkSink::discard(1), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.backend_id, "cpu-local");
        assert_eq!(result.content, "auto");
        assert_eq!(engine.loads(), vec!["llama3.2:1b"]);
    }

    #[tokio::test]
    async fn recorded_model_prefers_the_accelerated_kind() {
        let accelerated =
            MockEngine::new(BackendKind::AcceleratedLocal, Behaviour::Stream(vec!["gpu"]));
        let cpu = MockEngine::new(BackendKind::CpuLocal, Behaviour::Stream(vec!["cpu"]));
        let store = Arc::new(MemoryConfigStore::new());
        store
            .set_value(ACTIVE_MODEL_KEY, "shared:1b")
            .await
            .unwrap();
        let shared = ModelDescriptor::remote("shared:1b", "Shared");
        let router = router(store, |r| {
            r.with_local_engine(accelerated.clone())
                .with_local_engine(cpu.clone())
                .with_catalogs(LocalCatalogs {
                    accelerated: vec![shared.clone()],
                    cpu: vec![shared],
                })
        })
        .await;

        let result = router
            .generate(&request(), &ChunkSink::discard(1), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.backend_id, "accelerated-local");
        assert!(cpu.loads().is_empty());
    }

    #[tokio::test]
    async fn failed_auto_load_counts_as_an_attempt() {
        let engine = MockEngine::failing_load(BackendKind::CpuLocal, "disk full");
        let store = Arc::new(MemoryConfigStore::new());
        store
            .set_value(ACTIVE_MODEL_KEY, "llama3.2:1b")
            .await
            .unwrap();
        let router = router(store, |r| r.with_local_engine(engine.clone())).await;

        let err = router
            .generate(&request(), &ChunkSink::discard(1), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err, GatewayError::transport("cpu-local", "disk full"));
    }

    #[tokio::test]
    async fn unload_frees_the_slot() {
        let engine = MockEngine::new(BackendKind::CpuLocal, Behaviour::Stream(vec![]));
        let router = router(Arc::new(MemoryConfigStore::new()), |r| {
            r.with_local_engine(engine.clone())
        })
        .await;
        router
            .load_model(BackendKind::CpuLocal, "qwen2.5:0.5b")
            .await
            .unwrap();

        router.unload().await.unwrap();
        assert_eq!(router.local_state(), LocalModelState::Unloaded);
        assert_eq!(engine.unloads(), vec!["qwen2.5:0.5b"]);
        // Unloading again is a no-op.
        router.unload().await.unwrap();
        assert_eq!(engine.unloads().len(), 1);
    }

    #[tokio::test]
    async fn list_backends_reflects_initialize() {
        let openai = MockRemote::new("openai", Behaviour::Stream(vec![]));
        let store = store_with_keys(&[]).await;
        let router = GenerationRouter::new(Arc::new(FixedProbe::nothing()), store.clone())
            .with_remote(openai);
        assert!(router.list_backends().is_empty());

        router.initialize().await;
        let backends = router.list_backends();
        assert_eq!(backends.len(), 3);
        assert!(backends.iter().all(|d| !d.available));

        store.set_value(&credential_key("openai"), "k").await.unwrap();
        router.initialize().await;
        assert!(router.list_backends()[2].available);
    }

    #[tokio::test]
    async fn remotes_follow_the_registry_snapshot() {
        let openai = MockRemote::new("openai", Behaviour::Stream(vec!["late"]));
        let store = store_with_keys(&[]).await;
        let router = router(store.clone(), |r| r.with_remote(openai.clone())).await;

        // A key stored after initialize is not picked up until the next one.
        store.set_value(&credential_key("openai"), "k").await.unwrap();
        let err = router
            .generate(&request(), &ChunkSink::discard(1), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            GatewayError::NoBackendAvailable(NoBackendReason::NothingConfigured)
        );
        assert_eq!(openai.calls(), 0);

        router.initialize().await;
        let result = router
            .generate(&request(), &ChunkSink::discard(1), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.backend_id, "openai");
    }

    #[tokio::test]
    async fn removed_credential_is_skipped_without_reinitialising() {
        let openai = MockRemote::new("openai", Behaviour::Stream(vec!["x"]));
        let store = store_with_keys(&["openai"]).await;
        let router = router(store.clone(), |r| r.with_remote(openai.clone())).await;

        store.set_value(&credential_key("openai"), " ").await.unwrap();
        let err = router
            .generate(&request(), &ChunkSink::discard(1), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            GatewayError::NoBackendAvailable(NoBackendReason::NothingConfigured)
        );
        assert_eq!(openai.calls(), 0);
    }
}
