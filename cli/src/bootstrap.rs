//! Builds the host-side object graph from the loaded configuration.

use anyhow::{Context, Result};
use guestlink_application::{
    ACTIVE_MODEL_KEY, ConfigStore, GenerationBackend, LoadProgressNotifier, LocalEngine,
};
use guestlink_domain::{BackendKind, ModelDescriptor};
use guestlink_infrastructure::{
    AnthropicProvider, ConfigLoader, FileConfig, GenerationRouter, MemoryConfigStore,
    OllamaEngine, OpenAiCompatibleProvider, ProviderDialect, ProviderEntry,
    SystemCapabilityProbe,
};
use std::sync::Arc;
use tracing::{debug, info};

/// Open the key-value store and seed it with credentials and the configured
/// active model.
///
/// A model recorded by an earlier `load` wins over `local.active_model`.
pub async fn build_store(
    config: &FileConfig,
    env: impl Fn(&str) -> Option<String>,
) -> Result<Arc<MemoryConfigStore>> {
    let state_file = config
        .local
        .state_file
        .clone()
        .or_else(ConfigLoader::default_state_path);
    let store = match state_file {
        Some(path) => MemoryConfigStore::with_state_file(&path)
            .with_context(|| format!("opening state file {}", path.display()))?,
        None => MemoryConfigStore::new(),
    };

    for (key, value) in config.store_entries(env) {
        if key == ACTIVE_MODEL_KEY && store.get_value(&key).await?.is_some() {
            debug!("Keeping recorded active model over configured one");
            continue;
        }
        store.insert(key, value);
    }
    Ok(Arc::new(store))
}

/// One backend per configured provider entry, in routing order.
pub fn remote_backends(
    entries: &[ProviderEntry],
    store: Arc<dyn ConfigStore>,
) -> Vec<Arc<dyn GenerationBackend>> {
    entries
        .iter()
        .map(|entry| {
            let models: Vec<ModelDescriptor> = entry
                .models
                .iter()
                .map(|m| ModelDescriptor::remote(m.as_str(), m.as_str()))
                .collect();
            let backend: Arc<dyn GenerationBackend> = match entry.dialect {
                ProviderDialect::Anthropic => {
                    let mut provider = AnthropicProvider::new(
                        &entry.id,
                        &entry.display_name,
                        &entry.base_url,
                        models,
                        Arc::clone(&store),
                    );
                    if let Some(version) = &entry.api_version {
                        provider = provider.with_api_version(version);
                    }
                    Arc::new(provider)
                }
                ProviderDialect::OpenAi => Arc::new(OpenAiCompatibleProvider::new(
                    &entry.id,
                    &entry.display_name,
                    &entry.base_url,
                    models,
                    Arc::clone(&store),
                )),
            };
            backend
        })
        .collect()
}

/// Router with every configured backend registered and probed.
pub async fn build_router(
    config: &FileConfig,
    store: Arc<dyn ConfigStore>,
    progress: Arc<dyn LoadProgressNotifier>,
) -> GenerationRouter {
    let probe = SystemCapabilityProbe::new()
        .with_accelerator(config.local.accelerated)
        .with_cpu(config.local.cpu);

    let mut router = GenerationRouter::new(Arc::new(probe), Arc::clone(&store))
        .with_progress(progress);
    for kind in [BackendKind::AcceleratedLocal, BackendKind::CpuLocal] {
        let engine: Arc<dyn LocalEngine> =
            Arc::new(OllamaEngine::new(kind, &config.local.endpoint));
        router = router.with_local_engine(engine);
    }
    for backend in remote_backends(&config.providers.entries(), store) {
        router = router.with_remote(backend);
    }

    router.initialize().await;
    info!("Configured {} backends", router.list_backends().len());
    router
}
