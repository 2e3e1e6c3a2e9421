//! Generation backends and the router that picks between them.
//!
//! Remote providers implement [`GenerationBackend`]; the local daemon
//! implements [`LocalEngine`](guestlink_application::LocalEngine). The
//! [`GenerationRouter`](routing::GenerationRouter) owns the
//! [`BackendRegistry`](registry::BackendRegistry) and the single local
//! model slot.

pub mod anthropic;
pub mod ollama;
pub mod openai;
pub mod registry;
pub mod routing;
pub mod stream;

#[cfg(test)]
pub(crate) mod test_server;

pub use anthropic::AnthropicProvider;
pub use ollama::OllamaEngine;
pub use openai::OpenAiCompatibleProvider;
pub use registry::BackendRegistry;
pub use routing::GenerationRouter;

use guestlink_application::{ConfigStore, GatewayError};
use guestlink_domain::{ModelDescriptor, UnavailableReason, credential_key};
use std::time::Duration;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Shared HTTP client settings for every adapter.
pub(crate) fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .user_agent(concat!("guestlink/", env!("CARGO_PKG_VERSION")))
        .build()
        .unwrap_or_else(|e| {
            tracing::warn!("Falling back to default HTTP client: {}", e);
            reqwest::Client::new()
        })
}

/// Join a base URL and a path without doubling the slash.
pub(crate) fn endpoint(base_url: &str, path: &str) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), path.trim_start_matches('/'))
}

/// The API key for `provider_id`, read fresh from the store on every call.
pub(crate) async fn credential(
    store: &dyn ConfigStore,
    provider_id: &str,
) -> Result<String, GatewayError> {
    match store.get_value(&credential_key(provider_id)).await {
        Ok(Some(key)) if !key.trim().is_empty() => Ok(key),
        Ok(_) => Err(GatewayError::Availability(format!(
            "{}: {}",
            provider_id,
            UnavailableReason::MissingCredential
        ))),
        Err(e) => Err(GatewayError::Availability(format!("{}: {}", provider_id, e))),
    }
}

/// The model a request should use on a backend with `catalog`.
///
/// A hint is honoured when the catalog offers it; otherwise the first
/// (default) model is used.
pub(crate) fn select_model<'a>(
    provider_id: &str,
    catalog: &'a [ModelDescriptor],
    hint: Option<&str>,
) -> Result<&'a str, GatewayError> {
    if let Some(hint) = hint
        && let Some(model) = catalog.iter().find(|m| m.id == hint)
    {
        return Ok(&model.id);
    }
    catalog.first().map(|m| m.id.as_str()).ok_or_else(|| {
        GatewayError::Configuration(format!("{} has no models configured", provider_id))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> Vec<ModelDescriptor> {
        vec![
            ModelDescriptor::remote("gpt-4o-mini", "GPT-4o mini"),
            ModelDescriptor::remote("gpt-4o", "GPT-4o"),
        ]
    }

    #[test]
    fn hint_in_catalog_is_used() {
        assert_eq!(select_model("openai", &catalog(), Some("gpt-4o")).unwrap(), "gpt-4o");
    }

    #[test]
    fn unknown_hint_falls_back_to_default() {
        assert_eq!(
            select_model("openai", &catalog(), Some("llama3.2:1b")).unwrap(),
            "gpt-4o-mini"
        );
        assert_eq!(select_model("openai", &catalog(), None).unwrap(), "gpt-4o-mini");
    }

    #[test]
    fn empty_catalog_is_a_configuration_error() {
        assert!(matches!(
            select_model("custom", &[], None),
            Err(GatewayError::Configuration(_))
        ));
    }

    #[test]
    fn endpoint_joins_cleanly() {
        assert_eq!(
            endpoint("https://api.openai.com/v1/", "/chat/completions"),
            "https://api.openai.com/v1/chat/completions"
        );
    }
}
