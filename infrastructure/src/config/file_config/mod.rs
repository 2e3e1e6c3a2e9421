//! Raw TOML configuration data types
//!
//! These structs mirror the config file exactly and are deserialized
//! directly by the loader.

mod local;
mod log;
mod providers;
mod rpc;

pub use local::FileLocalConfig;
pub use log::FileLogConfig;
pub use providers::{
    FileAnthropicConfig, FileCustomProviderConfig, FileOpenAiConfig, FileProvidersConfig,
    ProviderDialect, ProviderEntry,
};
pub use rpc::FileRpcConfig;

use guestlink_application::ACTIVE_MODEL_KEY;
use guestlink_domain::credential_key;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

/// Smallest frame body limit that still fits ordinary requests.
const MIN_FRAME_BODY: usize = 1024;

/// Configuration validation errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigValidationError {
    #[error("provider id cannot be empty")]
    EmptyProviderId,

    #[error("provider '{0}' is defined more than once")]
    DuplicateProvider(String),

    #[error("providers.order names unknown provider '{0}'")]
    UnknownProviderInOrder(String),

    #[error("provider '{0}' has an empty model name")]
    EmptyModelName(String),

    #[error("provider '{provider}' has an invalid base_url '{url}'")]
    InvalidBaseUrl { provider: String, url: String },

    #[error("rpc.max_frame_body must be at least 1024 bytes (got {0})")]
    FrameBodyTooSmall(usize),
}

/// Complete file configuration (raw TOML structure)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub providers: FileProvidersConfig,
    pub local: FileLocalConfig,
    pub rpc: FileRpcConfig,
    pub log: FileLogConfig,
}

impl FileConfig {
    /// Validate the configuration, stopping at the first problem.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        let entries = self.providers.entries();
        let mut seen = HashSet::new();
        for entry in &entries {
            if entry.id.trim().is_empty() {
                return Err(ConfigValidationError::EmptyProviderId);
            }
            if !seen.insert(entry.id.as_str()) {
                return Err(ConfigValidationError::DuplicateProvider(entry.id.clone()));
            }
            if entry.models.iter().any(|m| m.trim().is_empty()) {
                return Err(ConfigValidationError::EmptyModelName(entry.id.clone()));
            }
            if !(entry.base_url.starts_with("http://") || entry.base_url.starts_with("https://")) {
                return Err(ConfigValidationError::InvalidBaseUrl {
                    provider: entry.id.clone(),
                    url: entry.base_url.clone(),
                });
            }
        }
        for id in &self.providers.order {
            let known = seen.contains(id.as_str())
                || (id == "openai" && !self.providers.openai.enabled)
                || (id == "anthropic" && !self.providers.anthropic.enabled);
            if !known {
                return Err(ConfigValidationError::UnknownProviderInOrder(id.clone()));
            }
        }
        if self.rpc.max_frame_body < MIN_FRAME_BODY {
            return Err(ConfigValidationError::FrameBodyTooSmall(self.rpc.max_frame_body));
        }
        Ok(())
    }

    /// Store entries to seed at start-up: one credential per provider that
    /// has a key (inline key first, then its environment variable), plus the
    /// configured active model.
    pub fn store_entries(&self, env: impl Fn(&str) -> Option<String>) -> Vec<(String, String)> {
        let mut entries = Vec::new();
        for provider in self.providers.entries() {
            let key = provider
                .api_key
                .clone()
                .filter(|k| !k.trim().is_empty())
                .or_else(|| provider.api_key_env.as_deref().and_then(&env))
                .filter(|k| !k.trim().is_empty());
            if let Some(key) = key {
                entries.push((credential_key(&provider.id), key));
            }
        }
        if let Some(model) = &self.local.active_model {
            entries.push((ACTIVE_MODEL_KEY.to_string(), model.clone()));
        }
        entries
    }
}
