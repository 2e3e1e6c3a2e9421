//! Provider configuration from TOML (`[providers]` section)

use serde::{Deserialize, Serialize};

/// Wire dialect a provider speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderDialect {
    OpenAi,
    Anthropic,
}

/// One remote provider, resolved from the file config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderEntry {
    pub id: String,
    pub display_name: String,
    pub dialect: ProviderDialect,
    pub base_url: String,
    pub models: Vec<String>,
    pub api_key_env: Option<String>,
    pub api_key: Option<String>,
    pub api_version: Option<String>,
}

/// OpenAI API provider configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileOpenAiConfig {
    pub enabled: bool,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    /// Direct API key (prefer the environment variable).
    pub api_key: Option<String>,
    pub base_url: String,
    /// Offered models; the first is the default.
    pub models: Vec<String>,
}

impl Default for FileOpenAiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_key_env: "OPENAI_API_KEY".to_string(),
            api_key: None,
            base_url: "https://api.openai.com/v1".to_string(),
            models: vec!["gpt-4o-mini".to_string(), "gpt-4o".to_string()],
        }
    }
}

/// Anthropic API provider configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileAnthropicConfig {
    pub enabled: bool,
    pub api_key_env: String,
    pub api_key: Option<String>,
    pub base_url: String,
    /// `anthropic-version` header.
    pub api_version: String,
    pub models: Vec<String>,
}

impl Default for FileAnthropicConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_key_env: "ANTHROPIC_API_KEY".to_string(),
            api_key: None,
            base_url: "https://api.anthropic.com".to_string(),
            api_version: "2023-06-01".to_string(),
            models: vec![
                "claude-3-5-haiku-latest".to_string(),
                "claude-sonnet-4-5".to_string(),
            ],
        }
    }
}

/// Additional OpenAI-compatible endpoint (`[[providers.custom]]`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileCustomProviderConfig {
    pub id: String,
    pub display_name: Option<String>,
    pub base_url: String,
    pub api_key_env: Option<String>,
    pub api_key: Option<String>,
    pub models: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileProvidersConfig {
    /// Priority order by id. Unlisted providers follow in declaration order.
    pub order: Vec<String>,
    pub openai: FileOpenAiConfig,
    pub anthropic: FileAnthropicConfig,
    pub custom: Vec<FileCustomProviderConfig>,
}

impl FileProvidersConfig {
    /// Enabled providers in priority order.
    pub fn entries(&self) -> Vec<ProviderEntry> {
        let mut declared = Vec::new();
        if self.openai.enabled {
            declared.push(ProviderEntry {
                id: "openai".to_string(),
                display_name: "OpenAI".to_string(),
                dialect: ProviderDialect::OpenAi,
                base_url: self.openai.base_url.clone(),
                models: self.openai.models.clone(),
                api_key_env: Some(self.openai.api_key_env.clone()),
                api_key: self.openai.api_key.clone(),
                api_version: None,
            });
        }
        if self.anthropic.enabled {
            declared.push(ProviderEntry {
                id: "anthropic".to_string(),
                display_name: "Anthropic".to_string(),
                dialect: ProviderDialect::Anthropic,
                base_url: self.anthropic.base_url.clone(),
                models: self.anthropic.models.clone(),
                api_key_env: Some(self.anthropic.api_key_env.clone()),
                api_key: self.anthropic.api_key.clone(),
                api_version: Some(self.anthropic.api_version.clone()),
            });
        }
        for custom in &self.custom {
            declared.push(ProviderEntry {
                id: custom.id.clone(),
                display_name: custom.display_name.clone().unwrap_or_else(|| custom.id.clone()),
                dialect: ProviderDialect::OpenAi,
                base_url: custom.base_url.clone(),
                models: custom.models.clone(),
                api_key_env: custom.api_key_env.clone(),
                api_key: custom.api_key.clone(),
                api_version: None,
            });
        }

        let mut ordered = Vec::with_capacity(declared.len());
        for id in &self.order {
            if let Some(pos) = declared.iter().position(|e| &e.id == id) {
                ordered.push(declared.remove(pos));
            }
        }
        ordered.extend(declared);
        ordered
    }
}
