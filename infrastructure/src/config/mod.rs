//! Configuration file loading for guestlink
//!
//! Sources, highest priority first:
//!
//! 1. `--config <path>`
//! 2. `GUESTLINK_*` environment variables (`__` separates nesting)
//! 3. Project: `./guestlink.toml`
//! 4. Global: `$XDG_CONFIG_HOME/guestlink/config.toml`
//! 5. Built-in defaults

mod file_config;
mod loader;

pub use file_config::{
    ConfigValidationError, FileAnthropicConfig, FileConfig, FileCustomProviderConfig,
    FileLocalConfig, FileLogConfig, FileOpenAiConfig, FileProvidersConfig, FileRpcConfig,
    ProviderDialect, ProviderEntry,
};
pub use loader::ConfigLoader;
