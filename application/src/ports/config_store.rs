//! Persistent key-value store port
//!
//! Credentials live under `provider.<id>.api_key`; the recorded local model
//! under `local.active_model`. Values are opaque strings.

use async_trait::async_trait;
use thiserror::Error;

/// Store key holding the id of the last successfully loaded local model.
pub const ACTIVE_MODEL_KEY: &str = "local.active_model";

/// Errors from store access
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Key-value store for credentials and small bits of persisted state.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn get_value(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn set_value(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Keys starting with `prefix`, in ascending order.
    async fn list_keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError>;
}
