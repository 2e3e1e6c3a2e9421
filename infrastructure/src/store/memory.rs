//! In-memory [`ConfigStore`] with optional persistence of session state.
//!
//! Credentials are seeded at start-up (config file, environment) and never
//! written to disk. Other keys, such as the recorded local model, can be
//! mirrored to a small JSON state file so they survive restarts.

use async_trait::async_trait;
use guestlink_application::{ConfigStore, StoreError};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::debug;

const CREDENTIAL_PREFIX: &str = "provider.";

#[derive(Default)]
pub struct MemoryConfigStore {
    values: RwLock<BTreeMap<String, String>>,
    state_file: Option<PathBuf>,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mirror non-credential keys to `path`, loading what it already holds.
    pub fn with_state_file(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let values = match std::fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str::<BTreeMap<String, String>>(&text)
                .map_err(|e| StoreError::Unavailable(format!("{}: {}", path.display(), e)))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(StoreError::Unavailable(format!("{}: {}", path.display(), e))),
        };
        debug!("Loaded {} state keys from {}", values.len(), path.display());
        Ok(Self {
            values: RwLock::new(values),
            state_file: Some(path),
        })
    }

    /// Seed a value without touching the state file.
    pub fn insert(&self, key: impl Into<String>, value: impl Into<String>) {
        self.write().insert(key.into(), value.into());
    }

    pub fn state_file(&self) -> Option<&Path> {
        self.state_file.as_deref()
    }

    async fn persist(&self, path: &Path) -> Result<(), StoreError> {
        let snapshot: BTreeMap<String, String> = self
            .read()
            .iter()
            .filter(|(k, _)| !k.starts_with(CREDENTIAL_PREFIX))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let text = serde_json::to_string_pretty(&snapshot)
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        let unavailable = |e: std::io::Error| StoreError::Unavailable(format!("{}: {}", path.display(), e));
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await.map_err(unavailable)?;
        }
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, text).await.map_err(unavailable)?;
        tokio::fs::rename(&tmp, path).await.map_err(unavailable)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<String, String>> {
        self.values.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<String, String>> {
        self.values.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl ConfigStore for MemoryConfigStore {
    async fn get_value(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.read().get(key).cloned())
    }

    async fn set_value(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.insert(key, value);
        match &self.state_file {
            Some(path) if !key.starts_with(CREDENTIAL_PREFIX) => self.persist(path).await,
            _ => Ok(()),
        }
    }

    async fn list_keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        Ok(self
            .read()
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }
}
