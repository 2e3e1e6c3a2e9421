//! Local inference configuration (`[local]` section)

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileLocalConfig {
    /// Offer the accelerated local backend.
    pub accelerated: bool,
    /// Offer the CPU local backend.
    pub cpu: bool,
    /// Inference daemon endpoint.
    pub endpoint: String,
    /// Model to load on demand when nothing else is recorded.
    pub active_model: Option<String>,
    /// Where session state is persisted (default: platform data dir).
    pub state_file: Option<PathBuf>,
}

impl Default for FileLocalConfig {
    fn default() -> Self {
        Self {
            accelerated: true,
            cpu: true,
            endpoint: "http://127.0.0.1:11434".to_string(),
            active_model: None,
            state_file: None,
        }
    }
}
