//! Logging configuration (`[log]` section)

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileLogConfig {
    /// JSONL transcript of RPC events. Disabled when unset.
    pub conversation_log: Option<PathBuf>,
}
