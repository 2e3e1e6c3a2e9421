//! Wire protocol settings (`[rpc]` section)

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileRpcConfig {
    /// Guest-side request timeout in seconds; 0 disables it.
    pub request_timeout_secs: u64,
    /// Largest frame body accepted before a start marker counts as output.
    pub max_frame_body: usize,
}

impl Default for FileRpcConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 120,
            max_frame_body: 1024 * 1024,
        }
    }
}

impl FileRpcConfig {
    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout_secs > 0).then(|| Duration::from_secs(self.request_timeout_secs))
    }
}
