//! Host capability probe.
//!
//! Acceleration is assumed when a GPU device node is present (or on Apple
//! silicon). The CPU runtime is always present unless disabled; it counts as
//! multi-threaded when more than one core is available.

use async_trait::async_trait;
use guestlink_application::{CapabilityProbe, SandboxRuntime};
use std::path::PathBuf;
use tracing::debug;

const DEVICE_NODES: &[&str] = &["/dev/nvidia0", "/dev/kfd", "/dev/dri/renderD128"];

pub struct SystemCapabilityProbe {
    accelerated_enabled: bool,
    cpu_enabled: bool,
    device_nodes: Vec<PathBuf>,
}

impl Default for SystemCapabilityProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemCapabilityProbe {
    pub fn new() -> Self {
        Self {
            accelerated_enabled: true,
            cpu_enabled: true,
            device_nodes: DEVICE_NODES.iter().map(PathBuf::from).collect(),
        }
    }

    pub fn with_accelerator(mut self, enabled: bool) -> Self {
        self.accelerated_enabled = enabled;
        self
    }

    pub fn with_cpu(mut self, enabled: bool) -> Self {
        self.cpu_enabled = enabled;
        self
    }

    /// Replace the device nodes that signal a usable accelerator.
    pub fn with_device_nodes(mut self, nodes: Vec<PathBuf>) -> Self {
        self.device_nodes = nodes;
        self
    }
}

#[async_trait]
impl CapabilityProbe for SystemCapabilityProbe {
    async fn accelerator(&self) -> Result<(), String> {
        if !self.accelerated_enabled {
            return Err("disabled in configuration".to_string());
        }
        if cfg!(all(target_os = "macos", target_arch = "aarch64")) {
            return Ok(());
        }
        for node in &self.device_nodes {
            if tokio::fs::metadata(node).await.is_ok() {
                debug!("Accelerator device found: {}", node.display());
                return Ok(());
            }
        }
        let checked: Vec<String> = self
            .device_nodes
            .iter()
            .map(|p| p.display().to_string())
            .collect();
        Err(format!("no GPU device found (checked {})", checked.join(", ")))
    }

    async fn sandbox_runtime(&self) -> Option<SandboxRuntime> {
        if !self.cpu_enabled {
            return None;
        }
        let threads = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Some(SandboxRuntime {
            multi_threaded: threads > 1,
        })
    }
}
