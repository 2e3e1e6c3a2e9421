//! Host capability probe port

use async_trait::async_trait;

/// The sandboxed runtime used for CPU inference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SandboxRuntime {
    /// Whether the runtime can use more than one thread.
    pub multi_threaded: bool,
}

/// Answers which local backends this host can run.
#[async_trait]
pub trait CapabilityProbe: Send + Sync {
    /// `Ok(())` when hardware acceleration can be used, otherwise the reason
    /// it cannot (absent, denied, driver missing).
    async fn accelerator(&self) -> Result<(), String>;

    /// The CPU inference runtime, if one is present.
    async fn sandbox_runtime(&self) -> Option<SandboxRuntime>;
}
