//! Execution engine port
//!
//! The execution engine runs the guest (an emulator, a VM, a plain child
//! process) and exposes its terminal as a byte stream. Guest output is pushed
//! into an [`OutputSink`]; host bytes go in through [`ExecutionEngine::send_input`].

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

/// Where the engine delivers guest output, in order, chunk by chunk.
pub type OutputSink = mpsc::UnboundedSender<Vec<u8>>;

/// Lifecycle of an execution engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineStatus {
    Uninitialized,
    Initialized,
    Running,
    Stopped,
    /// The guest exited with a non-zero status or could not be started.
    Failed,
}

impl std::fmt::Display for EngineStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EngineStatus::Uninitialized => "uninitialized",
            EngineStatus::Initialized => "initialized",
            EngineStatus::Running => "running",
            EngineStatus::Stopped => "stopped",
            EngineStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Errors from execution engine operations
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Engine is not initialized")]
    NotInitialized,

    #[error("Engine is already running")]
    AlreadyRunning,

    #[error("Engine is not running")]
    NotRunning,

    #[error("Failed to start guest: {0}")]
    Spawn(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Runs the guest and relays its terminal bytes.
#[async_trait]
pub trait ExecutionEngine: Send + Sync {
    /// Install the output sink. Must be called before [`start`](Self::start).
    async fn init(&self, output: OutputSink) -> Result<(), EngineError>;

    async fn start(&self) -> Result<(), EngineError>;

    async fn stop(&self) -> Result<(), EngineError>;

    /// Write bytes to the guest's input, in order.
    async fn send_input(&self, bytes: &[u8]) -> Result<(), EngineError>;

    fn status(&self) -> EngineStatus;
}
