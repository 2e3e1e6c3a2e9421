//! Application layer for guestlink
//!
//! This crate contains the port definitions every adapter implements and
//! the error taxonomy shared by the router and its backends.
//! It depends only on the domain layer.

pub mod ports;

// Re-export commonly used types
pub use ports::{
    capability_probe::{CapabilityProbe, SandboxRuntime},
    config_store::{ACTIVE_MODEL_KEY, ConfigStore, StoreError},
    conversation_logger::{
        ConversationEvent, ConversationLogger, NoConversationLogger, TranscriptKind,
    },
    execution_engine::{EngineError, EngineStatus, ExecutionEngine, OutputSink},
    llm_gateway::{
        ChunkSink, GatewayError, GenerationBackend, GenerationService, NoBackendReason,
    },
    local_engine::LocalEngine,
    progress::{LoadProgressNotifier, NoLoadProgress},
};
