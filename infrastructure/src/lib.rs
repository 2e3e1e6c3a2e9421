//! Infrastructure layer for guestlink
//!
//! This crate contains adapters that implement the ports defined
//! in the application layer: the guest wire protocol, the generation
//! router and its backends, configuration loading, stores, probes and the
//! process-backed execution engine.

pub mod config;
pub mod engine;
pub mod logging;
pub mod probe;
pub mod providers;
pub mod rpc;
pub mod store;

// Re-export commonly used types
pub use config::{ConfigLoader, ConfigValidationError, FileConfig, ProviderDialect, ProviderEntry};
pub use engine::ProcessExecutionEngine;
pub use logging::JsonlConversationLogger;
pub use probe::SystemCapabilityProbe;
pub use providers::{
    AnthropicProvider, BackendRegistry, GenerationRouter, OllamaEngine, OpenAiCompatibleProvider,
    registry::LocalCatalogs,
};
pub use rpc::{
    AsyncWriteChannel, ChannelWriter, EngineChannel, FsHandler, GenerateParams, RpcClient,
    RpcError, RpcHost, StreamDemultiplexer,
};
pub use store::MemoryConfigStore;
