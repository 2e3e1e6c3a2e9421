//! Port definitions (interfaces for external adapters)
//!
//! Ports define the contracts that infrastructure adapters must implement.

pub mod capability_probe;
pub mod config_store;
pub mod conversation_logger;
pub mod execution_engine;
pub mod llm_gateway;
pub mod local_engine;
pub mod progress;
