//! Domain layer for guestlink
//!
//! This crate contains the core value types and state machines.
//! It has no dependencies on infrastructure or presentation concerns.
//!
//! # Core Concepts
//!
//! ## Generation
//!
//! A [`GenerationRequest`] is answered by exactly one backend as a stream of
//! [`GenerationChunk`]s, followed by a [`CompletionResult`].
//!
//! ## Backends
//!
//! - **accelerated-local**: local inference with hardware acceleration
//! - **cpu-local**: local inference on the CPU
//! - **remote**: HTTP providers, one descriptor per configured provider
//!
//! Only one local model may be resident at a time; see [`LocalModelState`].

pub mod backend;
pub mod core;
pub mod generation;

// Re-export commonly used types
pub use backend::{
    catalog::{MemoryTier, ModelDescriptor, accelerated_catalog, cpu_catalog},
    descriptor::{
        ACCELERATED_LOCAL_ID, BackendDescriptor, BackendKind, CPU_LOCAL_ID, PerformanceTier,
        UnavailableReason, credential_key,
    },
    lifecycle::{LifecycleError, LoadProgress, LoadStage, LocalModelState},
};
pub use core::error::DomainError;
pub use generation::{
    chunk::{CompletionResult, GenerationChunk},
    entities::{ChatMessage, DEFAULT_MAX_TOKENS, DEFAULT_TEMPERATURE, GenerationRequest, Role},
};
