//! Backend descriptors (Value Objects)
//!
//! A [`BackendDescriptor`] is a snapshot of one inference backend as seen at
//! router initialisation: whether it can be used right now, why not if it
//! can't, and which models it offers.

use super::catalog::ModelDescriptor;
use serde::{Deserialize, Serialize};

/// Backend id used for the accelerated local engine.
pub const ACCELERATED_LOCAL_ID: &str = "accelerated-local";

/// Backend id used for the CPU local engine.
pub const CPU_LOCAL_ID: &str = "cpu-local";

/// Store key holding the credential for remote provider `provider_id`.
pub fn credential_key(provider_id: &str) -> String {
    format!("provider.{}.api_key", provider_id)
}

/// Family of an inference backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    /// Local inference using hardware acceleration (GPU).
    AcceleratedLocal,
    /// Local inference on the CPU.
    CpuLocal,
    /// A remote HTTP provider.
    Remote,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::AcceleratedLocal => "accelerated-local",
            BackendKind::CpuLocal => "cpu-local",
            BackendKind::Remote => "remote",
        }
    }

    pub fn is_local(&self) -> bool {
        !matches!(self, BackendKind::Remote)
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "accelerated-local" | "accelerated" | "gpu" => Ok(BackendKind::AcceleratedLocal),
            "cpu-local" | "cpu" => Ok(BackendKind::CpuLocal),
            "remote" => Ok(BackendKind::Remote),
            other => Err(format!(
                "unknown backend kind '{}' (expected accelerated, cpu or remote)",
                other
            )),
        }
    }
}

/// Rough speed class of a backend, for display and ordering hints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PerformanceTier {
    Fast,
    Moderate,
    Slow,
}

impl std::fmt::Display for PerformanceTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PerformanceTier::Fast => "fast",
            PerformanceTier::Moderate => "moderate",
            PerformanceTier::Slow => "slow",
        };
        f.write_str(s)
    }
}

/// Machine-readable reason a backend cannot be used.
///
/// `Display` gives the human-readable explanation shown to users.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "code", content = "detail", rename_all = "snake_case")]
pub enum UnavailableReason {
    /// Hardware acceleration is absent or was denied.
    NoAccelerator(String),
    /// The sandboxed runtime needed for CPU inference is missing.
    NoSandboxRuntime,
    /// A remote provider has no credential in the store.
    MissingCredential,
    /// No engine or provider adapter was wired for this backend.
    NotConfigured,
}

impl UnavailableReason {
    pub fn code(&self) -> &'static str {
        match self {
            UnavailableReason::NoAccelerator(_) => "no_accelerator",
            UnavailableReason::NoSandboxRuntime => "no_sandbox_runtime",
            UnavailableReason::MissingCredential => "missing_credential",
            UnavailableReason::NotConfigured => "not_configured",
        }
    }
}

impl std::fmt::Display for UnavailableReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnavailableReason::NoAccelerator(detail) => {
                write!(f, "hardware acceleration unavailable: {}", detail)
            }
            UnavailableReason::NoSandboxRuntime => {
                write!(f, "sandboxed CPU runtime is not available on this host")
            }
            UnavailableReason::MissingCredential => {
                write!(f, "no API key configured")
            }
            UnavailableReason::NotConfigured => write!(f, "backend is not configured"),
        }
    }
}

/// Snapshot of one backend's availability and capabilities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendDescriptor {
    pub kind: BackendKind,
    pub id: String,
    pub display_name: String,
    pub available: bool,
    pub unavailable_reason: Option<UnavailableReason>,
    /// Populated only when `available` is true.
    pub model_catalog: Vec<ModelDescriptor>,
    pub performance_tier: PerformanceTier,
}

impl BackendDescriptor {
    /// An available backend offering `models`.
    pub fn available(
        kind: BackendKind,
        id: impl Into<String>,
        display_name: impl Into<String>,
        models: Vec<ModelDescriptor>,
        performance_tier: PerformanceTier,
    ) -> Self {
        Self {
            kind,
            id: id.into(),
            display_name: display_name.into(),
            available: true,
            unavailable_reason: None,
            model_catalog: models,
            performance_tier,
        }
    }

    /// An unavailable backend. The catalog is always empty.
    pub fn unavailable(
        kind: BackendKind,
        id: impl Into<String>,
        display_name: impl Into<String>,
        reason: UnavailableReason,
        performance_tier: PerformanceTier,
    ) -> Self {
        Self {
            kind,
            id: id.into(),
            display_name: display_name.into(),
            available: false,
            unavailable_reason: Some(reason),
            model_catalog: Vec::new(),
            performance_tier,
        }
    }

    /// Look up a model in this backend's catalog.
    pub fn find_model(&self, model_id: &str) -> Option<&ModelDescriptor> {
        self.model_catalog.iter().find(|m| m.id == model_id)
    }
}
