//! Backend descriptors computed from host capabilities and stored
//! credentials.

use guestlink_application::{CapabilityProbe, ConfigStore, GenerationBackend};
use guestlink_domain::{
    ACCELERATED_LOCAL_ID, BackendDescriptor, BackendKind, CPU_LOCAL_ID, ModelDescriptor,
    PerformanceTier, UnavailableReason, accelerated_catalog, cpu_catalog, credential_key,
};
use std::sync::Arc;
use tracing::{debug, warn};

/// Model catalogs for the two local kinds.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalCatalogs {
    pub accelerated: Vec<ModelDescriptor>,
    pub cpu: Vec<ModelDescriptor>,
}

impl Default for LocalCatalogs {
    fn default() -> Self {
        Self {
            accelerated: accelerated_catalog(),
            cpu: cpu_catalog(),
        }
    }
}

impl LocalCatalogs {
    pub fn for_kind(&self, kind: BackendKind) -> &[ModelDescriptor] {
        match kind {
            BackendKind::AcceleratedLocal => &self.accelerated,
            BackendKind::CpuLocal => &self.cpu,
            BackendKind::Remote => &[],
        }
    }

    pub fn find(&self, kind: BackendKind, model_id: &str) -> Option<&ModelDescriptor> {
        self.for_kind(kind).iter().find(|m| m.id == model_id)
    }
}

/// Snapshot of every backend this session knows about.
///
/// Order is fixed: accelerated-local, cpu-local, then remote providers in
/// registration order.
#[derive(Debug, Clone, Default)]
pub struct BackendRegistry {
    descriptors: Vec<BackendDescriptor>,
}

impl BackendRegistry {
    /// Probe the host and the store. `engine_kinds` lists the local kinds
    /// that have an engine wired in; the others report `NotConfigured`.
    pub async fn probe(
        probe: &dyn CapabilityProbe,
        store: &dyn ConfigStore,
        remotes: &[Arc<dyn GenerationBackend>],
        catalogs: &LocalCatalogs,
        engine_kinds: &[BackendKind],
    ) -> Self {
        let mut descriptors = Vec::with_capacity(2 + remotes.len());

        let kind = BackendKind::AcceleratedLocal;
        descriptors.push(if !engine_kinds.contains(&kind) {
            unavailable(kind, UnavailableReason::NotConfigured, PerformanceTier::Fast)
        } else {
            match probe.accelerator().await {
                Ok(()) => BackendDescriptor::available(
                    kind,
                    ACCELERATED_LOCAL_ID,
                    local_display_name(kind),
                    catalogs.accelerated.clone(),
                    PerformanceTier::Fast,
                ),
                Err(reason) => unavailable(
                    kind,
                    UnavailableReason::NoAccelerator(reason),
                    PerformanceTier::Fast,
                ),
            }
        });

        let kind = BackendKind::CpuLocal;
        descriptors.push(if !engine_kinds.contains(&kind) {
            unavailable(kind, UnavailableReason::NotConfigured, PerformanceTier::Moderate)
        } else {
            match probe.sandbox_runtime().await {
                Some(runtime) => BackendDescriptor::available(
                    kind,
                    CPU_LOCAL_ID,
                    local_display_name(kind),
                    catalogs.cpu.clone(),
                    if runtime.multi_threaded {
                        PerformanceTier::Moderate
                    } else {
                        PerformanceTier::Slow
                    },
                ),
                None => unavailable(
                    kind,
                    UnavailableReason::NoSandboxRuntime,
                    PerformanceTier::Moderate,
                ),
            }
        });

        for remote in remotes {
            let has_key = match store.get_value(&credential_key(remote.id())).await {
                Ok(value) => value.is_some_and(|v| !v.trim().is_empty()),
                Err(e) => {
                    warn!("Credential lookup for {} failed: {}", remote.id(), e);
                    false
                }
            };
            descriptors.push(if has_key {
                BackendDescriptor::available(
                    BackendKind::Remote,
                    remote.id(),
                    remote.display_name(),
                    remote.models(),
                    PerformanceTier::Fast,
                )
            } else {
                BackendDescriptor::unavailable(
                    BackendKind::Remote,
                    remote.id(),
                    remote.display_name(),
                    UnavailableReason::MissingCredential,
                    PerformanceTier::Fast,
                )
            });
        }

        for d in &descriptors {
            debug!(
                backend = %d.id,
                available = d.available,
                tier = %d.performance_tier,
                "Backend probed"
            );
        }
        Self { descriptors }
    }

    pub fn list_backends(&self) -> &[BackendDescriptor] {
        &self.descriptors
    }

    pub fn get(&self, id: &str) -> Option<&BackendDescriptor> {
        self.descriptors.iter().find(|d| d.id == id)
    }

    /// The descriptor of a local kind.
    pub fn local(&self, kind: BackendKind) -> Option<&BackendDescriptor> {
        self.descriptors
            .iter()
            .find(|d| d.kind == kind && kind.is_local())
    }

    pub fn is_available(&self, id: &str) -> bool {
        self.get(id).is_some_and(|d| d.available)
    }
}

fn local_display_name(kind: BackendKind) -> &'static str {
    match kind {
        BackendKind::AcceleratedLocal => "Local (accelerated)",
        BackendKind::CpuLocal => "Local (CPU)",
        BackendKind::Remote => "Remote",
    }
}

fn unavailable(
    kind: BackendKind,
    reason: UnavailableReason,
    tier: PerformanceTier,
) -> BackendDescriptor {
    let id = match kind {
        BackendKind::AcceleratedLocal => ACCELERATED_LOCAL_ID,
        _ => CPU_LOCAL_ID,
    };
    BackendDescriptor::unavailable(kind, id, local_display_name(kind), reason, tier)
}
