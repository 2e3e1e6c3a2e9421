//! Local model lifecycle state machine.
//!
//! Only one local model can be resident at a time, across both local kinds:
//!
//! ```text
//!            begin_load            finish_load
//! Unloaded ─────────────▶ Loading ─────────────▶ Ready
//!    ▲                       │                     │
//!    └────── fail_load ──────┘                     │
//!    └───────────────────── unload ────────────────┘
//! ```
//!
//! `begin_load` is only legal from `Unloaded`. Switching models or kinds
//! therefore always goes through an explicit `unload` first, and a second
//! load while one is in flight is rejected rather than queued.

use super::descriptor::BackendKind;
use thiserror::Error;

/// State of the single local model slot.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LocalModelState {
    #[default]
    Unloaded,
    Loading {
        kind: BackendKind,
        model_id: String,
    },
    Ready {
        kind: BackendKind,
        model_id: String,
    },
}

/// Illegal lifecycle transitions
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LifecycleError {
    #[error("already loading {model_id} on {kind}")]
    AlreadyLoading { kind: BackendKind, model_id: String },

    #[error("{model_id} is resident on {kind}; unload it first")]
    Occupied { kind: BackendKind, model_id: String },

    #[error("{0} is not a local backend kind")]
    NotLocal(BackendKind),

    #[error("no load in progress for {model_id} on {kind}")]
    NotLoading { kind: BackendKind, model_id: String },
}

impl LocalModelState {
    /// `Unloaded -> Loading`.
    pub fn begin_load(
        &mut self,
        kind: BackendKind,
        model_id: impl Into<String>,
    ) -> Result<(), LifecycleError> {
        if !kind.is_local() {
            return Err(LifecycleError::NotLocal(kind));
        }
        match self {
            LocalModelState::Unloaded => {
                *self = LocalModelState::Loading {
                    kind,
                    model_id: model_id.into(),
                };
                Ok(())
            }
            LocalModelState::Loading { kind, model_id } => Err(LifecycleError::AlreadyLoading {
                kind: *kind,
                model_id: model_id.clone(),
            }),
            LocalModelState::Ready { kind, model_id } => Err(LifecycleError::Occupied {
                kind: *kind,
                model_id: model_id.clone(),
            }),
        }
    }

    /// `Loading -> Ready`, only for the load that is in flight.
    pub fn finish_load(&mut self, kind: BackendKind, model_id: &str) -> Result<(), LifecycleError> {
        match self {
            LocalModelState::Loading {
                kind: k,
                model_id: m,
            } if *k == kind && m == model_id => {
                *self = LocalModelState::Ready {
                    kind,
                    model_id: model_id.to_string(),
                };
                Ok(())
            }
            _ => Err(LifecycleError::NotLoading {
                kind,
                model_id: model_id.to_string(),
            }),
        }
    }

    /// `Loading -> Unloaded` after a failed load. No-op in other states.
    pub fn fail_load(&mut self, kind: BackendKind, model_id: &str) {
        if matches!(self, LocalModelState::Loading { kind: k, model_id: m } if *k == kind && m == model_id)
        {
            *self = LocalModelState::Unloaded;
        }
    }

    /// `Ready -> Unloaded`, returning what was resident.
    ///
    /// Unloading while a load is in flight is refused; unloading an empty
    /// slot returns `Ok(None)`.
    pub fn unload(&mut self) -> Result<Option<(BackendKind, String)>, LifecycleError> {
        if let LocalModelState::Loading { kind, model_id } = self {
            return Err(LifecycleError::AlreadyLoading {
                kind: *kind,
                model_id: model_id.clone(),
            });
        }
        match std::mem::take(self) {
            LocalModelState::Ready { kind, model_id } => Ok(Some((kind, model_id))),
            _ => Ok(None),
        }
    }

    /// The resident model, if the slot is `Ready`.
    pub fn ready(&self) -> Option<(BackendKind, &str)> {
        match self {
            LocalModelState::Ready { kind, model_id } => Some((*kind, model_id.as_str())),
            _ => None,
        }
    }

    pub fn is_loading(&self) -> bool {
        matches!(self, LocalModelState::Loading { .. })
    }
}

/// Phase of a local model load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStage {
    Preparing,
    Downloading,
    Initializing,
    Ready,
}

impl std::fmt::Display for LoadStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LoadStage::Preparing => "preparing",
            LoadStage::Downloading => "downloading",
            LoadStage::Initializing => "initializing",
            LoadStage::Ready => "ready",
        };
        f.write_str(s)
    }
}

/// A discrete progress event emitted while loading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoadProgress {
    pub stage: LoadStage,
    /// Completion of the current stage, clamped to `0.0..=1.0`.
    pub fraction: f32,
}

impl LoadProgress {
    pub fn new(stage: LoadStage, fraction: f32) -> Self {
        Self {
            stage,
            fraction: fraction.clamp(0.0, 1.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_unloaded_loading_ready_unloaded() {
        let mut state = LocalModelState::default();
        state.begin_load(BackendKind::CpuLocal, "m").unwrap();
        assert!(state.is_loading());
        state.finish_load(BackendKind::CpuLocal, "m").unwrap();
        assert_eq!(state.ready(), Some((BackendKind::CpuLocal, "m")));
        let previous = state.unload().unwrap();
        assert_eq!(previous, Some((BackendKind::CpuLocal, "m".to_string())));
        assert_eq!(state, LocalModelState::Unloaded);
    }

    #[test]
    fn second_load_while_loading_is_rejected() {
        let mut state = LocalModelState::default();
        state.begin_load(BackendKind::CpuLocal, "m").unwrap();
        let err = state
            .begin_load(BackendKind::AcceleratedLocal, "other")
            .unwrap_err();
        assert!(matches!(err, LifecycleError::AlreadyLoading { .. }));
        // The in-flight load is untouched
        assert_eq!(
            state,
            LocalModelState::Loading {
                kind: BackendKind::CpuLocal,
                model_id: "m".into()
            }
        );
    }

    #[test]
    fn loading_other_kind_requires_unload_first() {
        let mut state = LocalModelState::default();
        state.begin_load(BackendKind::AcceleratedLocal, "big").unwrap();
        state.finish_load(BackendKind::AcceleratedLocal, "big").unwrap();

        let err = state.begin_load(BackendKind::CpuLocal, "small").unwrap_err();
        assert_eq!(
            err,
            LifecycleError::Occupied {
                kind: BackendKind::AcceleratedLocal,
                model_id: "big".into()
            }
        );

        state.unload().unwrap();
        state.begin_load(BackendKind::CpuLocal, "small").unwrap();
    }

    #[test]
    fn failed_load_returns_to_unloaded() {
        let mut state = LocalModelState::default();
        state.begin_load(BackendKind::CpuLocal, "m").unwrap();
        state.fail_load(BackendKind::CpuLocal, "m");
        assert_eq!(state, LocalModelState::Unloaded);
    }

    #[test]
    fn fail_load_for_other_model_is_ignored() {
        let mut state = LocalModelState::default();
        state.begin_load(BackendKind::CpuLocal, "m").unwrap();
        state.fail_load(BackendKind::CpuLocal, "other");
        assert!(state.is_loading());
    }

    #[test]
    fn unload_during_load_is_refused() {
        let mut state = LocalModelState::default();
        state.begin_load(BackendKind::CpuLocal, "m").unwrap();
        assert!(state.unload().is_err());
        assert!(state.is_loading());
    }

    #[test]
    fn remote_kind_cannot_be_loaded() {
        let mut state = LocalModelState::default();
        assert_eq!(
            state.begin_load(BackendKind::Remote, "gpt"),
            Err(LifecycleError::NotLocal(BackendKind::Remote))
        );
    }

    #[test]
    fn finish_without_begin_is_an_error() {
        let mut state = LocalModelState::default();
        assert!(state.finish_load(BackendKind::CpuLocal, "m").is_err());
    }

    #[test]
    fn progress_fraction_is_clamped() {
        assert_eq!(LoadProgress::new(LoadStage::Downloading, 1.7).fraction, 1.0);
        assert_eq!(LoadProgress::new(LoadStage::Downloading, -0.2).fraction, 0.0);
    }
}
