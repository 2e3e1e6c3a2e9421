//! Load progress notification port
//!
//! Defines the interface for reporting progress while a local model loads.

use guestlink_domain::{BackendKind, LoadProgress};

/// Callback for progress updates during a local model load
///
/// Implementations live in the presentation layer and can display
/// progress in various ways (progress bar, log lines, etc.)
pub trait LoadProgressNotifier: Send + Sync {
    /// Called for every discrete progress event, in order.
    fn on_progress(&self, kind: BackendKind, model_id: &str, progress: LoadProgress);

    /// Called once when the load fails.
    fn on_failed(&self, _kind: BackendKind, _model_id: &str, _error: &str) {}
}

/// No-op progress notifier for when progress reporting is not needed
pub struct NoLoadProgress;

impl LoadProgressNotifier for NoLoadProgress {
    fn on_progress(&self, _kind: BackendKind, _model_id: &str, _progress: LoadProgress) {}
}
