//! Progress reporting for local model loads

use colored::Colorize;
use guestlink_application::LoadProgressNotifier;
use guestlink_domain::{BackendKind, LoadProgress, LoadStage};
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Mutex;

const BAR_LENGTH: u64 = 1000;

/// Shows a progress bar on stderr while a model loads
pub struct LoadProgressReporter {
    bar: Mutex<Option<ProgressBar>>,
}

impl LoadProgressReporter {
    pub fn new() -> Self {
        Self {
            bar: Mutex::new(None),
        }
    }

    fn style() -> ProgressStyle {
        ProgressStyle::default_bar()
            .template("{spinner:.green} {prefix:.bold.cyan} [{bar:40.cyan/blue}] {percent:>3}% {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-")
    }

    fn stage_label(stage: LoadStage) -> &'static str {
        match stage {
            LoadStage::Preparing => "Preparing",
            LoadStage::Downloading => "Downloading",
            LoadStage::Initializing => "Initializing",
            LoadStage::Ready => "Ready",
        }
    }
}

impl Default for LoadProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl LoadProgressNotifier for LoadProgressReporter {
    fn on_progress(&self, kind: BackendKind, model_id: &str, progress: LoadProgress) {
        let mut slot = self.bar.lock().unwrap_or_else(|e| e.into_inner());
        let bar = slot.get_or_insert_with(|| {
            let bar = ProgressBar::new(BAR_LENGTH);
            bar.set_style(Self::style());
            bar.set_prefix(format!("{} ({})", model_id, kind));
            bar
        });
        bar.set_message(Self::stage_label(progress.stage));
        bar.set_position((progress.fraction * BAR_LENGTH as f32) as u64);

        if progress.stage == LoadStage::Ready
            && let Some(bar) = slot.take()
        {
            bar.finish_with_message(format!("{}", "ready".green()));
        }
    }

    fn on_failed(&self, _kind: BackendKind, model_id: &str, error: &str) {
        if let Some(bar) = self.bar.lock().unwrap_or_else(|e| e.into_inner()).take() {
            bar.abandon_with_message(format!("{} {}", "failed:".red(), error));
        } else {
            eprintln!("{} loading {}: {}", "x".red(), model_id, error);
        }
    }
}

/// Line-per-stage progress for non-interactive output
pub struct SimpleLoadProgress {
    last_stage: Mutex<Option<LoadStage>>,
}

impl SimpleLoadProgress {
    pub fn new() -> Self {
        Self {
            last_stage: Mutex::new(None),
        }
    }
}

impl Default for SimpleLoadProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl LoadProgressNotifier for SimpleLoadProgress {
    fn on_progress(&self, kind: BackendKind, model_id: &str, progress: LoadProgress) {
        let mut last = self.last_stage.lock().unwrap_or_else(|e| e.into_inner());
        if *last == Some(progress.stage) {
            return;
        }
        *last = Some(progress.stage);
        eprintln!(
            "{} {} {} ({})",
            "->".cyan(),
            LoadProgressReporter::stage_label(progress.stage).bold(),
            model_id,
            kind
        );
    }

    fn on_failed(&self, _kind: BackendKind, model_id: &str, error: &str) {
        eprintln!("  {} {} ({})", "x".red(), model_id, error);
    }
}
