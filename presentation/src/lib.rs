//! Presentation layer for guestlink
//!
//! This crate contains CLI definitions, backend listing formatters
//! and load progress reporters.

pub mod cli;
pub mod output;
pub mod progress;

// Re-export commonly used types
pub use cli::commands::{Cli, Command};
pub use output::console::ConsoleFormatter;
pub use progress::reporter::{LoadProgressReporter, SimpleLoadProgress};
