//! Execution engine adapters.

mod process;

pub use process::ProcessExecutionEngine;
