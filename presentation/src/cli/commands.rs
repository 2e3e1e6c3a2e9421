//! CLI command definitions

use clap::{Parser, Subcommand};
use guestlink_domain::{BackendKind, DEFAULT_MAX_TOKENS, DEFAULT_TEMPERATURE};
use std::path::PathBuf;

/// CLI arguments for guestlink
#[derive(Parser, Debug)]
#[command(name = "guestlink")]
#[command(author, version, about = "AI completions for sandboxed guests over their terminal channel")]
#[command(long_about = r#"
guestlink lets a sandboxed guest ask the host for AI text completions over
the same byte stream that carries its terminal output. Control frames are
wrapped in APC escape sequences, so terminals ignore them.

The host picks a backend in a fixed order: a loaded local model, the
recorded local model, then remote providers that have an API key.

Configuration files are loaded from (in priority order):
1. --config <path>                      Explicit config file
2. GUESTLINK_* environment variables    e.g. GUESTLINK_LOCAL__CPU=false
3. ./guestlink.toml                     Project-level config
4. ~/.config/guestlink/config.toml      Global config

Example:
  guestlink host -- qemu-system-x86_64 -nographic -hda guest.img
  guestlink ask --system "Be brief" "Summarise the last error"
  guestlink backends --json
  guestlink load cpu qwen2.5:0.5b
"#)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Verbosity level (-v = info, -vv = debug, -vvv = trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress progress indicators
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to configuration file
    #[arg(long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Show configuration file locations and exit
    #[arg(long)]
    pub show_config: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a guest and serve its completion requests
    Host {
        /// Guest command line (after `--`)
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },

    /// Ask the host for a completion (run inside the guest)
    Ask {
        /// The prompt. Stdin is the reply channel, so it cannot carry the prompt.
        prompt: String,

        /// System message sent before the prompt
        #[arg(short, long)]
        system: Option<String>,

        /// Preferred model id
        #[arg(short, long)]
        model: Option<String>,

        #[arg(long, default_value_t = DEFAULT_TEMPERATURE)]
        temperature: f32,

        #[arg(long, default_value_t = DEFAULT_MAX_TOKENS)]
        max_tokens: u32,

        /// Give up after this many seconds (overrides rpc.request_timeout_secs)
        #[arg(long, value_name = "SECS")]
        timeout: Option<u64>,
    },

    /// List backends and why unavailable ones cannot be used
    Backends {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Load a local model and record it as the active model
    Load {
        /// Local backend kind: accelerated or cpu
        kind: BackendKind,

        /// Model id from that backend's catalog
        model: String,
    },
}
