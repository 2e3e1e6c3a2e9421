//! Console output for backend listings

use colored::Colorize;
use guestlink_domain::{BackendDescriptor, PerformanceTier};

/// Formats backend descriptors for the terminal
pub struct ConsoleFormatter;

impl ConsoleFormatter {
    /// Table with one line per backend, followed by its models.
    pub fn backends(backends: &[BackendDescriptor]) -> String {
        let mut output = String::new();
        output.push_str(&format!("{}\n", "Backends (in priority order)".cyan().bold()));

        for backend in backends {
            let status = if backend.available {
                "available".green().to_string()
            } else {
                "unavailable".red().to_string()
            };
            output.push_str(&format!(
                "\n  {:<20} {:<12} {:<10} {}\n",
                backend.id.bold(),
                status,
                Self::tier(backend.performance_tier),
                backend.display_name
            ));

            if let Some(reason) = &backend.unavailable_reason {
                output.push_str(&format!("    {} {}\n", "-".dimmed(), reason));
            }
            for model in &backend.model_catalog {
                output.push_str(&format!(
                    "    {} {:<24} {:<28} {:>8}\n",
                    "*".dimmed(),
                    model.id,
                    model.human_name,
                    model.size_label()
                ));
            }
        }

        if !backends.iter().any(|b| b.available) {
            output.push_str(&format!(
                "\n{} set an API key (e.g. OPENAI_API_KEY) or run `guestlink load cpu <model>`\n",
                "hint:".yellow().bold()
            ));
        }
        output
    }

    /// Pretty JSON array of descriptors.
    pub fn backends_json(backends: &[BackendDescriptor]) -> String {
        serde_json::to_string_pretty(backends).unwrap_or_else(|_| "[]".to_string())
    }

    fn tier(tier: PerformanceTier) -> String {
        match tier {
            PerformanceTier::Fast => tier.to_string().green().to_string(),
            PerformanceTier::Moderate => tier.to_string().yellow().to_string(),
            PerformanceTier::Slow => tier.to_string().red().to_string(),
        }
    }
}
