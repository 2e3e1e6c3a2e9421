//! Model catalog (Value Objects)
//!
//! Catalog entries are immutable data; nothing in guestlink persists them.
//! The built-in local catalogs name models by the tag the local inference
//! daemon understands.

use serde::{Deserialize, Serialize};

/// Minimum memory class a model needs to run comfortably.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryTier {
    /// Under 2 GB.
    Low,
    /// 2 to 8 GB.
    Medium,
    /// Over 8 GB.
    High,
}

impl std::fmt::Display for MemoryTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MemoryTier::Low => "low",
            MemoryTier::Medium => "medium",
            MemoryTier::High => "high",
        };
        f.write_str(s)
    }
}

/// A model a backend can serve.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub id: String,
    pub human_name: String,
    /// Approximate download size in bytes.
    pub approximate_size: u64,
    pub minimum_resource: MemoryTier,
    /// Where the weights are fetched from.
    pub source_location: String,
}

impl ModelDescriptor {
    pub fn new(
        id: impl Into<String>,
        human_name: impl Into<String>,
        approximate_size: u64,
        minimum_resource: MemoryTier,
        source_location: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            human_name: human_name.into(),
            approximate_size,
            minimum_resource,
            source_location: source_location.into(),
        }
    }

    /// A remote model: size and memory class do not apply to the host.
    pub fn remote(id: impl Into<String>, human_name: impl Into<String>) -> Self {
        Self::new(id, human_name, 0, MemoryTier::Low, String::new())
    }

    /// Size formatted for humans (`"1.3 GB"`, `"380 MB"`).
    pub fn size_label(&self) -> String {
        const MB: u64 = 1024 * 1024;
        const GB: u64 = 1024 * MB;
        if self.approximate_size == 0 {
            "-".to_string()
        } else if self.approximate_size >= GB {
            format!("{:.1} GB", self.approximate_size as f64 / GB as f64)
        } else {
            format!("{} MB", self.approximate_size / MB)
        }
    }
}

const MB: u64 = 1024 * 1024;

/// Models offered by the accelerated local engine.
pub fn accelerated_catalog() -> Vec<ModelDescriptor> {
    vec![
        ModelDescriptor::new(
            "llama3.2:3b",
            "Llama 3.2 3B Instruct",
            2019 * MB,
            MemoryTier::Medium,
            "https://ollama.com/library/llama3.2:3b",
        ),
        ModelDescriptor::new(
            "qwen2.5:7b",
            "Qwen 2.5 7B Instruct",
            4700 * MB,
            MemoryTier::High,
            "https://ollama.com/library/qwen2.5:7b",
        ),
        ModelDescriptor::new(
            "phi3.5:3.8b",
            "Phi 3.5 Mini",
            2200 * MB,
            MemoryTier::Medium,
            "https://ollama.com/library/phi3.5:3.8b",
        ),
    ]
}

/// Models small enough for the CPU local engine.
pub fn cpu_catalog() -> Vec<ModelDescriptor> {
    vec![
        ModelDescriptor::new(
            "qwen2.5:0.5b",
            "Qwen 2.5 0.5B Instruct",
            398 * MB,
            MemoryTier::Low,
            "https://ollama.com/library/qwen2.5:0.5b",
        ),
        ModelDescriptor::new(
            "smollm2:360m",
            "SmolLM2 360M Instruct",
            726 * MB,
            MemoryTier::Low,
            "https://ollama.com/library/smollm2:360m",
        ),
        ModelDescriptor::new(
            "llama3.2:1b",
            "Llama 3.2 1B Instruct",
            1300 * MB,
            MemoryTier::Low,
            "https://ollama.com/library/llama3.2:1b",
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_catalogs_have_unique_ids() {
        for catalog in [accelerated_catalog(), cpu_catalog()] {
            let mut ids: Vec<_> = catalog.iter().map(|m| m.id.clone()).collect();
            ids.sort();
            ids.dedup();
            assert_eq!(ids.len(), catalog.len());
        }
    }

    #[test]
    fn cpu_catalog_stays_in_low_memory_tier() {
        assert!(cpu_catalog().iter().all(|m| m.minimum_resource == MemoryTier::Low));
    }

    #[test]
    fn size_label_formats() {
        let m = ModelDescriptor::new("a", "A", 398 * MB, MemoryTier::Low, "");
        assert_eq!(m.size_label(), "398 MB");
        let m = ModelDescriptor::new("b", "B", 2048 * MB, MemoryTier::Low, "");
        assert_eq!(m.size_label(), "2.0 GB");
        assert_eq!(ModelDescriptor::remote("c", "C").size_label(), "-");
    }
}
