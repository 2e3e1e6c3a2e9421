//! Configuration file loader with multi-source merging

use super::file_config::FileConfig;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use std::path::{Path, PathBuf};

const PROJECT_FILE: &str = "guestlink.toml";
const ENV_PREFIX: &str = "GUESTLINK_";

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from all sources with proper priority.
    pub fn load(config_path: Option<&Path>) -> Result<FileConfig, Box<figment::Error>> {
        let mut figment = Figment::new().merge(Serialized::defaults(FileConfig::default()));

        if let Some(global_path) = Self::global_config_path()
            && global_path.exists()
        {
            figment = figment.merge(Toml::file(&global_path));
        }

        let project = PathBuf::from(PROJECT_FILE);
        if project.exists() {
            figment = figment.merge(Toml::file(&project));
        }

        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        if let Some(path) = config_path {
            if !path.exists() {
                return Err(Box::new(figment::Error::from(format!(
                    "config file not found: {}",
                    path.display()
                ))));
            }
            figment = figment.merge(Toml::file(path));
        }

        figment.extract().map_err(Box::new)
    }

    /// `$XDG_CONFIG_HOME/guestlink/config.toml` (or the platform equivalent).
    pub fn global_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("guestlink").join("config.toml"))
    }

    /// Where session state (the recorded local model) is kept by default.
    pub fn default_state_path() -> Option<PathBuf> {
        dirs::data_dir().map(|d| d.join("guestlink").join("state.json"))
    }

    /// Human-readable list of the sources, for `--show-config`.
    pub fn describe_sources(config_path: Option<&Path>) -> Vec<String> {
        let mark = |found: bool| if found { "[FOUND]" } else { "[     ]" };
        let mut lines = Vec::new();
        if let Some(path) = config_path {
            lines.push(format!("{} Explicit: {}", mark(path.exists()), path.display()));
        }
        lines.push(format!("[     ] Environment: {}*", ENV_PREFIX));
        lines.push(format!(
            "{} Project: ./{}",
            mark(Path::new(PROJECT_FILE).exists()),
            PROJECT_FILE
        ));
        if let Some(path) = Self::global_config_path() {
            lines.push(format!("{} Global:  {}", mark(path.exists()), path.display()));
        }
        lines.push("[     ] Default: built-in defaults".to_string());
        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn explicit_file_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[local]
cpu = false
endpoint = "http://10.0.0.2:11434"

[rpc]
request_timeout_secs = 30
"#
        )
        .unwrap();

        let config = ConfigLoader::load(Some(file.path())).unwrap();
        assert!(!config.local.cpu);
        assert!(config.local.accelerated);
        assert_eq!(config.local.endpoint, "http://10.0.0.2:11434");
        assert_eq!(config.rpc.request_timeout_secs, 30);
        assert_eq!(config.rpc.max_frame_body, FileConfig::default().rpc.max_frame_body);
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let missing = PathBuf::from("/nonexistent/guestlink.toml");
        assert!(ConfigLoader::load(Some(&missing)).is_err());
    }

    #[test]
    fn global_path_is_namespaced() {
        let path = ConfigLoader::global_config_path().unwrap();
        assert!(path.ends_with("guestlink/config.toml"));
    }
}
