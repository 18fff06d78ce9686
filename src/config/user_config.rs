//! User-level configuration for unnatural
//!
//! Supports loading config from:
//! - Built-in defaults
//! - ~/.config/unnatural/config.toml
//! - Environment variables (`UNNATURAL_DATA_DIR`, `UNNATURAL_ENGINE`,
//!   `UNNATURAL_PYTHON`)
//!
//! Command-line flags are applied on top by the CLI.

use crate::model::EngineSettings;
use crate::sandbox::SandboxConfig;
use crate::scorer::DEFAULT_WINDOW;
use crate::validate::ValidationConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("could not determine config directory")]
    NoConfigDir,

    #[error("failed to write config: {0}")]
    Write(#[from] std::io::Error),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScorerConfig {
    /// Tokens per window
    pub window: usize,
}

impl Default for ScorerConfig {
    fn default() -> Self {
        Self {
            window: DEFAULT_WINDOW,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Where corpora are kept; platform data dir when unset
    pub data_dir: Option<PathBuf>,
    pub engine: EngineSettings,
    pub sandbox: SandboxConfig,
    pub scorer: ScorerConfig,
    pub validation: ValidationConfig,
}

impl Config {
    /// Load config from all sources, with priority:
    /// 1. Environment variables (highest)
    /// 2. User config (~/.config/unnatural/config.toml)
    /// 3. Defaults
    pub fn load() -> ConfigResult<Self> {
        let mut config = match Self::user_config_path().filter(|p| p.exists()) {
            Some(path) => Self::from_file(&path)?,
            None => Config::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Apply environment overrides read through `var`
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        let set = |key: &str| var(key).filter(|v| !v.trim().is_empty());
        if let Some(dir) = set("UNNATURAL_DATA_DIR") {
            self.data_dir = Some(PathBuf::from(dir));
        }
        if let Some(binary) = set("UNNATURAL_ENGINE") {
            self.engine.binary = PathBuf::from(binary);
        }
        if let Some(python) = set("UNNATURAL_PYTHON") {
            self.sandbox.interpreter = python;
        }
    }

    /// Get the user config file path
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("unnatural").join("config.toml"))
    }

    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(super::default_data_dir)
    }

    pub fn corpus_file(&self, name: &str) -> PathBuf {
        super::corpus_file(&self.data_dir(), name)
    }

    /// Create the user config with commented defaults unless it exists
    pub fn init_user_config() -> ConfigResult<PathBuf> {
        let config_path = Self::user_config_path().ok_or(ConfigError::NoConfigDir)?;
        Self::write_example(&config_path)?;
        Ok(config_path)
    }

    /// Write the example config to `path` unless something is already there
    pub fn write_example(path: &Path) -> ConfigResult<bool> {
        if path.exists() {
            return Ok(false);
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, EXAMPLE_CONFIG)?;
        Ok(true)
    }
}

const EXAMPLE_CONFIG: &str = r#"# unnatural configuration

# Where corpora are stored (default: platform data dir)
# data_dir = "/var/lib/unnatural"

[engine]
# Engine executable (default: unnatural-engine next to this binary)
# binary = "unnatural-engine"
# order = 10
# smoothing = "witten-bell"   # or "add-k"
# Answers at or above this many bits per token are rejected
# ceiling = 70.0
# grace_ms = 500

[sandbox]
# interpreter = "python3"
# deadline_secs = 10

[scorer]
# window = 20

[validation]
# iterations = 50
# sweep_threshold = 0.5
# kinds = ["delete-token", "insert-token", "replace-token", "delete-colon"]
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Smoothing;
    use crate::mutation::MutationKind;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.engine.order, 10);
        assert_eq!(config.engine.smoothing, Smoothing::WittenBell);
        assert_eq!(config.engine.ceiling, 70.0);
        assert_eq!(config.sandbox.interpreter, "python3");
        assert_eq!(config.sandbox.deadline_secs, 10);
        assert_eq!(config.scorer.window, 20);
        assert_eq!(config.validation.iterations, 50);
        assert_eq!(config.validation.kinds.len(), MutationKind::all().len());
    }

    #[test]
    fn test_toml_parsing_partial() {
        let toml_str = r#"
data_dir = "/tmp/corpora"

[engine]
order = 4
smoothing = "add-k"

[validation]
kinds = ["delete-token", "replace-punct-char"]
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.data_dir(), PathBuf::from("/tmp/corpora"));
        assert_eq!(config.engine.order, 4);
        assert_eq!(config.engine.smoothing, Smoothing::AddK);
        assert_eq!(config.engine.ceiling, 70.0);
        assert_eq!(config.sandbox.deadline_secs, 10);
        assert_eq!(config.validation.kinds.len(), 2);
        assert_eq!(config.validation.iterations, 50);
    }

    #[test]
    fn test_example_config_parses_to_defaults() {
        let config: Config = toml::from_str(EXAMPLE_CONFIG).unwrap();
        assert_eq!(config.engine.order, Config::default().engine.order);
        assert_eq!(config.scorer, ScorerConfig::default());
        assert!(config.data_dir.is_none());
    }

    #[test]
    fn test_env_overrides_file() {
        let mut config: Config = toml::from_str("data_dir = \"/from/file\"").unwrap();
        let env: HashMap<&str, &str> = [
            ("UNNATURAL_DATA_DIR", "/from/env"),
            ("UNNATURAL_PYTHON", "python3.12"),
            ("UNNATURAL_ENGINE", ""),
        ]
        .into_iter()
        .collect();
        let before = config.engine.binary.clone();
        config.apply_env(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(config.data_dir(), PathBuf::from("/from/env"));
        assert_eq!(config.sandbox.interpreter, "python3.12");
        assert_eq!(config.engine.binary, before);
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[engine]\norder = \"ten\"\n").unwrap();
        assert!(matches!(
            Config::from_file(&path),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_write_example_once() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        assert!(Config::write_example(&path).unwrap());
        std::fs::write(&path, "# mine\n").unwrap();
        assert!(!Config::write_example(&path).unwrap());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "# mine\n");
    }
}
