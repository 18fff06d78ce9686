//! Configuration module for unnatural
//!
//! This module handles:
//! - User-level configuration (`config.toml` in the platform config dir)
//! - Environment overrides
//! - Where corpora live inside the data directory

mod user_config;

pub use user_config::{Config, ConfigError, ConfigResult, ScorerConfig};

use std::path::{Path, PathBuf};

/// Corpus used when none is named
pub const DEFAULT_CORPUS: &str = "default";

/// `<data_dir>/unnatural`, falling back to `~/.unnatural`
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join("unnatural"))
        .or_else(|| dirs::home_dir().map(|h| h.join(".unnatural")))
        .unwrap_or_else(|| PathBuf::from(".unnatural"))
}

/// Corpus names double as file names
pub fn is_valid_corpus_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

/// Corpus file of a named corpus
pub fn corpus_file(data_dir: &Path, name: &str) -> PathBuf {
    data_dir.join("corpora").join(format!("{}.txt", name))
}
