//! Train command - append source files to a corpus

use crate::config::Config;
use crate::lexer::lex;
use crate::model::ModelManager;
use anyhow::{Context, Result};
use console::style;
use std::path::PathBuf;
use tracing::info;

/// Run the train command
pub fn run(config: &Config, corpus: &str, files: &[PathBuf]) -> Result<()> {
    let mut model = ModelManager::open(config.corpus_file(corpus), config.engine.clone());

    let mut tokens = 0;
    for path in files {
        let text = super::read_source(path)?;
        let source = lex(&text).scrub();
        model
            .train(source.lexemes())
            .with_context(|| format!("Failed to train on {}", path.display()))?;
        info!("Trained on {} ({} tokens)", path.display(), source.len());
        tokens += source.len();
    }
    model.release().context("Failed to release model")?;

    println!(
        "{} Trained corpus {} on {} files ({} tokens)",
        style("✓").green(),
        style(corpus).cyan(),
        files.len(),
        tokens
    );
    Ok(())
}
