//! Scoring commands - xentropy, predict and check

use crate::config::Config;
use crate::lexer::{lex, Lexeme};
use crate::model::ModelManager;
use crate::scorer::worst_windows;
use anyhow::{Context, Result};
use console::style;
use std::path::Path;

fn open_model(config: &Config, corpus: &str) -> ModelManager {
    ModelManager::open(config.corpus_file(corpus), config.engine.clone())
}

/// Print the cross-entropy of a whole file
pub fn xentropy(config: &Config, corpus: &str, file: &Path) -> Result<()> {
    let source = lex(&super::read_source(file)?).scrub();
    let mut model = open_model(config, corpus);
    let xent = model
        .query(source.lexemes())
        .with_context(|| format!("Failed to score {}", file.display()))?;
    model.release()?;
    println!("{:.4}", xent);
    Ok(())
}

/// Print likely continuations of the last tokens of a file
pub fn predict(config: &Config, corpus: &str, file: &Path) -> Result<()> {
    let source = lex(&super::read_source(file)?).scrub();
    let lexemes = source.lexemes();
    let end = lexemes
        .iter()
        .rposition(|l| !l.is_zero_width())
        .map_or(0, |i| i + 1);

    let mut model = open_model(config, corpus);
    let predictions = model
        .predict(&lexemes[..end])
        .with_context(|| format!("Failed to predict after {}", file.display()))?;
    model.release()?;

    if predictions.is_empty() {
        println!("{}", style("No continuations").dim());
    }
    for prediction in predictions {
        println!(
            "{}  {}",
            style(format!("{:>9.3}", prediction.score)).dim(),
            prediction.tokens.join(" ")
        );
    }
    Ok(())
}

/// Print the `top` most surprising windows of a file
pub fn check(config: &Config, corpus: &str, file: &Path, top: usize, window: usize) -> Result<()> {
    let source = lex(&super::read_source(file)?);
    let mut model = open_model(config, corpus);
    let windows = worst_windows(&mut model, &source, window)
        .with_context(|| format!("Failed to score {}", file.display()))?;
    model.release()?;

    println!(
        "\n{} {} ({} windows of {} tokens)\n",
        style("Most unnatural windows in").bold(),
        style(file.display()).cyan(),
        windows.len(),
        window
    );
    for (rank, scored) in windows.iter().take(top).enumerate() {
        let lines = scored.lines();
        println!(
            "{:>3}. lines {}-{}  {}  {}",
            rank + 1,
            lines.start(),
            lines.end(),
            style(format!("{:.3}", scored.score)).yellow(),
            style(preview(&scored.lexemes)).dim()
        );
    }
    Ok(())
}

/// Window text squeezed onto one line
fn preview(lexemes: &[Lexeme]) -> String {
    const MAX: usize = 60;
    let text: Vec<&str> = lexemes
        .iter()
        .filter(|l| !l.is_zero_width())
        .map(|l| l.value.trim())
        .filter(|v| !v.is_empty())
        .collect();
    let joined = text.join(" ");
    if joined.chars().count() <= MAX {
        return joined;
    }
    let cut: String = joined.chars().take(MAX - 3).collect();
    format!("{}...", cut)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preview() {
        let source = lex("if x:\n    y = 1\n");
        assert_eq!(preview(source.lexemes()), "if x : y = 1");

        let long = lex(&"abc ".repeat(40));
        let shown = preview(long.lexemes());
        assert_eq!(shown.chars().count(), 60);
        assert!(shown.ends_with("..."));
    }
}
