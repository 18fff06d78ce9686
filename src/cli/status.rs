//! Status command - show corpus and engine settings

use crate::config::Config;
use crate::model::Corpus;
use anyhow::{Context, Result};
use serde_json::json;

/// Run the status command
pub fn run(config: &Config, corpus: &str) -> Result<()> {
    let path = config.corpus_file(corpus);
    let summary = if path.exists() {
        let summary = Corpus::new(&path)
            .summary()
            .with_context(|| format!("Failed to read corpus {}", path.display()))?;
        serde_json::to_value(summary)?
    } else {
        serde_json::Value::Null
    };

    let status = json!({
        "corpus": corpus,
        "path": path,
        "engine": {
            "binary": config.engine.binary,
            "order": config.engine.order,
            "smoothing": config.engine.smoothing.name(),
            "ceiling": config.engine.ceiling,
        },
        "window": config.scorer.window,
        "summary": summary,
    });
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}
