//! unnatural-engine - n-gram model server
//!
//! Reads the corpus once at start-up, then answers line requests on stdin
//! until stdin closes. Logs go to stderr; stdout carries only answers.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use unnatural::engine::{serve, NgramModel};
use unnatural::model::Smoothing;

#[derive(Parser, Debug)]
#[command(name = "unnatural-engine", version, about = "Token n-gram model server")]
struct Args {
    /// Corpus file, one training example per line
    #[arg(long)]
    corpus: PathBuf,

    /// N-gram order
    #[arg(long, default_value = "10")]
    order: usize,

    /// Smoothing method: witten-bell, add-k
    #[arg(long, default_value = "witten-bell")]
    smoothing: Smoothing,
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let model = NgramModel::from_corpus(&args.corpus, args.order, args.smoothing)
        .with_context(|| format!("Failed to read corpus {}", args.corpus.display()))?;
    info!("Model loaded: {}", model.stats_json());

    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    serve(&model, stdin.lock(), stdout.lock()).context("Engine I/O failed")?;
    Ok(())
}
