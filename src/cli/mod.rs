//! CLI command definitions and handlers

mod init;
mod score;
mod status;
mod train;
mod validate;

use crate::config::{is_valid_corpus_name, Config, DEFAULT_CORPUS};
use crate::mutation::MutationKind;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

/// Parse and validate workers count (1-64)
fn parse_workers(s: &str) -> Result<usize, String> {
    let n: usize = s
        .parse()
        .map_err(|_| format!("'{}' is not a valid number", s))?;
    if n == 0 {
        Err("workers must be at least 1".to_string())
    } else if n > 64 {
        Err("workers cannot exceed 64".to_string())
    } else {
        Ok(n)
    }
}

/// unnatural - find unnatural (likely buggy) code with an n-gram model
#[derive(Parser, Debug)]
#[command(name = "unnatural")]
#[command(
    version,
    about = "Naturalness-based defect localization: score code windows by n-gram cross-entropy",
    long_about = "unnatural trains a token n-gram model on code that is known to work and \
points at the windows of a file the model finds most surprising. The validate and \
sweep commands measure how well that works by breaking known-good files on purpose.",
    after_help = "\
Examples:
  unnatural train src/*.py                 Add files to the default corpus
  unnatural check app.py --top 3           Show the three most surprising windows
  unnatural xentropy app.py                Cross-entropy of a whole file
  unnatural validate tests/*.py --workers 4 --seed 7
  unnatural sweep app.py --threshold 0.3"
)]
pub struct Cli {
    /// Data directory holding corpora (default: platform data dir)
    #[arg(long, global = true, env = "UNNATURAL_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Corpus to use
    #[arg(long, global = true, default_value = DEFAULT_CORPUS)]
    pub corpus: String,

    /// Engine executable
    #[arg(long, global = true)]
    pub engine: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info", value_parser = ["error", "warn", "info", "debug", "trace"])]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write an example config file and create the data directory
    Init,

    /// Train the corpus on source files
    Train {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Cross-entropy of a whole file in bits per token
    Xentropy { file: PathBuf },

    /// Likely continuations of the end of a file
    Predict { file: PathBuf },

    /// Rank the windows of a file from most to least surprising
    Check {
        file: PathBuf,

        /// Windows to show
        #[arg(long, default_value = "5")]
        top: usize,

        /// Tokens per window (default: from config)
        #[arg(long)]
        window: Option<usize>,
    },

    /// Show corpus and engine settings as JSON
    Status,

    /// Measure localization accuracy with random mutations
    #[command(after_help = "\
Examples:
  unnatural validate a.py b.py                         50 random mutations per file
  unnatural validate *.py --kinds delete-token,indent  Only these mutation kinds
  unnatural validate *.py --workers 4 --out results    Four independent loops")]
    Validate {
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Mutations per file (default: from config)
        #[arg(long)]
        iterations: Option<usize>,

        /// Comma-separated mutation kinds (default: all)
        #[arg(long, value_delimiter = ',')]
        kinds: Vec<MutationKind>,

        /// Seed for reproducible mutations
        #[arg(long)]
        seed: Option<u64>,

        /// Independent validation loops (1-64)
        #[arg(long, default_value = "1", value_parser = parse_workers)]
        workers: usize,

        /// Report directory
        #[arg(long, short = 'o', default_value = "validation")]
        out: PathBuf,
    },

    /// Mutate every line of one file until per-line estimates converge
    Sweep {
        file: PathBuf,

        /// Stop when the relative error bound drops below this (default: from config)
        #[arg(long)]
        threshold: Option<f64>,

        /// Seed for reproducible mutations
        #[arg(long)]
        seed: Option<u64>,

        /// Report directory
        #[arg(long, short = 'o', default_value = "validation")]
        out: PathBuf,
    },
}

/// Configuration with this invocation's flags applied on top
fn resolve_config(cli: &Cli) -> Result<Config> {
    let mut config = Config::load().context("Failed to load configuration")?;
    if let Some(dir) = &cli.data_dir {
        config.data_dir = Some(dir.clone());
    }
    if let Some(engine) = &cli.engine {
        config.engine.binary = engine.clone();
    }
    if !is_valid_corpus_name(&cli.corpus) {
        anyhow::bail!(
            "Invalid corpus name '{}': use letters, digits, '-', '_' or '.'",
            cli.corpus
        );
    }
    Ok(config)
}

fn read_source(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

/// Run the CLI with parsed arguments
pub fn run(cli: Cli) -> Result<()> {
    let config = resolve_config(&cli)?;
    let corpus = cli.corpus.as_str();

    match cli.command {
        Commands::Init => init::run(&config),
        Commands::Train { files } => train::run(&config, corpus, &files),
        Commands::Xentropy { file } => score::xentropy(&config, corpus, &file),
        Commands::Predict { file } => score::predict(&config, corpus, &file),
        Commands::Check { file, top, window } => score::check(
            &config,
            corpus,
            &file,
            top,
            window.unwrap_or(config.scorer.window),
        ),
        Commands::Status => status::run(&config, corpus),
        Commands::Validate {
            files,
            iterations,
            kinds,
            seed,
            workers,
            out,
        } => {
            let kinds = if kinds.is_empty() {
                config.validation.kinds.clone()
            } else {
                kinds
            };
            validate::run(
                &config,
                corpus,
                validate::Options {
                    files,
                    iterations: iterations.unwrap_or(config.validation.iterations),
                    kinds,
                    seed,
                    workers,
                    out,
                },
            )
        }
        Commands::Sweep {
            file,
            threshold,
            seed,
            out,
        } => validate::sweep(
            &config,
            corpus,
            &file,
            threshold.unwrap_or(config.validation.sweep_threshold),
            seed,
            &out,
        ),
    }
}
