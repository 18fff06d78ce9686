//! Validate and sweep commands - measure localization with mutations

use crate::config::Config;
use crate::model::ModelManager;
use crate::mutation::{MutationKind, Mutator};
use crate::sandbox::SandboxRunner;
use crate::validate::{ReportWriter, ValidationMetrics, Validator};
use anyhow::{Context, Result};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use tracing::info;

pub struct Options {
    pub files: Vec<PathBuf>,
    pub iterations: usize,
    pub kinds: Vec<MutationKind>,
    pub seed: Option<u64>,
    pub workers: usize,
    pub out: PathBuf,
}

fn create_bar_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▓▒░  ")
}

fn create_spinner_style() -> ProgressStyle {
    ProgressStyle::default_spinner()
        .template("{spinner:.green} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}

fn checked_sandbox(config: &Config) -> Result<SandboxRunner> {
    let sandbox = SandboxRunner::new(&config.sandbox);
    if !sandbox.is_available() {
        anyhow::bail!(
            "Python interpreter '{}' not found. Install it or set UNNATURAL_PYTHON.",
            config.sandbox.interpreter
        );
    }
    Ok(sandbox)
}

/// Private data directory seeded with a copy of the named corpus, so
/// validation never writes to the corpus it reads from
fn scratch_corpus(config: &Config, corpus: &str) -> Result<(TempDir, PathBuf)> {
    let dir = tempfile::Builder::new()
        .prefix("unnatural-validate-")
        .tempdir()
        .context("Failed to create scratch data directory")?;
    let path = dir.path().join("corpus.txt");
    let base = config.corpus_file(corpus);
    if base.exists() {
        std::fs::copy(&base, &path)
            .with_context(|| format!("Failed to copy corpus {}", base.display()))?;
    }
    Ok((dir, path))
}

fn mutator(seed: Option<u64>, shard: usize) -> Mutator {
    let mutator = match seed {
        Some(seed) => Mutator::seeded(seed.wrapping_add(shard as u64)),
        None => Mutator::from_entropy(),
    };
    if let Some(seed) = mutator.seed() {
        info!("Loop {} mutation seed {}", shard, seed);
    }
    mutator
}

/// Round-robin split of files over loops
fn shard_files(files: &[PathBuf], shards: usize) -> Vec<Vec<PathBuf>> {
    let n = shards.max(1);
    let mut out = vec![Vec::new(); n];
    for (i, file) in files.iter().enumerate() {
        out[i % n].push(file.clone());
    }
    out.retain(|s| !s.is_empty());
    out
}

/// Run the validate command
pub fn run(config: &Config, corpus: &str, options: Options) -> Result<()> {
    checked_sandbox(config)?;
    std::fs::create_dir_all(&options.out)
        .with_context(|| format!("Failed to create {}", options.out.display()))?;

    let shards = shard_files(&options.files, options.workers);
    let single = shards.len() == 1;
    let progress = ProgressBar::new(options.files.len() as u64);
    progress.set_style(create_bar_style());
    progress.set_message("validating");

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(shards.len())
        .build()
        .context("Failed to start worker pool")?;
    let results: Vec<Result<ValidationMetrics>> = pool.install(|| {
        shards
            .par_iter()
            .enumerate()
            .map(|(i, files)| {
                let detail = if single {
                    options.out.join("detail.csv")
                } else {
                    options.out.join(format!("detail-{}.csv", i))
                };
                run_loop(config, corpus, i, files, &options, &detail, &progress)
            })
            .collect()
    });
    progress.finish_and_clear();

    let mut metrics = ValidationMetrics::default();
    for result in results {
        metrics.merge(&result?);
    }

    let metrics_path = options.out.join("metrics.json");
    std::fs::write(&metrics_path, serde_json::to_string_pretty(&metrics.to_json())?)
        .with_context(|| format!("Failed to write {}", metrics_path.display()))?;

    println!("\n{}\n", style("Validation results").bold());
    println!("  Trials:     {}", style(metrics.trials).cyan());
    println!("  Ranked:     {}", style(metrics.ranked).cyan());
    println!("  MRR:        {}", style(format!("{:.3}", metrics.mrr())).cyan());
    println!(
        "  Mean rank:  {}",
        style(
            metrics
                .mean_rank()
                .map_or_else(|| "n/a".to_string(), |r| format!("{:.2}", r))
        )
        .cyan()
    );
    println!("  Top 5:      {}", style(format!("{:.1}%", metrics.top5() * 100.0)).cyan());
    if metrics.sandbox_failures > 0 {
        println!(
            "  {} {} mutations could not be run",
            style("!").yellow(),
            metrics.sandbox_failures
        );
    }
    println!("\n  Reports in {}", style(options.out.display()).dim());
    Ok(())
}

/// One independent loop: own corpus copy, manager, sandbox and mutator
fn run_loop(
    config: &Config,
    corpus: &str,
    shard: usize,
    files: &[PathBuf],
    options: &Options,
    detail_path: &Path,
    progress: &ProgressBar,
) -> Result<ValidationMetrics> {
    let (_data_dir, corpus_path) = scratch_corpus(config, corpus)?;
    let model = ModelManager::open(&corpus_path, config.engine.clone());
    let sandbox = SandboxRunner::new(&config.sandbox);

    let mut validator = Validator::new(model, sandbox, mutator(options.seed, shard), files)?
        .with_window(config.scorer.window);
    let mut detail = ReportWriter::create(detail_path)
        .with_context(|| format!("Failed to create {}", detail_path.display()))?;

    for file in 0..validator.files().len() {
        validator.run_random_file(file, options.iterations, &options.kinds, &mut detail)?;
        progress.inc(1);
    }
    let metrics = validator.metrics().clone();
    validator.into_model().release()?;
    Ok(metrics)
}

/// Run the sweep command
pub fn sweep(
    config: &Config,
    corpus: &str,
    file: &Path,
    threshold: f64,
    seed: Option<u64>,
    out: &Path,
) -> Result<()> {
    let sandbox = checked_sandbox(config)?;
    std::fs::create_dir_all(out).with_context(|| format!("Failed to create {}", out.display()))?;

    let (_data_dir, corpus_path) = scratch_corpus(config, corpus)?;
    let model = ModelManager::open(&corpus_path, config.engine.clone());
    let mut validator = Validator::new(model, sandbox, mutator(seed, 0), &[file.to_path_buf()])?
        .with_window(config.scorer.window);

    let detail_path = out.join("sweep-detail.csv");
    let summary_path = out.join("summary.csv");
    let mut detail = ReportWriter::create(&detail_path)
        .with_context(|| format!("Failed to create {}", detail_path.display()))?;
    let mut summary = ReportWriter::create(&summary_path)
        .with_context(|| format!("Failed to create {}", summary_path.display()))?;

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(create_spinner_style());
    spinner.set_message(format!("Sweeping {}", file.display()));
    spinner.enable_steady_tick(Duration::from_millis(100));
    let result = validator.sweep(0, threshold, &mut detail, &mut summary).cloned();
    spinner.finish_and_clear();
    let stats = result?;
    validator.into_model().release()?;

    println!(
        "\n{} {} lines, {} mutations, {} errors, delta {:.3}",
        style("Swept").bold(),
        stats.lines(),
        stats.total_mutations(),
        stats.total_errors(),
        stats.delta()
    );
    println!("  Summary in {}", style(summary_path.display()).dim());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shard_files_round_robin() {
        let files: Vec<PathBuf> = (0..5).map(|i| PathBuf::from(format!("{}.py", i))).collect();
        let shards = shard_files(&files, 2);
        assert_eq!(shards.len(), 2);
        assert_eq!(shards[0].len(), 3);
        assert_eq!(shards[1].len(), 2);

        // Never more loops than files
        assert_eq!(shard_files(&files[..1], 4).len(), 1);
    }
}
