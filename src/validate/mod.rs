//! Mutation-based validation of defect localization
//!
//! Known-good files are trained into the model, then repeatedly broken:
//! each mutation is run in the sandbox, its windows are scored, and the
//! rank of the window that covers the mutated line is recorded. One detail
//! row is written per applied mutation.

mod metrics;
mod report;
mod sweep;

pub use metrics::{ValidationMetrics, TOP_N};
pub use report::{DetailRow, ReportWriter, SummaryRow};
pub use sweep::LineStats;

use crate::lexer::{lex, Lexeme, Source};
use crate::model::{LanguageModel, ModelError};
use crate::mutation::{Mutation, MutationKind, MutationOutcome, Mutator};
use crate::sandbox::{SandboxError, SandboxRunner, TrialOutcome};
use crate::scorer::{rank_of_line, worst_windows, DEFAULT_WINDOW};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path} does not run clean: {outcome}")]
    NotClean { path: PathBuf, outcome: TrialOutcome },

    #[error("line sweep of {path} stalled: no line accepted a mutation in round {round}")]
    SweepStalled { path: PathBuf, round: usize },

    #[error("sweep threshold must be positive, got {0}")]
    InvalidThreshold(f64),

    #[error("no such validation file: {0}")]
    UnknownFile(usize),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Sandbox(#[from] SandboxError),

    #[error("failed to write report: {0}")]
    Report(#[from] csv::Error),
}

pub type ValidationResult<T> = Result<T, ValidationError>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Random mutations per file
    pub iterations: usize,
    /// Line sweeps stop once the relative error bound drops below this
    pub sweep_threshold: f64,
    /// Kinds drawn from in random mode
    pub kinds: Vec<MutationKind>,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            iterations: 50,
            sweep_threshold: 0.5,
            kinds: MutationKind::all(),
        }
    }
}

/// A source file known to run clean
#[derive(Debug, Clone)]
pub struct ValidationFile {
    pub path: PathBuf,
    /// File name used in reports and for the sandboxed copy
    pub name: String,
    pub source: Source,
}

impl ValidationFile {
    /// Read and run `path` once; reject it unless it runs clean.
    pub fn accept(path: &Path, sandbox: &SandboxRunner) -> ValidationResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| ValidationError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let trial = sandbox.run(path)?;
        if !trial.outcome.is_clean() {
            return Err(ValidationError::NotClean {
                path: path.to_path_buf(),
                outcome: trial.outcome,
            });
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        debug!("Accepted {} ({} lines)", path.display(), text.lines().count());
        Ok(Self {
            path: path.to_path_buf(),
            name,
            source: lex(&text),
        })
    }

    pub fn line_count(&self) -> usize {
        self.source.line_count()
    }
}

/// Everything learned from one applied mutation
#[derive(Debug, Clone)]
pub struct TrialRecord {
    pub mutation: Mutation,
    pub outcome: TrialOutcome,
    pub rank: Option<usize>,
}

impl TrialRecord {
    /// The sandbox failed on the very line that was mutated
    pub fn online(&self) -> bool {
        self.outcome.line() == Some(self.mutation.line())
    }

    fn detail_row(&self, file: &str, stats: &LineStats) -> DetailRow {
        let line = self.mutation.line();
        let location = self.outcome.location.as_ref();
        DetailRow {
            file: file.to_string(),
            mutation: self.mutation.kind.to_string(),
            line,
            rank: self.rank,
            observed_line: self.outcome.line(),
            exception: self.outcome.exception_name().to_string(),
            online: self.online(),
            errors: stats.total_errors(),
            mutations: stats.total_mutations(),
            line_mutations: stats.mutations_on(line),
            line_errors: stats.errors_on(line),
            charm: stats.charm(line),
            delta: stats.delta(),
            token_type: self
                .mutation
                .token
                .as_ref()
                .map(|t| t.category.name().to_string())
                .unwrap_or_default(),
            token_value: self
                .mutation
                .token
                .as_ref()
                .map(Lexeme::display)
                .unwrap_or_default(),
            failure_file: location.map(|l| l.filename.clone()).unwrap_or_default(),
            failure_function: location
                .and_then(|l| l.function.clone())
                .unwrap_or_default(),
        }
    }
}

/// One validation loop: a model, a sandbox, and the files it was built from.
///
/// Loops share nothing; run several side by side for throughput.
pub struct Validator<M: LanguageModel, R: Rng> {
    model: M,
    sandbox: SandboxRunner,
    mutator: Mutator<R>,
    window: usize,
    files: Vec<ValidationFile>,
    stats: Vec<LineStats>,
    metrics: ValidationMetrics,
}

impl<M: LanguageModel, R: Rng> Validator<M, R> {
    /// Accept every file and train all of them into the model.
    pub fn new(
        mut model: M,
        sandbox: SandboxRunner,
        mutator: Mutator<R>,
        paths: &[PathBuf],
    ) -> ValidationResult<Self> {
        let mut files = Vec::with_capacity(paths.len());
        for path in paths {
            files.push(ValidationFile::accept(path, &sandbox)?);
        }
        for file in &files {
            model.learn(file.source.scrub().lexemes())?;
        }
        info!("Trained on {} validation files", files.len());

        let stats = files.iter().map(|f| LineStats::new(f.line_count())).collect();
        Ok(Self {
            model,
            sandbox,
            mutator,
            window: DEFAULT_WINDOW,
            files,
            stats,
            metrics: ValidationMetrics::default(),
        })
    }

    pub fn with_window(mut self, window: usize) -> Self {
        self.window = window.max(1);
        self
    }

    pub fn files(&self) -> &[ValidationFile] {
        &self.files
    }

    pub fn metrics(&self) -> &ValidationMetrics {
        &self.metrics
    }

    pub fn stats(&self, file: usize) -> Option<&LineStats> {
        self.stats.get(file)
    }

    pub fn model_mut(&mut self) -> &mut M {
        &mut self.model
    }

    pub fn into_model(self) -> M {
        self.model
    }

    /// Mutate, run, score and record once. `None` when the mutation did not apply.
    pub fn trial<W: Write>(
        &mut self,
        file: usize,
        kind: MutationKind,
        target_line: Option<usize>,
        detail: &mut ReportWriter<W>,
    ) -> ValidationResult<Option<TrialRecord>> {
        let validation_file = self.files.get(file).ok_or(ValidationError::UnknownFile(file))?;
        let mutation = match self.mutator.mutate(&validation_file.source, kind, target_line) {
            MutationOutcome::Applied(m) => m,
            MutationOutcome::NotApplicable(reason) => {
                debug!("{}: {} skipped: {}", validation_file.name, kind, reason);
                return Ok(None);
            }
        };

        let trial = match self.sandbox.run_source(&mutation.text, &validation_file.name) {
            Ok(trial) => trial,
            Err(e) => {
                warn!(
                    "{}: {} at {} could not be run: {}",
                    validation_file.name, kind, mutation.location, e
                );
                self.metrics.record_sandbox_failure();
                return Ok(None);
            }
        };
        let windows = worst_windows(&mut self.model, &mutation.source, self.window)?;
        let rank = rank_of_line(&windows, mutation.line());

        let record = TrialRecord {
            mutation,
            outcome: trial.outcome,
            rank,
        };
        let stats = &mut self.stats[file];
        stats.record(
            record.mutation.line(),
            record.outcome.line(),
            !record.outcome.is_clean(),
        );
        self.metrics.record(rank);
        detail.write(&record.detail_row(&validation_file.name, stats))?;

        debug!(
            "{}: {} at {} -> {} (rank {:?})",
            validation_file.name,
            kind,
            record.mutation.location,
            record.outcome,
            rank
        );
        Ok(Some(record))
    }

    /// `iterations` random mutations per file, kinds drawn uniformly
    pub fn run_random<W: Write>(
        &mut self,
        iterations: usize,
        kinds: &[MutationKind],
        detail: &mut ReportWriter<W>,
    ) -> ValidationResult<&ValidationMetrics> {
        for file in 0..self.files.len() {
            self.run_random_file(file, iterations, kinds, detail)?;
        }
        Ok(&self.metrics)
    }

    /// `iterations` random mutations of one file; returns how many applied
    pub fn run_random_file<W: Write>(
        &mut self,
        file: usize,
        iterations: usize,
        kinds: &[MutationKind],
        detail: &mut ReportWriter<W>,
    ) -> ValidationResult<usize> {
        let mut applied = 0;
        for _ in 0..iterations {
            let Some(kind) = self.mutator.choose_kind(kinds) else {
                break;
            };
            if self.trial(file, kind, None, detail)?.is_some() {
                applied += 1;
            }
        }
        info!("{}: {} mutations, {}", self.files[file].name, applied, self.metrics);
        Ok(applied)
    }

    /// Replace a token on every line, round after round, until the line
    /// estimates converge; then write one summary row per line.
    pub fn sweep<D: Write, S: Write>(
        &mut self,
        file: usize,
        threshold: f64,
        detail: &mut ReportWriter<D>,
        summary: &mut ReportWriter<S>,
    ) -> ValidationResult<&LineStats> {
        if threshold.is_nan() || threshold <= 0.0 {
            return Err(ValidationError::InvalidThreshold(threshold));
        }
        let validation_file = self.files.get(file).ok_or(ValidationError::UnknownFile(file))?;
        let lines = validation_file.line_count();
        let path = validation_file.path.clone();
        let name = validation_file.name.clone();

        let mut round = 0;
        while !self.stats[file].is_converged(threshold) {
            round += 1;
            let mut applied = 0;
            for line in 1..=lines {
                if self
                    .trial(file, MutationKind::ReplaceToken, Some(line), detail)?
                    .is_some()
                {
                    applied += 1;
                }
            }
            if applied == 0 {
                return Err(ValidationError::SweepStalled { path, round });
            }
            debug!(
                "{}: sweep round {} applied {} mutations, delta {:.3}",
                name,
                round,
                applied,
                self.stats[file].delta()
            );
        }

        for row in self.stats[file].summary_rows(&name) {
            summary.write(&row)?;
        }
        info!("{}: swept in {} rounds", name, round);
        Ok(&self.stats[file])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CrossEntropy, ModelResult};
    use rand_chacha::ChaCha8Rng;
    use std::time::Duration;
    use tempfile::TempDir;

    /// Scores windows by how many tokens it has never seen
    #[derive(Default)]
    struct VocabModel {
        seen: std::collections::HashSet<String>,
        examples: usize,
    }

    impl CrossEntropy for VocabModel {
        fn cross_entropy(&mut self, lexemes: &[Lexeme]) -> ModelResult<f64> {
            let unseen = lexemes.iter().filter(|l| !self.seen.contains(&l.display())).count();
            Ok(1.0 + unseen as f64)
        }
    }

    impl LanguageModel for VocabModel {
        fn learn(&mut self, lexemes: &[Lexeme]) -> ModelResult<()> {
            self.seen.extend(lexemes.iter().map(Lexeme::display));
            self.examples += 1;
            Ok(())
        }
    }

    /// Worker that reports every program clean without running it
    fn always_clean() -> SandboxRunner {
        SandboxRunner::with_command(vec!["true".to_string()], Duration::from_secs(5))
    }

    fn write_files(dir: &TempDir) -> Vec<PathBuf> {
        let a = dir.path().join("a.py");
        let b = dir.path().join("b.py");
        std::fs::write(&a, "def f(x):\n    return x + 1\n\nprint(f(2))\n").unwrap();
        std::fs::write(&b, "total = 0\nfor i in range(10):\n    total += i\n").unwrap();
        vec![a, b]
    }

    fn validator(paths: &[PathBuf]) -> Validator<VocabModel, ChaCha8Rng> {
        Validator::new(
            VocabModel::default(),
            always_clean(),
            Mutator::seeded(42),
            paths,
        )
        .unwrap()
        .with_window(4)
    }

    fn csv_rows(writer: ReportWriter<Vec<u8>>) -> Vec<csv::StringRecord> {
        let bytes = writer.into_inner().unwrap();
        csv::Reader::from_reader(bytes.as_slice())
            .records()
            .collect::<Result<_, _>>()
            .unwrap()
    }

    #[cfg(unix)]
    #[test]
    fn test_construction_trains_every_file() {
        let dir = TempDir::new().unwrap();
        let paths = write_files(&dir);
        let mut v = validator(&paths);
        assert_eq!(v.files().len(), 2);
        assert_eq!(v.model_mut().examples, 2);
        assert_eq!(v.files()[0].name, "a.py");
    }

    #[cfg(unix)]
    #[test]
    fn test_rejects_unclean_file() {
        let dir = TempDir::new().unwrap();
        let paths = write_files(&dir);
        let failing = SandboxRunner::with_command(vec!["false".to_string()], Duration::from_secs(5));
        let result = Validator::new(VocabModel::default(), failing, Mutator::seeded(1), &paths);
        match result {
            Err(ValidationError::NotClean { path, .. }) => assert_eq!(path, paths[0]),
            other => panic!("expected NotClean, got {:?}", other.err()),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_one_detail_row_per_applied_mutation() {
        let dir = TempDir::new().unwrap();
        let paths = write_files(&dir);
        let mut v = validator(&paths);
        let mut detail = ReportWriter::new(Vec::new());

        let mut applied = 0;
        for kind in MutationKind::all() {
            for file in 0..2 {
                if v.trial(file, kind, None, &mut detail).unwrap().is_some() {
                    applied += 1;
                }
            }
        }
        assert!(applied > 0);
        assert_eq!(v.metrics().trials, applied);
        assert_eq!(detail.rows(), applied);
        let rows = csv_rows(detail);
        assert_eq!(rows.len(), applied);
        // Layout tokens are written by name, so every record is one line
        for row in &rows {
            assert!(!row.iter().any(|field| field.contains('\n')), "{:?}", row);
        }
        assert!(rows.iter().any(|row| &row[1] == "insert-token" || &row[1] == "delete-token"));
    }

    #[test]
    fn test_layout_token_written_by_name() {
        let source = lex("x\n");
        let newline = source
            .lexemes()
            .iter()
            .find(|l| l.category == crate::lexer::Category::Newline)
            .cloned()
            .unwrap();
        let record = TrialRecord {
            mutation: Mutation {
                kind: MutationKind::DeleteToken,
                location: newline.start,
                token: Some(newline),
                text: "x".to_string(),
                source: lex("x"),
            },
            outcome: TrialOutcome::clean(),
            rank: None,
        };
        let mut detail = ReportWriter::new(Vec::new());
        detail.write(&record.detail_row("a.py", &LineStats::new(1))).unwrap();

        let rows = csv_rows(detail);
        assert_eq!(rows.len(), 1);
        assert_eq!(&rows[0][13], "NEWLINE");
        assert_eq!(&rows[0][14], "<NEWLINE>");
    }

    #[cfg(unix)]
    #[test]
    fn test_sandbox_failure_does_not_end_the_run() {
        let dir = TempDir::new().unwrap();
        let paths = write_files(&dir);
        let mut v = validator(&paths);
        v.sandbox = SandboxRunner::with_command(
            vec!["/nonexistent/bin/python3".to_string()],
            Duration::from_secs(5),
        );
        let mut detail = ReportWriter::new(Vec::new());

        let kinds = [MutationKind::DeleteToken];
        let metrics = v.run_random(3, &kinds, &mut detail).unwrap().clone();
        assert_eq!(metrics.trials, 0);
        assert_eq!(metrics.sandbox_failures, 6);
        assert_eq!(detail.rows(), 0);
        assert_eq!(v.stats(0).unwrap().total_mutations(), 0);
    }

    #[cfg(unix)]
    #[test]
    fn test_random_run_counts() {
        let dir = TempDir::new().unwrap();
        let paths = write_files(&dir);
        let mut v = validator(&paths);
        let mut detail = ReportWriter::new(Vec::new());

        let kinds = [MutationKind::DeleteToken, MutationKind::ReplaceToken];
        let metrics = v.run_random(5, &kinds, &mut detail).unwrap().clone();
        // Token kinds always apply to these files
        assert_eq!(metrics.trials, 10);
        assert_eq!(detail.rows(), 10);
        assert_eq!(v.stats(0).unwrap().total_mutations(), 5);
        assert_eq!(v.stats(1).unwrap().total_mutations(), 5);
    }

    #[cfg(unix)]
    #[test]
    fn test_sweep_writes_one_summary_row_per_line() {
        let dir = TempDir::new().unwrap();
        let paths = write_files(&dir);
        let mut v = validator(&paths);
        let mut detail = ReportWriter::new(Vec::new());
        let mut summary = ReportWriter::new(Vec::new());

        let stats = v.sweep(0, 0.9, &mut detail, &mut summary).unwrap().clone();
        assert!(stats.is_converged(0.9));
        assert_eq!(stats.lines(), 4);
        // Line 3 is blank and never mutated
        assert_eq!(stats.mutations_on(3), 0);

        let rows = csv_rows(summary);
        assert_eq!(rows.len(), 4);
        assert_eq!((&rows[0][0], &rows[0][1]), ("a.py", "1"));
        assert_eq!((&rows[3][0], &rows[3][1]), ("a.py", "4"));
        assert_eq!(detail.rows() as u32, stats.total_mutations());
    }

    #[cfg(unix)]
    #[test]
    fn test_sweep_rejects_bad_threshold() {
        let dir = TempDir::new().unwrap();
        let paths = write_files(&dir);
        let mut v = validator(&paths);
        let mut detail = ReportWriter::new(Vec::new());
        let mut summary = ReportWriter::new(Vec::new());
        assert!(matches!(
            v.sweep(0, 0.0, &mut detail, &mut summary),
            Err(ValidationError::InvalidThreshold(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_sweep_stalls_without_tokens() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty.py");
        std::fs::write(&path, "# nothing here\n").unwrap();
        let mut v = validator(&[path]);
        let mut detail = ReportWriter::new(Vec::new());
        let mut summary = ReportWriter::new(Vec::new());
        assert!(matches!(
            v.sweep(0, 0.5, &mut detail, &mut summary),
            Err(ValidationError::SweepStalled { round: 1, .. })
        ));
    }
}
