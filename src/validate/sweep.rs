//! Per-line localization estimator
//!
//! For each line, `charm` compares how often trials failed *on* that line with
//! how often the line was mutated, normalized by the mean number of
//! mutations per line:
//!
//! ```text
//! charm(l) = (errors_on(l) - mutations_on(l)) / (total_mutations / lines)
//! delta    = 1 / sqrt(total_mutations / lines)
//! ```
//!
//! `delta` bounds the relative error of the estimate; a sweep keeps adding
//! mutations until it drops under the caller's threshold.

use super::report::SummaryRow;

#[derive(Debug, Clone, PartialEq)]
pub struct LineStats {
    /// Indexed by line number; slot 0 is unused
    mutations: Vec<u32>,
    errors: Vec<u32>,
    total_mutations: u32,
    total_errors: u32,
}

impl LineStats {
    pub fn new(lines: usize) -> Self {
        Self {
            mutations: vec![0; lines + 1],
            errors: vec![0; lines + 1],
            total_mutations: 0,
            total_errors: 0,
        }
    }

    pub fn lines(&self) -> usize {
        self.mutations.len() - 1
    }

    /// Count one mutation of `target` and, if the run failed, where it failed.
    /// Failures reported outside the file's lines count only toward the total.
    pub fn record(&mut self, target: usize, failure_line: Option<usize>, failed: bool) {
        self.total_mutations += 1;
        if let Some(slot) = self.mutations.get_mut(target).filter(|_| target > 0) {
            *slot += 1;
        }
        if failed {
            self.total_errors += 1;
            if let Some(line) = failure_line.filter(|&l| l > 0) {
                if let Some(slot) = self.errors.get_mut(line) {
                    *slot += 1;
                }
            }
        }
    }

    pub fn total_mutations(&self) -> u32 {
        self.total_mutations
    }

    pub fn total_errors(&self) -> u32 {
        self.total_errors
    }

    pub fn mutations_on(&self, line: usize) -> u32 {
        self.mutations.get(line).copied().unwrap_or(0)
    }

    pub fn errors_on(&self, line: usize) -> u32 {
        self.errors.get(line).copied().unwrap_or(0)
    }

    /// Mean mutations per line
    fn density(&self) -> f64 {
        if self.lines() == 0 {
            return 0.0;
        }
        self.total_mutations as f64 / self.lines() as f64
    }

    pub fn charm(&self, line: usize) -> f64 {
        let density = self.density();
        if density == 0.0 {
            return 0.0;
        }
        (self.errors_on(line) as f64 - self.mutations_on(line) as f64) / density
    }

    /// Relative error bound; infinite before any mutation
    pub fn delta(&self) -> f64 {
        let density = self.density();
        if density == 0.0 {
            return f64::INFINITY;
        }
        1.0 / density.sqrt()
    }

    pub fn is_converged(&self, threshold: f64) -> bool {
        self.delta() < threshold
    }

    /// One row per line, in line order
    pub fn summary_rows(&self, file: &str) -> Vec<SummaryRow> {
        let delta = self.delta();
        (1..=self.lines())
            .map(|line| SummaryRow {
                file: file.to_string(),
                line,
                mutations: self.mutations_on(line),
                errors: self.errors_on(line),
                charm: self.charm(line),
                delta,
            })
            .collect()
    }
}
