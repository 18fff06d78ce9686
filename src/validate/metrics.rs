use serde::{Deserialize, Serialize};
use std::fmt;

/// Ranks at or below this count as a hit
pub const TOP_N: usize = 5;

/// Localization accuracy accumulated over trials.
///
/// A trial whose mutated line falls in no window has no rank: it counts
/// toward `trials` and contributes 0 to MRR and top-5, and is left out of
/// the mean rank. Mutations the sandbox could not run are counted apart
/// and never become trials.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationMetrics {
    pub trials: usize,
    pub ranked: usize,
    pub rank_sum: usize,
    pub reciprocal_sum: f64,
    pub top_hits: usize,
    #[serde(default)]
    pub sandbox_failures: usize,
}

impl ValidationMetrics {
    pub fn record(&mut self, rank: Option<usize>) {
        self.trials += 1;
        if let Some(rank) = rank.filter(|&r| r > 0) {
            self.ranked += 1;
            self.rank_sum += rank;
            self.reciprocal_sum += 1.0 / rank as f64;
            if rank <= TOP_N {
                self.top_hits += 1;
            }
        }
    }

    pub fn record_sandbox_failure(&mut self) {
        self.sandbox_failures += 1;
    }

    /// Combine results of independent validation runs
    pub fn merge(&mut self, other: &ValidationMetrics) {
        self.trials += other.trials;
        self.ranked += other.ranked;
        self.rank_sum += other.rank_sum;
        self.reciprocal_sum += other.reciprocal_sum;
        self.top_hits += other.top_hits;
        self.sandbox_failures += other.sandbox_failures;
    }

    /// Mean reciprocal rank over all trials
    pub fn mrr(&self) -> f64 {
        if self.trials == 0 {
            return 0.0;
        }
        self.reciprocal_sum / self.trials as f64
    }

    /// Mean rank over ranked trials
    pub fn mean_rank(&self) -> Option<f64> {
        if self.ranked == 0 {
            return None;
        }
        Some(self.rank_sum as f64 / self.ranked as f64)
    }

    /// Fraction of trials ranked in the top five
    pub fn top5(&self) -> f64 {
        if self.trials == 0 {
            return 0.0;
        }
        self.top_hits as f64 / self.trials as f64
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "trials": self.trials,
            "ranked": self.ranked,
            "mrr": self.mrr(),
            "mean_rank": self.mean_rank(),
            "top5": self.top5(),
            "sandbox_failures": self.sandbox_failures,
        })
    }
}

impl fmt::Display for ValidationMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} trials, {} ranked, MRR {:.3}, mean rank {}, top-5 {:.1}%",
            self.trials,
            self.ranked,
            self.mrr(),
            self.mean_rank()
                .map_or_else(|| "n/a".to_string(), |r| format!("{:.2}", r)),
            self.top5() * 100.0
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unranked_counts_as_zero() {
        let mut metrics = ValidationMetrics::default();
        metrics.record(Some(1));
        metrics.record(Some(4));
        metrics.record(Some(10));
        metrics.record(None);

        assert_eq!(metrics.trials, 4);
        assert_eq!(metrics.ranked, 3);
        assert!((metrics.mrr() - (1.0 + 0.25 + 0.1) / 4.0).abs() < 1e-12);
        assert_eq!(metrics.mean_rank(), Some(5.0));
        assert_eq!(metrics.top5(), 0.5);
    }

    #[test]
    fn test_merge_matches_single_run() {
        let ranks = [Some(1), None, Some(3), Some(7), Some(2)];
        let mut whole = ValidationMetrics::default();
        ranks.iter().for_each(|&r| whole.record(r));

        let mut left = ValidationMetrics::default();
        let mut right = ValidationMetrics::default();
        ranks[..2].iter().for_each(|&r| left.record(r));
        ranks[2..].iter().for_each(|&r| right.record(r));
        right.record_sandbox_failure();
        left.merge(&right);
        assert_eq!(left.sandbox_failures, 1);

        assert_eq!(left.trials, whole.trials);
        assert_eq!(left.ranked, whole.ranked);
        assert_eq!(left.top_hits, whole.top_hits);
        assert_eq!(left.mean_rank(), whole.mean_rank());
        assert!((left.mrr() - whole.mrr()).abs() < 1e-12);
    }

    #[test]
    fn test_empty() {
        let metrics = ValidationMetrics::default();
        assert_eq!(metrics.mrr(), 0.0);
        assert_eq!(metrics.mean_rank(), None);
        assert_eq!(metrics.top5(), 0.0);
    }
}
