//! Sliding-window anomaly scoring
//!
//! Slides a fixed-size window over a scrubbed token sequence, scores every
//! window independently, and ranks them worst (most surprising) first.
//! That is O(n) engine round trips per file, so score all windows of a file
//! before training again or each window pays for an engine restart.

use crate::lexer::{Lexeme, Source};
use crate::model::{CrossEntropy, ModelResult};
use std::ops::RangeInclusive;
use tracing::{debug, warn};

/// Default number of tokens per window
pub const DEFAULT_WINDOW: usize = 20;

/// One scored window
#[derive(Debug, Clone, PartialEq)]
pub struct WindowScore {
    /// Index of the first lexeme within the scrubbed sequence
    pub start: usize,
    pub lexemes: Vec<Lexeme>,
    /// Cross-entropy in bits per token
    pub score: f64,
}

impl WindowScore {
    /// Source lines covered by the window
    pub fn lines(&self) -> RangeInclusive<usize> {
        let first = self.lexemes.first().map_or(0, |l| l.start.line);
        let last = self.lexemes.iter().map(|l| l.end.line).max().unwrap_or(first);
        first..=last.max(first)
    }

    pub fn contains_line(&self, line: usize) -> bool {
        self.lines().contains(&line)
    }
}

/// Start offsets of every window: `n - k` windows when `n > k`, else one.
pub fn window_starts(n: usize, k: usize) -> std::ops::Range<usize> {
    if n > k {
        0..n - k
    } else {
        0..1
    }
}

/// Score every window of the scrubbed source and sort worst first.
///
/// A protocol error spoils only its window, which is skipped; fatal model
/// errors abort. Equal scores keep source order.
pub fn worst_windows<M: CrossEntropy + ?Sized>(
    model: &mut M,
    source: &Source,
    window: usize,
) -> ModelResult<Vec<WindowScore>> {
    let scrubbed = source.scrub();
    let k = window.max(1);

    let mut scored = Vec::new();
    for start in window_starts(scrubbed.len(), k) {
        let slice = scrubbed.window(start, k);
        match model.cross_entropy(slice) {
            Ok(score) => scored.push(WindowScore {
                start,
                lexemes: slice.to_vec(),
                score,
            }),
            Err(e) if !e.is_fatal() => {
                warn!("Skipping window at token {}: {}", start, e);
            }
            Err(e) => return Err(e),
        }
    }

    // sort_by is stable, so ties keep their original order
    scored.sort_by(|a, b| b.score.total_cmp(&a.score));
    debug!("Scored {} windows of {} tokens", scored.len(), k);
    Ok(scored)
}

/// 1-based rank of the first window (in ranked order) covering `line`
pub fn rank_of_line(windows: &[WindowScore], line: usize) -> Option<usize> {
    windows
        .iter()
        .position(|w| w.contains_line(line))
        .map(|i| i + 1)
}
