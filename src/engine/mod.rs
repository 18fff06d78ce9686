//! Token n-gram language model served by `unnatural-engine`
//!
//! Builds a statistical model of "how this corpus writes code" from token
//! sequences. Sequences with high cross-entropy (low probability under the
//! model) are unusual, and unusual code is disproportionately buggy.
//!
//! Based on: "On the Naturalness of Buggy Code" (Ray & Hellendoorn, 2015)
//! and "On the Naturalness of Software" (Hindle et al., 2012).

mod server;

pub use server::serve;

use crate::model::{Prediction, Smoothing};
use std::collections::HashMap;
use std::io::BufRead;
use std::path::Path;

/// Smoothing constant for add-k
const ADD_K: f64 = 0.1;

/// Longest continuation returned by `predict`
const PREDICT_DEPTH: usize = 3;

/// Counts for everything that followed one context
#[derive(Debug, Clone, Default)]
struct Followers {
    total: u32,
    next: HashMap<String, u32>,
}

/// A token n-gram model with interpolated or backoff smoothing.
#[derive(Debug, Clone)]
pub struct NgramModel {
    order: usize,
    smoothing: Smoothing,
    /// context (space-joined, "" for unigrams) -> following token counts
    contexts: HashMap<String, Followers>,
    total_tokens: usize,
}

impl NgramModel {
    pub fn new(order: usize, smoothing: Smoothing) -> Self {
        Self {
            order: order.max(1),
            smoothing,
            contexts: HashMap::new(),
            total_tokens: 0,
        }
    }

    /// Train on every non-blank line of a corpus file
    pub fn from_corpus(path: &Path, order: usize, smoothing: Smoothing) -> std::io::Result<Self> {
        let mut model = Self::new(order, smoothing);
        let reader = std::io::BufReader::new(std::fs::File::open(path)?);
        for line in reader.lines() {
            let line = line?;
            let tokens: Vec<&str> = line.split_whitespace().collect();
            model.train_on_tokens(&tokens);
        }
        Ok(model)
    }

    /// Feed one training example into the model.
    pub fn train_on_tokens<S: AsRef<str>>(&mut self, tokens: &[S]) {
        for i in 0..tokens.len() {
            let target = tokens[i].as_ref();
            for len in 0..self.order.min(i + 1) {
                let context = join(&tokens[i - len..i]);
                let followers = self.contexts.entry(context).or_default();
                followers.total += 1;
                *followers.next.entry(target.to_string()).or_insert(0) += 1;
            }
        }
        self.total_tokens += tokens.len();
    }

    pub fn order(&self) -> usize {
        self.order
    }

    pub fn total_tokens(&self) -> usize {
        self.total_tokens
    }

    pub fn vocab_size(&self) -> usize {
        self.contexts.get("").map_or(0, |f| f.next.len())
    }

    /// Mean surprisal in bits per token. Each token is conditioned on up to
    /// `order - 1` preceding tokens of the same sequence.
    pub fn cross_entropy<S: AsRef<str>>(&self, tokens: &[S]) -> f64 {
        if tokens.is_empty() {
            return 0.0;
        }
        let refs: Vec<&str> = tokens.iter().map(AsRef::as_ref).collect();
        let total: f64 = (0..refs.len())
            .map(|i| {
                let from = i.saturating_sub(self.order - 1);
                -self.probability(&refs[from..i], refs[i]).log2()
            })
            .sum();
        total / refs.len() as f64
    }

    /// P(token | context); never zero.
    pub fn probability(&self, context: &[&str], token: &str) -> f64 {
        match self.smoothing {
            Smoothing::WittenBell => self.witten_bell(context, token),
            Smoothing::AddK => self.add_k(context, token),
        }
    }

    fn witten_bell(&self, context: &[&str], token: &str) -> f64 {
        if context.is_empty() {
            let vocab = self.vocab_size() as f64;
            let uniform = 1.0 / (vocab + 1.0);
            return match self.contexts.get("") {
                Some(f) if f.total > 0 => {
                    let seen = f.next.len() as f64;
                    let count = *f.next.get(token).unwrap_or(&0) as f64;
                    (count + seen * uniform) / (f.total as f64 + seen)
                }
                _ => uniform,
            };
        }

        let lower = self.witten_bell(&context[1..], token);
        match self.contexts.get(&join(context)) {
            Some(f) if f.total > 0 => {
                let distinct = f.next.len() as f64;
                let count = *f.next.get(token).unwrap_or(&0) as f64;
                (count + distinct * lower) / (f.total as f64 + distinct)
            }
            _ => lower,
        }
    }

    fn add_k(&self, context: &[&str], token: &str) -> f64 {
        let vocab = self.vocab_size() as f64 + 1.0;
        // Back off to the longest context that has been seen
        for start in 0..=context.len() {
            if let Some(f) = self.contexts.get(&join(&context[start..])) {
                if f.total > 0 {
                    let count = *f.next.get(token).unwrap_or(&0) as f64;
                    return (count + ADD_K) / (f.total as f64 + ADD_K * vocab);
                }
            }
        }
        1.0 / vocab
    }

    /// Up to `limit` likely continuations of `prefix`, best first.
    pub fn predict<S: AsRef<str>>(&self, prefix: &[S], limit: usize) -> Vec<Prediction> {
        let mut history: Vec<String> = prefix.iter().map(|s| s.as_ref().to_string()).collect();

        let mut candidates: Vec<(String, f64)> = self
            .candidates(&history)
            .into_iter()
            .map(|token| {
                let p = self.conditional(&history, &token);
                (token, p)
            })
            .collect();
        candidates.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        candidates.truncate(limit);

        let mut predictions: Vec<Prediction> = candidates
            .into_iter()
            .map(|(first, p)| {
                let mut tokens = vec![first.clone()];
                let mut score = p.log2();
                history.push(first);
                let pushed_from = history.len() - 1;

                while tokens.len() < PREDICT_DEPTH {
                    let best = self
                        .candidates(&history)
                        .into_iter()
                        .map(|t| {
                            let p = self.conditional(&history, &t);
                            (t, p)
                        })
                        .max_by(|a, b| a.1.total_cmp(&b.1).then_with(|| b.0.cmp(&a.0)));
                    let Some((next, p)) = best else { break };
                    score += p.log2();
                    history.push(next.clone());
                    tokens.push(next);
                }
                history.truncate(pushed_from);
                Prediction { score, tokens }
            })
            .collect();

        predictions.sort_by(|a, b| b.score.total_cmp(&a.score));
        predictions
    }

    /// Tokens seen after the longest matching suffix of `history`
    fn candidates(&self, history: &[String]) -> Vec<String> {
        let refs: Vec<&str> = history.iter().map(String::as_str).collect();
        let from = refs.len().saturating_sub(self.order - 1);
        for start in from..=refs.len() {
            if let Some(f) = self.contexts.get(&join(&refs[start..])) {
                if !f.next.is_empty() {
                    return f.next.keys().cloned().collect();
                }
            }
        }
        Vec::new()
    }

    fn conditional(&self, history: &[String], token: &str) -> f64 {
        let refs: Vec<&str> = history.iter().map(String::as_str).collect();
        let from = refs.len().saturating_sub(self.order - 1);
        self.probability(&refs[from..], token)
    }

    /// Summary for logs
    pub fn stats_json(&self) -> serde_json::Value {
        serde_json::json!({
            "order": self.order,
            "smoothing": self.smoothing.name(),
            "total_tokens": self.total_tokens,
            "vocab_size": self.vocab_size(),
            "contexts": self.contexts.len(),
        })
    }
}

fn join<S: AsRef<str>>(tokens: &[S]) -> String {
    tokens
        .iter()
        .map(AsRef::as_ref)
        .collect::<Vec<_>>()
        .join(" ")
}
