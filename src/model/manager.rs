//! Model process state machine
//!
//! ```text
//!   STOPPED --start()--> STARTING --warm-up ok--> READY
//!      ^                    |                       |
//!      +----- failure ------+---- stop()/train() ---+
//! ```
//!
//! Exactly one engine runs per corpus snapshot. `train()` is a hard barrier:
//! it appends to the corpus and stops the engine, so the next query starts a
//! fresh process that has read the new data.

use super::channel::{Channel, Launcher, ProcessLauncher};
use super::corpus::Corpus;
use super::protocol::{self, Prediction, Request};
use super::{ModelError, ModelResult, ProtocolError};
use crate::lexer::{display_tokens, pad_minimum, Lexeme, MIN_CONTEXT, UNKNOWN_TOKEN};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default n-gram order
pub const DEFAULT_ORDER: usize = 10;

/// Cross-entropy (bits/token) at or above which an answer is treated as corrupt
pub const DEFAULT_CEILING: f64 = 70.0;

/// Smoothing method the engine is started with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Smoothing {
    /// Interpolated Witten-Bell
    #[default]
    WittenBell,
    /// Add-k with backoff to the longest seen context
    AddK,
}

impl Smoothing {
    pub fn name(&self) -> &'static str {
        match self {
            Smoothing::WittenBell => "witten-bell",
            Smoothing::AddK => "add-k",
        }
    }
}

impl FromStr for Smoothing {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "witten-bell" | "wb" => Ok(Smoothing::WittenBell),
            "add-k" | "addk" => Ok(Smoothing::AddK),
            _ => Err(format!(
                "Unknown smoothing '{}'. Valid methods: witten-bell, add-k",
                s
            )),
        }
    }
}

/// How the engine is launched and how its answers are checked
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    pub binary: PathBuf,
    pub order: usize,
    pub smoothing: Smoothing,
    pub ceiling: f64,
    /// Time the engine gets to exit after its endpoint closes
    pub grace_ms: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            binary: default_engine_binary(),
            order: DEFAULT_ORDER,
            smoothing: Smoothing::default(),
            ceiling: DEFAULT_CEILING,
            grace_ms: 500,
        }
    }
}

impl EngineSettings {
    pub fn grace(&self) -> Duration {
        Duration::from_millis(self.grace_ms)
    }
}

/// `unnatural-engine` next to the running executable, else whatever is on PATH.
pub fn default_engine_binary() -> PathBuf {
    let name = format!("unnatural-engine{}", std::env::consts::EXE_SUFFIX);
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(&name)))
        .filter(|candidate| candidate.exists())
        .unwrap_or_else(|| PathBuf::from(name))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelState {
    Stopped,
    Starting,
    Ready,
}

/// Anything that can score a token window
pub trait CrossEntropy {
    fn cross_entropy(&mut self, lexemes: &[Lexeme]) -> ModelResult<f64>;
}

/// A scorer that also learns from examples
pub trait LanguageModel: CrossEntropy {
    fn learn(&mut self, lexemes: &[Lexeme]) -> ModelResult<()>;
}

/// Owner of one engine process and its corpus.
///
/// Methods take `&mut self`: the channel is half-duplex, so callers that
/// share a manager must serialize access themselves.
pub struct ModelManager {
    corpus: Corpus,
    settings: EngineSettings,
    launcher: Box<dyn Launcher>,
    channel: Option<Box<dyn Channel>>,
    state: ModelState,
    /// Bumped on every corpus append
    generation: u64,
    /// Corpus generation the running engine was started against
    engine_generation: Option<u64>,
    starts: u64,
}

impl ModelManager {
    /// Manager that spawns `settings.binary` as a child process
    pub fn open(corpus: impl Into<PathBuf>, settings: EngineSettings) -> Self {
        Self::with_launcher(corpus, settings, Box::new(ProcessLauncher))
    }

    pub fn with_launcher(
        corpus: impl Into<PathBuf>,
        settings: EngineSettings,
        launcher: Box<dyn Launcher>,
    ) -> Self {
        Self {
            corpus: Corpus::new(corpus),
            settings,
            launcher,
            channel: None,
            state: ModelState::Stopped,
            generation: 0,
            engine_generation: None,
            starts: 0,
        }
    }

    pub fn state(&self) -> ModelState {
        self.state
    }

    pub fn corpus(&self) -> &Corpus {
        &self.corpus
    }

    pub fn corpus_path(&self) -> &Path {
        self.corpus.path()
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Number of appends made through this manager
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Generation the live engine was started against, if any
    pub fn engine_generation(&self) -> Option<u64> {
        self.engine_generation
    }

    /// Engine processes launched so far
    pub fn starts(&self) -> u64 {
        self.starts
    }

    /// Launch the engine and confirm it answers. No-op when already ready.
    pub fn start(&mut self) -> ModelResult<()> {
        if self.state == ModelState::Ready {
            return Ok(());
        }
        self.corpus.ensure_ready()?;

        self.state = ModelState::Starting;
        let channel = match self.launcher.launch(self.corpus.path(), &self.settings) {
            Ok(channel) => channel,
            Err(e) => {
                self.state = ModelState::Stopped;
                return Err(e);
            }
        };
        self.channel = Some(channel);
        self.starts += 1;

        let warm_up = vec![UNKNOWN_TOKEN.to_string(); MIN_CONTEXT];
        if let Err(e) = self.exchange_cross_entropy(warm_up) {
            warn!("Engine failed warm-up: {}", e);
            self.stop()?;
            return Err(e);
        }

        self.state = ModelState::Ready;
        self.engine_generation = Some(self.generation);
        info!(
            "Engine ready on {} (order {}, {})",
            self.corpus.path().display(),
            self.settings.order,
            self.settings.smoothing.name()
        );
        Ok(())
    }

    /// Close the endpoint and make sure the engine is gone. Idempotent.
    pub fn stop(&mut self) -> ModelResult<()> {
        self.state = ModelState::Stopped;
        self.engine_generation = None;
        if let Some(mut channel) = self.channel.take() {
            channel.close(self.settings.grace())?;
            debug!("Engine stopped");
        }
        Ok(())
    }

    /// Append one training example and invalidate the running engine.
    pub fn train(&mut self, lexemes: &[Lexeme]) -> ModelResult<()> {
        self.train_tokens(&display_tokens(lexemes))
    }

    pub fn train_tokens(&mut self, tokens: &[String]) -> ModelResult<()> {
        if tokens.is_empty() {
            debug!("Skipping empty training example");
            return Ok(());
        }
        self.corpus.append(tokens)?;
        self.generation += 1;
        self.stop()
    }

    /// Cross-entropy of a token sequence in bits per token
    pub fn query(&mut self, lexemes: &[Lexeme]) -> ModelResult<f64> {
        self.query_tokens(display_tokens(lexemes))
    }

    pub fn query_tokens(&mut self, tokens: Vec<String>) -> ModelResult<f64> {
        self.ensure_current()?;
        let value = self.exchange_cross_entropy(pad_minimum(tokens))?;
        if value >= self.settings.ceiling {
            return Err(ProtocolError::OutOfRange(value).into());
        }
        Ok(value)
    }

    /// Likely continuations of a prefix, most likely first
    pub fn predict(&mut self, prefix: &[Lexeme]) -> ModelResult<Vec<Prediction>> {
        self.predict_tokens(display_tokens(prefix))
    }

    pub fn predict_tokens(&mut self, prefix: Vec<String>) -> ModelResult<Vec<Prediction>> {
        self.ensure_current()?;
        let request = Request::Predict(pad_minimum(prefix));
        self.send(&request)?;

        let mut lines = Vec::new();
        loop {
            let line = self.receive()?;
            if line.is_empty() {
                break;
            }
            lines.push(line);
        }
        Ok(protocol::decode_predictions(&lines)?)
    }

    /// Stop the engine and close the corpus. Idempotent; also run on drop.
    pub fn release(&mut self) -> ModelResult<()> {
        let stopped = self.stop();
        self.corpus.close();
        stopped
    }

    /// (Re)start unless the live engine was built from the current corpus
    fn ensure_current(&mut self) -> ModelResult<()> {
        if self.state == ModelState::Ready && self.engine_generation != Some(self.generation) {
            self.stop()?;
        }
        self.start()
    }

    fn exchange_cross_entropy(&mut self, tokens: Vec<String>) -> ModelResult<f64> {
        self.send(&Request::CrossEntropy(tokens))?;
        let line = self.receive()?;
        Ok(protocol::decode_cross_entropy(&line)?)
    }

    fn send(&mut self, request: &Request) -> ModelResult<()> {
        let line = request.encode()?;
        let result = match self.channel.as_mut() {
            Some(channel) => channel.send_line(&line),
            None => Err(ModelError::EngineDied),
        };
        self.fail_fatal(result)
    }

    fn receive(&mut self) -> ModelResult<String> {
        let result = match self.channel.as_mut() {
            Some(channel) => channel.read_line(),
            None => Err(ModelError::EngineDied),
        };
        self.fail_fatal(result)
    }

    /// A broken channel leaves the engine unusable; tear it down before
    /// handing the error up so the next call starts clean.
    fn fail_fatal<T>(&mut self, result: ModelResult<T>) -> ModelResult<T> {
        if let Err(e) = &result {
            if e.is_fatal() {
                if let Err(stop_err) = self.stop() {
                    warn!("Failed to stop broken engine: {}", stop_err);
                }
            }
        }
        result
    }
}

impl CrossEntropy for ModelManager {
    fn cross_entropy(&mut self, lexemes: &[Lexeme]) -> ModelResult<f64> {
        self.query(lexemes)
    }
}

impl LanguageModel for ModelManager {
    fn learn(&mut self, lexemes: &[Lexeme]) -> ModelResult<()> {
        self.train(lexemes)
    }
}

impl Drop for ModelManager {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!("Failed to release model: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::lex;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    /// Shared record of everything the fake engines saw
    #[derive(Default)]
    struct Log {
        launches: Vec<String>,
        requests: Vec<String>,
        closes: usize,
    }

    /// In-memory engine: answers `x` with the number of distinct corpus
    /// lines it was started with, `p` with one fixed prediction.
    struct FakeChannel {
        log: Arc<Mutex<Log>>,
        corpus_lines: usize,
        pending: VecDeque<String>,
        answer: Option<String>,
    }

    impl Channel for FakeChannel {
        fn send_line(&mut self, line: &str) -> ModelResult<()> {
            self.log.lock().unwrap().requests.push(line.to_string());
            if let Some(answer) = &self.answer {
                self.pending.push_back(answer.clone());
                return Ok(());
            }
            match Request::decode(line)? {
                Request::CrossEntropy(_) => {
                    self.pending.push_back(format!("{}", self.corpus_lines))
                }
                Request::Predict(_) => {
                    self.pending.push_back("-1\tpass".to_string());
                    self.pending.push_back(String::new());
                }
            }
            Ok(())
        }

        fn read_line(&mut self) -> ModelResult<String> {
            self.pending.pop_front().ok_or(ModelError::EngineDied)
        }

        fn close(&mut self, _grace: Duration) -> ModelResult<()> {
            self.log.lock().unwrap().closes += 1;
            Ok(())
        }
    }

    struct FakeLauncher {
        log: Arc<Mutex<Log>>,
        answer: Option<String>,
    }

    impl Launcher for FakeLauncher {
        fn launch(&self, corpus: &Path, _: &EngineSettings) -> ModelResult<Box<dyn Channel>> {
            let text = std::fs::read_to_string(corpus)?;
            self.log.lock().unwrap().launches.push(text.clone());
            Ok(Box::new(FakeChannel {
                log: Arc::clone(&self.log),
                corpus_lines: text.lines().count(),
                pending: VecDeque::new(),
                answer: self.answer.clone(),
            }))
        }
    }

    fn manager(answer: Option<&str>) -> (tempfile::TempDir, ModelManager, Arc<Mutex<Log>>) {
        let dir = tempfile::tempdir().unwrap();
        let log = Arc::new(Mutex::new(Log::default()));
        let launcher = FakeLauncher {
            log: Arc::clone(&log),
            answer: answer.map(String::from),
        };
        let model = ModelManager::with_launcher(
            dir.path().join("corpus.txt"),
            EngineSettings::default(),
            Box::new(launcher),
        );
        (dir, model, log)
    }

    #[test]
    fn test_query_without_corpus_fails_fatally() {
        let (_dir, mut model, _log) = manager(None);
        let err = model.query(lex("x = 1").lexemes()).unwrap_err();
        assert!(matches!(err, ModelError::CorpusMissing(_)));
        assert!(err.is_fatal());
        assert_eq!(model.state(), ModelState::Stopped);
    }

    #[test]
    fn test_start_warms_up_and_is_idempotent() {
        let (_dir, mut model, log) = manager(None);
        model.train(lex("a = 1\n").lexemes()).unwrap();
        model.start().unwrap();
        model.start().unwrap();
        assert_eq!(model.state(), ModelState::Ready);
        assert_eq!(model.starts(), 1);
        assert_eq!(
            log.lock().unwrap().requests,
            vec!["x <UNK> <UNK> <UNK> <UNK>"]
        );
    }

    #[test]
    fn test_train_invalidates_running_engine() {
        let (_dir, mut model, log) = manager(None);
        model.train(lex("a = 1\n").lexemes()).unwrap();
        assert_eq!(model.query(lex("a").lexemes()).unwrap(), 1.0);

        model.train(lex("b = 2\n").lexemes()).unwrap();
        assert_eq!(model.state(), ModelState::Stopped);

        // The new engine sees both examples
        assert_eq!(model.query(lex("a").lexemes()).unwrap(), 2.0);
        assert_eq!(model.engine_generation(), Some(model.generation()));

        let log = log.lock().unwrap();
        assert_eq!(log.launches.len(), 2);
        assert!(log.launches[1].contains("b = 2"));
        assert_eq!(log.closes, 1);
    }

    #[test]
    fn test_short_queries_are_left_padded() {
        let (_dir, mut model, log) = manager(None);
        model.train_tokens(&["a".to_string(), "b".to_string()]).unwrap();
        model.query_tokens(vec!["lambda".to_string()]).unwrap();
        model
            .query_tokens(vec![
                "<UNK>".to_string(),
                "<UNK>".to_string(),
                "<UNK>".to_string(),
                "lambda".to_string(),
            ])
            .unwrap();
        let log = log.lock().unwrap();
        assert_eq!(log.requests[1], "x <UNK> <UNK> <UNK> lambda");
        assert_eq!(log.requests[1], log.requests[2]);
    }

    #[test]
    fn test_ceiling_is_a_protocol_error() {
        let (_dir, mut model, _log) = manager(Some("80.0"));
        model.train_tokens(&["a".to_string()]).unwrap();
        // Warm-up does not check the ceiling, queries do
        let err = model.query_tokens(vec!["a".to_string()]).unwrap_err();
        assert!(matches!(
            err,
            ModelError::Protocol(ProtocolError::OutOfRange(v)) if v == 80.0
        ));
        assert!(!err.is_fatal());
        assert_eq!(model.state(), ModelState::Ready);
    }

    #[test]
    fn test_malformed_warm_up_stops_engine() {
        let (_dir, mut model, log) = manager(Some("not a number"));
        model.train_tokens(&["a".to_string()]).unwrap();
        assert!(model.start().is_err());
        assert_eq!(model.state(), ModelState::Stopped);
        assert_eq!(log.lock().unwrap().closes, 1);
    }

    #[test]
    fn test_predict_reads_until_blank_line() {
        let (_dir, mut model, _log) = manager(None);
        model.train_tokens(&["a".to_string()]).unwrap();
        let predictions = model.predict(lex("if x :").lexemes()).unwrap();
        assert_eq!(predictions.len(), 1);
        assert_eq!(predictions[0].tokens, vec!["pass"]);
    }

    #[test]
    fn test_release_is_idempotent() {
        let (_dir, mut model, log) = manager(None);
        model.train_tokens(&["a".to_string()]).unwrap();
        model.start().unwrap();
        model.release().unwrap();
        model.release().unwrap();
        drop(model);
        assert_eq!(log.lock().unwrap().closes, 1);
    }

    #[test]
    fn test_smoothing_parse() {
        assert_eq!("add-k".parse::<Smoothing>().unwrap(), Smoothing::AddK);
        assert_eq!("WB".parse::<Smoothing>().unwrap(), Smoothing::WittenBell);
        assert!("modkn".parse::<Smoothing>().is_err());
    }
}
