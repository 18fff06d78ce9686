//! Model process management
//!
//! The n-gram engine is an external process bound to one corpus snapshot.
//! [`ModelManager`] owns that process, restarts it whenever the corpus grows,
//! and hides the line protocol behind `train` / `query` / `predict`.
//!
//! # Example
//!
//! ```rust,ignore
//! use unnatural::model::{EngineSettings, ModelManager};
//!
//! let mut model = ModelManager::open(&corpus_path, EngineSettings::default())?;
//! model.train(source.scrub().lexemes())?;
//! let xent = model.query(window)?;
//! ```

mod channel;
mod corpus;
mod manager;
pub mod protocol;

pub use channel::{Channel, Launcher, PipeChannel, ProcessLauncher};
pub use corpus::{Corpus, CorpusSummary};
pub use manager::{
    default_engine_binary, CrossEntropy, EngineSettings, LanguageModel, ModelManager, ModelState,
    Smoothing, DEFAULT_CEILING, DEFAULT_ORDER,
};
pub use protocol::{Prediction, Request};

use std::path::PathBuf;
use thiserror::Error;

/// Malformed or out-of-range engine answers. Skippable per request.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    #[error("malformed engine response: {0:?}")]
    Malformed(String),

    #[error("cross-entropy {0} is outside the engine's valid range")]
    OutOfRange(f64),

    #[error("token {0:?} cannot be sent over the wire")]
    InvalidToken(String),

    #[error("unknown request tag {0:?}")]
    UnknownTag(String),

    #[error("engine reported an error: {0}")]
    Engine(String),
}

/// Errors raised by the model layer
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("corpus {0} does not exist; train on something first")]
    CorpusMissing(PathBuf),

    #[error("corpus {0} is empty; train on something first")]
    CorpusBlank(PathBuf),

    #[error("failed to start engine {binary}: {source}")]
    EngineSpawn {
        binary: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("engine exited unexpectedly")]
    EngineDied,

    #[error("engine I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl ModelError {
    /// Fatal errors mean the engine or corpus is unusable; protocol errors
    /// only spoil the one request.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, ModelError::Protocol(_))
    }
}

pub type ModelResult<T> = Result<T, ModelError>;
