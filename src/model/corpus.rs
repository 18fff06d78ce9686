//! Append-only training corpus
//!
//! One training example per line, tokens separated by single spaces.
//! The file is created on first write and every append is flushed before
//! returning, so an engine started afterwards never sees a partial line.

use super::{ModelError, ModelResult};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Single-writer handle on the corpus file
#[derive(Debug)]
pub struct Corpus {
    path: PathBuf,
    file: Option<File>,
}

/// Size and freshness of a corpus
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CorpusSummary {
    pub examples: usize,
    pub tokens: usize,
    pub last_updated: Option<DateTime<Utc>>,
}

impl Corpus {
    /// Bind to a corpus path. Nothing is created until the first append.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one training example.
    pub fn append(&mut self, tokens: &[String]) -> std::io::Result<()> {
        if self.file.is_none() {
            if let Some(parent) = self.path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)?;
            self.file = Some(file);
        }
        let Some(file) = self.file.as_mut() else {
            return Ok(());
        };

        let mut line = tokens.join(" ");
        line.push('\n');
        file.write_all(line.as_bytes())?;
        file.flush()?;
        file.sync_data()?;
        debug!("Appended {} tokens to {}", tokens.len(), self.path.display());
        Ok(())
    }

    /// The engine needs an existing corpus with at least one token.
    pub fn ensure_ready(&self) -> ModelResult<()> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ModelError::CorpusMissing(self.path.clone()))
            }
            Err(e) => return Err(e.into()),
        };

        let mut reader = BufReader::new(file);
        let mut buf = [0u8; 8192];
        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                return Err(ModelError::CorpusBlank(self.path.clone()));
            }
            if buf[..n].iter().any(|b| !b.is_ascii_whitespace()) {
                return Ok(());
            }
        }
    }

    /// Close the write handle; a later append reopens it.
    pub fn close(&mut self) {
        if self.file.take().is_some() {
            debug!("Closed corpus {}", self.path.display());
        }
    }

    pub fn summary(&self) -> std::io::Result<CorpusSummary> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(CorpusSummary {
                    examples: 0,
                    tokens: 0,
                    last_updated: None,
                })
            }
            Err(e) => return Err(e),
        };
        let modified = file.metadata()?.modified().ok().map(DateTime::<Utc>::from);

        let mut examples = 0;
        let mut tokens = 0;
        for line in BufReader::new(file).lines() {
            let line = line?;
            let count = line.split_whitespace().count();
            if count > 0 {
                examples += 1;
                tokens += count;
            }
        }
        Ok(CorpusSummary {
            examples,
            tokens,
            last_updated: modified,
        })
    }
}
