//! Engine wire protocol
//!
//! One request per line: `<tag> <space-joined tokens>`.
//! - `x` (cross-entropy) answers one numeric line.
//! - `p` (prediction) answers `<score>\t<tokens>` lines closed by a blank line.
//!
//! An engine that cannot serve a request answers `! <message>`.

use super::ProtocolError;
use std::fmt;

pub const CROSS_ENTROPY_TAG: char = 'x';
pub const PREDICT_TAG: char = 'p';
pub const ERROR_PREFIX: &str = "! ";

/// A request sent to the engine
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    CrossEntropy(Vec<String>),
    Predict(Vec<String>),
}

impl Request {
    pub fn tag(&self) -> char {
        match self {
            Request::CrossEntropy(_) => CROSS_ENTROPY_TAG,
            Request::Predict(_) => PREDICT_TAG,
        }
    }

    pub fn tokens(&self) -> &[String] {
        match self {
            Request::CrossEntropy(tokens) | Request::Predict(tokens) => tokens,
        }
    }

    /// Encode as a single line without the trailing newline.
    /// Tokens must be non-empty and free of whitespace.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        let tokens = self.tokens();
        if let Some(bad) = tokens
            .iter()
            .find(|t| t.is_empty() || t.chars().any(char::is_whitespace))
        {
            return Err(ProtocolError::InvalidToken(bad.clone()));
        }
        Ok(format!("{} {}", self.tag(), tokens.join(" ")))
    }

    /// Parse a request line (engine side)
    pub fn decode(line: &str) -> Result<Self, ProtocolError> {
        let line = line.trim_end_matches(['\r', '\n']);
        let (tag, rest) = match line.split_once(' ') {
            Some((tag, rest)) => (tag, rest),
            None => (line, ""),
        };
        let tokens: Vec<String> = rest.split_whitespace().map(String::from).collect();
        match tag {
            "x" => Ok(Request::CrossEntropy(tokens)),
            "p" => Ok(Request::Predict(tokens)),
            _ => Err(ProtocolError::UnknownTag(tag.to_string())),
        }
    }
}

/// One predicted continuation
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    /// log2 probability of the continuation (higher = more likely)
    pub score: f64,
    pub tokens: Vec<String>,
}

impl Prediction {
    pub fn encode(&self) -> String {
        format!("{}\t{}", self.score, self.tokens.join(" "))
    }

    pub fn decode(line: &str) -> Result<Self, ProtocolError> {
        let (score, tokens) = line
            .split_once('\t')
            .ok_or_else(|| ProtocolError::Malformed(line.to_string()))?;
        let score = score
            .trim()
            .parse::<f64>()
            .map_err(|_| ProtocolError::Malformed(line.to_string()))?;
        Ok(Self {
            score,
            tokens: tokens.split_whitespace().map(String::from).collect(),
        })
    }
}

impl fmt::Display for Prediction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3}  {}", self.score, self.tokens.join(" "))
    }
}

/// Parse a cross-entropy answer line
pub fn decode_cross_entropy(line: &str) -> Result<f64, ProtocolError> {
    let line = line.trim();
    if let Some(message) = line.strip_prefix(ERROR_PREFIX.trim_end()) {
        return Err(ProtocolError::Engine(message.trim().to_string()));
    }
    let value = line
        .parse::<f64>()
        .map_err(|_| ProtocolError::Malformed(line.to_string()))?;
    if !value.is_finite() {
        return Err(ProtocolError::OutOfRange(value));
    }
    Ok(value)
}

/// Parse the lines of a prediction answer (terminator already stripped)
pub fn decode_predictions(lines: &[String]) -> Result<Vec<Prediction>, ProtocolError> {
    if let Some(message) = lines
        .first()
        .and_then(|l| l.strip_prefix(ERROR_PREFIX.trim_end()))
    {
        return Err(ProtocolError::Engine(message.trim().to_string()));
    }
    lines.iter().map(|l| Prediction::decode(l)).collect()
}
