//! Lexeme streams for Python source
//!
//! Turns source text into a position-tagged token sequence that can be
//! reassembled byte-for-byte (`delex(lex(text)) == text`), and scrubbed of
//! comments and non-logical line breaks before it is fed to the model.
//!
//! Every lexeme carries its leading whitespace, so reconstruction needs no
//! guessing about tabs, continuations, or blank lines.

mod python;

use serde::{Deserialize, Serialize};
use std::fmt;

/// Minimum number of tokens the engine needs for a meaningful context.
pub const MIN_CONTEXT: usize = 4;

/// Display text of the placeholder used to pad short sequences.
pub const UNKNOWN_TOKEN: &str = "<UNK>";

/// Lexical class of a token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Name,
    Number,
    String,
    Op,
    Comment,
    /// End of a logical line
    Newline,
    /// Line break that does not end a logical line (blank lines, inside brackets)
    Nl,
    Indent,
    Dedent,
    EndMarker,
    /// Text the scanner could not classify
    Error,
    /// Padding placeholder, never produced by the scanner
    Unknown,
}

impl Category {
    pub fn name(&self) -> &'static str {
        match self {
            Category::Name => "NAME",
            Category::Number => "NUMBER",
            Category::String => "STRING",
            Category::Op => "OP",
            Category::Comment => "COMMENT",
            Category::Newline => "NEWLINE",
            Category::Nl => "NL",
            Category::Indent => "INDENT",
            Category::Dedent => "DEDENT",
            Category::EndMarker => "ENDMARKER",
            Category::Error => "ERRORTOKEN",
            Category::Unknown => "UNKNOWN",
        }
    }

    /// Tokens removed by scrubbing
    pub fn is_noise(&self) -> bool {
        matches!(self, Category::Comment | Category::Nl)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Line (1-based) and column (0-based, in chars)
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct Position {
    pub line: usize,
    pub col: usize,
}

impl Position {
    pub fn new(line: usize, col: usize) -> Self {
        Self { line, col }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.col)
    }
}

/// A classified token with its exact source text and position
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lexeme {
    pub category: Category,
    /// Raw source text of the token (empty for zero-width tokens)
    pub value: String,
    /// Whitespace and line continuations immediately before the token
    pub whitespace: String,
    pub start: Position,
    pub end: Position,
}

impl Lexeme {
    pub fn new(
        category: Category,
        value: impl Into<String>,
        whitespace: impl Into<String>,
        start: Position,
        end: Position,
    ) -> Self {
        Self {
            category,
            value: value.into(),
            whitespace: whitespace.into(),
            start,
            end,
        }
    }

    /// Zero-width padding token
    pub fn placeholder() -> Self {
        Self::new(
            Category::Unknown,
            "",
            "",
            Position::default(),
            Position::default(),
        )
    }

    /// Indent, dedent, end marker, and padding carry no text
    pub fn is_zero_width(&self) -> bool {
        self.value.is_empty()
    }

    /// Text written to the corpus and sent to the engine.
    /// Never contains whitespace, so token streams can be space-joined.
    pub fn display(&self) -> String {
        match self.category {
            Category::Newline => "<NEWLINE>".to_string(),
            Category::Nl => "<NL>".to_string(),
            Category::Indent => "<INDENT>".to_string(),
            Category::Dedent => "<DEDENT>".to_string(),
            Category::EndMarker => "<ENDMARKER>".to_string(),
            Category::Unknown => UNKNOWN_TOKEN.to_string(),
            _ => escape_whitespace(&self.value),
        }
    }

    /// Lines this lexeme touches
    pub fn lines(&self) -> std::ops::RangeInclusive<usize> {
        self.start.line..=self.end.line.max(self.start.line)
    }
}

fn escape_whitespace(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            ' ' => out.push_str("\\x20"),
            '\t' => out.push_str("\\x09"),
            '\n' => out.push_str("\\x0a"),
            '\r' => out.push_str("\\x0d"),
            c if c.is_whitespace() => out.push_str(&format!("\\u{{{:x}}}", c as u32)),
            c => out.push(c),
        }
    }
    out
}

/// An ordered lexeme sequence
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Source {
    lexemes: Vec<Lexeme>,
}

impl Source {
    /// Tokenize text. Always returns at least the end marker.
    pub fn lex(text: &str) -> Self {
        Self {
            lexemes: python::tokenize(text),
        }
    }

    pub fn from_lexemes(lexemes: Vec<Lexeme>) -> Self {
        Self { lexemes }
    }

    /// Reassemble the original text
    pub fn delex(&self) -> String {
        let mut out = String::new();
        for lexeme in &self.lexemes {
            out.push_str(&lexeme.whitespace);
            out.push_str(&lexeme.value);
        }
        out
    }

    /// Drop comments and non-logical line breaks. The end marker always
    /// survives, so the result is never empty for lexed input.
    pub fn scrub(&self) -> Source {
        Source {
            lexemes: self
                .lexemes
                .iter()
                .filter(|l| !l.category.is_noise())
                .cloned()
                .collect(),
        }
    }

    pub fn lexemes(&self) -> &[Lexeme] {
        &self.lexemes
    }

    pub fn len(&self) -> usize {
        self.lexemes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lexemes.is_empty()
    }

    /// Contiguous slice clamped to the sequence bounds
    pub fn window(&self, start: usize, len: usize) -> &[Lexeme] {
        let start = start.min(self.lexemes.len());
        let end = start.saturating_add(len).min(self.lexemes.len());
        &self.lexemes[start..end]
    }

    pub fn display_tokens(&self) -> Vec<String> {
        display_tokens(&self.lexemes)
    }

    /// Number of source lines that hold any text
    pub fn line_count(&self) -> usize {
        self.lexemes
            .iter()
            .filter(|l| !l.is_zero_width())
            .map(|l| l.end.line)
            .max()
            .unwrap_or(0)
    }

    /// Indexed lexemes that start on `line`
    pub fn lexemes_on_line(&self, line: usize) -> impl Iterator<Item = (usize, &Lexeme)> {
        self.lexemes
            .iter()
            .enumerate()
            .filter(move |(_, l)| l.start.line == line)
    }
}

/// Tokenize text
pub fn lex(text: &str) -> Source {
    Source::lex(text)
}

/// Reassemble text from lexemes
pub fn delex(source: &Source) -> String {
    source.delex()
}

/// Remove comments and redundant layout tokens
pub fn scrub(source: &Source) -> Source {
    source.scrub()
}

pub fn display_tokens(lexemes: &[Lexeme]) -> Vec<String> {
    lexemes.iter().map(Lexeme::display).collect()
}

/// Left-pad a token sequence with placeholders up to [`MIN_CONTEXT`].
pub fn pad_minimum(mut tokens: Vec<String>) -> Vec<String> {
    if tokens.len() < MIN_CONTEXT {
        let missing = MIN_CONTEXT - tokens.len();
        let mut padded = vec![UNKNOWN_TOKEN.to_string(); missing];
        padded.append(&mut tokens);
        return padded;
    }
    tokens
}
