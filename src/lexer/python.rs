//! Python tokenizer
//!
//! Mirrors the token stream of CPython's `tokenize` module closely enough for
//! n-gram modelling: NEWLINE vs NL, INDENT/DEDENT from an indentation stack,
//! string prefixes, triple-quoted strings, and three-level operator matching.

use super::{Category, Lexeme, Position};

const TAB_SIZE: usize = 8;

const STRING_PREFIXES: &[&str] = &["r", "u", "b", "f", "br", "rb", "fr", "rf"];

const THREE_CHAR_OPS: &[&str] = &["**=", "//=", ">>=", "<<=", "..."];

const TWO_CHAR_OPS: &[&str] = &[
    "**", "//", "<<", ">>", "<=", ">=", "==", "!=", "->", "+=", "-=", "*=", "/=", "%=", "&=",
    "|=", "^=", "@=", ":=",
];

const ONE_CHAR_OPS: &str = "+-*/%@&|^~<>()[]{},:.;=";

pub(super) fn tokenize(text: &str) -> Vec<Lexeme> {
    Scanner::new(text).run()
}

struct Scanner {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    col: usize,
    indents: Vec<usize>,
    depth: usize,
    at_line_start: bool,
    line_has_tokens: bool,
    whitespace: String,
    out: Vec<Lexeme>,
}

impl Scanner {
    fn new(text: &str) -> Self {
        Self {
            chars: text.chars().collect(),
            pos: 0,
            line: 1,
            col: 0,
            indents: vec![0],
            depth: 0,
            at_line_start: true,
            line_has_tokens: false,
            whitespace: String::new(),
            out: Vec::new(),
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn position(&self) -> Position {
        Position::new(self.line, self.col)
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.col = 0;
        } else {
            self.col += 1;
        }
        Some(c)
    }

    fn bump_while(&mut self, pred: impl Fn(char) -> bool) -> String {
        let mut taken = String::new();
        while let Some(c) = self.peek() {
            if !pred(c) {
                break;
            }
            taken.push(c);
            self.bump();
        }
        taken
    }

    fn emit(&mut self, category: Category, value: String, start: Position) {
        let end = self.position();
        self.push(category, value, start, end);
    }

    fn push(&mut self, category: Category, value: String, start: Position, end: Position) {
        if matches!(
            category,
            Category::Name | Category::Number | Category::String | Category::Op | Category::Error
        ) {
            self.line_has_tokens = true;
        }
        let whitespace = std::mem::take(&mut self.whitespace);
        self.out.push(Lexeme::new(category, value, whitespace, start, end));
    }

    fn zero_width(&mut self, category: Category) {
        let here = self.position();
        self.out.push(Lexeme::new(category, "", "", here, here));
    }

    fn run(mut self) -> Vec<Lexeme> {
        loop {
            if self.at_line_start && self.depth == 0 {
                self.at_line_start = false;
                if !self.indentation() {
                    return self.finish_after_error();
                }
            }

            let Some(c) = self.peek() else { break };
            match c {
                ' ' | '\t' | '\x0c' => {
                    self.bump();
                    self.whitespace.push(c);
                }
                '\\' if self.continuation_len() > 0 => {
                    for _ in 0..self.continuation_len() {
                        if let Some(c) = self.bump() {
                            self.whitespace.push(c);
                        }
                    }
                }
                '\n' | '\r' => self.newline(),
                '#' => {
                    let start = self.position();
                    let comment = self.bump_while(|c| c != '\n' && c != '\r');
                    self.emit(Category::Comment, comment, start);
                }
                '\'' | '"' => {
                    if !self.string(String::new(), self.position(), self.pos) {
                        return self.finish_after_error();
                    }
                }
                c if c.is_ascii_digit() => self.number(),
                '.' if self.peek_at(1).is_some_and(|n| n.is_ascii_digit()) => self.number(),
                c if c.is_alphabetic() || c == '_' => {
                    if !self.name() {
                        return self.finish_after_error();
                    }
                }
                _ => self.operator(),
            }
        }

        if self.line_has_tokens {
            self.zero_width(Category::Newline);
            self.line_has_tokens = false;
        }
        while self.indents.len() > 1 {
            self.indents.pop();
            self.zero_width(Category::Dedent);
        }
        self.end_marker();
        self.out
    }

    /// Length of a backslash-newline continuation at the cursor, 0 if none
    fn continuation_len(&self) -> usize {
        match (self.peek_at(1), self.peek_at(2)) {
            (Some('\n'), _) => 2,
            (Some('\r'), Some('\n')) => 3,
            (Some('\r'), _) => 2,
            _ => 0,
        }
    }

    /// Measure leading whitespace and emit indent/dedent tokens.
    /// Returns false on an inconsistent dedent.
    fn indentation(&mut self) -> bool {
        let ws = self.bump_while(|c| c == ' ' || c == '\t' || c == '\x0c');
        self.whitespace.push_str(&ws);

        // Blank and comment-only lines do not affect indentation
        match self.peek() {
            None | Some('#') | Some('\n') | Some('\r') => return true,
            _ => {}
        }

        let width = ws.chars().fold(0, |w, c| match c {
            '\t' => (w / TAB_SIZE + 1) * TAB_SIZE,
            '\x0c' => 0,
            _ => w + 1,
        });
        let current = self.indents.last().copied().unwrap_or(0);

        if width > current {
            self.indents.push(width);
            self.zero_width(Category::Indent);
        } else if width < current {
            if !self.indents.contains(&width) {
                return false;
            }
            while self.indents.last().is_some_and(|&top| top > width) {
                self.indents.pop();
                self.zero_width(Category::Dedent);
            }
        }
        true
    }

    fn newline(&mut self) {
        let start = self.position();
        let mut value = String::new();
        if let Some('\r') = self.peek() {
            self.bump();
            value.push('\r');
        }
        if let Some('\n') = self.peek() {
            self.bump();
            value.push('\n');
        }
        let category = if self.depth == 0 && self.line_has_tokens {
            Category::Newline
        } else {
            Category::Nl
        };
        if value == "\r" {
            // Old Mac line ending
            self.line += 1;
            self.col = 0;
        }
        let end = Position::new(start.line, start.col + value.chars().count());
        self.push(category, value, start, end);
        if category == Category::Newline {
            self.line_has_tokens = false;
        }
        self.at_line_start = self.depth == 0;
    }

    fn name(&mut self) -> bool {
        let start = self.position();
        let token_pos = self.pos;
        let word = self.bump_while(|c| c.is_alphanumeric() || c == '_');
        let quoted = matches!(self.peek(), Some('\'') | Some('"'));
        if quoted && STRING_PREFIXES.contains(&word.to_ascii_lowercase().as_str()) {
            return self.string(word, start, token_pos);
        }
        self.emit(Category::Name, word, start);
        true
    }

    /// Scan a string literal whose (possibly empty) prefix is already consumed.
    /// `token_pos` is the char index where the prefix began. Returns false
    /// when a triple-quoted string never closes, with the cursor moved back
    /// to the start of the literal.
    fn string(&mut self, mut value: String, start: Position, token_pos: usize) -> bool {
        let Some(quote) = self.peek() else {
            return true;
        };
        let triple = self.peek_at(1) == Some(quote) && self.peek_at(2) == Some(quote);

        if triple {
            for _ in 0..3 {
                self.bump();
                value.push(quote);
            }
            loop {
                match self.bump() {
                    None => {
                        self.pos = token_pos;
                        self.line = start.line;
                        self.col = start.col;
                        return false;
                    }
                    Some('\\') => {
                        value.push('\\');
                        if let Some(c) = self.bump() {
                            value.push(c);
                        }
                    }
                    Some(c) if c == quote
                        && self.peek() == Some(quote)
                        && self.peek_at(1) == Some(quote) =>
                    {
                        self.bump();
                        self.bump();
                        value.push(quote);
                        value.push(quote);
                        value.push(quote);
                        self.emit(Category::String, value, start);
                        return true;
                    }
                    Some(c) => value.push(c),
                }
            }
        }

        self.bump();
        value.push(quote);
        let mut body = String::new();
        let mut lookahead = self.pos;
        let closed = loop {
            match self.chars.get(lookahead).copied() {
                None | Some('\n') | Some('\r') => break false,
                Some('\\') => {
                    body.push('\\');
                    lookahead += 1;
                    if let Some(c) = self.chars.get(lookahead).copied() {
                        body.push(c);
                        lookahead += 1;
                    }
                }
                Some(c) if c == quote => {
                    body.push(c);
                    break true;
                }
                Some(c) => {
                    body.push(c);
                    lookahead += 1;
                }
            }
        };

        if !closed {
            // Lone quote becomes an error token; scanning resumes after it
            self.emit(Category::Error, value, start);
            return true;
        }
        for _ in 0..body.chars().count() {
            self.bump();
        }
        value.push_str(&body);
        self.emit(Category::String, value, start);
        true
    }

    fn number(&mut self) {
        let start = self.position();
        let mut value = String::new();
        let radix = self.peek() == Some('0')
            && matches!(
                self.peek_at(1),
                Some('x' | 'X' | 'o' | 'O' | 'b' | 'B')
            );
        if radix {
            value.push_str(&self.bump_while(|c| c.is_ascii_alphanumeric() || c == '_'));
            self.emit(Category::Number, value, start);
            return;
        }

        value.push_str(&self.bump_while(|c| c.is_ascii_digit() || c == '_'));
        if self.peek() == Some('.') {
            self.bump();
            value.push('.');
            value.push_str(&self.bump_while(|c| c.is_ascii_digit() || c == '_'));
        }
        if matches!(self.peek(), Some('e' | 'E')) {
            let signed = matches!(self.peek_at(1), Some('+' | '-'))
                && self.peek_at(2).is_some_and(|c| c.is_ascii_digit());
            let plain = self.peek_at(1).is_some_and(|c| c.is_ascii_digit());
            if signed || plain {
                for _ in 0..if signed { 2 } else { 1 } {
                    if let Some(c) = self.bump() {
                        value.push(c);
                    }
                }
                value.push_str(&self.bump_while(|c| c.is_ascii_digit() || c == '_'));
            }
        }
        if let Some(c @ ('j' | 'J')) = self.peek() {
            self.bump();
            value.push(c);
        }
        self.emit(Category::Number, value, start);
    }

    fn operator(&mut self) {
        let start = self.position();
        let ahead: String = self.chars[self.pos..self.chars.len().min(self.pos + 3)]
            .iter()
            .collect();

        let op = THREE_CHAR_OPS
            .iter()
            .chain(TWO_CHAR_OPS.iter())
            .find(|op| ahead.starts_with(**op))
            .map(|op| op.to_string())
            .or_else(|| {
                ahead
                    .chars()
                    .next()
                    .filter(|c| ONE_CHAR_OPS.contains(*c))
                    .map(String::from)
            });

        match op {
            Some(op) => {
                for _ in 0..op.chars().count() {
                    self.bump();
                }
                match op.as_str() {
                    "(" | "[" | "{" => self.depth += 1,
                    ")" | "]" | "}" => self.depth = self.depth.saturating_sub(1),
                    _ => {}
                }
                self.emit(Category::Op, op, start);
            }
            None => {
                let stray = self.bump().map(String::from).unwrap_or_default();
                self.emit(Category::Error, stray, start);
            }
        }
    }

    /// Unrecoverable error: the remaining text becomes one error token.
    fn finish_after_error(mut self) -> Vec<Lexeme> {
        let start = self.position();
        let rest: String = self.chars[self.pos..].iter().collect();
        while self.bump().is_some() {}
        if !rest.is_empty() {
            self.emit(Category::Error, rest, start);
        }
        self.end_marker();
        self.out
    }

    fn end_marker(&mut self) {
        let here = self.position();
        let whitespace = std::mem::take(&mut self.whitespace);
        self.out.push(Lexeme::new(Category::EndMarker, "", whitespace, here, here));
    }
}
