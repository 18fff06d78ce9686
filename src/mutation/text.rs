//! Offsets and line spans over raw source text

use super::CharClass;
use crate::lexer::{Category, Lexeme, Position};
use std::collections::BTreeSet;

/// A line holding code: not blank, not just a comment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct LineSpan {
    /// 1-based line number
    pub number: usize,
    /// Byte offset of the first character of the line
    pub start: usize,
    /// Byte offset of the first non-whitespace character
    pub code: usize,
}

impl LineSpan {
    pub fn is_indented(&self) -> bool {
        self.code > self.start
    }
}

fn lines(text: &str) -> impl Iterator<Item = (usize, usize, &str)> {
    text.split_inclusive('\n')
        .scan(0usize, |offset, line| {
            let start = *offset;
            *offset += line.len();
            Some((start, line))
        })
        .enumerate()
        .map(|(i, (start, line))| (i + 1, start, line))
}

pub(super) fn code_lines(text: &str, only: Option<usize>) -> Vec<LineSpan> {
    lines(text)
        .filter(|&(number, _, _)| only.map_or(true, |n| n == number))
        .filter_map(|(number, start, line)| {
            let trimmed = line.trim_start();
            if trimmed.trim().is_empty() || trimmed.starts_with('#') {
                return None;
            }
            Some(LineSpan {
                number,
                start,
                code: start + (line.len() - trimmed.len()),
            })
        })
        .collect()
}

/// Lines that begin inside a string literal opened on an earlier line
pub(super) fn string_continuations(lexemes: &[Lexeme]) -> BTreeSet<usize> {
    lexemes
        .iter()
        .filter(|l| l.category == Category::String)
        .flat_map(|l| l.start.line + 1..=l.end.line)
        .collect()
}

/// Byte offsets of every character, optionally limited to one line
pub(super) fn char_offsets(text: &str, only: Option<usize>) -> Vec<usize> {
    lines(text)
        .filter(|&(number, _, _)| only.map_or(true, |n| n == number))
        .flat_map(|(_, start, line)| line.char_indices().map(move |(i, _)| start + i))
        .collect()
}

/// Byte offsets of characters in `class`, optionally limited to one line
pub(super) fn class_offsets(text: &str, class: CharClass, only: Option<usize>) -> Vec<usize> {
    lines(text)
        .filter(|&(number, _, _)| only.map_or(true, |n| n == number))
        .flat_map(|(_, start, line)| {
            line.char_indices()
                .filter(move |&(_, c)| class.matches(c))
                .map(move |(i, _)| start + i)
        })
        .collect()
}

/// Line and column of a byte offset
pub(super) fn position_of(text: &str, offset: usize) -> Position {
    let before = &text[..offset.min(text.len())];
    let line = before.matches('\n').count() + 1;
    let col = match before.rfind('\n') {
        Some(nl) => before[nl + 1..].chars().count(),
        None => before.chars().count(),
    };
    Position::new(line, col)
}
