//! Synthetic single-point edits
//!
//! Every generator takes a known-good [`Source`] and returns a new mutated
//! copy plus where the edit happened, or a typed reason it could not apply.
//! The random source is owned by the [`Mutator`], so a seeded mutator
//! replays the same sequence of edits.

mod kind;
mod text;

pub use kind::{CharClass, MutationKind};

use crate::lexer::{Category, Lexeme, Position, Source};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::fmt;
use tracing::debug;

/// Random picks that land on an unusable lexeme are retried this often
const MAX_ATTEMPTS: usize = 100;

/// Why a generator could not produce a mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Nothing but zero-width tokens to pick from
    NoTokens,
    NoTokensOnLine(usize),
    NoIndentedLine,
    NoCodeLine,
    NoCharacter(CharClass),
    NoColon,
    RetriesExhausted,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::NoTokens => write!(f, "no mutable tokens"),
            SkipReason::NoTokensOnLine(line) => write!(f, "no mutable tokens on line {}", line),
            SkipReason::NoIndentedLine => write!(f, "no indented line"),
            SkipReason::NoCodeLine => write!(f, "no line of code"),
            SkipReason::NoCharacter(class) => write!(f, "no {} character", class),
            SkipReason::NoColon => write!(f, "no colon"),
            SkipReason::RetriesExhausted => {
                write!(f, "gave up after {} attempts", MAX_ATTEMPTS)
            }
        }
    }
}

/// A mutated copy of a source
#[derive(Debug, Clone)]
pub struct Mutation {
    pub kind: MutationKind,
    /// Where the edit happened, in the original source
    pub location: Position,
    /// The token inserted, removed, or written (token-level kinds only)
    pub token: Option<Lexeme>,
    pub text: String,
    /// `text` re-lexed
    pub source: Source,
}

impl Mutation {
    pub fn line(&self) -> usize {
        self.location.line
    }

    fn from_text(
        kind: MutationKind,
        location: Position,
        token: Option<Lexeme>,
        text: String,
    ) -> Self {
        let source = Source::lex(&text);
        Self {
            kind,
            location,
            token,
            text,
            source,
        }
    }
}

#[derive(Debug, Clone)]
pub enum MutationOutcome {
    Applied(Mutation),
    NotApplicable(SkipReason),
}

impl MutationOutcome {
    pub fn applied(self) -> Option<Mutation> {
        match self {
            MutationOutcome::Applied(m) => Some(m),
            MutationOutcome::NotApplicable(_) => None,
        }
    }
}

/// Mutation generator over an injectable random source
pub struct Mutator<R: Rng = ChaCha8Rng> {
    rng: R,
    seed: Option<u64>,
}

impl Mutator<ChaCha8Rng> {
    /// Reproducible generator
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
            seed: Some(seed),
        }
    }

    /// Randomly seeded generator; the seed is kept so a run can be replayed
    pub fn from_entropy() -> Self {
        Self::seeded(rand::random())
    }
}

impl<R: Rng> Mutator<R> {
    pub fn new(rng: R) -> Self {
        Self { rng, seed: None }
    }

    pub fn seed(&self) -> Option<u64> {
        self.seed
    }

    /// Uniform choice among `kinds`
    pub fn choose_kind(&mut self, kinds: &[MutationKind]) -> Option<MutationKind> {
        if kinds.is_empty() {
            return None;
        }
        Some(kinds[self.rng.random_range(0..kinds.len())])
    }

    /// Apply one edit of `kind`, anywhere or restricted to `target_line`.
    pub fn mutate(
        &mut self,
        source: &Source,
        kind: MutationKind,
        target_line: Option<usize>,
    ) -> MutationOutcome {
        let outcome = match kind {
            MutationKind::DeleteToken => self.delete_token(source, target_line),
            MutationKind::InsertToken => self.insert_token(source, target_line),
            MutationKind::ReplaceToken => self.replace_token(source, target_line),
            MutationKind::Indent => self.indent(source, target_line),
            MutationKind::Dedent => self.dedent(source, target_line),
            MutationKind::DeleteChar(class) => self.delete_char(source, class, target_line),
            MutationKind::InsertChar(class) => self.insert_char(source, class, target_line),
            MutationKind::ReplaceChar(class) => self.replace_char(source, class, target_line),
            MutationKind::DeleteColon => self.delete_colon(source, target_line),
        };
        match &outcome {
            MutationOutcome::Applied(m) => debug!("{} at {}", kind, m.location),
            MutationOutcome::NotApplicable(reason) => debug!("{} not applicable: {}", kind, reason),
        }
        outcome
    }

    /// Index of a lexeme that can be edited: never the end marker or a
    /// zero-width layout token. Random picks retry on a miss.
    fn pick_lexeme(&mut self, source: &Source, line: Option<usize>) -> Result<usize, SkipReason> {
        if let Some(line) = line {
            let on_line: Vec<usize> = source
                .lexemes_on_line(line)
                .filter(|(_, l)| is_mutable(l))
                .map(|(i, _)| i)
                .collect();
            if on_line.is_empty() {
                return Err(SkipReason::NoTokensOnLine(line));
            }
            return Ok(on_line[self.rng.random_range(0..on_line.len())]);
        }

        let lexemes = source.lexemes();
        if !lexemes.iter().any(is_mutable) {
            return Err(SkipReason::NoTokens);
        }
        for _ in 0..MAX_ATTEMPTS {
            let i = self.rng.random_range(0..lexemes.len());
            if is_mutable(&lexemes[i]) {
                return Ok(i);
            }
        }
        Err(SkipReason::RetriesExhausted)
    }

    fn delete_token(&mut self, source: &Source, line: Option<usize>) -> MutationOutcome {
        let mut lexemes = source.lexemes().to_vec();
        let i = match self.pick_lexeme(source, line) {
            Ok(i) => i,
            Err(reason) => return MutationOutcome::NotApplicable(reason),
        };
        let removed = lexemes.remove(i);
        let location = removed.start;
        let text = Source::from_lexemes(lexemes).delex();
        MutationOutcome::Applied(Mutation::from_text(
            MutationKind::DeleteToken,
            location,
            Some(removed),
            text,
        ))
    }

    /// Duplicate a random token in front of another random token
    fn insert_token(&mut self, source: &Source, line: Option<usize>) -> MutationOutcome {
        let mut lexemes = source.lexemes().to_vec();
        let (from, to) = match self
            .pick_lexeme(source, None)
            .and_then(|from| Ok((from, self.pick_lexeme(source, line)?)))
        {
            Ok(pair) => pair,
            Err(reason) => return MutationOutcome::NotApplicable(reason),
        };

        let mut copy = lexemes[from].clone();
        let anchor = &mut lexemes[to];
        let location = anchor.start;
        let at_line_start = anchor.start.col == anchor.whitespace.chars().count();
        if copy.category == Category::Newline {
            // A line break goes in bare; the anchor keeps any indentation
            copy.whitespace = String::new();
            if !at_line_start {
                anchor.whitespace.clear();
            }
        } else if anchor.whitespace.is_empty() && anchor.start.col == 0 {
            // Start of an unindented line: the copy takes column 0
            copy.whitespace = String::new();
            anchor.whitespace = " ".to_string();
        } else {
            // The new token takes over the anchor's indentation
            copy.whitespace = if anchor.whitespace.is_empty() {
                " ".to_string()
            } else {
                std::mem::take(&mut anchor.whitespace)
            };
            anchor.whitespace = match anchor.category {
                Category::Newline | Category::Nl | Category::Comment => String::new(),
                _ => " ".to_string(),
            };
        }
        lexemes.insert(to, copy.clone());

        let text = Source::from_lexemes(lexemes).delex();
        MutationOutcome::Applied(Mutation::from_text(
            MutationKind::InsertToken,
            location,
            Some(copy),
            text,
        ))
    }

    /// Overwrite a random token with a copy of another random token
    fn replace_token(&mut self, source: &Source, line: Option<usize>) -> MutationOutcome {
        let mut lexemes = source.lexemes().to_vec();
        let to = match self.pick_lexeme(source, line) {
            Ok(i) => i,
            Err(reason) => return MutationOutcome::NotApplicable(reason),
        };
        let mut from = None;
        for _ in 0..MAX_ATTEMPTS {
            match self.pick_lexeme(source, None) {
                Ok(i) if lexemes[i].value != lexemes[to].value => {
                    from = Some(i);
                    break;
                }
                Ok(_) => continue,
                Err(reason) => return MutationOutcome::NotApplicable(reason),
            }
        }
        let Some(from) = from else {
            return MutationOutcome::NotApplicable(SkipReason::RetriesExhausted);
        };

        let replacement = lexemes[from].clone();
        let target = &mut lexemes[to];
        let location = target.start;
        target.category = replacement.category;
        target.value = replacement.value.clone();

        let text = Source::from_lexemes(lexemes).delex();
        MutationOutcome::Applied(Mutation::from_text(
            MutationKind::ReplaceToken,
            location,
            Some(replacement),
            text,
        ))
    }

    fn delete_colon(&mut self, source: &Source, line: Option<usize>) -> MutationOutcome {
        let colons: Vec<usize> = source
            .lexemes()
            .iter()
            .enumerate()
            .filter(|(_, l)| l.category == Category::Op && l.value == ":")
            .filter(|(_, l)| line.map_or(true, |line| l.start.line == line))
            .map(|(i, _)| i)
            .collect();
        if colons.is_empty() {
            return MutationOutcome::NotApplicable(SkipReason::NoColon);
        }

        let mut lexemes = source.lexemes().to_vec();
        let removed = lexemes.remove(colons[self.rng.random_range(0..colons.len())]);
        let location = removed.start;
        let text = Source::from_lexemes(lexemes).delex();
        MutationOutcome::Applied(Mutation::from_text(
            MutationKind::DeleteColon,
            location,
            Some(removed),
            text,
        ))
    }

    /// Add one space in front of a line of code
    fn indent(&mut self, source: &Source, line: Option<usize>) -> MutationOutcome {
        let original = source.delex();
        let lines = editable_lines(source, &original, line);
        if lines.is_empty() {
            return MutationOutcome::NotApplicable(SkipReason::NoCodeLine);
        }
        let span = lines[self.rng.random_range(0..lines.len())];
        let mut mutated = original;
        mutated.insert(span.start, ' ');
        MutationOutcome::Applied(Mutation::from_text(
            MutationKind::Indent,
            Position::new(span.number, 0),
            None,
            mutated,
        ))
    }

    /// Remove one whitespace character from the front of an indented line
    fn dedent(&mut self, source: &Source, line: Option<usize>) -> MutationOutcome {
        let original = source.delex();
        let lines: Vec<text::LineSpan> = editable_lines(source, &original, line)
            .into_iter()
            .filter(|span| span.is_indented())
            .collect();
        if lines.is_empty() {
            return MutationOutcome::NotApplicable(SkipReason::NoIndentedLine);
        }
        let span = lines[self.rng.random_range(0..lines.len())];
        let mut mutated = original;
        mutated.remove(span.start);
        MutationOutcome::Applied(Mutation::from_text(
            MutationKind::Dedent,
            Position::new(span.number, 0),
            None,
            mutated,
        ))
    }

    fn delete_char(
        &mut self,
        source: &Source,
        class: CharClass,
        line: Option<usize>,
    ) -> MutationOutcome {
        let original = source.delex();
        let offsets = text::class_offsets(&original, class, line);
        if offsets.is_empty() {
            return MutationOutcome::NotApplicable(SkipReason::NoCharacter(class));
        }
        let offset = offsets[self.rng.random_range(0..offsets.len())];
        let location = text::position_of(&original, offset);
        let mut mutated = original;
        mutated.remove(offset);
        MutationOutcome::Applied(Mutation::from_text(
            MutationKind::DeleteChar(class),
            location,
            None,
            mutated,
        ))
    }

    fn insert_char(
        &mut self,
        source: &Source,
        class: CharClass,
        line: Option<usize>,
    ) -> MutationOutcome {
        let original = source.delex();
        let offsets = text::char_offsets(&original, line);
        if offsets.is_empty() {
            return MutationOutcome::NotApplicable(SkipReason::NoCodeLine);
        }
        let offset = offsets[self.rng.random_range(0..offsets.len())];
        let alphabet = class.alphabet();
        let c = alphabet[self.rng.random_range(0..alphabet.len())];
        let location = text::position_of(&original, offset);
        let mut mutated = original;
        mutated.insert(offset, c);
        MutationOutcome::Applied(Mutation::from_text(
            MutationKind::InsertChar(class),
            location,
            None,
            mutated,
        ))
    }

    fn replace_char(
        &mut self,
        source: &Source,
        class: CharClass,
        line: Option<usize>,
    ) -> MutationOutcome {
        let original = source.delex();
        let offsets = text::class_offsets(&original, class, line);
        if offsets.is_empty() {
            return MutationOutcome::NotApplicable(SkipReason::NoCharacter(class));
        }
        let offset = offsets[self.rng.random_range(0..offsets.len())];
        let Some(old) = original[offset..].chars().next() else {
            return MutationOutcome::NotApplicable(SkipReason::NoCharacter(class));
        };
        let alphabet = class.alphabet();
        let mut new = old;
        for _ in 0..MAX_ATTEMPTS {
            new = alphabet[self.rng.random_range(0..alphabet.len())];
            if new != old {
                break;
            }
        }
        let location = text::position_of(&original, offset);
        let mut mutated = original;
        mutated.replace_range(offset..offset + old.len_utf8(), new.encode_utf8(&mut [0; 4]));
        MutationOutcome::Applied(Mutation::from_text(
            MutationKind::ReplaceChar(class),
            location,
            None,
            mutated,
        ))
    }
}

/// Code lines of `text` that do not start inside a multi-line string
fn editable_lines(source: &Source, text: &str, line: Option<usize>) -> Vec<text::LineSpan> {
    let continued = text::string_continuations(source.lexemes());
    text::code_lines(text, line)
        .into_iter()
        .filter(|span| !continued.contains(&span.number))
        .collect()
}

fn is_mutable(lexeme: &Lexeme) -> bool {
    !lexeme.is_zero_width()
        && !matches!(
            lexeme.category,
            Category::EndMarker | Category::Comment | Category::Nl
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::lex;

    const PROGRAM: &str = "def total(xs):\n    acc = 0\n    for x in xs:\n        acc += x\n    return acc\n\nprint(total([1, 2, 3]))\n";

    fn applied(outcome: MutationOutcome) -> Mutation {
        match outcome {
            MutationOutcome::Applied(m) => m,
            MutationOutcome::NotApplicable(reason) => panic!("not applicable: {}", reason),
        }
    }

    #[test]
    fn test_seeded_mutations_repeat() {
        let source = lex(PROGRAM);
        for kind in MutationKind::all() {
            let a = Mutator::seeded(7).mutate(&source, kind, None).applied();
            let b = Mutator::seeded(7).mutate(&source, kind, None).applied();
            match (a, b) {
                (Some(a), Some(b)) => {
                    assert_eq!(a.text, b.text, "{}", kind);
                    assert_eq!(a.location, b.location, "{}", kind);
                }
                (None, None) => {}
                _ => panic!("{} applied under one run only", kind),
            }
        }
    }

    #[test]
    fn test_different_seeds_spread_locations() {
        let source = lex(PROGRAM);
        let locations: std::collections::HashSet<Position> = (0..20)
            .filter_map(|seed| {
                Mutator::seeded(seed)
                    .mutate(&source, MutationKind::DeleteToken, None)
                    .applied()
            })
            .map(|m| m.location)
            .collect();
        assert!(locations.len() > 3, "only {} distinct locations", locations.len());
    }

    #[test]
    fn test_end_marker_is_never_targeted() {
        let source = lex("x\n");
        let mut mutator = Mutator::seeded(1);
        for _ in 0..50 {
            let m = applied(mutator.mutate(&source, MutationKind::DeleteToken, None));
            let token = m.token.unwrap();
            assert_ne!(token.category, Category::EndMarker);
            assert!(!token.value.is_empty());
        }
    }

    #[test]
    fn test_empty_source_is_not_applicable() {
        let source = lex("");
        let mut mutator = Mutator::seeded(1);
        for kind in [
            MutationKind::DeleteToken,
            MutationKind::InsertToken,
            MutationKind::ReplaceToken,
        ] {
            assert!(matches!(
                mutator.mutate(&source, kind, None),
                MutationOutcome::NotApplicable(SkipReason::NoTokens)
            ));
        }
    }

    #[test]
    fn test_delete_token_removes_exactly_one() {
        let source = lex(PROGRAM);
        let m = applied(Mutator::seeded(3).mutate(&source, MutationKind::DeleteToken, None));
        let before = source.lexemes().iter().filter(|l| is_mutable(l)).count();
        let removed = m.token.as_ref().unwrap().value.clone();
        assert!(PROGRAM.contains(&removed));
        assert!(m.text.len() < PROGRAM.len());
        // Deleting may merge tokens, never add any
        let after = lex(&m.text).lexemes().iter().filter(|l| is_mutable(l)).count();
        assert!(after < before);
    }

    #[test]
    fn test_insert_token_keeps_indentation() {
        let source = lex("if a:\n    b = 1\n");
        let m = applied(Mutator::seeded(5).mutate(&source, MutationKind::InsertToken, Some(2)));
        assert_eq!(m.line(), 2);
        let second = m.text.lines().nth(1).unwrap();
        assert!(second.starts_with("    "), "{:?}", second);
        assert!(!second.starts_with("     "), "{:?}", second);
    }

    #[test]
    fn test_insert_token_at_line_start_keeps_column_zero() {
        let source = lex("x = 1\ny = 2\n");
        let mut at_start = 0;
        for seed in 0..200 {
            let m = applied(Mutator::seeded(seed).mutate(&source, MutationKind::InsertToken, Some(2)));
            let rest: Vec<&str> = m.text.lines().skip(1).collect();
            assert!(
                rest.iter().all(|l| !l.starts_with(' ')),
                "seed {} indented a line: {:?}",
                seed,
                m.text
            );
            if m.location == Position::new(2, 0) {
                at_start += 1;
                let token = m.token.unwrap();
                if token.category != Category::Newline {
                    assert!(rest[0].starts_with(&token.value), "{:?}", m.text);
                    assert!(rest[0].ends_with(" y = 2"), "{:?}", m.text);
                }
            }
        }
        assert!(at_start > 0);
    }

    #[test]
    fn test_replace_token_gives_up_without_a_different_token() {
        let source = lex("x");
        assert!(matches!(
            Mutator::seeded(1).mutate(&source, MutationKind::ReplaceToken, None),
            MutationOutcome::NotApplicable(SkipReason::RetriesExhausted)
        ));
    }

    #[test]
    fn test_layout_edits_skip_string_bodies() {
        let source = lex("def f():\n    \"\"\"Doc\n    more\n    \"\"\"\n    return 1\n");
        for seed in 0..50 {
            for kind in [MutationKind::Indent, MutationKind::Dedent] {
                let m = applied(Mutator::seeded(seed).mutate(&source, kind, None));
                assert!(![3, 4].contains(&m.line()), "{} edited line {}", kind, m.line());
            }
        }
        assert!(matches!(
            Mutator::seeded(0).mutate(&source, MutationKind::Dedent, Some(3)),
            MutationOutcome::NotApplicable(SkipReason::NoIndentedLine)
        ));
    }

    #[test]
    fn test_replace_token_targets_line() {
        let source = lex(PROGRAM);
        let mut mutator = Mutator::seeded(11);
        for _ in 0..10 {
            let m = applied(mutator.mutate(&source, MutationKind::ReplaceToken, Some(4)));
            assert_eq!(m.line(), 4);
            assert_ne!(m.text, PROGRAM);
            let changed: Vec<usize> = PROGRAM
                .lines()
                .zip(m.text.lines())
                .enumerate()
                .filter(|(_, (a, b))| a != b)
                .map(|(i, _)| i + 1)
                .collect();
            assert!(changed.is_empty() || changed[0] == 4, "{:?}", changed);
        }
        assert!(matches!(
            mutator.mutate(&source, MutationKind::ReplaceToken, Some(6)),
            MutationOutcome::NotApplicable(SkipReason::NoTokensOnLine(6))
        ));
    }

    #[test]
    fn test_indent_and_dedent() {
        let source = lex("x = 1\nif x:\n    y = 2\n");
        let indented = applied(Mutator::seeded(2).mutate(&source, MutationKind::Indent, Some(1)));
        assert!(indented.text.starts_with(" x = 1"));

        let dedented = applied(Mutator::seeded(2).mutate(&source, MutationKind::Dedent, None));
        assert_eq!(dedented.line(), 3);
        assert!(dedented.text.contains("\n   y = 2"));

        let flat = lex("x = 1\ny = 2\n");
        assert!(matches!(
            Mutator::seeded(2).mutate(&flat, MutationKind::Dedent, None),
            MutationOutcome::NotApplicable(SkipReason::NoIndentedLine)
        ));
    }

    #[test]
    fn test_character_classes() {
        let source = lex("abc = 12\n");
        let mut mutator = Mutator::seeded(9);

        let m = applied(mutator.mutate(&source, MutationKind::DeleteChar(CharClass::Digit), None));
        assert!(m.text == "abc = 2\n" || m.text == "abc = 1\n");

        let m = applied(mutator.mutate(&source, MutationKind::ReplaceChar(CharClass::Word), None));
        assert_eq!(m.text.len(), "abc = 12\n".len());
        assert!(m.text.ends_with(" = 12\n"));
        assert_ne!(m.text, "abc = 12\n");

        let m = applied(mutator.mutate(&source, MutationKind::InsertChar(CharClass::Punctuation), None));
        assert_eq!(m.text.chars().count(), "abc = 12\n".chars().count() + 1);

        let no_digits = lex("abc = d\n");
        assert!(matches!(
            mutator.mutate(&no_digits, MutationKind::DeleteChar(CharClass::Digit), None),
            MutationOutcome::NotApplicable(SkipReason::NoCharacter(CharClass::Digit))
        ));
    }

    #[test]
    fn test_delete_colon() {
        let source = lex("if x:\n    pass\n");
        let m = applied(Mutator::seeded(4).mutate(&source, MutationKind::DeleteColon, None));
        assert_eq!(m.text, "if x\n    pass\n");
        assert_eq!(m.location, Position::new(1, 4));

        assert!(matches!(
            Mutator::seeded(4).mutate(&lex("x = 1\n"), MutationKind::DeleteColon, None),
            MutationOutcome::NotApplicable(SkipReason::NoColon)
        ));
    }

    #[test]
    fn test_mutation_source_is_relexed() {
        let source = lex(PROGRAM);
        let m = applied(Mutator::seeded(8).mutate(&source, MutationKind::ReplaceToken, None));
        assert_eq!(m.source.delex(), m.text);
    }
}
