use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Character classes for character-level edits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CharClass {
    Word,
    Digit,
    #[serde(rename = "punct")]
    Punctuation,
}

const WORD_CHARS: &str = "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";
const DIGIT_CHARS: &str = "0123456789";
const PUNCTUATION_CHARS: &str = "!\"#$%&'()*+,-./:;<=>?@[\\]^_`{|}~";

impl CharClass {
    pub fn name(&self) -> &'static str {
        match self {
            CharClass::Word => "word",
            CharClass::Digit => "digit",
            CharClass::Punctuation => "punct",
        }
    }

    pub fn matches(&self, c: char) -> bool {
        match self {
            CharClass::Word => c.is_alphabetic(),
            CharClass::Digit => c.is_ascii_digit(),
            CharClass::Punctuation => c.is_ascii_punctuation(),
        }
    }

    /// Characters drawn from when inserting or replacing
    pub fn alphabet(&self) -> Vec<char> {
        match self {
            CharClass::Word => WORD_CHARS.chars().collect(),
            CharClass::Digit => DIGIT_CHARS.chars().collect(),
            CharClass::Punctuation => PUNCTUATION_CHARS.chars().collect(),
        }
    }
}

impl fmt::Display for CharClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Every supported single-point edit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MutationKind {
    DeleteToken,
    InsertToken,
    ReplaceToken,
    Indent,
    Dedent,
    DeleteChar(CharClass),
    InsertChar(CharClass),
    ReplaceChar(CharClass),
    DeleteColon,
}

impl MutationKind {
    pub fn all() -> Vec<MutationKind> {
        let classes = [CharClass::Word, CharClass::Digit, CharClass::Punctuation];
        let mut kinds = vec![
            MutationKind::DeleteToken,
            MutationKind::InsertToken,
            MutationKind::ReplaceToken,
            MutationKind::Indent,
            MutationKind::Dedent,
        ];
        kinds.extend(classes.iter().map(|&c| MutationKind::DeleteChar(c)));
        kinds.extend(classes.iter().map(|&c| MutationKind::InsertChar(c)));
        kinds.extend(classes.iter().map(|&c| MutationKind::ReplaceChar(c)));
        kinds.push(MutationKind::DeleteColon);
        kinds
    }

    /// Token-level kinds
    pub fn is_token_level(&self) -> bool {
        matches!(
            self,
            MutationKind::DeleteToken
                | MutationKind::InsertToken
                | MutationKind::ReplaceToken
                | MutationKind::DeleteColon
        )
    }
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MutationKind::DeleteToken => write!(f, "delete-token"),
            MutationKind::InsertToken => write!(f, "insert-token"),
            MutationKind::ReplaceToken => write!(f, "replace-token"),
            MutationKind::Indent => write!(f, "indent"),
            MutationKind::Dedent => write!(f, "dedent"),
            MutationKind::DeleteChar(c) => write!(f, "delete-{}-char", c),
            MutationKind::InsertChar(c) => write!(f, "insert-{}-char", c),
            MutationKind::ReplaceChar(c) => write!(f, "replace-{}-char", c),
            MutationKind::DeleteColon => write!(f, "delete-colon"),
        }
    }
}

impl FromStr for MutationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tag = s.trim().to_lowercase();
        MutationKind::all()
            .into_iter()
            .find(|k| k.to_string() == tag)
            .ok_or_else(|| {
                let known: Vec<String> = MutationKind::all().iter().map(|k| k.to_string()).collect();
                format!("Unknown mutation '{}'. Valid: {}", s, known.join(", "))
            })
    }
}

impl Serialize for MutationKind {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MutationKind {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tags_parse_back() {
        let kinds = MutationKind::all();
        assert_eq!(kinds.len(), 15);
        for kind in kinds {
            assert_eq!(kind.to_string().parse::<MutationKind>().unwrap(), kind);
        }
        assert_eq!(
            "Replace-Punct-Char".parse::<MutationKind>().unwrap(),
            MutationKind::ReplaceChar(CharClass::Punctuation)
        );
        assert!("swap-token".parse::<MutationKind>().is_err());
    }

    #[test]
    fn test_classes_match_their_alphabet() {
        for class in [CharClass::Word, CharClass::Digit, CharClass::Punctuation] {
            assert!(class.alphabet().iter().all(|&c| class.matches(c)), "{}", class);
        }
        assert!(!CharClass::Word.matches('7'));
        assert!(CharClass::Punctuation.matches(':'));
    }
}
