//! Candidate name detection.
//!
//! The prefilter only narrows which registry entries are worth sending to
//! the extraction backend as context; a false positive costs one registry
//! lookup, so the heuristic errs on the side of recall.

use std::collections::HashSet;

/// Finds likely entity names in free text.
pub trait NameDetector: Send + Sync {
    fn detect(&self, text: &str) -> Vec<String>;
}

/// Runs of capitalized words ("Владимир Путин", "Газпром", "ООН").
///
/// A run ends at a lowercase word or at sentence punctuation. Works for any
/// script with case.
#[derive(Debug, Clone)]
pub struct CapitalizedSpanDetector {
    /// Longest run kept as one name.
    pub max_words: usize,
    /// Shortest word, in chars, that may start or extend a run.
    pub min_word_len: usize,
}

impl Default for CapitalizedSpanDetector {
    fn default() -> Self {
        Self {
            max_words: 4,
            min_word_len: 2,
        }
    }
}

impl CapitalizedSpanDetector {
    fn is_capitalized(&self, word: &str) -> bool {
        word.chars().count() >= self.min_word_len
            && word.chars().next().is_some_and(char::is_uppercase)
    }
}

impl NameDetector for CapitalizedSpanDetector {
    fn detect(&self, text: &str) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut names = Vec::new();
        let mut span: Vec<&str> = Vec::new();

        let mut flush = |span: &mut Vec<&str>| {
            if !span.is_empty() {
                let name = span.join(" ");
                if seen.insert(name.clone()) {
                    names.push(name);
                }
                span.clear();
            }
        };

        for raw in text.split_whitespace() {
            let word = raw.trim_matches(|c: char| !c.is_alphanumeric() && c != '-');
            let ends_clause = raw
                .chars()
                .last()
                .is_some_and(|c| matches!(c, '.' | ',' | ';' | ':' | '!' | '?' | ')' | '»' | '"'));

            if self.is_capitalized(word) {
                if span.len() == self.max_words {
                    flush(&mut span);
                }
                span.push(word);
            } else {
                flush(&mut span);
            }
            if ends_clause {
                flush(&mut span);
            }
        }
        flush(&mut span);

        names
    }
}
