//! Name normalization and tokenization.

use std::collections::BTreeSet;

/// Canonical registry key for a name: trimmed and lowercased.
pub fn normalize(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Token set of a normalized name.
///
/// Tokens are whitespace separated; punctuation clinging to either end of a
/// token (quotes, commas) is dropped so `«газпром»` and `газпром` agree.
pub fn tokens(key: &str) -> BTreeSet<&str> {
    key.split_whitespace()
        .map(|t| t.trim_matches(|c: char| !c.is_alphanumeric()))
        .filter(|t| !t.is_empty())
        .collect()
}

/// Length in characters, not bytes (names are frequently Cyrillic).
pub fn char_len(s: &str) -> usize {
    s.chars().count()
}
