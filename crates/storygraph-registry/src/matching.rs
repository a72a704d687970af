//! Name matching policy.
//!
//! Resolution tries, in order:
//! 1. exact match on the normalized key;
//! 2. token-subset match in either direction ("Путина" names the same
//!    person as "владимира путина"), guarded by a minimum length so that
//!    short tokens never swallow unrelated names;
//! 3. the best fuzzy similarity ratio at or above the threshold.
//!
//! A subset hit always outranks a fuzzy hit, however high the fuzzy score.

use serde::{Deserialize, Serialize};
use similar::TextDiff;

use crate::normalize::{char_len, tokens};

/// The shorter of two subset-matched names must be longer than this.
pub const MIN_SUBSET_LEN: usize = 3;

/// Default fuzzy similarity threshold.
pub const DEFAULT_THRESHOLD: f64 = 0.8;

/// String similarity used for the fuzzy stage. All return a ratio in 0..=1.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimilarityMetric {
    /// `2 * matched / total` over the char-level diff of both names, the
    /// ratio `0.8` is calibrated against. Transposed letters cost one match
    /// instead of two edits.
    #[default]
    SequenceRatio,
    /// Normalized Levenshtein distance over chars.
    Levenshtein,
    JaroWinkler,
    SorensenDice,
}

impl SimilarityMetric {
    pub fn ratio(self, a: &str, b: &str) -> f64 {
        match self {
            Self::SequenceRatio => f64::from(TextDiff::from_chars(a, b).ratio()),
            Self::Levenshtein => strsim::normalized_levenshtein(a, b),
            Self::JaroWinkler => strsim::jaro_winkler(a, b),
            Self::SorensenDice => strsim::sorensen_dice(a, b),
        }
    }
}

/// Which entry wins when several score the same fuzzy ratio.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    /// The entry registered first.
    #[default]
    FirstInserted,
    /// The entry registered most recently.
    LastInserted,
    /// The lexicographically smallest key; independent of insertion order.
    Lexicographic,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MatchPolicy {
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    #[serde(default)]
    pub metric: SimilarityMetric,
    #[serde(default)]
    pub tie_break: TieBreak,
    #[serde(default = "default_min_subset_len")]
    pub min_subset_len: usize,
}

fn default_threshold() -> f64 {
    DEFAULT_THRESHOLD
}

fn default_min_subset_len() -> usize {
    MIN_SUBSET_LEN
}

impl Default for MatchPolicy {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            metric: SimilarityMetric::default(),
            tie_break: TieBreak::default(),
            min_subset_len: MIN_SUBSET_LEN,
        }
    }
}

/// How a query name matched a registry entry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MatchKind {
    Exact,
    Subset,
    Fuzzy(f64),
}

/// Find the registry entry a normalized query refers to.
///
/// `candidates` must be normalized keys in insertion order. Returns the
/// index of the winning candidate.
pub fn find_match<S: AsRef<str>>(
    query: &str,
    candidates: &[S],
    threshold: f64,
    policy: &MatchPolicy,
) -> Option<(usize, MatchKind)> {
    if query.is_empty() {
        return None;
    }

    if let Some(idx) = candidates.iter().position(|c| c.as_ref() == query) {
        return Some((idx, MatchKind::Exact));
    }

    if let Some(idx) = candidates
        .iter()
        .position(|c| is_subset_match(query, c.as_ref(), policy.min_subset_len))
    {
        return Some((idx, MatchKind::Subset));
    }

    best_fuzzy(query, candidates, threshold, policy)
        .map(|(idx, score)| (idx, MatchKind::Fuzzy(score)))
}

/// True when the token set of one name contains the other's and the shorter
/// name is long enough to be meaningful.
pub fn is_subset_match(a: &str, b: &str, min_len: usize) -> bool {
    let shorter = char_len(trim_punctuation(a)).min(char_len(trim_punctuation(b)));
    if shorter <= min_len {
        return false;
    }
    let ta = tokens(a);
    let tb = tokens(b);
    if ta.is_empty() || tb.is_empty() {
        return false;
    }
    ta.is_subset(&tb) || tb.is_subset(&ta)
}

fn trim_punctuation(name: &str) -> &str {
    name.trim_matches(|c: char| !c.is_alphanumeric())
}

fn best_fuzzy<S: AsRef<str>>(
    query: &str,
    candidates: &[S],
    threshold: f64,
    policy: &MatchPolicy,
) -> Option<(usize, f64)> {
    let mut best: Option<(usize, f64)> = None;

    for (idx, candidate) in candidates.iter().enumerate() {
        let score = policy.metric.ratio(query, candidate.as_ref());
        if score < threshold {
            continue;
        }
        best = match best {
            None => Some((idx, score)),
            Some((_, top)) if score > top + f64::EPSILON => Some((idx, score)),
            Some((cur, top)) if (score - top).abs() <= f64::EPSILON => {
                let replace = match policy.tie_break {
                    TieBreak::FirstInserted => false,
                    TieBreak::LastInserted => true,
                    TieBreak::Lexicographic => candidate.as_ref() < candidates[cur].as_ref(),
                };
                if replace {
                    Some((idx, score))
                } else {
                    Some((cur, top))
                }
            }
            keep => keep,
        };
    }

    best
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> MatchPolicy {
        MatchPolicy::default()
    }

    #[test]
    fn test_exact_wins() {
        let reg = ["владимир путин", "путин"];
        assert_eq!(
            find_match("путин", &reg, 0.8, &policy()),
            Some((1, MatchKind::Exact))
        );
    }

    #[test]
    fn test_subset_surname_implies_full_name() {
        let reg = ["владимира путина"];
        assert_eq!(
            find_match("путина", &reg, 0.8, &policy()),
            Some((0, MatchKind::Subset))
        );
    }

    #[test]
    fn test_subset_both_directions() {
        let reg = ["лукашенко"];
        assert_eq!(
            find_match("александр лукашенко", &reg, 0.8, &policy()),
            Some((0, MatchKind::Subset))
        );
    }

    #[test]
    fn test_subset_length_guard() {
        // "ес" is too short to imply "ес россия".
        assert!(!is_subset_match("ес", "ес россия", MIN_SUBSET_LEN));
        // Exactly at the guard is still rejected.
        assert!(!is_subset_match("оон", "оон женева", MIN_SUBSET_LEN));
        assert!(is_subset_match("нато", "нато брюссель", MIN_SUBSET_LEN));
    }

    #[test]
    fn test_subset_length_guard_ignores_quotes() {
        assert!(!is_subset_match("«ес»", "ес россия", MIN_SUBSET_LEN));
        assert!(!is_subset_match("\"оон\",", "оон женева", MIN_SUBSET_LEN));
        assert!(is_subset_match("«нато»", "нато брюссель", MIN_SUBSET_LEN));
    }

    #[test]
    fn test_subset_outranks_fuzzy() {
        // "путинa" (latin a) is a near-perfect fuzzy hit for the first entry,
        // but the second entry is a token superset of the query.
        let reg = ["путинa", "владимир путин"];
        assert_eq!(
            find_match("путин", &reg, 0.5, &policy()),
            Some((1, MatchKind::Subset))
        );
    }

    #[test]
    fn test_fuzzy_above_threshold() {
        let reg = ["gazprom"];
        // One substitution in seven chars: ratio ~0.857.
        match find_match("gazpron", &reg, 0.8, &policy()) {
            Some((0, MatchKind::Fuzzy(score))) => assert!(score >= 0.8),
            other => panic!("unexpected match: {other:?}"),
        }
        assert_eq!(find_match("rosneft", &reg, 0.8, &policy()), None);
    }

    #[test]
    fn test_fuzzy_transposed_letters() {
        // Two adjacent letters swapped: 16/18 and 12/14 under the default
        // metric, while normalized Levenshtein counts two edits.
        let reg = ["лукашенко", "газпром"];
        assert_eq!(
            find_match("лукашекно", &reg, 0.8, &policy()).map(|m| m.0),
            Some(0)
        );
        assert_eq!(
            find_match("газпорм", &reg, 0.8, &policy()).map(|m| m.0),
            Some(1)
        );

        let levenshtein = MatchPolicy {
            metric: SimilarityMetric::Levenshtein,
            ..policy()
        };
        assert_eq!(find_match("лукашекно", &reg, 0.8, &levenshtein), None);
    }

    #[test]
    fn test_fuzzy_tie_break_policies() {
        // Both candidates are one substitution away from the query.
        let reg = ["abcdx", "abcdy"];
        let query = "abcdz";

        let first = find_match(query, &reg, 0.7, &policy());
        assert_eq!(first.map(|m| m.0), Some(0));

        let last = MatchPolicy {
            tie_break: TieBreak::LastInserted,
            ..policy()
        };
        assert_eq!(find_match(query, &reg, 0.7, &last).map(|m| m.0), Some(1));

        let reversed = ["abcdy", "abcdx"];
        let lexi = MatchPolicy {
            tie_break: TieBreak::Lexicographic,
            ..policy()
        };
        assert_eq!(
            find_match(query, &reversed, 0.7, &lexi).map(|m| m.0),
            Some(1)
        );
    }

    #[test]
    fn test_empty_query_never_matches() {
        assert_eq!(find_match("", &["a"], 0.0, &policy()), None);
    }

    #[test]
    fn test_metrics_range() {
        for metric in [
            SimilarityMetric::SequenceRatio,
            SimilarityMetric::Levenshtein,
            SimilarityMetric::JaroWinkler,
            SimilarityMetric::SorensenDice,
        ] {
            let r = metric.ratio("минск", "минска");
            assert!((0.0..=1.0).contains(&r));
            assert!((metric.ratio("минск", "минск") - 1.0).abs() < f64::EPSILON);
        }
    }
}
