//! Requirement identifiers.
//!
//! An identifier is a dot-separated reference such as `11.5.1`: the first
//! segment is an integer from 1 to 12, followed by up to three further
//! segments of one or two digits. Matching is purely syntactic.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;

static STRICT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:[1-9]|1[0-2])(?:\.\d{1,2}){0,3}$").expect("identifier regex should be valid")
});

// Anything identifier-shaped, taken whole so over-long tokens are not split;
// candidates are filtered through `is_valid`.
static CANDIDATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b\d+(?:\.\d+)*\b").expect("candidate regex should be valid")
});

/// Whether `value` is a well-formed identifier. Surrounding whitespace is not trimmed.
pub fn is_valid(value: &str) -> bool {
    STRICT.is_match(value)
}

/// Whether `value` is made of dot-separated digit groups, valid or not.
pub fn looks_like_identifier(value: &str) -> bool {
    let value = value.trim();
    !value.is_empty()
        && value.split('.').all(|segment| !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit()))
}

/// Identifier-shaped substrings of `text`, valid or not, in order of appearance.
pub fn candidates(text: &str) -> Vec<&str> {
    CANDIDATE.find_iter(text).map(|m| m.as_str()).collect()
}

/// Valid identifiers found anywhere in `text`, in order of appearance.
///
/// Duplicates are kept; see [`dedup`].
pub fn extract(text: &str) -> Vec<String> {
    candidates(text).into_iter().filter(|c| is_valid(c)).map(str::to_string).collect()
}

/// Removes repeats, keeping the first occurrence of each identifier.
pub fn dedup<I>(ids: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut seen = HashSet::new();
    ids.into_iter().filter(|id| seen.insert(id.clone())).collect()
}
