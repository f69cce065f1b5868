//! Artist/title normalization shared by the cache builder, cleaner and matcher.
//!
//! CRITICAL: cache keys are produced by `normalize`. Any change here changes
//! every key; `CacheStore::load` re-normalizes keys so old snapshots migrate,
//! but run the tests after touching the patterns.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::fmt;

// ============================================================================
// REGEX PATTERNS
// ============================================================================

/// Parenthetical asides: "(Live)", "(feat. Someone)", "(UK)". Non-greedy so
/// "A (x) B (y)" keeps the "B".
pub static PARENTHETICAL: Lazy<Regex> = Lazy::new(|| Regex::new(r"\(.*?\)").unwrap());

/// Apostrophes are dropped outright so "MG's" and "MGs" agree.
pub static APOSTROPHES: Lazy<Regex> = Lazy::new(|| Regex::new(r"['\u{2018}\u{2019}`]").unwrap());

/// Anything that is not a word character or whitespace.
pub static PUNCTUATION: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\w\s]").unwrap());

/// Runs of whitespace, collapsed to a single space.
pub static MULTI_SPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

// ============================================================================
// NORMALIZED KEY
// ============================================================================

/// A string that has been through [`normalize`]. Cache keys and all
/// similarity comparisons use this form, never the raw scraped credit.
///
/// Serialize only: a key read back from disk goes through `normalize` again.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize)]
#[serde(transparent)]
pub struct NormalizedKey(String);

impl NormalizedKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for NormalizedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for NormalizedKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ============================================================================
// NORMALIZATION
// ============================================================================

/// Normalize an artist credit or title for matching.
///
/// Lowercases, removes parenthetical text, turns `&` into `and`, splits on
/// slashes, strips punctuation and collapses whitespace. Total and
/// idempotent: `normalize(normalize(x)) == normalize(x)`.
pub fn normalize(raw: &str) -> NormalizedKey {
    if raw.is_empty() {
        return NormalizedKey::default();
    }

    let mut result = raw.to_lowercase();
    result = PARENTHETICAL.replace_all(&result, "").to_string();
    result = result.replace('&', " and ").replace('/', " ");
    result = APOSTROPHES.replace_all(&result, "").to_string();
    result = PUNCTUATION.replace_all(&result, " ").to_string();
    result = MULTI_SPACE.replace_all(&result, " ").trim().to_string();

    NormalizedKey(result)
}

// ============================================================================
// TESTS
// ============================================================================
