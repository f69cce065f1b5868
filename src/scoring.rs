//! Similarity scoring shared by the cache cleaner and the matcher.
//!
//! The metadata service's relevance score only ranks results within one
//! response; every accept/reject decision in this crate goes through
//! [`similarity`] instead.

use serde::{Deserialize, Serialize};

use crate::normalize::normalize;

// ============================================================================
// Score Thresholds
// ============================================================================

/// At or above this, a cached identity is considered verified.
pub const HIGH_THRESHOLD: f64 = 0.85;

/// Below this, a cached identity is treated as a bad hit and pruned.
pub const LOW_THRESHOLD: f64 = 0.80;

/// Threshold pair used by both the cleaner and the fuzzy matcher.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    /// Scores below this are rejected.
    #[serde(default = "default_low")]
    pub low: f64,
    /// Scores at or above this are confident.
    #[serde(default = "default_high")]
    pub high: f64,
}

fn default_low() -> f64 {
    LOW_THRESHOLD
}

fn default_high() -> f64 {
    HIGH_THRESHOLD
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            low: LOW_THRESHOLD,
            high: HIGH_THRESHOLD,
        }
    }
}

impl Thresholds {
    pub fn is_valid(&self) -> bool {
        (0.0..=1.0).contains(&self.low) && (0.0..=1.0).contains(&self.high) && self.low <= self.high
    }
}

// ============================================================================
// Similarity
// ============================================================================

/// Normalized edit similarity (0.0 to 1.0) between two names.
///
/// Both sides are normalized first. An empty side scores 0.0 so that
/// punctuation-only credits never match anything.
pub fn similarity(a: &str, b: &str) -> f64 {
    let a = normalize(a);
    let b = normalize(b);
    normalized_similarity(a.as_str(), b.as_str())
}

/// Same as [`similarity`] for inputs that are already normalized.
pub fn normalized_similarity(a: &str, b: &str) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    if a == b {
        return 1.0;
    }
    strsim::normalized_levenshtein(a, b)
}

// ============================================================================
// Bands
// ============================================================================

/// Where a similarity score falls relative to a [`Thresholds`] pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Band {
    /// score >= high
    Verified,
    /// low <= score < high: keep, but do not guess
    Ambiguous,
    /// score < low
    Reject,
}

impl Band {
    pub fn classify(score: f64, thresholds: Thresholds) -> Band {
        if score >= thresholds.high {
            Band::Verified
        } else if score >= thresholds.low {
            Band::Ambiguous
        } else {
            Band::Reject
        }
    }
}
