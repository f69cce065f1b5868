//! Core data models for artist resolution and matching.
//!
//! This module contains the records that flow between the cache builder,
//! the cleaner, the matcher and the binaries, plus the run statistics they
//! report.

use serde::{Deserialize, Serialize};

use crate::normalize::NormalizedKey;

// ============================================================================
// Scraped / Library Models
// ============================================================================

/// One scraped tracklist line, as the matcher sees it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Track {
    pub title: String,
    pub artist: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
}

impl Track {
    pub fn new(title: impl Into<String>, artist: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            artist: artist.into(),
            external_id: None,
        }
    }
}

/// Fixed-shape view of a library item.
///
/// `id` and `path` are handles for the tagging step and the preview; the
/// matcher only reads `artist`, `title` and `external_id`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LibraryEntry {
    pub id: i64,
    pub artist: String,
    pub title: String,
    pub external_id: Option<String>,
    pub path: Option<String>,
}

impl LibraryEntry {
    pub fn has_identifier(&self) -> bool {
        self.external_id.as_deref().is_some_and(|id| !id.trim().is_empty())
    }
}

// ============================================================================
// Identity Models
// ============================================================================

/// Where a cached identity came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntrySource {
    /// Resolved through the metadata service.
    #[default]
    #[serde(alias = "mb")]
    MusicBrainz,
    /// Seeded from an artist already present in the local library.
    #[serde(alias = "beets")]
    Library,
}

/// Top-ranked candidate returned by the metadata client.
#[derive(Debug, Clone, PartialEq)]
pub struct ArtistRecord {
    pub name: String,
    pub external_id: Option<String>,
    pub sort_name: Option<String>,
    /// Service relevance, only comparable within one response.
    pub relevance: u8,
}

/// Canonical identity for one normalized artist credit.
#[derive(Debug, Clone, PartialEq)]
pub struct IdentityEntry {
    pub key: NormalizedKey,
    pub canonical_name: String,
    pub external_id: Option<String>,
    pub verified: bool,
    pub sort_name: Option<String>,
    pub source: EntrySource,
    /// Last score computed by the cleaner.
    pub similarity: Option<f64>,
}

impl IdentityEntry {
    /// Fresh, unverified entry from a metadata lookup.
    pub fn from_record(key: NormalizedKey, record: ArtistRecord) -> Self {
        Self {
            key,
            canonical_name: record.name,
            external_id: record.external_id.filter(|id| !id.is_empty()),
            verified: false,
            sort_name: record.sort_name,
            source: EntrySource::MusicBrainz,
            similarity: None,
        }
    }
}

// ============================================================================
// Match Models
// ============================================================================

/// How a match was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MatchTier {
    Exact,
    Fuzzy,
    Unmatched,
}

/// Which rule decided a match.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum MatchReason {
    /// The track's own identifier equals the library entry's.
    Identifier,
    /// The cached identity's identifier equals the library entry's.
    CachedIdentifier { title: f64 },
    /// Both artist and title cleared the fuzzy threshold.
    Similarity { artist: f64, title: f64 },
    NoCandidate,
}

impl MatchReason {
    /// Single score for reporting (1.0 for identifier rules).
    pub fn score(&self) -> f64 {
        match self {
            MatchReason::Identifier => 1.0,
            MatchReason::CachedIdentifier { .. } => 1.0,
            MatchReason::Similarity { artist, title } => (artist + title) / 2.0,
            MatchReason::NoCandidate => 0.0,
        }
    }
}

/// Result of matching one scraped track against the library.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub track: Track,
    /// Index into the `LibraryIndex` entries.
    pub entry_index: Option<usize>,
    pub library_entry: Option<LibraryEntry>,
    pub tier: MatchTier,
    pub reason: MatchReason,
    /// Match whose weaker score sits in the deferred band.
    pub ambiguous: bool,
}

impl MatchResult {
    pub fn unmatched(track: Track) -> Self {
        Self {
            track,
            entry_index: None,
            library_entry: None,
            tier: MatchTier::Unmatched,
            reason: MatchReason::NoCandidate,
            ambiguous: false,
        }
    }
}

// ============================================================================
// Statistics (Instrumentation)
// ============================================================================

/// Counters for one cache-builder run.
#[derive(Default, Debug, Clone, Serialize)]
pub struct BuildStats {
    pub requested: usize,
    pub already_cached: usize,
    pub looked_up: usize,
    pub added: usize,
    pub not_found: usize,
    pub failed: usize,
    pub checkpoints: usize,
    pub elapsed_seconds: f64,
}

/// Counters for one cleaner run.
#[derive(Default, Debug, Clone, Serialize)]
pub struct CleanStats {
    pub total: usize,
    pub checked: usize,
    pub verified: usize,
    pub ambiguous: usize,
    pub removed: usize,
    pub lookup_failed: usize,
    pub not_found: usize,
    pub library_kept: usize,
    pub elapsed_seconds: f64,
}

/// Counters for one matching pass.
#[derive(Default, Debug, Clone, Serialize)]
pub struct MatchingStats {
    pub tracks: usize,
    pub exact_identifier: usize,
    pub exact_cached_identifier: usize,
    pub fuzzy: usize,
    pub fuzzy_ambiguous: usize,
    pub unmatched: usize,
    pub elapsed_seconds: f64,
}

impl MatchingStats {
    pub fn record(&mut self, result: &MatchResult) {
        self.tracks += 1;
        match (result.tier, result.reason) {
            (MatchTier::Exact, MatchReason::Identifier) => self.exact_identifier += 1,
            (MatchTier::Exact, _) => self.exact_cached_identifier += 1,
            (MatchTier::Fuzzy, _) => {
                self.fuzzy += 1;
                if result.ambiguous {
                    self.fuzzy_ambiguous += 1;
                }
            }
            (MatchTier::Unmatched, _) => self.unmatched += 1,
        }
    }

    /// Calculate match rate as a percentage
    pub fn match_rate(&self) -> f64 {
        if self.tracks == 0 {
            0.0
        } else {
            100.0 * (self.tracks - self.unmatched) as f64 / self.tracks as f64
        }
    }
}

/// Log any stats struct at info level in JSON form.
pub fn log_stats<T: Serialize>(phase: &str, stats: &T) {
    if let Ok(json) = serde_json::to_string_pretty(stats) {
        log::info!("[STATS:{}]\n{}", phase, json);
    }
}
