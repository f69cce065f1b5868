//! The tagging preview (`cww_tag_preview.json`).
//!
//! Written on every tagger run, dry or not, so a human can review what was
//! (or would be) tagged and which fuzzy matches were held back.

use rustc_hash::FxHashSet;
use serde::Serialize;
use std::path::Path;

use crate::cache::write_json_atomic;
use crate::error::Result;
use crate::library::TagOutcome;
use crate::models::{MatchReason, MatchResult, MatchTier};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PreviewAction {
    Tag,
    AlreadyTagged,
    /// Ambiguous match, not tagged without `--include-ambiguous`.
    Deferred,
    Missing,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PreviewRow {
    pub artist: String,
    pub title: String,
    pub path: Option<String>,
    pub scraped_artist: String,
    pub scraped_title: String,
    pub tier: MatchTier,
    pub reason: MatchReason,
    pub score: f64,
    pub ambiguous: bool,
    pub action: PreviewAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub genre: Option<String>,
}

/// Matched results split into those to tag and those held back.
#[derive(Debug, Default)]
pub struct Selection<'a> {
    pub to_tag: Vec<&'a MatchResult>,
    pub deferred: Vec<&'a MatchResult>,
}

/// Keep the first match per library item, then hold back ambiguous
/// matches unless `include_ambiguous` is set.
pub fn select(results: &[MatchResult], include_ambiguous: bool) -> Selection<'_> {
    let mut seen = FxHashSet::default();
    let mut selection = Selection::default();
    for result in results {
        let Some(entry) = &result.library_entry else { continue };
        if !seen.insert(entry.id) {
            continue;
        }
        if result.ambiguous && !include_ambiguous {
            selection.deferred.push(result);
        } else {
            selection.to_tag.push(result);
        }
    }
    selection
}

fn row(result: &MatchResult, action: PreviewAction, genre: Option<String>) -> Option<PreviewRow> {
    let entry = result.library_entry.as_ref()?;
    Some(PreviewRow {
        artist: entry.artist.clone(),
        title: entry.title.clone(),
        path: entry.path.clone(),
        scraped_artist: result.track.artist.clone(),
        scraped_title: result.track.title.clone(),
        tier: result.tier,
        reason: result.reason,
        score: result.reason.score(),
        ambiguous: result.ambiguous,
        action,
        genre,
    })
}

/// Preview rows for a selection and the outcomes of tagging `to_tag`
/// (same order).
pub fn build_preview(selection: &Selection<'_>, outcomes: &[TagOutcome]) -> Vec<PreviewRow> {
    let tagged = selection.to_tag.iter().zip(outcomes).filter_map(|(result, outcome)| {
        let (action, genre) = match outcome {
            TagOutcome::Tagged { genre } => (PreviewAction::Tag, Some(genre.clone())),
            TagOutcome::AlreadyTagged => (PreviewAction::AlreadyTagged, None),
            TagOutcome::Missing => (PreviewAction::Missing, None),
        };
        row(result, action, genre)
    });
    let deferred = selection
        .deferred
        .iter()
        .filter_map(|result| row(result, PreviewAction::Deferred, None));
    tagged.chain(deferred).collect()
}

pub fn write_preview(path: &Path, rows: &[PreviewRow]) -> Result<()> {
    write_json_atomic(path, rows)
}
