//! Re-verifies cached identities and prunes bad hits.
//!
//! The builder trusts the service's top candidate blindly, so a credit like
//! "DJ Nobody" can end up cached as some unrelated artist. The cleaner scores
//! each entry and sorts it into one of three bands:
//!
//! - `>= high`: marked verified and kept
//! - `[low, high)`: kept, unverified
//! - `< low`: removed
//!
//! Lookups that fail or return nothing leave the entry exactly as it was.

use log::{debug, info, warn};
use serde::Serialize;
use std::time::Instant;

use crate::cache::IdentityCache;
use crate::client::{LookupOutcome, MetadataClient};
use crate::models::{CleanStats, EntrySource};
use crate::musicbrainz::ArtistSearch;
use crate::pacer::Wait;
use crate::progress::{create_progress_bar, log_progress};
use crate::scoring::{similarity, Band, Thresholds};

/// What each entry is compared against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CleanMode {
    /// Fresh lookup of the key; compare its name with the cached name.
    #[default]
    Online,
    /// No network: compare the key itself with the cached name.
    Offline,
}

/// One pruned entry, as written to the removed-entries report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RemovedEntry {
    pub key: String,
    pub canonical_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mbid: Option<String>,
    /// Name the cached identity was compared with.
    pub compared_with: String,
    pub similarity: f64,
}

#[derive(Debug, Clone, Default)]
pub struct CleanReport {
    pub stats: CleanStats,
    pub removed: Vec<RemovedEntry>,
}

pub fn clean<S: ArtistSearch, C: Wait>(
    cache: &mut IdentityCache,
    client: &MetadataClient<S, C>,
    thresholds: Thresholds,
    mode: CleanMode,
) -> CleanReport {
    let start = Instant::now();
    let mut report = CleanReport::default();
    let keys: Vec<_> = cache.keys().cloned().collect();
    report.stats.total = keys.len();

    let total = keys.len() as u64;
    let pb = create_progress_bar(total, "Verifying cache");

    for (i, key) in keys.into_iter().enumerate() {
        pb.inc(1);
        log_progress("CLEAN", i as u64 + 1, total, 50);

        let Some(entry) = cache.get(&key) else { continue };
        if entry.source == EntrySource::Library {
            report.stats.library_kept += 1;
            continue;
        }

        let reference = match mode {
            CleanMode::Offline => key.as_str().to_string(),
            CleanMode::Online => match client.lookup_artist(key.as_str()) {
                LookupOutcome::Found(fresh) => fresh.name,
                LookupOutcome::NotFound => {
                    debug!("No fresh candidate for {:?}, leaving as is", key.as_str());
                    report.stats.not_found += 1;
                    continue;
                }
                LookupOutcome::Failed(e) => {
                    warn!("Could not re-verify {:?}: {}", key.as_str(), e);
                    report.stats.lookup_failed += 1;
                    continue;
                }
            },
        };

        let score = similarity(&entry.canonical_name, &reference);
        report.stats.checked += 1;
        match Band::classify(score, thresholds) {
            Band::Reject => {
                if let Some(removed) = cache.remove(&key) {
                    info!(
                        "Removing {:?} -> {:?} (similarity {:.2} vs {:?})",
                        key.as_str(),
                        removed.canonical_name,
                        score,
                        reference
                    );
                    report.removed.push(RemovedEntry {
                        key: key.into_string(),
                        canonical_name: removed.canonical_name,
                        mbid: removed.external_id,
                        compared_with: reference,
                        similarity: score,
                    });
                    report.stats.removed += 1;
                }
            }
            band => {
                if let Some(entry) = cache.get_mut(&key) {
                    entry.verified = band == Band::Verified;
                    entry.similarity = Some(score);
                }
                if band == Band::Verified {
                    report.stats.verified += 1;
                } else {
                    report.stats.ambiguous += 1;
                }
            }
        }
    }
    pb.finish_and_clear();

    report.stats.elapsed_seconds = start.elapsed().as_secs_f64();
    info!(
        "Checked {} of {} entries: {} verified, {} ambiguous, {} removed",
        report.stats.checked, report.stats.total, report.stats.verified, report.stats.ambiguous, report.stats.removed
    );
    report
}
