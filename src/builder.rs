//! Fills the identity cache for artist keys it does not know yet.
//!
//! A key already in the cache is never looked up again. Progress is
//! checkpointed to disk every `checkpoint_every` new entries so an
//! interrupted run keeps what it already paid for.

use log::{debug, info, warn};
use rustc_hash::FxHashSet;
use std::time::Instant;

use crate::cache::{CacheStore, IdentityCache};
use crate::client::{LookupOutcome, MetadataClient};
use crate::error::Result;
use crate::models::{BuildStats, EntrySource, IdentityEntry, LibraryEntry};
use crate::musicbrainz::ArtistSearch;
use crate::normalize::{normalize, NormalizedKey};
use crate::pacer::Wait;
use crate::progress::{create_progress_bar, log_progress};

pub const DEFAULT_CHECKPOINT_EVERY: usize = 25;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildOptions {
    /// Save after this many new entries.
    pub checkpoint_every: usize,
    /// Look up at most this many missing keys.
    pub limit: Option<usize>,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            checkpoint_every: DEFAULT_CHECKPOINT_EVERY,
            limit: None,
        }
    }
}

/// Keys that a build would look up: distinct, non-empty and not cached, in
/// input order.
pub fn plan(cache: &IdentityCache, keys: &[NormalizedKey]) -> Vec<NormalizedKey> {
    let mut seen = FxHashSet::default();
    keys.iter()
        .filter(|key| !key.is_empty() && !cache.contains(key))
        .filter(|key| seen.insert(*key))
        .cloned()
        .collect()
}

/// Look up every missing key and record the hits.
///
/// `NotFound` and `Failed` lookups are counted and skipped; the only error
/// returned is a failure to write the final snapshot.
pub fn build<S: ArtistSearch, C: Wait>(
    cache: &mut IdentityCache,
    keys: &[NormalizedKey],
    client: &MetadataClient<S, C>,
    store: &CacheStore,
    options: &BuildOptions,
) -> Result<BuildStats> {
    let start = Instant::now();
    let checkpoint_every = options.checkpoint_every.max(1);

    let mut todo = plan(cache, keys);
    let distinct: FxHashSet<&NormalizedKey> = keys.iter().filter(|k| !k.is_empty()).collect();
    let mut stats = BuildStats {
        requested: distinct.len(),
        already_cached: distinct.len() - todo.len(),
        ..Default::default()
    };
    if let Some(limit) = options.limit {
        todo.truncate(limit);
    }

    info!(
        "{} distinct artists, {} cached, {} to look up",
        stats.requested,
        stats.already_cached,
        todo.len()
    );

    let total = todo.len() as u64;
    let pb = create_progress_bar(total, "Looking up artists");
    let mut unsaved = 0usize;

    for (i, key) in todo.into_iter().enumerate() {
        stats.looked_up += 1;
        match client.lookup_artist(key.as_str()) {
            LookupOutcome::Found(record) => {
                debug!("{:?} -> {:?}", key.as_str(), record.name);
                match cache.put(IdentityEntry::from_record(key, record)) {
                    Ok(_) => {
                        stats.added += 1;
                        unsaved += 1;
                    }
                    Err(e) => {
                        warn!("Skipping unusable result: {}", e);
                        stats.failed += 1;
                    }
                }
            }
            LookupOutcome::NotFound => {
                debug!("No artist found for {:?}", key.as_str());
                stats.not_found += 1;
            }
            LookupOutcome::Failed(e) => {
                warn!("Skipping {:?}: {}", key.as_str(), e);
                stats.failed += 1;
            }
        }

        if unsaved >= checkpoint_every {
            match store.save(cache) {
                Ok(()) => {
                    stats.checkpoints += 1;
                    unsaved = 0;
                }
                Err(e) => warn!("Checkpoint failed, will retry: {}", e),
            }
        }

        pb.inc(1);
        log_progress("BUILD", i as u64 + 1, total, 50);
    }
    pb.finish_and_clear();

    store.save(cache)?;
    stats.elapsed_seconds = start.elapsed().as_secs_f64();
    info!(
        "Added {} entries ({} not found, {} failed); cache now holds {}",
        stats.added,
        stats.not_found,
        stats.failed,
        cache.len()
    );
    Ok(stats)
}

/// Add library-sourced entries for wanted keys that the local library already
/// identifies, so they need no lookup. Returns the number of entries added.
pub fn seed_from_library(
    cache: &mut IdentityCache,
    keys: &[NormalizedKey],
    entries: &[LibraryEntry],
) -> usize {
    let wanted: FxHashSet<&NormalizedKey> = keys.iter().collect();
    let mut added = 0;
    for entry in entries.iter().filter(|e| e.has_identifier()) {
        let key = normalize(&entry.artist);
        if key.is_empty() || !wanted.contains(&key) || cache.contains(&key) {
            continue;
        }
        let seeded = IdentityEntry {
            key,
            canonical_name: entry.artist.trim().to_string(),
            external_id: entry.external_id.clone(),
            verified: false,
            sort_name: None,
            source: EntrySource::Library,
            similarity: None,
        };
        if cache.put(seeded).is_ok() {
            added += 1;
        }
    }
    if added > 0 {
        info!("Seeded {} artists from the library", added);
    }
    added
}
