//! Confidence-tiered matching of scraped tracks against the library.
//!
//! Rules, first decisive one wins:
//! 1. the track's own identifier equals an entry's identifier (`Exact`)
//! 2. the cached identity's identifier equals an entry's identifier and the
//!    title clears the fuzzy threshold (`Exact`, ambiguous below the high
//!    threshold)
//! 3. artist and title both clear the fuzzy threshold (`Fuzzy`)
//! 4. otherwise `Unmatched`
//!
//! Matching is a pure function of the track, the index, the cache and the
//! thresholds. Nothing here writes anywhere.

use rayon::prelude::*;
use rustc_hash::FxHashMap;
use std::cmp::Ordering;

use crate::cache::IdentityCache;
use crate::models::{LibraryEntry, MatchReason, MatchResult, MatchTier, Track};
use crate::normalize::{normalize, NormalizedKey};
use crate::scoring::{normalized_similarity, Thresholds};

// ============================================================================
// Library Index
// ============================================================================

struct IndexedEntry {
    entry: LibraryEntry,
    title: NormalizedKey,
    title_len: usize,
}

/// Entries sharing one normalized artist.
struct ArtistBucket {
    artist: NormalizedKey,
    artist_len: usize,
    members: Vec<usize>,
}

/// Library entries with their normalized fields computed once, grouped by
/// normalized artist so each distinct artist is scored once per track.
pub struct LibraryIndex {
    entries: Vec<IndexedEntry>,
    buckets: Vec<ArtistBucket>,
    by_identifier: FxHashMap<String, Vec<usize>>,
}

fn identifier_key(id: &str) -> Option<String> {
    let id = id.trim();
    if id.is_empty() {
        None
    } else {
        Some(id.to_lowercase())
    }
}

impl LibraryIndex {
    pub fn new(entries: Vec<LibraryEntry>) -> Self {
        let mut by_identifier: FxHashMap<String, Vec<usize>> = FxHashMap::default();
        let mut bucket_of: FxHashMap<NormalizedKey, usize> = FxHashMap::default();
        let mut buckets: Vec<ArtistBucket> = Vec::new();
        let mut indexed = Vec::with_capacity(entries.len());

        for (i, entry) in entries.into_iter().enumerate() {
            if let Some(id) = entry.external_id.as_deref().and_then(identifier_key) {
                by_identifier.entry(id).or_default().push(i);
            }
            let artist = normalize(&entry.artist);
            let slot = *bucket_of.entry(artist.clone()).or_insert_with(|| {
                buckets.push(ArtistBucket {
                    artist_len: artist.as_str().chars().count(),
                    artist,
                    members: Vec::new(),
                });
                buckets.len() - 1
            });
            buckets[slot].members.push(i);

            let title = normalize(&entry.title);
            indexed.push(IndexedEntry {
                title_len: title.as_str().chars().count(),
                title,
                entry,
            });
        }

        Self {
            entries: indexed,
            buckets,
            by_identifier,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of distinct normalized artists.
    pub fn artist_count(&self) -> usize {
        self.buckets.len()
    }

    pub fn get(&self, index: usize) -> Option<&LibraryEntry> {
        self.entries.get(index).map(|e| &e.entry)
    }

    fn with_identifier(&self, id: &str) -> &[usize] {
        identifier_key(id)
            .and_then(|key| self.by_identifier.get(&key))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// Upper bound of the edit similarity of two strings with these char
/// lengths. The edit distance is at least the length difference.
fn similarity_bound(a: usize, b: usize) -> f64 {
    let longest = a.max(b);
    if longest == 0 {
        return 0.0;
    }
    1.0 - (a.abs_diff(b) as f64) / (longest as f64)
}

/// Edit similarity, or `None` when it cannot reach `floor`.
fn score_at_least(a: &NormalizedKey, a_len: usize, b: &NormalizedKey, b_len: usize, floor: f64) -> Option<f64> {
    if similarity_bound(a_len, b_len) < floor {
        return None;
    }
    let score = normalized_similarity(a.as_str(), b.as_str());
    (score >= floor).then_some(score)
}

// ============================================================================
// Matching
// ============================================================================

fn result(track: &Track, index: &LibraryIndex, i: usize, tier: MatchTier, reason: MatchReason) -> MatchResult {
    MatchResult {
        track: track.clone(),
        entry_index: Some(i),
        library_entry: index.get(i).cloned(),
        tier,
        reason,
        ambiguous: false,
    }
}

/// Among `candidates`, the best title similarity; ties to the lowest index.
fn best_by_title(index: &LibraryIndex, candidates: &[usize], title: &NormalizedKey) -> Option<(usize, f64)> {
    candidates
        .iter()
        .map(|&i| (i, normalized_similarity(title.as_str(), index.entries[i].title.as_str())))
        .fold(None, |best, (i, score)| match best {
            Some((_, best_score)) if best_score >= score => best,
            _ => Some((i, score)),
        })
}

struct FuzzyCandidate {
    index: usize,
    artist: f64,
    title: f64,
    has_identifier: bool,
}

impl FuzzyCandidate {
    /// Ordering where "greater" is preferred: combined score, then an
    /// identified entry, then the lower index.
    fn preference(&self, other: &Self) -> Ordering {
        (self.artist + self.title)
            .total_cmp(&(other.artist + other.title))
            .then(self.has_identifier.cmp(&other.has_identifier))
            .then(other.index.cmp(&self.index))
    }
}

/// Match one track against the library.
pub fn match_track(
    track: &Track,
    index: &LibraryIndex,
    cache: &IdentityCache,
    thresholds: Thresholds,
) -> MatchResult {
    let title = normalize(&track.title);
    let artist = normalize(&track.artist);

    if let Some(id) = track.external_id.as_deref() {
        if let Some((i, _)) = best_by_title(index, index.with_identifier(id), &title) {
            return result(track, index, i, MatchTier::Exact, MatchReason::Identifier);
        }
    }

    let identity = cache.get(&artist);

    if let Some(id) = identity.and_then(|e| e.external_id.as_deref()) {
        let candidates = index.with_identifier(id);
        if let Some((i, score)) = best_by_title(index, candidates, &title) {
            if score >= thresholds.low {
                let mut matched = result(
                    track,
                    index,
                    i,
                    MatchTier::Exact,
                    MatchReason::CachedIdentifier { title: score },
                );
                matched.ambiguous = score < thresholds.high;
                return matched;
            }
        }
    }

    let canonical = identity
        .map(|e| normalize(&e.canonical_name))
        .filter(|c| !c.is_empty() && *c != artist)
        .map(|c| {
            let len = c.as_str().chars().count();
            (c, len)
        });
    let artist_len = artist.as_str().chars().count();
    let title_len = title.as_str().chars().count();
    let floor = thresholds.low;
    let title = &title;

    let best = index
        .buckets
        .iter()
        .filter_map(|bucket| {
            let direct = score_at_least(&artist, artist_len, &bucket.artist, bucket.artist_len, floor);
            let via_canonical = canonical
                .as_ref()
                .and_then(|(c, len)| score_at_least(c, *len, &bucket.artist, bucket.artist_len, floor));
            let artist_score = match (direct, via_canonical) {
                (Some(a), Some(b)) => a.max(b),
                (a, b) => a.or(b)?,
            };
            Some((bucket, artist_score))
        })
        .flat_map(|(bucket, artist_score)| {
            bucket.members.iter().filter_map(move |&i| {
                let candidate = &index.entries[i];
                let title_score = score_at_least(title, title_len, &candidate.title, candidate.title_len, floor)?;
                Some(FuzzyCandidate {
                    index: i,
                    artist: artist_score,
                    title: title_score,
                    has_identifier: candidate.entry.has_identifier(),
                })
            })
        })
        .max_by(|a, b| a.preference(b));

    match best {
        Some(best) => {
            let mut matched = result(
                track,
                index,
                best.index,
                MatchTier::Fuzzy,
                MatchReason::Similarity {
                    artist: best.artist,
                    title: best.title,
                },
            );
            matched.ambiguous = best.artist.min(best.title) < thresholds.high;
            matched
        }
        None => MatchResult::unmatched(track.clone()),
    }
}

/// Match every track in parallel. Results keep the input order.
pub fn match_all(
    tracks: &[Track],
    index: &LibraryIndex,
    cache: &IdentityCache,
    thresholds: Thresholds,
) -> Vec<MatchResult> {
    tracks
        .par_iter()
        .map(|track| match_track(track, index, cache, thresholds))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EntrySource, IdentityEntry};

    fn lib(id: i64, artist: &str, title: &str, external_id: Option<&str>) -> LibraryEntry {
        LibraryEntry {
            id,
            artist: artist.to_string(),
            title: title.to_string(),
            external_id: external_id.map(str::to_string),
            path: Some(format!("/music/{id}.flac")),
        }
    }

    fn cached(raw: &str, name: &str, mbid: Option<&str>) -> IdentityEntry {
        IdentityEntry {
            key: normalize(raw),
            canonical_name: name.to_string(),
            external_id: mbid.map(str::to_string),
            verified: false,
            sort_name: None,
            source: EntrySource::MusicBrainz,
            similarity: None,
        }
    }

    fn run(track: &Track, entries: Vec<LibraryEntry>, cache: &IdentityCache) -> MatchResult {
        match_track(track, &LibraryIndex::new(entries), cache, Thresholds::default())
    }

    #[test]
    fn test_punctuation_variant_is_confident_fuzzy() {
        let track = Track::new("September", "Earth Wind and Fire");
        let result = run(
            &track,
            vec![lib(1, "Earth, Wind & Fire", "September", Some("X1"))],
            &IdentityCache::new(),
        );
        assert_eq!(result.tier, MatchTier::Fuzzy);
        assert!(result.reason.score() >= 0.85);
        assert!(!result.ambiguous);
        assert_eq!(result.library_entry.unwrap().external_id.as_deref(), Some("X1"));
    }

    #[test]
    fn test_track_identifier_wins_over_names() {
        let mut track = Track::new("Completely Different", "Nobody");
        track.external_id = Some("ABC".to_string());
        let result = run(
            &track,
            vec![lib(1, "Nobody", "Completely Different", None), lib(2, "Someone", "Song", Some("abc"))],
            &IdentityCache::new(),
        );
        assert_eq!(result.tier, MatchTier::Exact);
        assert_eq!(result.reason, MatchReason::Identifier);
        assert_eq!(result.entry_index, Some(1));
    }

    #[test]
    fn test_identifier_picks_best_title() {
        let mut track = Track::new("Zombie", "Fela");
        track.external_id = Some("f".to_string());
        let result = run(
            &track,
            vec![lib(1, "Fela Kuti", "Lady", Some("f")), lib(2, "Fela Kuti", "Zombie", Some("f"))],
            &IdentityCache::new(),
        );
        assert_eq!(result.entry_index, Some(1));
    }

    #[test]
    fn test_cached_identifier_needs_title() {
        let mut cache = IdentityCache::new();
        cache.put(cached("Fela & Africa 70", "Fela Kuti", Some("fela-mbid"))).unwrap();
        let entries = vec![
            lib(1, "Fela Anikulapo Kuti", "Water No Get Enemy", Some("fela-mbid")),
            lib(2, "Fela Anikulapo Kuti", "Zombie", Some("fela-mbid")),
        ];

        let hit = run(&Track::new("Zombie", "Fela & Africa 70"), entries.clone(), &cache);
        assert_eq!(hit.tier, MatchTier::Exact);
        assert!(matches!(hit.reason, MatchReason::CachedIdentifier { .. }));
        assert_eq!(hit.entry_index, Some(1));

        let miss = run(&Track::new("Expensive Shit", "Fela & Africa 70"), entries, &cache);
        assert_eq!(miss.tier, MatchTier::Unmatched);
    }

    #[test]
    fn test_cached_identifier_with_near_title_is_ambiguous() {
        // "sugar" vs "sugars": 0.833
        let mut cache = IdentityCache::new();
        cache.put(cached("Marvin", "Marvin", Some("m-id"))).unwrap();
        let entries = vec![lib(1, "Marvin", "Sugars", Some("m-id"))];

        let with_cache = run(&Track::new("Sugar", "Marvin"), entries.clone(), &cache);
        assert_eq!(with_cache.tier, MatchTier::Exact);
        assert!(matches!(with_cache.reason, MatchReason::CachedIdentifier { .. }));
        assert!(with_cache.ambiguous);

        let without_cache = run(&Track::new("Sugar", "Marvin"), entries.clone(), &IdentityCache::new());
        assert_eq!(without_cache.tier, MatchTier::Fuzzy);
        assert!(without_cache.ambiguous);

        let confident = run(&Track::new("Sugars", "Marvin"), entries, &cache);
        assert_eq!(confident.tier, MatchTier::Exact);
        assert!(!confident.ambiguous);
    }

    #[test]
    fn test_canonical_name_assists_fuzzy() {
        let mut cache = IdentityCache::new();
        cache.put(cached("Sly & Family Stone", "Sly & the Family Stone", None)).unwrap();
        let result = run(
            &Track::new("Everyday People", "Sly & Family Stone"),
            vec![lib(1, "Sly & the Family Stone", "Everyday People", None)],
            &cache,
        );
        assert_eq!(result.tier, MatchTier::Fuzzy);
        assert!(!result.ambiguous);
    }

    #[test]
    fn test_artist_below_threshold_is_unmatched() {
        let result = run(
            &Track::new("September", "Kool and the Gang"),
            vec![lib(1, "Earth, Wind & Fire", "September", None)],
            &IdentityCache::new(),
        );
        assert_eq!(result.tier, MatchTier::Unmatched);
        assert_eq!(result.reason, MatchReason::NoCandidate);
        assert!(result.library_entry.is_none());
    }

    #[test]
    fn test_ambiguous_band_is_flagged() {
        // "marvin" vs "marvyn": 0.833
        let result = run(
            &Track::new("Sugar", "Marvin"),
            vec![lib(1, "Marvyn", "Sugar", None)],
            &IdentityCache::new(),
        );
        assert_eq!(result.tier, MatchTier::Fuzzy);
        assert!(result.ambiguous);
    }

    #[test]
    fn test_tie_prefers_identified_entry_then_lowest_index() {
        let track = Track::new("Sugar", "Marvin");
        let entries = vec![
            lib(1, "Marvin", "Sugar", None),
            lib(2, "Marvin", "Sugar", Some("m")),
            lib(3, "Marvin", "Sugar", Some("n")),
        ];
        let result = run(&track, entries, &IdentityCache::new());
        assert_eq!(result.entry_index, Some(1));

        let unidentified = vec![lib(1, "Marvin", "Sugar", None), lib(2, "Marvin", "Sugar", None)];
        assert_eq!(run(&track, unidentified, &IdentityCache::new()).entry_index, Some(0));
    }

    #[test]
    fn test_higher_combined_score_beats_identifier() {
        let track = Track::new("Sugar", "Marvin");
        let entries = vec![lib(1, "Marvyn", "Sugar", Some("m")), lib(2, "Marvin", "Sugar", None)];
        assert_eq!(run(&track, entries, &IdentityCache::new()).entry_index, Some(1));
    }

    #[test]
    fn test_match_all_is_deterministic_and_ordered() {
        let index = LibraryIndex::new(vec![
            lib(1, "Earth, Wind & Fire", "September", Some("X1")),
            lib(2, "Fela Kuti", "Zombie", None),
        ]);
        let tracks: Vec<Track> = (0..50)
            .map(|i| {
                if i % 2 == 0 {
                    Track::new("September", "Earth Wind and Fire")
                } else {
                    Track::new("Zombie", "Fela Kuti")
                }
            })
            .collect();
        let cache = IdentityCache::new();
        let first = match_all(&tracks, &index, &cache, Thresholds::default());
        let second = match_all(&tracks, &index, &cache, Thresholds::default());
        assert_eq!(first, second);
        for (i, r) in first.iter().enumerate() {
            assert_eq!(r.track, tracks[i]);
            assert_eq!(r.entry_index, Some(i % 2));
        }
    }

    /// Scores every entry directly, without buckets or length bounds.
    fn exhaustive(track: &Track, entries: &[LibraryEntry], cache: &IdentityCache) -> Option<usize> {
        let low = Thresholds::default().low;
        let artist = normalize(&track.artist);
        let title = normalize(&track.title);
        let canonical = cache.get(&artist).map(|e| normalize(&e.canonical_name));
        entries
            .iter()
            .enumerate()
            .filter_map(|(i, e)| {
                let lib_artist = normalize(&e.artist);
                let mut a = normalized_similarity(artist.as_str(), lib_artist.as_str());
                if let Some(c) = &canonical {
                    a = a.max(normalized_similarity(c.as_str(), lib_artist.as_str()));
                }
                let t = normalized_similarity(title.as_str(), normalize(&e.title).as_str());
                (a >= low && t >= low).then_some(FuzzyCandidate {
                    index: i,
                    artist: a,
                    title: t,
                    has_identifier: e.has_identifier(),
                })
            })
            .max_by(|a, b| a.preference(b))
            .map(|c| c.index)
    }

    #[test]
    fn test_bucketed_fuzzy_agrees_with_exhaustive_scan() {
        let entries = vec![
            lib(1, "Marvin", "Sugar", None),
            lib(2, "Marvyn", "Sugar", Some("m")),
            lib(3, "Marvin Gaye", "Sugar Sugar", None),
            lib(4, "Earth, Wind & Fire", "September", Some("X1")),
            lib(5, "Earth Wind and Fire", "Septembers", None),
            lib(6, "Sly & the Family Stone", "Everyday People", None),
            lib(7, "Sly and the Family Stone", "Everyday Peoples", Some("s")),
            lib(8, "", "Sugar", None),
            lib(9, "Marvin", "", None),
        ];
        let mut cache = IdentityCache::new();
        cache.put(cached("Sly & Family Stone", "Sly & the Family Stone", None)).unwrap();
        let tracks = [
            Track::new("Sugar", "Marvin"),
            Track::new("Sugar", "Marvyn"),
            Track::new("September", "Earth Wind & Fire"),
            Track::new("Septmber", "Earth Wind and Fire"),
            Track::new("Everyday People", "Sly & Family Stone"),
            Track::new("Sugar Sugar", "Marvin Gay"),
            Track::new("Nothing", "Nobody"),
        ];
        let index = LibraryIndex::new(entries.clone());
        assert!(index.artist_count() < index.len());
        for track in &tracks {
            let got = match_track(track, &index, &cache, Thresholds::default());
            let want = exhaustive(track, &entries, &cache);
            assert_eq!(got.entry_index, want, "{:?}", track);
        }
    }

    #[test]
    fn test_length_bound_never_underestimates() {
        for (a, b) in [("sugar", "sugars"), ("marvin", "marvin gaye"), ("abc", "xyz"), ("a", "abcdefgh")] {
            let bound = similarity_bound(a.chars().count(), b.chars().count());
            assert!(bound >= normalized_similarity(a, b), "{} / {}", a, b);
        }
        assert_eq!(similarity_bound(0, 0), 0.0);
    }

    #[test]
    fn test_empty_library() {
        let result = run(&Track::new("Anything", "Anyone"), Vec::new(), &IdentityCache::new());
        assert_eq!(result.tier, MatchTier::Unmatched);
    }
}
