//! Scraped episode data (`episodes.json`).
//!
//! The scraper writes a list of episodes, each with its tracklist of
//! `{track, artist}` pairs. Only the tracklist matters here; the other fields
//! are kept for reporting.

use once_cell::sync::Lazy;
use regex::Regex;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::{Error, Result};
use crate::models::Track;

static EPISODE_NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"episode-(\d+)").unwrap());

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TracklistItem {
    #[serde(default)]
    pub track: String,
    #[serde(default)]
    pub artist: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Episode {
    pub url: String,
    #[serde(default)]
    pub thumbnail: Option<String>,
    #[serde(default)]
    pub audio_url: Option<String>,
    #[serde(default)]
    pub audio_type: Option<String>,
    #[serde(default)]
    pub tracklist: Vec<TracklistItem>,
}

impl Episode {
    pub fn number(&self) -> Option<u32> {
        episode_number(&self.url)
    }
}

/// Episode number from a URL like `.../episode-412`.
pub fn episode_number(url: &str) -> Option<u32> {
    EPISODE_NUMBER
        .captures(url)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Lowest and highest episode numbers found in the episode URLs.
pub fn episode_range(episodes: &[Episode]) -> Option<(u32, u32)> {
    episodes.iter().filter_map(Episode::number).fold(None, |range, n| match range {
        None => Some((n, n)),
        Some((lo, hi)) => Some((lo.min(n), hi.max(n))),
    })
}

pub fn load_episodes(path: &Path) -> Result<Vec<Episode>> {
    let text = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
    serde_json::from_str(&text).map_err(|e| Error::json(path, e))
}

/// Every tracklist line with a non-blank artist and title, in episode order.
pub fn tracks(episodes: &[Episode]) -> Vec<Track> {
    episodes
        .iter()
        .flat_map(|episode| episode.tracklist.iter())
        .filter(|item| !item.artist.trim().is_empty() && !item.track.trim().is_empty())
        .map(|item| Track {
            title: item.track.trim().to_string(),
            artist: item.artist.trim().to_string(),
            external_id: item.external_id.clone().filter(|id| !id.trim().is_empty()),
        })
        .collect()
}

/// Raw artist credits with play counts, most common first; ties sort by name.
pub fn artist_frequencies(episodes: &[Episode]) -> Vec<(String, usize)> {
    let mut counts: FxHashMap<&str, usize> = FxHashMap::default();
    for item in episodes.iter().flat_map(|e| e.tracklist.iter()) {
        let artist = item.artist.trim();
        if !artist.is_empty() {
            *counts.entry(artist).or_default() += 1;
        }
    }
    let mut sorted: Vec<(String, usize)> = counts.into_iter().map(|(a, c)| (a.to_string(), c)).collect();
    sorted.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    sorted
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"[
        {
            "url": "https://example.org/episode-12",
            "thumbnail": null,
            "audio_url": "https://soundcloud.com/x",
            "audio_type": "soundcloud",
            "tracklist": [
                {"track": "September", "artist": "Earth Wind and Fire"},
                {"track": "Zombie", "artist": "Fela Kuti"},
                {"track": "", "artist": "Nobody"}
            ]
        },
        {
            "url": "https://example.org/episode-13",
            "tracklist": [
                {"track": "Water No Get Enemy", "artist": "Fela Kuti"},
                {"track": "Vitamin C", "artist": " Can "},
                {"track": "Mother Sky", "artist": "Can"}
            ],
            "notes": "unknown fields are fine"
        },
        {"url": "https://example.org/special"}
    ]"#;

    fn sample() -> Vec<Episode> {
        serde_json::from_str(SAMPLE).unwrap()
    }

    #[test]
    fn test_episode_number() {
        assert_eq!(episode_number("https://example.org/episode-412"), Some(412));
        assert_eq!(episode_number("https://example.org/episode-7/"), Some(7));
        assert_eq!(episode_number("https://example.org/special"), None);
        assert_eq!(sample()[1].number(), Some(13));
    }

    #[test]
    fn test_episode_range() {
        let mut episodes = sample();
        assert_eq!(episode_range(&episodes), Some((12, 13)));

        episodes.retain(|e| e.number().is_none());
        assert_eq!(episode_range(&episodes), None);
        assert_eq!(episode_range(&[]), None);
    }

    #[test]
    fn test_tracks_flatten_and_skip_blank() {
        let tracks = tracks(&sample());
        assert_eq!(tracks.len(), 5);
        assert_eq!(tracks[0], Track::new("September", "Earth Wind and Fire"));
        assert_eq!(tracks[3].artist, "Can");
    }

    #[test]
    fn test_artist_frequencies_order() {
        let freqs = artist_frequencies(&sample());
        assert_eq!(
            freqs,
            vec![
                ("Can".to_string(), 2),
                ("Fela Kuti".to_string(), 2),
                ("Earth Wind and Fire".to_string(), 1),
                ("Nobody".to_string(), 1),
            ]
        );
    }

    #[test]
    fn test_load_missing_and_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("episodes.json");
        assert!(matches!(load_episodes(&missing), Err(Error::Io { .. })));

        fs::write(&missing, "{not json").unwrap();
        assert!(matches!(load_episodes(&missing), Err(Error::Json { .. })));

        fs::write(&missing, SAMPLE).unwrap();
        assert_eq!(load_episodes(&missing).unwrap().len(), 3);
    }
}
