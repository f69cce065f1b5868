//! Persistent artist identity cache.
//!
//! The snapshot is a single JSON object keyed by normalized artist credit:
//!
//! ```json
//! {
//!   "earth wind and fire": {
//!     "canonical_name": "Earth, Wind & Fire",
//!     "mbid": "535afeda-2538-435d-9dd1-5e10be586774",
//!     "verified": true
//!   }
//! }
//! ```
//!
//! Loading never fails: a missing or corrupt file yields an empty cache, and a
//! malformed entry is dropped while the rest load. Saving writes a temp file
//! and renames it over the snapshot so a crash mid-write leaves the previous
//! snapshot intact.

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::btree_map::{self, BTreeMap};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::models::{EntrySource, IdentityEntry};
use crate::normalize::{normalize, NormalizedKey};

// ============================================================================
// Persisted Format
// ============================================================================

/// On-disk shape of one entry. Every field except the name is optional so
/// snapshots written by older or newer versions still load.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PersistedEntry {
    #[serde(default)]
    canonical_name: String,
    #[serde(default, alias = "external_id", skip_serializing_if = "Option::is_none")]
    mbid: Option<String>,
    #[serde(default)]
    verified: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sort_name: Option<String>,
    #[serde(default)]
    source: EntrySource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    similarity: Option<f64>,
}

impl PersistedEntry {
    fn into_entry(self, key: NormalizedKey) -> IdentityEntry {
        IdentityEntry {
            key,
            canonical_name: self.canonical_name,
            external_id: non_blank(self.mbid),
            verified: self.verified,
            sort_name: non_blank(self.sort_name),
            source: self.source,
            similarity: self.similarity.filter(|s| s.is_finite()),
        }
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl From<&IdentityEntry> for PersistedEntry {
    fn from(entry: &IdentityEntry) -> Self {
        Self {
            canonical_name: entry.canonical_name.clone(),
            mbid: entry.external_id.clone(),
            verified: entry.verified,
            sort_name: entry.sort_name.clone(),
            source: entry.source,
            similarity: entry.similarity,
        }
    }
}

// ============================================================================
// In-memory Cache
// ============================================================================

/// Mapping of normalized artist credit to canonical identity.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IdentityCache {
    entries: BTreeMap<NormalizedKey, IdentityEntry>,
}

impl IdentityCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &NormalizedKey) -> Option<&IdentityEntry> {
        self.entries.get(key)
    }

    /// Look up a raw artist credit by its normalized form.
    pub fn lookup(&self, raw_artist: &str) -> Option<&IdentityEntry> {
        self.entries.get(&normalize(raw_artist))
    }

    pub fn contains(&self, key: &NormalizedKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Insert or replace the entry stored under `entry.key`, returning the
    /// previous one.
    ///
    /// Entries are held to the same rules as a loaded snapshot, so whatever
    /// is put survives a save and load unchanged: the key and canonical name
    /// must be non-blank, blank identifiers and sort names become `None`.
    pub fn put(&mut self, mut entry: IdentityEntry) -> Result<Option<IdentityEntry>> {
        if entry.key.is_empty() {
            return Err(Error::InvalidEntry {
                key: entry.canonical_name,
                reason: "empty key",
            });
        }
        if entry.canonical_name.trim().is_empty() {
            return Err(Error::InvalidEntry {
                key: entry.key.into_string(),
                reason: "blank canonical name",
            });
        }
        entry.external_id = non_blank(entry.external_id);
        entry.sort_name = non_blank(entry.sort_name);
        entry.similarity = entry.similarity.filter(|s| s.is_finite());
        Ok(self.entries.insert(entry.key.clone(), entry))
    }

    pub fn remove(&mut self, key: &NormalizedKey) -> Option<IdentityEntry> {
        self.entries.remove(key)
    }

    pub fn get_mut(&mut self, key: &NormalizedKey) -> Option<&mut IdentityEntry> {
        self.entries.get_mut(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> btree_map::Values<'_, NormalizedKey, IdentityEntry> {
        self.entries.values()
    }

    pub fn keys(&self) -> impl Iterator<Item = &NormalizedKey> {
        self.entries.keys()
    }

    pub fn verified_count(&self) -> usize {
        self.entries.values().filter(|e| e.verified).count()
    }

    /// Insert an entry read from a snapshot whose key may predate the current
    /// normalization. On collision a verified entry beats an unverified one;
    /// otherwise the first one wins.
    fn merge_loaded(&mut self, raw_key: &str, persisted: PersistedEntry) {
        let key = normalize(raw_key);
        if key.is_empty() || persisted.canonical_name.trim().is_empty() {
            warn!("Dropping cache entry {:?}: empty key or canonical name", raw_key);
            return;
        }
        if key.as_str() != raw_key {
            debug!("Re-keyed cache entry {:?} -> {:?}", raw_key, key.as_str());
        }
        let entry = persisted.into_entry(key.clone());
        match self.entries.get(&key) {
            Some(existing) if existing.verified || !entry.verified => {
                debug!("Duplicate cache key {:?} after normalization, keeping first", key.as_str());
            }
            _ => {
                self.entries.insert(key, entry);
            }
        }
    }
}

impl<'a> IntoIterator for &'a IdentityCache {
    type Item = &'a IdentityEntry;
    type IntoIter = btree_map::Values<'a, NormalizedKey, IdentityEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.values()
    }
}

// ============================================================================
// Persistence
// ============================================================================

/// The backing file for an [`IdentityCache`].
#[derive(Debug, Clone)]
pub struct CacheStore {
    path: PathBuf,
}

impl CacheStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the snapshot. Missing or corrupt files yield an empty cache.
    pub fn load(&self) -> IdentityCache {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No cache at {}, starting empty", self.path.display());
                return IdentityCache::new();
            }
            Err(e) => {
                warn!("Could not read cache {}: {}; starting empty", self.path.display(), e);
                return IdentityCache::new();
            }
        };
        parse_snapshot(&text, &self.path)
    }

    /// Atomically replace the snapshot with `cache`.
    pub fn save(&self, cache: &IdentityCache) -> Result<()> {
        let snapshot: BTreeMap<&str, PersistedEntry> = cache
            .entries
            .iter()
            .map(|(key, entry)| (key.as_str(), PersistedEntry::from(entry)))
            .collect();
        write_json_atomic(&self.path, &snapshot)
    }

    /// Copy the current snapshot to `backup` (used before destructive passes).
    /// Returns false when there is no snapshot to back up.
    pub fn backup(&self, backup: &Path) -> Result<bool> {
        if !self.path.exists() {
            return Ok(false);
        }
        let tmp = temp_path(backup);
        fs::copy(&self.path, &tmp).map_err(|e| Error::io(&tmp, e))?;
        fs::rename(&tmp, backup).map_err(|e| Error::io(backup, e))?;
        Ok(true)
    }
}

fn parse_snapshot(text: &str, path: &Path) -> IdentityCache {
    let raw: BTreeMap<String, serde_json::Value> = match serde_json::from_str(text) {
        Ok(raw) => raw,
        Err(e) => {
            warn!("Corrupt cache {}: {}; starting empty", path.display(), e);
            return IdentityCache::new();
        }
    };

    let mut cache = IdentityCache::new();
    for (raw_key, value) in raw {
        match serde_json::from_value::<PersistedEntry>(value) {
            Ok(persisted) => cache.merge_loaded(&raw_key, persisted),
            Err(e) => warn!("Dropping malformed cache entry {:?}: {}", raw_key, e),
        }
    }
    cache
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Serialize `value` as pretty JSON next to `path`, fsync, then rename over
/// `path`.
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
    }
    let tmp = temp_path(path);
    {
        let file = fs::File::create(&tmp).map_err(|e| Error::io(&tmp, e))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, value).map_err(|e| Error::json(&tmp, e))?;
        writer.write_all(b"\n").map_err(|e| Error::io(&tmp, e))?;
        let file = writer
            .into_inner()
            .map_err(|e| Error::io(&tmp, e.into_error()))?;
        file.sync_all().map_err(|e| Error::io(&tmp, e))?;
    }
    fs::rename(&tmp, path).map_err(|e| Error::io(path, e))?;
    Ok(())
}
