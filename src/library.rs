//! beets library adapter.
//!
//! Reads items straight from beets' SQLite database and writes the genre
//! tag back into the `genre` column. beets' own `beet write` propagates the
//! database change to the audio files afterwards.

use log::{debug, info};
use rusqlite::types::ValueRef;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::models::LibraryEntry;
use crate::normalize::normalize;
use crate::progress::create_spinner;

/// What tagging did (or would do) to one entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagOutcome {
    AlreadyTagged,
    Tagged { genre: String },
    /// The item disappeared from the database since it was read.
    Missing,
}

/// Merge `tag` into a `;`-separated genre list: trimmed, de-duplicated,
/// sorted, joined with `"; "`. Returns `None` if the tag is already there.
pub fn merge_genre(existing: Option<&str>, tag: &str) -> Option<String> {
    let mut genres: BTreeSet<&str> = existing
        .unwrap_or("")
        .split(';')
        .map(str::trim)
        .filter(|g| !g.is_empty())
        .collect();
    if !genres.insert(tag) {
        return None;
    }
    Some(genres.into_iter().collect::<Vec<_>>().join("; "))
}

fn lossy_text(value: ValueRef<'_>) -> Option<String> {
    match value {
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
        _ => None,
    }
}

pub struct BeetsLibrary {
    conn: Connection,
    path: PathBuf,
}

impl BeetsLibrary {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_WRITE)?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    /// Open without write access, for dry runs.
    pub fn open_read_only(path: &Path) -> Result<Self> {
        let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All items with a usable artist and title.
    pub fn entries(&self) -> Result<Vec<LibraryEntry>> {
        let spinner = create_spinner("Reading library");
        let mut stmt = self
            .conn
            .prepare("SELECT id, artist, title, mb_artistid, path FROM items ORDER BY id")?;
        let mut rows = stmt.query([])?;

        let mut entries = Vec::new();
        let mut skipped = 0usize;
        while let Some(row) = rows.next()? {
            let artist: Option<String> = row.get(1)?;
            let title: Option<String> = row.get(2)?;
            let (Some(artist), Some(title)) = (artist, title) else {
                skipped += 1;
                continue;
            };
            if normalize(&artist).is_empty() || normalize(&title).is_empty() {
                skipped += 1;
                continue;
            }
            let external_id: Option<String> = row.get(3)?;
            entries.push(LibraryEntry {
                id: row.get(0)?,
                artist,
                title,
                external_id: external_id.filter(|id| !id.trim().is_empty()),
                path: lossy_text(row.get_ref(4)?),
            });
        }
        spinner.finish_and_clear();

        info!(
            "Read {} library items from {} ({} skipped)",
            entries.len(),
            self.path.display(),
            skipped
        );
        Ok(entries)
    }

    /// Add `tag` to the genre of each entry. All writes happen in one
    /// transaction; with `dry_run` nothing is written but the outcomes are
    /// the same.
    pub fn apply_tag(&mut self, entries: &[LibraryEntry], tag: &str, dry_run: bool) -> Result<Vec<TagOutcome>> {
        let tx = self.conn.transaction()?;
        let mut outcomes = Vec::with_capacity(entries.len());
        {
            let mut select = tx.prepare_cached("SELECT genre FROM items WHERE id = ?1")?;
            let mut update = tx.prepare_cached("UPDATE items SET genre = ?1 WHERE id = ?2")?;

            for entry in entries {
                let genre: Option<Option<String>> =
                    select.query_row(params![entry.id], |row| row.get(0)).optional()?;
                let outcome = match genre {
                    None => TagOutcome::Missing,
                    Some(existing) => match merge_genre(existing.as_deref(), tag) {
                        None => TagOutcome::AlreadyTagged,
                        Some(genre) => {
                            if !dry_run {
                                update.execute(params![genre, entry.id])?;
                            }
                            debug!("{} - {}: genre -> {:?}", entry.artist, entry.title, genre);
                            TagOutcome::Tagged { genre }
                        }
                    },
                };
                outcomes.push(outcome);
            }
        }
        if dry_run {
            tx.rollback()?;
        } else {
            tx.commit()?;
        }
        Ok(outcomes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn beets_db(dir: &TempDir) -> PathBuf {
        let path = dir.path().join("library.db");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE items (
                id INTEGER PRIMARY KEY,
                path BLOB,
                artist TEXT,
                title TEXT,
                genre TEXT,
                mb_artistid TEXT
            );
            INSERT INTO items VALUES (1, CAST('/music/ewf/september.flac' AS BLOB), 'Earth, Wind & Fire', 'September', 'Soul; Funk', '535afeda');
            INSERT INTO items VALUES (2, '/music/fela/zombie.mp3', 'Fela Kuti', 'Zombie', 'CWW', '');
            INSERT INTO items VALUES (3, NULL, '...', 'Untitled', NULL, NULL);
            INSERT INTO items VALUES (4, NULL, 'Can', NULL, NULL, NULL);
            INSERT INTO items VALUES (5, NULL, 'Can', 'Vitamin C', NULL, NULL);",
        )
        .unwrap();
        path
    }

    fn genre_of(path: &Path, id: i64) -> Option<String> {
        let conn = Connection::open(path).unwrap();
        conn.query_row("SELECT genre FROM items WHERE id = ?1", [id], |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn test_merge_genre() {
        assert_eq!(merge_genre(Some("Rock; Soul"), "CWW").as_deref(), Some("CWW; Rock; Soul"));
        assert_eq!(merge_genre(None, "CWW").as_deref(), Some("CWW"));
        assert_eq!(merge_genre(Some(" Soul ;; Jazz;Soul"), "CWW").as_deref(), Some("CWW; Jazz; Soul"));
        assert_eq!(merge_genre(Some("Soul;CWW"), "CWW"), None);
    }

    #[test]
    fn test_entries_skip_unusable_rows() {
        let dir = TempDir::new().unwrap();
        let library = BeetsLibrary::open_read_only(&beets_db(&dir)).unwrap();
        let entries = library.entries().unwrap();

        let ids: Vec<i64> = entries.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![1, 2, 5]);
        assert_eq!(entries[0].external_id.as_deref(), Some("535afeda"));
        assert_eq!(entries[0].path.as_deref(), Some("/music/ewf/september.flac"));
        assert_eq!(entries[1].external_id, None);
        assert_eq!(entries[1].path.as_deref(), Some("/music/fela/zombie.mp3"));
        assert_eq!(entries[2].path, None);
    }

    #[test]
    fn test_apply_tag_writes_once() {
        let dir = TempDir::new().unwrap();
        let path = beets_db(&dir);
        let mut library = BeetsLibrary::open(&path).unwrap();
        let entries = library.entries().unwrap();

        let outcomes = library.apply_tag(&entries, "CWW", false).unwrap();
        assert_eq!(
            outcomes,
            vec![
                TagOutcome::Tagged {
                    genre: "CWW; Funk; Soul".to_string()
                },
                TagOutcome::AlreadyTagged,
                TagOutcome::Tagged {
                    genre: "CWW".to_string()
                },
            ]
        );
        assert_eq!(genre_of(&path, 1).as_deref(), Some("CWW; Funk; Soul"));

        let again = library.apply_tag(&entries, "CWW", false).unwrap();
        assert!(again.iter().all(|o| *o == TagOutcome::AlreadyTagged));
    }

    #[test]
    fn test_dry_run_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let path = beets_db(&dir);
        let mut library = BeetsLibrary::open(&path).unwrap();
        let entries = library.entries().unwrap();

        let outcomes = library.apply_tag(&entries[..1], "CWW", true).unwrap();
        assert!(matches!(outcomes[0], TagOutcome::Tagged { .. }));
        assert_eq!(genre_of(&path, 1).as_deref(), Some("Soul; Funk"));
    }

    #[test]
    fn test_missing_item() {
        let dir = TempDir::new().unwrap();
        let mut library = BeetsLibrary::open(&beets_db(&dir)).unwrap();
        let ghost = LibraryEntry {
            id: 99,
            artist: "Ghost".to_string(),
            title: "Boo".to_string(),
            external_id: None,
            path: None,
        };
        assert_eq!(library.apply_tag(&[ghost], "CWW", false).unwrap(), vec![TagOutcome::Missing]);
    }
}
