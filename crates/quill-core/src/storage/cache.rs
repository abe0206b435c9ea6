//! Local cache
//!
//! Persists each collection as a JSON array of wire documents under a fixed
//! key (see [`Collection::cache_key`]). Loading is forgiving: a missing key,
//! unparseable JSON or an undecodable record never fails the load. Broken
//! records are skipped and logged.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, warn};

use crate::codec::{Collection, Document, DocumentCodec, Value};
use crate::storage::error::{CacheError, CacheResult};
use crate::storage::schema::{init_schema, needs_init};

/// SQLite-backed device cache for the three collections
pub struct LocalCache {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl LocalCache {
    /// Open or create the cache database at `path`
    pub fn open(path: impl AsRef<Path>) -> CacheResult<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| CacheError::from_io(e, parent.to_path_buf()))?;
        }

        let conn = Connection::open(&path).map_err(|source| CacheError::Open {
            path: path.clone(),
            source,
        })?;

        if needs_init(&conn) {
            init_schema(&conn)?;
        }

        debug!("Opened local cache at {:?}", path);
        Ok(Self {
            conn: Mutex::new(conn),
            path: Some(path),
        })
    }

    /// Open an in-memory cache (for testing)
    pub fn open_in_memory() -> CacheResult<Self> {
        let conn = Connection::open_in_memory()?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: None,
        })
    }

    /// Location of the database file, if file-backed
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Replace the saved contents of `T`'s collection
    pub fn save<T: DocumentCodec>(&self, items: &[T]) -> CacheResult<()> {
        let mut write = CacheWrite::new();
        write.put(items);
        self.write(write)
    }

    /// Replace every collection staged in `write`, all or nothing
    pub fn write(&self, write: CacheWrite) -> CacheResult<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let now = Utc::now().timestamp_millis();
        for (collection, json, _) in &write.entries {
            tx.execute(
                "INSERT OR REPLACE INTO cache_entries (key, value, updated_at) VALUES (?1, ?2, ?3)",
                params![collection.cache_key(), json, now],
            )?;
        }
        tx.commit()?;
        for (collection, _, count) in &write.entries {
            debug!("Saved {} {} records to cache", count, collection);
        }
        Ok(())
    }

    /// Load the saved contents of `T`'s collection
    ///
    /// Returns an empty list when nothing is saved or the entry is unreadable.
    pub fn load<T: DocumentCodec>(&self) -> Vec<T> {
        let raw = match self.get_raw(T::COLLECTION) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Vec::new(),
            Err(e) => {
                warn!("Failed to read cached {}: {}", T::COLLECTION, e);
                return Vec::new();
            }
        };

        let parsed = match serde_json::from_str::<serde_json::Value>(&raw) {
            Ok(serde_json::Value::Array(items)) => items,
            Ok(_) => {
                warn!("Cached {} is not a list, ignoring it", T::COLLECTION);
                return Vec::new();
            }
            Err(e) => {
                warn!("Cached {} is not valid JSON, ignoring it: {}", T::COLLECTION, e);
                return Vec::new();
            }
        };

        parsed
            .into_iter()
            .filter_map(|item| match Value::from_json(item) {
                Value::Map(doc) => decode_or_skip::<T>(&doc),
                other => {
                    warn!(
                        "Skipping cached {} entry of type {}",
                        T::KIND,
                        other.type_name()
                    );
                    None
                }
            })
            .collect()
    }

    #[cfg(test)]
    fn put_raw(&self, collection: Collection, json: &str) -> CacheResult<()> {
        self.conn()?.execute(
            "INSERT OR REPLACE INTO cache_entries (key, value, updated_at) VALUES (?1, ?2, ?3)",
            params![collection.cache_key(), json, Utc::now().timestamp_millis()],
        )?;
        Ok(())
    }

    fn get_raw(&self, collection: Collection) -> CacheResult<Option<String>> {
        let raw = self
            .conn()?
            .query_row(
                "SELECT value FROM cache_entries WHERE key = ?1",
                [collection.cache_key()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(raw)
    }

    fn conn(&self) -> CacheResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| CacheError::Poisoned)
    }

    /// Make every later save fail
    #[cfg(test)]
    pub(crate) fn break_entries_table(&self) {
        if let Ok(conn) = self.conn() {
            let _ = conn.execute("DROP TABLE cache_entries", []);
        }
    }
}

/// Collections staged for one atomic cache write
#[derive(Debug, Default)]
pub struct CacheWrite {
    entries: Vec<(Collection, String, usize)>,
}

impl CacheWrite {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage `items` as the new contents of `T`'s collection
    pub fn put<T: DocumentCodec>(&mut self, items: &[T]) {
        let array = Value::Array(items.iter().map(|item| Value::Map(item.encode())).collect());
        self.entries
            .retain(|(collection, _, _)| *collection != T::COLLECTION);
        self.entries
            .push((T::COLLECTION, array.to_json().to_string(), items.len()));
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn decode_or_skip<T: DocumentCodec>(doc: &Document) -> Option<T> {
    match T::decode(doc) {
        Ok(item) => Some(item),
        Err(e) => {
            warn!("Skipping cached {} that failed to decode: {}", T::KIND, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Block, Folder, Note, Tag, TagColor};
    use tempfile::tempdir;

    #[test]
    fn test_load_empty() {
        let cache = LocalCache::open_in_memory().unwrap();
        assert!(cache.load::<Note>().is_empty());
        assert!(cache.load::<Folder>().is_empty());
    }

    #[test]
    fn test_save_and_load() {
        let cache = LocalCache::open_in_memory().unwrap();
        let mut note = Note::new("Cached", "user-1", None);
        note.push_block(Block::text("body"));
        let folder = Folder::new("Work", "user-1");
        let tag = Tag::new("Urgent", "user-1", TagColor::default());

        cache.save(&[note.clone()]).unwrap();
        cache.save(&[folder.clone()]).unwrap();
        cache.save(&[tag.clone()]).unwrap();

        assert_eq!(cache.load::<Note>(), vec![note]);
        assert_eq!(cache.load::<Folder>(), vec![folder]);
        assert_eq!(cache.load::<Tag>(), vec![tag]);
    }

    #[test]
    fn test_save_replaces_previous_contents() {
        let cache = LocalCache::open_in_memory().unwrap();
        cache.save(&[Folder::new("A", "u"), Folder::new("B", "u")]).unwrap();
        let only = Folder::new("C", "u");
        cache.save(&[only.clone()]).unwrap();
        assert_eq!(cache.load::<Folder>(), vec![only]);
    }

    #[test]
    fn test_corrupt_json_loads_empty() {
        let cache = LocalCache::open_in_memory().unwrap();
        cache.put_raw(Collection::Notes, "{not json").unwrap();
        assert!(cache.load::<Note>().is_empty());

        cache.put_raw(Collection::Notes, "{\"a\": 1}").unwrap();
        assert!(cache.load::<Note>().is_empty());
    }

    #[test]
    fn test_undecodable_records_are_skipped() {
        let cache = LocalCache::open_in_memory().unwrap();
        let good = Folder::new("Good", "u");
        let json = format!(
            "[{}, {{\"id\": \"broken\"}}, 17]",
            good.encode().to_json_string()
        );
        cache.put_raw(Collection::Folders, &json).unwrap();
        assert_eq!(cache.load::<Folder>(), vec![good]);
    }

    #[test]
    fn test_write_several_collections() {
        let cache = LocalCache::open_in_memory().unwrap();
        let folder = Folder::new("A", "u");
        let tag = Tag::new("T", "u", TagColor::default());

        let mut write = CacheWrite::new();
        write.put(&[Folder::new("Replaced", "u")]);
        write.put(&[folder.clone()]);
        write.put(&[tag.clone()]);
        assert!(!write.is_empty());
        cache.write(write).unwrap();

        assert_eq!(cache.load::<Folder>(), vec![folder]);
        assert_eq!(cache.load::<Tag>(), vec![tag]);
    }

    #[test]
    fn test_failed_write_is_reported() {
        let cache = LocalCache::open_in_memory().unwrap();
        cache.break_entries_table();
        assert!(cache.save(&[Folder::new("A", "u")]).is_err());
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("cache.db");
        let folder = Folder::new("Durable", "u");

        {
            let cache = LocalCache::open(&path).unwrap();
            cache.save(&[folder.clone()]).unwrap();
            assert_eq!(cache.path(), Some(path.as_path()));
        }

        let cache = LocalCache::open(&path).unwrap();
        assert_eq!(cache.load::<Folder>(), vec![folder]);
    }
}
