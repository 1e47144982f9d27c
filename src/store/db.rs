//! SQLite implementation of [`LastSyncStore`] and [`ContentStore`].

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{Connection, OptionalExtension};

use super::error::StoreError;
use super::schema;
use super::{ContentStore, LastSyncStore, COMPRESSED_KEY_PREFIX, PREVIOUS_SYNC_TIME_KEY};

/// Overview of what the store holds, for the `status` command.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreSummary {
    pub last_sync_started: Option<DateTime<Utc>>,
    pub raw_photos: u64,
    pub compressed_photos: u64,
}

pub struct SqliteStore {
    /// rusqlite::Connection is not Sync.
    conn: Mutex<Connection>,
    path: PathBuf,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl SqliteStore {
    /// Open or create a database at the given path, creating parent
    /// directories as needed.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        let path = path.to_path_buf();
        let path_clone = path.clone();

        let conn = tokio::task::spawn_blocking(move || {
            if let Some(parent) = path_clone.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent).map_err(|e| StoreError::CreateDir {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
            }

            let conn = Connection::open(&path_clone).map_err(|e| StoreError::Open {
                path: path_clone.clone(),
                source: e,
            })?;

            conn.pragma_update(None, "journal_mode", "WAL")
                .map_err(StoreError::Migration)?;
            conn.pragma_update(None, "synchronous", "NORMAL")
                .map_err(StoreError::Migration)?;

            schema::migrate(&conn)?;

            Ok::<_, StoreError>(conn)
        })
        .await??;

        tracing::debug!(path = %path.display(), "Opened store");
        Ok(Self {
            conn: Mutex::new(conn),
            path,
        })
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(|e| StoreError::Open {
            path: PathBuf::from(":memory:"),
            source: e,
        })?;
        schema::migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: PathBuf::from(":memory:"),
        })
    }

    #[cfg(test)]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|e| StoreError::Query(e.to_string()))
    }

    pub fn summary(&self) -> Result<StoreSummary, StoreError> {
        let last_sync_started = LastSyncStore::get(self, PREVIOUS_SYNC_TIME_KEY)?
            .filter(|secs| *secs > 0.0)
            .and_then(|secs| Utc.timestamp_millis_opt((secs * 1000.0) as i64).single());

        let conn = self.lock()?;
        // LIKE folds ASCII case, so compare the prefix byte for byte.
        let compressed_photos: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM photo_blobs WHERE substr(key, 1, length(?1)) = ?1",
                [COMPRESSED_KEY_PREFIX],
                |row| row.get(0),
            )
            .map_err(StoreError::query)?;

        let total: i64 = conn
            .query_row("SELECT COUNT(*) FROM photo_blobs", [], |row| row.get(0))
            .map_err(StoreError::query)?;

        Ok(StoreSummary {
            last_sync_started,
            raw_photos: (total - compressed_photos) as u64,
            compressed_photos: compressed_photos as u64,
        })
    }
}

impl LastSyncStore for SqliteStore {
    fn get(&self, key: &str) -> Result<Option<f64>, StoreError> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT value FROM sync_values WHERE key = ?1",
            [key],
            |row| row.get(0),
        )
        .optional()
        .map_err(StoreError::query)
    }

    fn set(&self, key: &str, value: f64) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO sync_values (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            rusqlite::params![key, value],
        )
        .map_err(StoreError::query)?;
        Ok(())
    }
}

impl ContentStore for SqliteStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT data FROM photo_blobs WHERE key = ?1",
            [key],
            |row| row.get(0),
        )
        .optional()
        .map_err(StoreError::query)
    }

    fn set(&self, key: &str, data: &[u8]) -> Result<(), StoreError> {
        let updated_at = Utc::now().timestamp();
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO photo_blobs (key, data, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET data = excluded.data, updated_at = excluded.updated_at",
            rusqlite::params![key, data, updated_at],
        )
        .map_err(StoreError::query)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::compressed_key;
    use std::fs;

    fn test_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir()
            .join("photo_sync_tests")
            .join("store")
            .join(name);
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[tokio::test]
    async fn test_open_creates_db_and_parent_dirs() {
        let dir = test_dir("open_creates");
        let path = dir.join("nested").join("state.db");
        let store = SqliteStore::open(&path).await.unwrap();
        assert!(path.exists());
        assert_eq!(store.path(), path);
    }

    #[tokio::test]
    async fn test_values_survive_reopen() {
        let dir = test_dir("reopen");
        let path = dir.join("state.db");
        {
            let store = SqliteStore::open(&path).await.unwrap();
            LastSyncStore::set(&store, PREVIOUS_SYNC_TIME_KEY, 1234.5).unwrap();
            ContentStore::set(&store, "1", b"raw").unwrap();
        }
        let store = SqliteStore::open(&path).await.unwrap();
        assert_eq!(
            LastSyncStore::get(&store, PREVIOUS_SYNC_TIME_KEY).unwrap(),
            Some(1234.5)
        );
        assert_eq!(ContentStore::get(&store, "1").unwrap(), Some(b"raw".to_vec()));
    }

    #[test]
    fn test_missing_value_is_none() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert_eq!(LastSyncStore::get(&store, "nope").unwrap(), None);
        assert_eq!(ContentStore::get(&store, "nope").unwrap(), None);
    }

    #[test]
    fn test_value_overwrite() {
        let store = SqliteStore::open_in_memory().unwrap();
        LastSyncStore::set(&store, PREVIOUS_SYNC_TIME_KEY, 1.0).unwrap();
        LastSyncStore::set(&store, PREVIOUS_SYNC_TIME_KEY, 2.0).unwrap();
        assert_eq!(
            LastSyncStore::get(&store, PREVIOUS_SYNC_TIME_KEY).unwrap(),
            Some(2.0)
        );
    }

    #[test]
    fn test_blob_overwrite() {
        let store = SqliteStore::open_in_memory().unwrap();
        ContentStore::set(&store, "1", b"first").unwrap();
        ContentStore::set(&store, "1", b"second").unwrap();
        assert_eq!(
            ContentStore::get(&store, "1").unwrap(),
            Some(b"second".to_vec())
        );
    }

    #[test]
    fn test_empty_blob_round_trips() {
        let store = SqliteStore::open_in_memory().unwrap();
        ContentStore::set(&store, "empty", &[]).unwrap();
        assert_eq!(ContentStore::get(&store, "empty").unwrap(), Some(Vec::new()));
    }

    #[test]
    fn test_summary_empty() {
        let store = SqliteStore::open_in_memory().unwrap();
        let summary = store.summary().unwrap();
        assert_eq!(summary.last_sync_started, None);
        assert_eq!(summary.raw_photos, 0);
        assert_eq!(summary.compressed_photos, 0);
    }

    #[test]
    fn test_summary_counts_variants_separately() {
        let store = SqliteStore::open_in_memory().unwrap();
        LastSyncStore::set(&store, PREVIOUS_SYNC_TIME_KEY, 1_700_000_000.0).unwrap();
        ContentStore::set(&store, "1", b"a").unwrap();
        ContentStore::set(&store, "2", b"b").unwrap();
        ContentStore::set(&store, &compressed_key("1"), b"c").unwrap();

        let summary = store.summary().unwrap();
        assert_eq!(summary.raw_photos, 2);
        assert_eq!(summary.compressed_photos, 1);
        assert_eq!(
            summary.last_sync_started.map(|t| t.timestamp()),
            Some(1_700_000_000)
        );
    }

    #[test]
    fn test_summary_compressed_prefix_is_case_sensitive() {
        let store = SqliteStore::open_in_memory().unwrap();
        ContentStore::set(&store, "COMPRESSED/1", b"a").unwrap();
        ContentStore::set(&store, "compressedx", b"b").unwrap();
        ContentStore::set(&store, &compressed_key("1"), b"c").unwrap();

        let summary = store.summary().unwrap();
        assert_eq!(summary.raw_photos, 2);
        assert_eq!(summary.compressed_photos, 1);
    }

    #[test]
    fn test_summary_ignores_sentinel_timestamp() {
        let store = SqliteStore::open_in_memory().unwrap();
        LastSyncStore::set(&store, PREVIOUS_SYNC_TIME_KEY, 0.0).unwrap();
        assert_eq!(store.summary().unwrap().last_sync_started, None);
    }
}
