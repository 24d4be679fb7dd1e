//! Persistent tier implementations.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::traits::{CacheEntry, EntrySummary, PersistentTier};

/// Storage implementation that doesn't persist anything.
/// Used for memory-only caches - every read misses and writes are discarded.
pub struct NoopStorage;

impl PersistentTier for NoopStorage {
  fn load(&self, _key: &str) -> Result<Option<CacheEntry>> {
    Ok(None) // Always miss
  }

  fn store(&self, _entry: &CacheEntry) -> Result<()> {
    Ok(()) // Discard
  }

  fn remove(&self, _key: &str) -> Result<()> {
    Ok(())
  }

  fn clear(&self) -> Result<Vec<String>> {
    Ok(Vec::new())
  }

  fn scan(&self) -> Result<Vec<EntrySummary>> {
    Ok(Vec::new())
  }
}

/// SQLite-based persistent tier.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open the cache database at the default location.
  pub fn open_default() -> Result<Self> {
    Self::open(&Self::default_path()?)
  }

  /// Open (or create) the cache database at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  /// Open a database that lives only as long as this value.
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;

    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;

    Ok(storage)
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("resfetch").join("cache.db"))
  }

  #[cfg(test)]
  pub(crate) fn conn_for_tests(&self) -> std::sync::MutexGuard<'_, Connection> {
    self.conn.lock().unwrap()
  }

  /// Run database migrations for cache tables.
  fn run_migrations(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }
}

/// Schema for the cache table. Timestamps are epoch milliseconds.
const CACHE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS cache_entries (
    key TEXT PRIMARY KEY,
    value BLOB NOT NULL,
    validator TEXT,
    stored_at INTEGER NOT NULL,
    expires_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_cache_entries_expires
    ON cache_entries(expires_at);
"#;

impl PersistentTier for SqliteStorage {
  fn load(&self, key: &str) -> Result<Option<CacheEntry>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let row: Option<(Vec<u8>, Option<String>, i64, i64)> = conn
      .query_row(
        "SELECT value, validator, stored_at, expires_at FROM cache_entries WHERE key = ?",
        params![key],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read cache entry {}: {}", key, e))?;

    let Some((data, validator, stored_at, expires_at)) = row else {
      return Ok(None);
    };

    let value = serde_json::from_slice(&data)
      .map_err(|e| eyre!("Failed to deserialize cache entry {}: {}", key, e))?;

    Ok(Some(CacheEntry {
      key: key.to_string(),
      value,
      stored_at: parse_millis(stored_at)?,
      expires_at: parse_millis(expires_at)?,
      validator,
    }))
  }

  fn store(&self, entry: &CacheEntry) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let data =
      serde_json::to_vec(&entry.value).map_err(|e| eyre!("Failed to serialize entry: {}", e))?;

    conn
      .execute(
        "INSERT OR REPLACE INTO cache_entries (key, value, validator, stored_at, expires_at)
         VALUES (?, ?, ?, ?, ?)",
        params![
          entry.key,
          data,
          entry.validator,
          entry.stored_at.timestamp_millis(),
          entry.expires_at.timestamp_millis()
        ],
      )
      .map_err(|e| eyre!("Failed to store cache entry {}: {}", entry.key, e))?;

    Ok(())
  }

  fn remove(&self, key: &str) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute("DELETE FROM cache_entries WHERE key = ?", params![key])
      .map_err(|e| eyre!("Failed to delete cache entry {}: {}", key, e))?;

    Ok(())
  }

  fn clear(&self) -> Result<Vec<String>> {
    let mut conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    let keys: Vec<String> = {
      let mut stmt = tx
        .prepare("SELECT key FROM cache_entries")
        .map_err(|e| eyre!("Failed to prepare query: {}", e))?;
      let keys = stmt
        .query_map([], |row| row.get(0))
        .map_err(|e| eyre!("Failed to list cache entries: {}", e))?
        .collect::<rusqlite::Result<Vec<String>>>()
        .map_err(|e| eyre!("Failed to read cache key: {}", e))?;
      keys
    };

    tx.execute("DELETE FROM cache_entries", [])
      .map_err(|e| eyre!("Failed to clear cache entries: {}", e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(keys)
  }

  fn scan(&self) -> Result<Vec<EntrySummary>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare("SELECT key, expires_at, length(key) + length(value) FROM cache_entries")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let rows = stmt
      .query_map([], |row| {
        Ok((
          row.get::<_, String>(0)?,
          row.get::<_, i64>(1)?,
          row.get::<_, i64>(2)?,
        ))
      })
      .map_err(|e| eyre!("Failed to scan cache entries: {}", e))?;

    let mut summaries = Vec::new();
    for row in rows {
      let (key, expires_at, size) = row.map_err(|e| eyre!("Failed to read cache row: {}", e))?;
      summaries.push(EntrySummary {
        key,
        expires_at: parse_millis(expires_at)?,
        size: usize::try_from(size).unwrap_or(0),
      });
    }

    Ok(summaries)
  }
}

/// Parse an epoch-millisecond column.
fn parse_millis(millis: i64) -> Result<DateTime<Utc>> {
  DateTime::from_timestamp_millis(millis).ok_or_else(|| eyre!("Invalid timestamp '{}'", millis))
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;
  use std::time::Duration;

  #[test]
  fn test_store_and_load_roundtrip() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    let entry = CacheEntry::new(
      "items:a",
      json!({"items": [1, 2, 3]}),
      Duration::from_secs(60),
      Some("\"abc\"".into()),
    );

    storage.store(&entry).unwrap();

    assert_eq!(storage.load("items:a").unwrap(), Some(entry));
    assert_eq!(storage.load("items:b").unwrap(), None);
  }

  #[test]
  fn test_store_replaces_existing_row() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage
      .store(&CacheEntry::new("k", json!(1), Duration::from_secs(60), Some("v1".into())))
      .unwrap();
    storage
      .store(&CacheEntry::new("k", json!(2), Duration::from_secs(60), None))
      .unwrap();

    let entry = storage.load("k").unwrap().unwrap();
    assert_eq!(entry.value, json!(2));
    assert_eq!(entry.validator, None);
    assert_eq!(storage.scan().unwrap().len(), 1);
  }

  #[test]
  fn test_corrupt_payload_is_an_error() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    {
      let conn = storage.conn.lock().unwrap();
      conn
        .execute(
          "INSERT INTO cache_entries (key, value, validator, stored_at, expires_at)
           VALUES ('k', X'7B6E6F74', NULL, 0, 0)",
          [],
        )
        .unwrap();
    }

    assert!(storage.load("k").is_err());
  }

  #[test]
  fn test_clear_returns_removed_keys() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    for key in ["a", "b", "c"] {
      storage
        .store(&CacheEntry::new(key, json!(key), Duration::from_secs(60), None))
        .unwrap();
    }

    let mut removed = storage.clear().unwrap();
    removed.sort();
    assert_eq!(removed, vec!["a", "b", "c"]);
    assert!(storage.scan().unwrap().is_empty());
  }

  #[test]
  fn test_open_creates_parent_directory() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("cache.db");

    let storage = SqliteStorage::open(&path).unwrap();
    storage
      .store(&CacheEntry::new("k", json!(true), Duration::from_secs(60), None))
      .unwrap();
    drop(storage);

    let reopened = SqliteStorage::open(&path).unwrap();
    assert_eq!(reopened.load("k").unwrap().map(|e| e.value), Some(json!(true)));
  }
}
