//! Cache storage trait and SQLite implementation.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;

use super::traits::CacheEntry;
use crate::db;
use crate::db::schema::CACHE_SCHEMA;

/// Trait for cache storage backends.
///
/// Mirrors a named-cache store: caches are created by name, hold entries
/// keyed by request identity, and are deleted as a whole.
pub trait CacheStorage: Send + Sync {
  /// Create the named cache if it does not exist.
  fn open_cache(&self, name: &str) -> Result<()>;

  /// Names of every existing cache.
  fn cache_names(&self) -> Result<Vec<String>>;

  /// Delete a cache and all of its entries. Returns whether it existed.
  fn delete_cache(&self, name: &str) -> Result<bool>;

  /// Store an entry, replacing any entry with the same key.
  fn put(&self, cache: &str, key: &str, entry: &CacheEntry) -> Result<()>;

  /// Look up an entry.
  fn get(&self, cache: &str, key: &str) -> Result<Option<CacheEntry>>;

  /// Remove a single entry. Returns whether it existed.
  fn delete_entry(&self, cache: &str, key: &str) -> Result<bool>;

  /// Number of entries in a cache (0 when it does not exist).
  fn entry_count(&self, cache: &str) -> Result<usize>;
}

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open (or create) the cache database at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    let conn = db::open(path, CACHE_SCHEMA)?;
    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  /// Private in-memory store, discarded on drop.
  pub fn open_in_memory() -> Result<Self> {
    let conn = db::open_in_memory(CACHE_SCHEMA)?;
    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
    self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

impl CacheStorage for SqliteStorage {
  fn open_cache(&self, name: &str) -> Result<()> {
    let conn = self.lock()?;
    conn
      .execute(
        "INSERT OR IGNORE INTO caches (name, created_at) VALUES (?, ?)",
        params![name, Utc::now().to_rfc3339()],
      )
      .map_err(|e| eyre!("Failed to open cache {}: {}", name, e))?;
    Ok(())
  }

  fn cache_names(&self) -> Result<Vec<String>> {
    let conn = self.lock()?;
    let mut stmt = conn
      .prepare("SELECT name FROM caches ORDER BY name")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list caches: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read cache name: {}", e))?;

    Ok(names)
  }

  fn delete_cache(&self, name: &str) -> Result<bool> {
    let mut conn = self.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(
      "DELETE FROM cache_entries WHERE cache_name = ?",
      params![name],
    )
    .map_err(|e| eyre!("Failed to delete entries of {}: {}", name, e))?;

    let deleted = tx
      .execute("DELETE FROM caches WHERE name = ?", params![name])
      .map_err(|e| eyre!("Failed to delete cache {}: {}", name, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(deleted > 0)
  }

  fn put(&self, cache: &str, key: &str, entry: &CacheEntry) -> Result<()> {
    let mut conn = self.lock()?;
    let headers = serde_json::to_string(&entry.headers)
      .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(
      "INSERT OR IGNORE INTO caches (name, created_at) VALUES (?, ?)",
      params![cache, Utc::now().to_rfc3339()],
    )
    .map_err(|e| eyre!("Failed to open cache {}: {}", cache, e))?;

    tx.execute(
      "INSERT OR REPLACE INTO cache_entries (cache_name, request_key, url, status, headers, body, cached_at)
       VALUES (?, ?, ?, ?, ?, ?, ?)",
      params![
        cache,
        key,
        entry.url,
        entry.status,
        headers,
        entry.body,
        entry.cached_at.to_rfc3339()
      ],
    )
    .map_err(|e| eyre!("Failed to store entry for {}: {}", entry.url, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  fn get(&self, cache: &str, key: &str) -> Result<Option<CacheEntry>> {
    let conn = self.lock()?;
    let row: Option<(String, u16, String, Vec<u8>, String)> = conn
      .query_row(
        "SELECT url, status, headers, body, cached_at FROM cache_entries
         WHERE cache_name = ? AND request_key = ?",
        params![cache, key],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to query cache {}: {}", cache, e))?;

    match row {
      Some((url, status, headers, body, cached_at)) => {
        let headers: BTreeMap<String, String> = serde_json::from_str(&headers)
          .map_err(|e| eyre!("Failed to deserialize headers: {}", e))?;
        Ok(Some(CacheEntry {
          url,
          status,
          headers,
          body,
          cached_at: parse_datetime(&cached_at)?,
        }))
      }
      None => Ok(None),
    }
  }

  fn delete_entry(&self, cache: &str, key: &str) -> Result<bool> {
    let conn = self.lock()?;
    let deleted = conn
      .execute(
        "DELETE FROM cache_entries WHERE cache_name = ? AND request_key = ?",
        params![cache, key],
      )
      .map_err(|e| eyre!("Failed to delete entry: {}", e))?;
    Ok(deleted > 0)
  }

  fn entry_count(&self, cache: &str) -> Result<usize> {
    let conn = self.lock()?;
    let count: i64 = conn
      .query_row(
        "SELECT COUNT(*) FROM cache_entries WHERE cache_name = ?",
        params![cache],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to count entries: {}", e))?;
    Ok(count as usize)
  }
}

/// Parse a stored RFC 3339 timestamp.
pub(crate) fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}
