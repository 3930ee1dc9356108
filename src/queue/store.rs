use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection};
use serde::Serialize;
use std::path::Path;
use std::sync::Mutex;

use crate::cache::parse_datetime;
use crate::db;
use crate::db::schema::PENDING_SCHEMA;

/// A write to be enqueued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPendingWrite {
  /// Backend path, e.g. `/api/watchlist`
  pub path: String,
  pub method: String,
  /// Serialized request body
  pub body: String,
}

/// A stored write awaiting replay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingWrite {
  pub id: i64,
  pub path: String,
  pub method: String,
  pub body: String,
  pub timestamp: DateTime<Utc>,
}

/// Durable storage for pending writes.
///
/// Each operation is its own transaction. Ids are strictly increasing, so
/// listing in id order is enqueue order.
pub trait PendingStore: Send + Sync {
  /// Persist a write and return its generated id.
  fn add(&self, write: &NewPendingWrite) -> Result<i64>;

  /// All pending writes in enqueue order.
  fn list(&self) -> Result<Vec<PendingWrite>>;

  /// Remove an acknowledged write. Returns whether it was still present.
  fn remove(&self, id: i64) -> Result<bool>;

  fn count(&self) -> Result<usize>;
}

/// SQLite-backed pending-write store (`pending-updates`).
pub struct SqlitePendingStore {
  conn: Mutex<Connection>,
}

impl SqlitePendingStore {
  pub fn open(path: &Path) -> Result<Self> {
    let conn = db::open(path, PENDING_SCHEMA)?;
    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  pub fn open_in_memory() -> Result<Self> {
    let conn = db::open_in_memory(PENDING_SCHEMA)?;
    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
    self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

impl PendingStore for SqlitePendingStore {
  fn add(&self, write: &NewPendingWrite) -> Result<i64> {
    let conn = self.lock()?;
    conn
      .execute(
        "INSERT INTO pending_updates (path, method, body, timestamp) VALUES (?, ?, ?, ?)",
        params![write.path, write.method, write.body, Utc::now().to_rfc3339()],
      )
      .map_err(|e| eyre!("Failed to queue write to {}: {}", write.path, e))?;
    Ok(conn.last_insert_rowid())
  }

  fn list(&self) -> Result<Vec<PendingWrite>> {
    let conn = self.lock()?;
    let mut stmt = conn
      .prepare("SELECT id, path, method, body, timestamp FROM pending_updates ORDER BY id")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let rows = stmt
      .query_map([], |row| {
        Ok((
          row.get::<_, i64>(0)?,
          row.get::<_, String>(1)?,
          row.get::<_, String>(2)?,
          row.get::<_, String>(3)?,
          row.get::<_, String>(4)?,
        ))
      })
      .map_err(|e| eyre!("Failed to list pending writes: {}", e))?
      .collect::<rusqlite::Result<Vec<_>>>()
      .map_err(|e| eyre!("Failed to read pending write: {}", e))?;

    rows
      .into_iter()
      .map(|(id, path, method, body, timestamp)| {
        Ok(PendingWrite {
          id,
          path,
          method,
          body,
          timestamp: parse_datetime(&timestamp)?,
        })
      })
      .collect()
  }

  fn remove(&self, id: i64) -> Result<bool> {
    let conn = self.lock()?;
    let deleted = conn
      .execute("DELETE FROM pending_updates WHERE id = ?", params![id])
      .map_err(|e| eyre!("Failed to remove pending write {}: {}", id, e))?;
    Ok(deleted > 0)
  }

  fn count(&self) -> Result<usize> {
    let conn = self.lock()?;
    let count: i64 = conn
      .query_row("SELECT COUNT(*) FROM pending_updates", [], |row| row.get(0))
      .map_err(|e| eyre!("Failed to count pending writes: {}", e))?;
    Ok(count as usize)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn write(ticker: &str) -> NewPendingWrite {
    NewPendingWrite {
      path: "/api/watchlist".to_string(),
      method: "POST".to_string(),
      body: format!(r#"{{"ticker":"{}","action":"add"}}"#, ticker),
    }
  }

  #[test]
  fn test_list_preserves_enqueue_order() {
    let store = SqlitePendingStore::open_in_memory().unwrap();
    let a = store.add(&write("TSLA")).unwrap();
    let b = store.add(&write("AAPL")).unwrap();
    let c = store.add(&write("NVDA")).unwrap();
    assert!(a < b && b < c);

    let ids: Vec<i64> = store.list().unwrap().iter().map(|w| w.id).collect();
    assert_eq!(ids, vec![a, b, c]);
  }

  #[test]
  fn test_ids_are_not_reused_after_removal() {
    let store = SqlitePendingStore::open_in_memory().unwrap();
    let first = store.add(&write("TSLA")).unwrap();
    assert!(store.remove(first).unwrap());
    let second = store.add(&write("AAPL")).unwrap();
    assert!(second > first);
  }

  #[test]
  fn test_remove_missing_is_false() {
    let store = SqlitePendingStore::open_in_memory().unwrap();
    assert!(!store.remove(42).unwrap());
    assert_eq!(store.count().unwrap(), 0);
  }

  #[test]
  fn test_queue_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(db::OFFLINE_DB);
    {
      let store = SqlitePendingStore::open(&path).unwrap();
      store.add(&write("TSLA")).unwrap();
    }
    let store = SqlitePendingStore::open(&path).unwrap();
    let pending = store.list().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].body, r#"{"ticker":"TSLA","action":"add"}"#);
  }
}
