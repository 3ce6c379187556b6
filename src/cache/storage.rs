//! Cache persistence trait and SQLite implementation.
//!
//! Persistence is optional: with `NoopStorage` the cache is memory-only and
//! a restart simply fetches fresh. With `SqliteStorage` entries survive
//! restarts so the display can show last-known-good content immediately.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection};
use serde_json::Value;
use std::path::Path;
use std::sync::Mutex;

use super::strategy::TtlStrategy;

/// A cache entry in its persistable form.
#[derive(Debug, Clone)]
pub struct PersistedEntry {
  pub value: Value,
  pub stored_at: DateTime<Utc>,
  pub ttl_seconds: i64,
  pub fingerprint: String,
  pub strategy: TtlStrategy,
}

/// Trait for cache persistence backends.
pub trait CacheStorage: Send + Sync {
  /// Store or replace one entry.
  fn persist(&self, key: &str, entry: &PersistedEntry) -> Result<()>;

  /// Load every persisted entry (startup warm start).
  fn load_all(&self) -> Result<Vec<(String, PersistedEntry)>>;

  /// Remove one entry.
  fn remove(&self, key: &str) -> Result<()>;

  /// Remove all entries.
  fn clear(&self) -> Result<()>;
}

/// Storage implementation that doesn't persist anything.
/// Used when persistence is disabled - all operations are no-ops.
pub struct NoopStorage;

impl CacheStorage for NoopStorage {
  fn persist(&self, _key: &str, _entry: &PersistedEntry) -> Result<()> {
    Ok(()) // Discard
  }

  fn load_all(&self) -> Result<Vec<(String, PersistedEntry)>> {
    Ok(Vec::new()) // Nothing persisted
  }

  fn remove(&self, _key: &str) -> Result<()> {
    Ok(())
  }

  fn clear(&self) -> Result<()> {
    Ok(())
  }
}

/// SQLite-based cache persistence.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Create storage at the default location.
  pub fn open() -> Result<Self> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Self::open_at(&data_dir.join("marquee").join("cache.db"))
  }

  /// Create storage at an explicit path.
  pub fn open_at(path: &Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;

    Ok(storage)
  }

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

/// Schema for the persisted cache.
const CACHE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS display_cache (
    key TEXT PRIMARY KEY,
    value BLOB NOT NULL,
    stored_at TEXT NOT NULL,
    ttl_seconds INTEGER NOT NULL,
    fingerprint TEXT NOT NULL,
    strategy TEXT NOT NULL
);
"#;

impl CacheStorage for SqliteStorage {
  fn persist(&self, key: &str, entry: &PersistedEntry) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let data =
      serde_json::to_vec(&entry.value).map_err(|e| eyre!("Failed to serialize value: {}", e))?;

    conn
      .execute(
        "INSERT OR REPLACE INTO display_cache (key, value, stored_at, ttl_seconds, fingerprint, strategy)
         VALUES (?, ?, ?, ?, ?, ?)",
        params![
          key,
          data,
          entry.stored_at.to_rfc3339(),
          entry.ttl_seconds,
          entry.fingerprint,
          entry.strategy.as_str()
        ],
      )
      .map_err(|e| eyre!("Failed to persist cache entry: {}", e))?;

    Ok(())
  }

  fn load_all(&self) -> Result<Vec<(String, PersistedEntry)>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare("SELECT key, value, stored_at, ttl_seconds, fingerprint, strategy FROM display_cache")
      .map_err(|e| eyre!("Failed to prepare load query: {}", e))?;

    let rows: Vec<(String, Vec<u8>, String, i64, String, String)> = stmt
      .query_map([], |row| {
        Ok((
          row.get(0)?,
          row.get(1)?,
          row.get(2)?,
          row.get(3)?,
          row.get(4)?,
          row.get(5)?,
        ))
      })
      .map_err(|e| eyre!("Failed to query cache entries: {}", e))?
      .filter_map(|r| r.ok())
      .collect();

    // Unparseable rows are skipped, not fatal: a corrupt entry should never
    // prevent startup.
    let mut entries = Vec::with_capacity(rows.len());
    for (key, data, stored_at_str, ttl_seconds, fingerprint, strategy) in rows {
      let value: Value = match serde_json::from_slice(&data) {
        Ok(v) => v,
        Err(_) => continue,
      };
      let stored_at = match parse_datetime(&stored_at_str) {
        Ok(dt) => dt,
        Err(_) => continue,
      };

      entries.push((
        key,
        PersistedEntry {
          value,
          stored_at,
          ttl_seconds,
          fingerprint,
          strategy: TtlStrategy::parse(&strategy),
        },
      ));
    }

    Ok(entries)
  }

  fn remove(&self, key: &str) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute("DELETE FROM display_cache WHERE key = ?", params![key])
      .map_err(|e| eyre!("Failed to remove cache entry: {}", e))?;

    Ok(())
  }

  fn clear(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute("DELETE FROM display_cache", [])
      .map_err(|e| eyre!("Failed to clear cache: {}", e))?;

    Ok(())
  }
}

/// Parse a persisted RFC 3339 timestamp.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;
  use tempfile::TempDir;

  fn open_temp() -> (TempDir, SqliteStorage) {
    let dir = TempDir::new().unwrap();
    let storage = SqliteStorage::open_at(&dir.path().join("cache.db")).unwrap();
    (dir, storage)
  }

  fn sample_entry() -> PersistedEntry {
    PersistedEntry {
      value: json!({"temp": 68, "conditions": "cloudy"}),
      stored_at: Utc::now(),
      ttl_seconds: 300,
      fingerprint: "abc123".to_string(),
      strategy: TtlStrategy::FixedTtl,
    }
  }

  #[test]
  fn test_persist_and_load_roundtrip() {
    let (_dir, storage) = open_temp();
    storage.persist("weather:current", &sample_entry()).unwrap();

    let loaded = storage.load_all().unwrap();
    assert_eq!(loaded.len(), 1);

    let (key, entry) = &loaded[0];
    assert_eq!(key, "weather:current");
    assert_eq!(entry.value, json!({"temp": 68, "conditions": "cloudy"}));
    assert_eq!(entry.ttl_seconds, 300);
    assert_eq!(entry.fingerprint, "abc123");
    assert_eq!(entry.strategy, TtlStrategy::FixedTtl);
  }

  #[test]
  fn test_persist_replaces_existing() {
    let (_dir, storage) = open_temp();
    storage.persist("k", &sample_entry()).unwrap();

    let mut updated = sample_entry();
    updated.value = json!({"temp": 72});
    storage.persist("k", &updated).unwrap();

    let loaded = storage.load_all().unwrap();
    assert_eq!(loaded.len(), 1);
    assert_eq!(loaded[0].1.value, json!({"temp": 72}));
  }

  #[test]
  fn test_remove() {
    let (_dir, storage) = open_temp();
    storage.persist("a", &sample_entry()).unwrap();
    storage.persist("b", &sample_entry()).unwrap();

    storage.remove("a").unwrap();

    let loaded = storage.load_all().unwrap();
    assert_eq!(loaded.len(), 1);
    assert_eq!(loaded[0].0, "b");
  }

  #[test]
  fn test_clear() {
    let (_dir, storage) = open_temp();
    storage.persist("a", &sample_entry()).unwrap();
    storage.clear().unwrap();

    assert!(storage.load_all().unwrap().is_empty());
  }

  #[test]
  fn test_reopen_preserves_entries() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("cache.db");

    {
      let storage = SqliteStorage::open_at(&path).unwrap();
      storage.persist("k", &sample_entry()).unwrap();
    }

    let storage = SqliteStorage::open_at(&path).unwrap();
    assert_eq!(storage.load_all().unwrap().len(), 1);
  }

  #[test]
  fn test_noop_storage_discards() {
    let storage = NoopStorage;
    storage.persist("k", &sample_entry()).unwrap();
    assert!(storage.load_all().unwrap().is_empty());
    storage.remove("k").unwrap();
    storage.clear().unwrap();
  }

  #[test]
  fn test_strategy_tags_survive_roundtrip() {
    let (_dir, storage) = open_temp();

    let mut entry = sample_entry();
    entry.strategy = TtlStrategy::SportLiveInterval;
    storage.persist("nfl:scoreboard", &entry).unwrap();

    let loaded = storage.load_all().unwrap();
    assert_eq!(loaded[0].1.strategy, TtlStrategy::SportLiveInterval);
  }
}
