//! Cache storage trait and SQLite implementation.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;

use super::traits::{CacheKey, CachedResponse};
use crate::http::Response;

/// Trait for cache storage backends.
///
/// Regions are addressed by their full (versioned) name.
pub trait CacheStorage: Send + Sync {
  /// Create the region if it does not exist yet.
  fn open_region(&self, region: &str) -> Result<()>;

  /// Look up a stored response, regardless of its age.
  fn get(&self, region: &str, key: &CacheKey) -> Result<Option<CachedResponse>>;

  /// Store a response, replacing any entry under the same key, then evict
  /// the oldest entries until at most `max_entries` remain.
  fn put(
    &self,
    region: &str,
    key: &CacheKey,
    response: &Response,
    stored_at: DateTime<Utc>,
    max_entries: Option<usize>,
  ) -> Result<()>;

  /// All region names currently present.
  fn region_names(&self) -> Result<Vec<String>>;

  /// Delete a region and all of its entries. Returns whether it existed.
  fn delete_region(&self, region: &str) -> Result<bool>;

  /// URLs stored in a region, oldest insertion first.
  fn entry_urls(&self, region: &str) -> Result<Vec<String>>;
}

/// Storage implementation that doesn't cache anything.
/// Used when caching is disabled - all operations are no-ops.
pub struct NoopStorage;

impl CacheStorage for NoopStorage {
  fn open_region(&self, _region: &str) -> Result<()> {
    Ok(())
  }

  fn get(&self, _region: &str, _key: &CacheKey) -> Result<Option<CachedResponse>> {
    Ok(None) // Always miss
  }

  fn put(
    &self,
    _region: &str,
    _key: &CacheKey,
    _response: &Response,
    _stored_at: DateTime<Utc>,
    _max_entries: Option<usize>,
  ) -> Result<()> {
    Ok(()) // Discard
  }

  fn region_names(&self) -> Result<Vec<String>> {
    Ok(Vec::new())
  }

  fn delete_region(&self, _region: &str) -> Result<bool> {
    Ok(false)
  }

  fn entry_urls(&self, _region: &str) -> Result<Vec<String>> {
    Ok(Vec::new())
  }
}

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
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

  /// Open a throwaway in-memory cache.
  #[cfg(test)]
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

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS cache_regions (
    name TEXT PRIMARY KEY
);

-- seq grows on every insert, so the smallest seq is the oldest entry
CREATE TABLE IF NOT EXISTS cache_entries (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    region TEXT NOT NULL,
    key_hash TEXT NOT NULL,
    method TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    stored_at INTEGER NOT NULL,
    UNIQUE (region, key_hash)
);

CREATE INDEX IF NOT EXISTS idx_cache_entries_region ON cache_entries(region, seq);
"#;

impl CacheStorage for SqliteStorage {
  fn open_region(&self, region: &str) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "INSERT OR IGNORE INTO cache_regions (name) VALUES (?)",
        params![region],
      )
      .map_err(|e| eyre!("Failed to open region {}: {}", region, e))?;

    Ok(())
  }

  fn get(&self, region: &str, key: &CacheKey) -> Result<Option<CachedResponse>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let row: Option<(u16, String, Vec<u8>, i64)> = conn
      .query_row(
        "SELECT status, headers, body, stored_at FROM cache_entries
         WHERE region = ? AND key_hash = ?",
        params![region, key.hash()],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read cache entry {}: {}", key.url(), e))?;

    let Some((status, headers, body, stored_at)) = row else {
      return Ok(None);
    };

    let headers: Vec<(String, String)> = serde_json::from_str(&headers)
      .map_err(|e| eyre!("Failed to deserialize cached headers: {}", e))?;
    let stored_at = DateTime::from_timestamp_millis(stored_at)
      .ok_or_else(|| eyre!("Invalid stored_at timestamp {}", stored_at))?;

    Ok(Some(CachedResponse {
      response: Response {
        status,
        headers,
        body,
      },
      stored_at,
    }))
  }

  fn put(
    &self,
    region: &str,
    key: &CacheKey,
    response: &Response,
    stored_at: DateTime<Utc>,
    max_entries: Option<usize>,
  ) -> Result<()> {
    let mut conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let headers = serde_json::to_string(&response.headers)
      .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(
      "INSERT OR IGNORE INTO cache_regions (name) VALUES (?)",
      params![region],
    )
    .map_err(|e| eyre!("Failed to open region {}: {}", region, e))?;

    // REPLACE deletes the old row, so a re-inserted key becomes the newest
    tx.execute(
      "INSERT OR REPLACE INTO cache_entries
         (region, key_hash, method, url, status, headers, body, stored_at)
       VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
      params![
        region,
        key.hash(),
        key.method(),
        key.url(),
        response.status,
        headers,
        response.body,
        stored_at.timestamp_millis()
      ],
    )
    .map_err(|e| eyre!("Failed to store cache entry {}: {}", key.url(), e))?;

    if let Some(max_entries) = max_entries {
      let evicted = tx
        .execute(
          "DELETE FROM cache_entries WHERE region = ?1 AND seq NOT IN (
             SELECT seq FROM cache_entries WHERE region = ?1 ORDER BY seq DESC LIMIT ?2
           )",
          params![region, max_entries as i64],
        )
        .map_err(|e| eyre!("Failed to evict from region {}: {}", region, e))?;

      if evicted > 0 {
        tracing::debug!(region, evicted, "evicted oldest cache entries");
      }
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  fn region_names(&self) -> Result<Vec<String>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare("SELECT name FROM cache_regions ORDER BY name")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list regions: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read region name: {}", e))?;

    Ok(names)
  }

  fn delete_region(&self, region: &str) -> Result<bool> {
    let mut conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute("DELETE FROM cache_entries WHERE region = ?", params![region])
      .map_err(|e| eyre!("Failed to delete entries of {}: {}", region, e))?;
    let removed = tx
      .execute("DELETE FROM cache_regions WHERE name = ?", params![region])
      .map_err(|e| eyre!("Failed to delete region {}: {}", region, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(removed > 0)
  }

  fn entry_urls(&self, region: &str) -> Result<Vec<String>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare("SELECT url FROM cache_entries WHERE region = ? ORDER BY seq")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let urls = stmt
      .query_map(params![region], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list entries of {}: {}", region, e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read entry url: {}", e))?;

    Ok(urls)
  }
}
