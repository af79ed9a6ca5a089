use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, TransactionBehavior};
use std::path::Path;
use std::sync::Mutex;

use super::{MutationQueue, QueueName, QueuedMutation};

/// Schema version stored in `PRAGMA user_version`.
const SCHEMA_VERSION: i64 = 1;

/// One table per queue, ordered by insertion and keyed by record id.
const QUEUE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS pending_loans (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    payload TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS pending_payments (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    payload TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS pending_borrowers (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    payload TEXT NOT NULL
);
"#;

/// SQLite-backed pending mutation store.
pub struct SqliteQueue {
  conn: Mutex<Connection>,
}

impl SqliteQueue {
  /// Open or create the queue database at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create queue directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open queue database at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  #[cfg(test)]
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory queue database: {}", e))?;

    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    let queue = Self {
      conn: Mutex::new(conn),
    };
    queue.run_migrations()?;

    Ok(queue)
  }

  fn run_migrations(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let version: i64 = conn
      .query_row("PRAGMA user_version", [], |row| row.get(0))
      .map_err(|e| eyre!("Failed to read queue schema version: {}", e))?;

    if version > SCHEMA_VERSION {
      return Err(eyre!(
        "Queue database has schema version {}, expected at most {}",
        version,
        SCHEMA_VERSION
      ));
    }

    conn
      .execute_batch(QUEUE_SCHEMA)
      .map_err(|e| eyre!("Failed to run queue migrations: {}", e))?;
    conn
      .pragma_update(None, "user_version", SCHEMA_VERSION)
      .map_err(|e| eyre!("Failed to set queue schema version: {}", e))?;

    Ok(())
  }
}

impl MutationQueue for SqliteQueue {
  fn enqueue(&self, queue: QueueName, record: &QueuedMutation) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let payload = serde_json::to_string(&record.payload)
      .map_err(|e| eyre!("Failed to serialize payload: {}", e))?;

    conn
      .execute(
        &format!("INSERT INTO {} (id, payload) VALUES (?, ?)", queue.table()),
        params![record.id, payload],
      )
      .map_err(|e| eyre!("Failed to enqueue {} into {}: {}", record.id, queue, e))?;

    Ok(())
  }

  fn list_pending(&self, queue: QueueName) -> Result<Vec<QueuedMutation>> {
    let mut conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let tx = conn
      .transaction_with_behavior(TransactionBehavior::Deferred)
      .map_err(|e| eyre!("Failed to begin transaction on {}: {}", queue, e))?;

    let rows: Vec<(String, String)> = {
      let mut stmt = tx
        .prepare(&format!("SELECT id, payload FROM {} ORDER BY seq", queue.table()))
        .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

      let rows = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
        .map_err(|e| eyre!("Failed to read {}: {}", queue, e))?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(|e| eyre!("Failed to read {}: {}", queue, e))?;
      rows
    };

    tx.commit()
      .map_err(|e| eyre!("Failed to finish transaction on {}: {}", queue, e))?;

    // A corrupt row is skipped so it cannot hold back the rest of the queue
    let records = rows
      .into_iter()
      .filter_map(|(id, payload)| match serde_json::from_str(&payload) {
        Ok(payload) => Some(QueuedMutation { id, payload }),
        Err(e) => {
          tracing::warn!(%queue, id = %id, "skipping corrupt pending record: {}", e);
          None
        }
      })
      .collect();

    Ok(records)
  }

  fn remove_pending(&self, queue: QueueName, id: &str) -> Result<()> {
    let mut conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let tx = conn
      .transaction_with_behavior(TransactionBehavior::Immediate)
      .map_err(|e| eyre!("Failed to begin transaction on {}: {}", queue, e))?;

    tx.execute(
      &format!("DELETE FROM {} WHERE id = ?", queue.table()),
      params![id],
    )
    .map_err(|e| eyre!("Failed to delete {} from {}: {}", id, queue, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit delete on {}: {}", queue, e))?;

    Ok(())
  }
}
