//! Persisted queues of mutations that were attempted while offline.
//!
//! The application layer writes records; the sync orchestrator only lists
//! and deletes them. Records are never edited in place.

mod store;

use color_eyre::Result;
use serde::{Deserialize, Serialize};

pub use store::SqliteQueue;

/// One queue per entity type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueName {
  PendingLoans,
  PendingPayments,
  PendingBorrowers,
}

impl QueueName {
  pub const ALL: [QueueName; 3] = [
    QueueName::PendingLoans,
    QueueName::PendingPayments,
    QueueName::PendingBorrowers,
  ];

  pub fn as_str(&self) -> &'static str {
    match self {
      QueueName::PendingLoans => "pendingLoans",
      QueueName::PendingPayments => "pendingPayments",
      QueueName::PendingBorrowers => "pendingBorrowers",
    }
  }

  /// Backing table in the queue database.
  fn table(&self) -> &'static str {
    match self {
      QueueName::PendingLoans => "pending_loans",
      QueueName::PendingPayments => "pending_payments",
      QueueName::PendingBorrowers => "pending_borrowers",
    }
  }
}

impl std::str::FromStr for QueueName {
  type Err = color_eyre::Report;

  fn from_str(s: &str) -> Result<Self> {
    QueueName::ALL
      .into_iter()
      .find(|q| q.as_str() == s)
      .ok_or_else(|| color_eyre::eyre::eyre!("Unknown queue: {}", s))
  }
}

impl std::fmt::Display for QueueName {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

/// A mutation performed while offline. `payload` is the full object for the
/// create/update call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedMutation {
  pub id: String,
  pub payload: serde_json::Value,
}

/// Pending mutation store, one queue per entity type.
pub trait MutationQueue: Send + Sync {
  /// Append a record. Producer side, used by the application when a
  /// mutation fails offline. Re-enqueueing an existing id is an error.
  fn enqueue(&self, queue: QueueName, record: &QueuedMutation) -> Result<()>;

  /// Every record of a queue, in insertion order.
  fn list_pending(&self, queue: QueueName) -> Result<Vec<QueuedMutation>>;

  /// Delete one record. Deleting an id that is already gone succeeds.
  fn remove_pending(&self, queue: QueueName, id: &str) -> Result<()>;
}
