//! Background sync: replays queued offline mutations against the origin.
//!
//! Each sync tag maps to exactly one queue and one endpoint. A drain lists
//! the queue once, replays every record in order and deletes the ones the
//! origin accepted. Failed records stay queued until a later signal; there is
//! no retry scheduling or backoff here.

use color_eyre::{eyre::eyre, Result};
use futures::future::join_all;
use std::sync::Arc;
use url::Url;

use crate::http::Request;
use crate::network::Network;
use crate::queue::{MutationQueue, QueueName, QueuedMutation};

/// Known synchronization signals, one per entity type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncTag {
  Loans,
  Payments,
  Borrowers,
}

impl SyncTag {
  pub const ALL: [SyncTag; 3] = [SyncTag::Loans, SyncTag::Payments, SyncTag::Borrowers];

  pub fn as_str(&self) -> &'static str {
    match self {
      SyncTag::Loans => "sync-loans",
      SyncTag::Payments => "sync-payments",
      SyncTag::Borrowers => "sync-borrowers",
    }
  }

  pub fn queue(&self) -> QueueName {
    match self {
      SyncTag::Loans => QueueName::PendingLoans,
      SyncTag::Payments => QueueName::PendingPayments,
      SyncTag::Borrowers => QueueName::PendingBorrowers,
    }
  }

  pub fn endpoint(&self) -> &'static str {
    match self {
      SyncTag::Loans => "/api/loans",
      SyncTag::Payments => "/api/payments",
      SyncTag::Borrowers => "/api/borrowers",
    }
  }
}

impl std::str::FromStr for SyncTag {
  type Err = color_eyre::Report;

  fn from_str(s: &str) -> Result<Self> {
    SyncTag::ALL
      .into_iter()
      .find(|t| t.as_str() == s)
      .ok_or_else(|| eyre!("Unknown sync tag: {}", s))
  }
}

impl std::fmt::Display for SyncTag {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Outcome of one drain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrainReport {
  pub tag: SyncTag,
  pub attempted: usize,
  pub replayed: usize,
  pub failed: usize,
}

#[derive(Clone)]
pub struct SyncOrchestrator {
  network: Arc<dyn Network>,
  queue: Arc<dyn MutationQueue>,
  origin: Url,
}

impl SyncOrchestrator {
  pub fn new(network: Arc<dyn Network>, queue: Arc<dyn MutationQueue>, origin: Url) -> Self {
    Self {
      network,
      queue,
      origin,
    }
  }

  /// Drain the queue bound to `tag`.
  ///
  /// Fails only when the queue cannot be listed. Replay failures are
  /// isolated per record and reported in the counts.
  pub async fn drain(&self, tag: SyncTag) -> Result<DrainReport> {
    let queue = tag.queue();
    let records = self
      .queue
      .list_pending(queue)
      .map_err(|e| eyre!("Failed to list {} for {}: {}", queue, tag, e))?;

    let mut report = DrainReport {
      tag,
      attempted: records.len(),
      replayed: 0,
      failed: 0,
    };

    if records.is_empty() {
      tracing::debug!(%tag, "nothing to sync");
      return Ok(report);
    }

    let endpoint = self
      .origin
      .join(tag.endpoint())
      .map_err(|e| eyre!("Invalid endpoint for {}: {}", tag, e))?;

    // Sequential: records are replayed in the order the queue returned them
    for record in records {
      match self.replay(&endpoint, &record).await {
        Ok(()) => match self.queue.remove_pending(queue, &record.id) {
          Ok(()) => {
            tracing::info!(%tag, id = %record.id, "synced queued mutation");
            report.replayed += 1;
          }
          Err(e) => {
            tracing::error!(%tag, id = %record.id, "replayed but failed to dequeue: {:#}", e);
            report.failed += 1;
          }
        },
        Err(e) => {
          tracing::warn!(%tag, id = %record.id, "replay failed, keeping record: {:#}", e);
          report.failed += 1;
        }
      }
    }

    Ok(report)
  }

  async fn replay(&self, endpoint: &Url, record: &QueuedMutation) -> Result<()> {
    let request = Request::post_json(endpoint.clone(), &record.payload)?;
    let response = self.network.fetch(&request).await?;

    if response.is_ok() {
      Ok(())
    } else {
      Err(eyre!("{} responded with status {}", endpoint, response.status))
    }
  }

  /// Drain every queue. Queues are independent units of work, so they run
  /// concurrently and one failing does not affect the others.
  pub async fn drain_all(&self) -> Vec<(SyncTag, Result<DrainReport>)> {
    let drains = SyncTag::ALL
      .into_iter()
      .map(|tag| async move { (tag, self.drain(tag).await) });

    join_all(drains).await
  }
}
