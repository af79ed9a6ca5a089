use color_eyre::Result;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::{dispatch, Worker, WorkerState};
use crate::http::{Request, Response};
use crate::sync::{DrainReport, SyncTag};

/// Control messages sent by application instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMessage {
  /// Take over immediately instead of waiting for old instances to close
  SkipWaiting,
  GetVersion,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageReply {
  Version { version: String },
}

/// Worker events
#[derive(Debug)]
pub enum WorkerEvent {
  /// Install (and activate right away when skip-waiting is set)
  Install {
    reply: oneshot::Sender<WorkerState>,
  },
  /// Intercepted request; the reply always receives a response
  Fetch {
    request: Request,
    reply: oneshot::Sender<Response>,
  },
  /// Synchronization signal for one queue
  Sync {
    tag: SyncTag,
    reply: oneshot::Sender<Result<DrainReport>>,
  },
  /// Synchronization signal for every queue at once
  SyncAll {
    reply: oneshot::Sender<Vec<(SyncTag, Result<DrainReport>)>>,
  },
  Message {
    message: ClientMessage,
    reply: oneshot::Sender<Option<MessageReply>>,
  },
}

/// Single event loop owning the worker. Lifecycle events and messages are
/// handled in order; fetches and drains run as independent tasks.
pub struct EventLoop {
  tx: mpsc::UnboundedSender<WorkerEvent>,
  task: JoinHandle<()>,
}

impl EventLoop {
  pub fn spawn(worker: Worker) -> Self {
    let (tx, rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(run(worker, rx));
    Self { tx, task }
  }

  pub fn handle(&self) -> WorkerHandle {
    WorkerHandle {
      tx: self.tx.clone(),
    }
  }

  /// Stop the loop. Fetches and drains that were already spawned run to
  /// completion on their own.
  pub async fn shutdown(self) {
    self.task.abort();
    match self.task.await {
      Err(e) if e.is_panic() => tracing::error!("worker event loop panicked: {}", e),
      _ => tracing::debug!("worker event loop stopped"),
    }
  }
}

async fn run(mut worker: Worker, mut rx: mpsc::UnboundedReceiver<WorkerEvent>) {
  while let Some(event) = rx.recv().await {
    match event {
      WorkerEvent::Install { reply } => {
        match worker.install().await {
          Ok(()) if worker.skip_waiting() => {
            if let Err(e) = worker.activate() {
              tracing::error!("activation failed: {:#}", e);
            }
          }
          Ok(()) => {}
          Err(e) => tracing::error!("install failed: {:#}", e),
        }
        let _ = reply.send(worker.state());
      }
      WorkerEvent::Fetch { request, reply } => {
        let ctx = worker.context().clone();
        let active = worker.state() == WorkerState::Active;
        tokio::spawn(async move {
          let response = dispatch(&ctx, active, request).await;
          let _ = reply.send(response);
        });
      }
      WorkerEvent::Sync { tag, reply } => {
        let orchestrator = worker.orchestrator().clone();
        tokio::spawn(async move {
          let result = orchestrator.drain(tag).await;
          match &result {
            Ok(report) => tracing::info!(
              %tag,
              replayed = report.replayed,
              failed = report.failed,
              "sync pass finished"
            ),
            Err(e) => tracing::error!(%tag, "sync pass failed: {:#}", e),
          }
          let _ = reply.send(result);
        });
      }
      WorkerEvent::SyncAll { reply } => {
        let orchestrator = worker.orchestrator().clone();
        tokio::spawn(async move {
          let _ = reply.send(orchestrator.drain_all().await);
        });
      }
      WorkerEvent::Message { message, reply } => {
        let _ = reply.send(worker.handle_message(message));
      }
    }
  }
}

/// Cloneable sender side of the event loop.
#[derive(Clone)]
pub struct WorkerHandle {
  tx: mpsc::UnboundedSender<WorkerEvent>,
}

impl WorkerHandle {
  fn send(&self, event: WorkerEvent) -> Result<()> {
    self
      .tx
      .send(event)
      .map_err(|_| color_eyre::eyre::eyre!("Worker event loop is not running"))
  }

  pub async fn install(&self) -> Result<WorkerState> {
    let (reply, rx) = oneshot::channel();
    self.send(WorkerEvent::Install { reply })?;
    Ok(rx.await?)
  }

  pub async fn fetch(&self, request: Request) -> Result<Response> {
    let (reply, rx) = oneshot::channel();
    self.send(WorkerEvent::Fetch { request, reply })?;
    Ok(rx.await?)
  }

  pub async fn sync(&self, tag: SyncTag) -> Result<DrainReport> {
    let (reply, rx) = oneshot::channel();
    self.send(WorkerEvent::Sync { tag, reply })?;
    rx.await?
  }

  pub async fn sync_all(&self) -> Result<Vec<(SyncTag, Result<DrainReport>)>> {
    let (reply, rx) = oneshot::channel();
    self.send(WorkerEvent::SyncAll { reply })?;
    Ok(rx.await?)
  }

  pub async fn message(&self, message: ClientMessage) -> Result<Option<MessageReply>> {
    let (reply, rx) = oneshot::channel();
    self.send(WorkerEvent::Message { message, reply })?;
    Ok(rx.await?)
  }
}
