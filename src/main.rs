mod cache;
mod commands;
mod config;
mod fallback;
mod http;
mod logging;
mod network;
mod queue;
mod strategy;
mod sync;
#[cfg(test)]
mod testing;
mod worker;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use crate::commands::{Command, FetchSpec, ResponseLine, SyncLine};
use crate::http::Destination;
use crate::queue::{MutationQueue, QueueName, QueuedMutation};
use crate::sync::SyncTag;
use crate::worker::{EventLoop, Worker, WorkerContext, WorkerHandle};

#[derive(Parser, Debug)]
#[command(name = "offline-worker")]
#[command(about = "Offline-first request cache and background mutation replay")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/offline-worker/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
  /// Intercept a single request and print the response
  Fetch {
    /// Path or absolute URL
    url: String,
    #[arg(short, long, default_value = "GET")]
    method: String,
    /// Destination hint: document, style, script, font, image
    #[arg(short, long, value_parser = parse_destination, default_value = "empty")]
    dest: Destination,
    /// Treat as a page navigation
    #[arg(long)]
    navigate: bool,
  },
  /// Drain one queue (sync-loans, sync-payments, sync-borrowers) or "all"
  Sync { tag: String },
  /// List cache regions and their entries
  Regions,
  /// Queue a mutation that failed offline, for replay on the next sync
  Enqueue {
    /// pendingLoans, pendingPayments or pendingBorrowers
    queue: String,
    id: String,
    /// Full JSON object for the create/update call
    payload: String,
  },
  /// List pending records of a queue (pendingLoans, pendingPayments, pendingBorrowers)
  Pending { queue: String },
  /// Run the event loop over JSON lines on stdin
  Run,
}

fn parse_destination(s: &str) -> Result<Destination, String> {
  serde_json::from_value(serde_json::Value::String(s.to_lowercase()))
    .map_err(|_| format!("unknown destination '{}'", s))
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = config::Config::load(args.config.as_deref())?;
  let _log_guard = logging::init(config.log_dir.as_deref())?;

  let ctx = WorkerContext::open(config)?;

  match args.command {
    Cmd::Fetch {
      url,
      method,
      dest,
      navigate,
    } => {
      let spec = FetchSpec {
        url,
        method: Some(method),
        destination: dest,
        navigate,
      };
      let request = spec.into_request(&ctx.config)?;
      let (events, handle) = start(ctx).await?;
      let response = handle.fetch(request).await?;
      print_json(&ResponseLine::from(response))?;
      events.shutdown().await;
    }
    Cmd::Sync { tag } => {
      let (events, handle) = start(ctx).await?;
      let results = if tag == "all" {
        handle.sync_all().await?
      } else {
        let tag: SyncTag = tag.parse()?;
        vec![(tag, handle.sync(tag).await)]
      };
      events.shutdown().await;

      let mut failed = false;
      for (tag, result) in results {
        match result {
          Ok(report) => print_json(&SyncLine::from(report))?,
          Err(e) => {
            tracing::error!(%tag, "sync pass failed: {:#}", e);
            failed = true;
          }
        }
      }
      if failed {
        return Err(eyre!("One or more sync passes failed"));
      }
    }
    Cmd::Regions => {
      for (name, urls) in ctx.cache.inventory()? {
        println!("{} ({} entries)", name, urls.len());
        for url in urls {
          println!("  {}", url);
        }
      }
    }
    Cmd::Enqueue { queue, id, payload } => {
      let queue: QueueName = queue.parse()?;
      let payload: serde_json::Value =
        serde_json::from_str(&payload).map_err(|e| eyre!("Invalid JSON payload: {}", e))?;
      ctx.queue.enqueue(queue, &QueuedMutation { id, payload })?;
    }
    Cmd::Pending { queue } => {
      let queue: QueueName = queue.parse()?;
      for record in ctx.queue.list_pending(queue)? {
        print_json(&record)?;
      }
    }
    Cmd::Run => {
      let (events, handle) = start(ctx.clone()).await?;
      run_lines(&ctx, &handle).await?;
      events.shutdown().await;
    }
  }

  Ok(())
}

/// Spawn the event loop and bring the worker to its active state.
async fn start(ctx: WorkerContext) -> Result<(EventLoop, WorkerHandle)> {
  let events = EventLoop::spawn(Worker::new(ctx)?);
  let handle = events.handle();
  let state = handle.install().await?;
  tracing::debug!(?state, "worker started");
  Ok((events, handle))
}

async fn run_lines(ctx: &WorkerContext, handle: &WorkerHandle) -> Result<()> {
  let mut lines = BufReader::new(tokio::io::stdin()).lines();
  let mut stdout = tokio::io::stdout();

  while let Some(line) = lines.next_line().await? {
    if line.trim().is_empty() {
      continue;
    }

    let command = match commands::parse(&line) {
      Ok(command) => command,
      Err(e) => {
        tracing::warn!("ignoring input: {:#}", e);
        continue;
      }
    };

    let output = match command {
      Command::Fetch(spec) => {
        let request = match spec.into_request(&ctx.config) {
          Ok(request) => request,
          Err(e) => {
            tracing::warn!("ignoring fetch: {:#}", e);
            continue;
          }
        };
        let response = handle.fetch(request).await?;
        serde_json::to_string(&ResponseLine::from(response))?
      }
      Command::Sync(tag) => match handle.sync(tag).await {
        Ok(report) => serde_json::to_string(&SyncLine::from(report))?,
        Err(e) => {
          tracing::error!(%tag, "sync pass failed: {:#}", e);
          continue;
        }
      },
      Command::Message(message) => match handle.message(message).await? {
        Some(reply) => serde_json::to_string(&reply)?,
        None => continue,
      },
    };

    stdout.write_all(output.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await?;
  }

  Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
  let line = serde_json::to_string(value).map_err(|e| eyre!("Failed to encode output: {}", e))?;
  println!("{}", line);
  Ok(())
}
