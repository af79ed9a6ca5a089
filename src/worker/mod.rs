//! The worker: lifecycle, request interception and sync signals over one
//! explicitly constructed context.

mod event;

use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;

use crate::cache::{CacheKey, CacheLayer, CacheStorage, NoopStorage, Region, SqliteStorage};
use crate::config::Config;
use crate::fallback::{self, RequestClass};
use crate::http::{Request, Response};
use crate::network::{HttpNetwork, Network};
use crate::queue::{MutationQueue, SqliteQueue};
use crate::strategy;
use crate::sync::SyncOrchestrator;

pub use event::{ClientMessage, EventLoop, MessageReply, WorkerHandle};

/// Worker-scoped state shared by every event handler.
#[derive(Clone)]
pub struct WorkerContext {
  pub config: Arc<Config>,
  pub network: Arc<dyn Network>,
  pub cache: CacheLayer,
  pub queue: Arc<dyn MutationQueue>,
}

impl WorkerContext {
  /// Open the on-disk stores and the HTTP network for `config`.
  ///
  /// An unusable cache database degrades to a cache that always misses; an
  /// unusable queue database is an error.
  pub fn open(config: Config) -> Result<Self> {
    let data_dir = config.data_dir()?;

    let storage: Arc<dyn CacheStorage> = if config.cache.enabled {
      match SqliteStorage::open(&data_dir.join("cache.db")) {
        Ok(storage) => Arc::new(storage),
        Err(e) => {
          tracing::warn!("cache unavailable, continuing network-only: {:#}", e);
          Arc::new(NoopStorage)
        }
      }
    } else {
      Arc::new(NoopStorage)
    };

    let queue = SqliteQueue::open(&data_dir.join("queue.db"))?;

    Ok(Self {
      cache: CacheLayer::new(storage, config.cache.clone()),
      config: Arc::new(config),
      network: Arc::new(HttpNetwork::new()?),
      queue: Arc::new(queue),
    })
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
  Installing,
  Installed,
  Activating,
  Active,
  /// Install failed; the worker never controls requests
  Redundant,
}

pub struct Worker {
  ctx: WorkerContext,
  sync: SyncOrchestrator,
  state: WorkerState,
  skip_waiting: bool,
  clients_claimed: bool,
}

impl Worker {
  pub fn new(ctx: WorkerContext) -> Result<Self> {
    let sync = SyncOrchestrator::new(
      Arc::clone(&ctx.network),
      Arc::clone(&ctx.queue),
      ctx.config.origin_url()?,
    );

    Ok(Self {
      ctx,
      sync,
      state: WorkerState::Installing,
      skip_waiting: false,
      clients_claimed: false,
    })
  }

  pub fn state(&self) -> WorkerState {
    self.state
  }

  pub fn context(&self) -> &WorkerContext {
    &self.ctx
  }

  pub fn orchestrator(&self) -> &SyncOrchestrator {
    &self.sync
  }

  pub fn skip_waiting(&self) -> bool {
    self.skip_waiting
  }

  #[cfg(test)]
  pub fn clients_claimed(&self) -> bool {
    self.clients_claimed
  }

  /// Seed the offline region and request to skip waiting.
  pub async fn install(&mut self) -> Result<()> {
    self.state = WorkerState::Installing;

    if let Err(e) = self.precache().await {
      self.state = WorkerState::Redundant;
      return Err(e);
    }

    self.skip_waiting = true;
    self.state = WorkerState::Installed;
    tracing::info!(version = self.ctx.cache.version(), "worker installed");
    Ok(())
  }

  async fn precache(&self) -> Result<()> {
    let cache = &self.ctx.cache;
    cache
      .open(Region::OfflineCache)
      .map_err(|e| eyre!("Failed to open offline cache: {}", e))?;

    let offline_url = self.ctx.config.resolve(&self.ctx.config.offline_page)?;
    let offline_page = match self.ctx.network.fetch(&Request::get(offline_url.clone())).await {
      Ok(response) if response.is_cacheable() => response,
      Ok(response) => {
        tracing::warn!(status = response.status, "offline page unavailable, storing built-in page");
        fallback::offline_page()
      }
      Err(e) => {
        tracing::warn!("offline page unavailable, storing built-in page: {:#}", e);
        fallback::offline_page()
      }
    };
    cache.store_key(
      Region::OfflineCache,
      &CacheKey::new("GET", offline_url.as_str()),
      offline_page,
    );

    let root = Request::get(self.ctx.config.resolve("/")?);
    match self.ctx.network.fetch(&root).await {
      Ok(response) => cache.store(Region::OfflineCache, &root, response),
      Err(e) => tracing::warn!("root document not precached: {:#}", e),
    }

    Ok(())
  }

  /// Purge stale cache generations and claim clients. Only valid once
  /// installed.
  pub fn activate(&mut self) -> Result<()> {
    if self.state != WorkerState::Installed {
      return Err(eyre!("Cannot activate worker in state {:?}", self.state));
    }
    self.state = WorkerState::Activating;

    match self.ctx.cache.purge_stale() {
      Ok(purged) if !purged.is_empty() => {
        tracing::info!(count = purged.len(), "purged previous cache generations")
      }
      Ok(_) => {}
      Err(e) => tracing::warn!("failed to purge stale caches: {:#}", e),
    }

    self.clients_claimed = true;
    self.state = WorkerState::Active;
    tracing::info!(version = self.ctx.cache.version(), "worker active");
    Ok(())
  }

  /// Handle a client control message.
  pub fn handle_message(&mut self, message: ClientMessage) -> Option<MessageReply> {
    match message {
      ClientMessage::SkipWaiting => {
        self.skip_waiting = true;
        if self.state == WorkerState::Installed {
          if let Err(e) = self.activate() {
            tracing::warn!("skip waiting failed: {:#}", e);
          }
        }
        None
      }
      ClientMessage::GetVersion => Some(MessageReply::Version {
        version: self.ctx.cache.version().to_string(),
      }),
    }
  }

  #[cfg(test)]
  pub async fn handle_fetch(&self, request: Request) -> Response {
    dispatch(&self.ctx, self.state == WorkerState::Active, request).await
  }
}

/// Route a request through the strategies when the worker controls the
/// page; otherwise go straight to the network.
pub async fn dispatch(ctx: &WorkerContext, active: bool, request: Request) -> Response {
  if active {
    let strategy = strategy::route(&request, &ctx.config);
    tracing::debug!(url = %request.url, ?strategy, "dispatching request");
    return strategy.handle(ctx, request).await;
  }

  let class = RequestClass::of(&request, &ctx.config);
  match ctx.network.fetch(&request).await {
    Ok(response) => response,
    Err(_) if class == RequestClass::Navigation => strategy::offline_document(ctx),
    Err(_) => fallback::respond(class),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::CacheConfig;
  use crate::testing::{context, context_with_storage, html, MockNetwork};
  use url::Url;

  fn url(path: &str) -> Url {
    Url::parse("http://localhost:8080").unwrap().join(path).unwrap()
  }

  #[tokio::test]
  async fn test_install_precaches_offline_page_and_root() {
    let network = Arc::new(MockNetwork::new());
    network.respond("GET", url("/offline.html").as_str(), html("offline page"));
    network.respond("GET", url("/").as_str(), html("app shell"));
    let mut worker = Worker::new(context(network)).unwrap();

    worker.install().await.unwrap();

    assert_eq!(worker.state(), WorkerState::Installed);
    assert!(worker.skip_waiting());
    let ctx = worker.context();
    assert_eq!(strategy::offline_document(ctx).body, b"offline page");
    assert_eq!(strategy::root_document(ctx).unwrap().body, b"app shell");
  }

  #[tokio::test]
  async fn test_install_offline_seeds_builtin_page() {
    let network = Arc::new(MockNetwork::new());
    network.set_offline(true);
    let mut worker = Worker::new(context(network)).unwrap();

    worker.install().await.unwrap();

    let ctx = worker.context();
    let inventory = ctx.cache.inventory().unwrap();
    assert_eq!(
      inventory,
      vec![(
        "offline-cache-v1".to_string(),
        vec!["http://localhost:8080/offline.html".to_string()]
      )]
    );
    assert_eq!(strategy::offline_document(ctx), fallback::offline_page());
  }

  #[tokio::test]
  async fn test_activate_deletes_previous_generation() {
    let network = Arc::new(MockNetwork::new());
    let config = Config {
      cache: CacheConfig {
        version: "v2".to_string(),
        ..CacheConfig::default()
      },
      ..Config::default()
    };
    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let ctx = context_with_storage(network, config, storage.clone());

    // Entries left behind by a v1 worker
    let old = CacheLayer::new(storage, CacheConfig::default());
    old.store(Region::ApiCache, &Request::get(url("/api/loans")), Response::new(200));
    old.store(Region::PagesCache, &Request::get(url("/")), html("old shell"));

    let mut worker = Worker::new(ctx).unwrap();
    worker.install().await.unwrap();
    worker.activate().unwrap();

    assert_eq!(worker.state(), WorkerState::Active);
    assert!(worker.clients_claimed());
    let names: Vec<String> = worker
      .context()
      .cache
      .inventory()
      .unwrap()
      .into_iter()
      .map(|(name, _)| name)
      .collect();
    assert_eq!(names, vec!["offline-cache-v2"]);
  }

  #[tokio::test]
  async fn test_activate_requires_install() {
    let mut worker = Worker::new(context(Arc::new(MockNetwork::new()))).unwrap();
    assert!(worker.activate().is_err());
    assert_eq!(worker.state(), WorkerState::Installing);
  }

  #[tokio::test]
  async fn test_skip_waiting_message_activates_installed_worker() {
    let network = Arc::new(MockNetwork::new());
    let mut worker = Worker::new(context(network)).unwrap();
    worker.install().await.unwrap();

    assert_eq!(worker.handle_message(ClientMessage::SkipWaiting), None);
    assert_eq!(worker.state(), WorkerState::Active);

    assert_eq!(
      worker.handle_message(ClientMessage::GetVersion),
      Some(MessageReply::Version {
        version: "v1".to_string()
      })
    );
  }

  #[tokio::test]
  async fn test_uncontrolled_fetch_bypasses_cache() {
    let network = Arc::new(MockNetwork::new());
    network.respond("GET", url("/api/loans").as_str(), Response::new(200).with_body("[]"));
    let worker = Worker::new(context(network)).unwrap();

    let response = worker.handle_fetch(Request::get(url("/api/loans"))).await;

    assert_eq!(response.body, b"[]");
    assert!(worker.context().cache.inventory().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_active_fetch_routes_api_offline_to_503() {
    let network = Arc::new(MockNetwork::new());
    let mut worker = Worker::new(context(network.clone())).unwrap();
    worker.install().await.unwrap();
    worker.activate().unwrap();
    network.set_offline(true);

    let response = worker.handle_fetch(Request::get(url("/api/loans"))).await;

    assert_eq!(response.status, 503);
  }
}
