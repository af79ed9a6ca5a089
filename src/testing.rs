//! Test doubles shared by the module tests.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::cache::{CacheKey, CacheLayer, CacheStorage, CachedResponse, SqliteStorage};
use crate::config::Config;
use crate::http::{Request, Response};
use crate::network::Network;
use crate::queue::{MutationQueue, QueueName, QueuedMutation, SqliteQueue};
use crate::worker::WorkerContext;

enum Route {
  Always(Response),
  Sequence(VecDeque<std::result::Result<Response, String>>),
}

/// Scripted network keyed by method and absolute URL. Unknown routes fail as
/// if the network were unreachable.
#[derive(Default)]
pub struct MockNetwork {
  routes: Mutex<HashMap<(String, String), Route>>,
  calls: Mutex<Vec<Request>>,
  offline: AtomicBool,
}

impl MockNetwork {
  pub fn new() -> Self {
    Self::default()
  }

  /// Always answer `method url` with `response`.
  pub fn respond(&self, method: &str, url: &str, response: Response) {
    self
      .routes
      .lock()
      .unwrap()
      .insert((method.to_string(), url.to_string()), Route::Always(response));
  }

  /// Answer successive calls from `replies`; `Err` simulates a network
  /// failure. Calls past the end fail.
  pub fn respond_sequence(
    &self,
    method: &str,
    url: &str,
    replies: Vec<std::result::Result<Response, String>>,
  ) {
    self.routes.lock().unwrap().insert(
      (method.to_string(), url.to_string()),
      Route::Sequence(replies.into()),
    );
  }

  pub fn set_offline(&self, offline: bool) {
    self.offline.store(offline, Ordering::SeqCst);
  }

  pub fn calls(&self) -> Vec<Request> {
    self.calls.lock().unwrap().clone()
  }
}

#[async_trait]
impl Network for MockNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    self.calls.lock().unwrap().push(request.clone());

    if self.offline.load(Ordering::SeqCst) {
      return Err(eyre!("network unreachable"));
    }

    let mut routes = self.routes.lock().unwrap();
    let key = (request.method.clone(), request.url.to_string());
    match routes.get_mut(&key) {
      Some(Route::Always(response)) => Ok(response.clone()),
      Some(Route::Sequence(replies)) => match replies.pop_front() {
        Some(Ok(response)) => Ok(response),
        Some(Err(message)) => Err(eyre!(message)),
        None => Err(eyre!("no more scripted replies for {}", request.url)),
      },
      None => Err(eyre!("no route for {} {}", request.method, request.url)),
    }
  }
}

/// A worker context over in-memory stores and the given network.
pub fn context(network: Arc<MockNetwork>) -> WorkerContext {
  context_with(network, Config::default())
}

pub fn context_with(network: Arc<MockNetwork>, config: Config) -> WorkerContext {
  let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
  context_with_storage(network, config, storage)
}

pub fn context_with_storage(
  network: Arc<MockNetwork>,
  config: Config,
  storage: Arc<dyn CacheStorage>,
) -> WorkerContext {
  let queue = Arc::new(SqliteQueue::open_in_memory().unwrap());
  WorkerContext {
    cache: CacheLayer::new(storage, config.cache.clone()),
    config: Arc::new(config),
    network,
    queue,
  }
}

pub fn html(body: &str) -> Response {
  Response::new(200)
    .with_header("Content-Type", "text/html")
    .with_body(body)
}

/// Cache storage whose every operation fails, as if the database were
/// locked or corrupt.
pub struct FailingStorage;

impl CacheStorage for FailingStorage {
  fn open_region(&self, region: &str) -> Result<()> {
    Err(eyre!("cannot open region {}", region))
  }

  fn get(&self, region: &str, _key: &CacheKey) -> Result<Option<CachedResponse>> {
    Err(eyre!("cannot read region {}", region))
  }

  fn put(
    &self,
    region: &str,
    _key: &CacheKey,
    _response: &Response,
    _stored_at: chrono::DateTime<chrono::Utc>,
    _max_entries: Option<usize>,
  ) -> Result<()> {
    Err(eyre!("cannot write region {}", region))
  }

  fn region_names(&self) -> Result<Vec<String>> {
    Err(eyre!("cannot list regions"))
  }

  fn delete_region(&self, region: &str) -> Result<bool> {
    Err(eyre!("cannot delete region {}", region))
  }

  fn entry_urls(&self, region: &str) -> Result<Vec<String>> {
    Err(eyre!("cannot list region {}", region))
  }
}

/// Queue store that cannot be read.
pub struct FailingQueue;

impl MutationQueue for FailingQueue {
  fn enqueue(&self, queue: QueueName, record: &QueuedMutation) -> Result<()> {
    Err(eyre!("queue store unavailable: {} {}", queue, record.id))
  }

  fn list_pending(&self, queue: QueueName) -> Result<Vec<QueuedMutation>> {
    Err(eyre!("queue store unavailable: {}", queue))
  }

  fn remove_pending(&self, queue: QueueName, id: &str) -> Result<()> {
    Err(eyre!("queue store unavailable: {} {}", queue, id))
  }
}
