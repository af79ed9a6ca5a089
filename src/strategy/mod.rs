//! Cache strategies. Each one decides how to reconcile a cache region with
//! the network for one class of request, and every path ends in a response.

mod router;

use crate::cache::{CacheKey, Region};
use crate::fallback::{self, RequestClass};
use crate::http::{Request, Response};
use crate::worker::WorkerContext;

pub use router::route;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
  /// Page navigations, with primary-route and offline-page fallbacks
  Navigation,
  NetworkFirst(Region),
  CacheFirst(Region),
  StaleWhileRevalidate(Region),
  /// Any current region, then the network; nothing is stored
  CacheThenNetwork,
}

impl Strategy {
  pub async fn handle(self, ctx: &WorkerContext, request: Request) -> Response {
    let class = RequestClass::of(&request, &ctx.config);
    match self {
      Strategy::Navigation => navigation(ctx, request).await,
      Strategy::NetworkFirst(region) => network_first(ctx, region, request, class).await,
      Strategy::CacheFirst(region) => cache_first(ctx, region, request, class).await,
      Strategy::StaleWhileRevalidate(region) => {
        stale_while_revalidate(ctx, region, request, class).await
      }
      Strategy::CacheThenNetwork => cache_then_network(ctx, request, class).await,
    }
  }
}

/// Store the cache's copy of a fresh response and hand back the caller's.
fn store_copy(ctx: &WorkerContext, region: Region, request: &Request, response: Response) -> Response {
  if !response.is_cacheable() {
    return response;
  }
  let (for_cache, for_caller) = response.tee();
  ctx.cache.store(region, request, for_cache);
  for_caller
}

async fn cache_first(
  ctx: &WorkerContext,
  region: Region,
  request: Request,
  class: RequestClass,
) -> Response {
  if let Some(cached) = ctx.cache.lookup(region, &request) {
    return cached;
  }

  match ctx.network.fetch(&request).await {
    Ok(response) => store_copy(ctx, region, &request, response),
    Err(e) => {
      tracing::debug!(url = %request.url, "cache miss and network failed: {:#}", e);
      fallback::respond(class)
    }
  }
}

async fn network_first(
  ctx: &WorkerContext,
  region: Region,
  request: Request,
  class: RequestClass,
) -> Response {
  match ctx.network.fetch(&request).await {
    Ok(response) => store_copy(ctx, region, &request, response),
    Err(e) => {
      tracing::debug!(url = %request.url, "network failed, trying cache: {:#}", e);
      ctx
        .cache
        .lookup(region, &request)
        .unwrap_or_else(|| fallback::respond(class))
    }
  }
}

async fn stale_while_revalidate(
  ctx: &WorkerContext,
  region: Region,
  request: Request,
  class: RequestClass,
) -> Response {
  let Some(cached) = ctx.cache.lookup(region, &request) else {
    return cache_first(ctx, region, request, class).await;
  };

  // Revalidate in the background; the caller never waits on it
  let revalidate_ctx = ctx.clone();
  tokio::spawn(async move {
    match revalidate_ctx.network.fetch(&request).await {
      Ok(response) => {
        store_copy(&revalidate_ctx, region, &request, response);
      }
      Err(e) => tracing::debug!(url = %request.url, "revalidation failed: {:#}", e),
    }
  });

  cached
}

async fn navigation(ctx: &WorkerContext, request: Request) -> Response {
  if let Some(cached) = ctx.cache.lookup_any(&request) {
    return cached;
  }

  let error = match ctx.network.fetch(&request).await {
    Ok(response) => return store_copy(ctx, Region::PagesCache, &request, response),
    Err(e) => e,
  };
  tracing::info!(path = request.path(), "navigation offline: {:#}", error);

  if ctx.config.is_primary_route(request.path()) {
    if let Some(root) = root_document(ctx) {
      return root;
    }
  }

  offline_document(ctx)
}

async fn cache_then_network(ctx: &WorkerContext, request: Request, class: RequestClass) -> Response {
  if let Some(cached) = ctx.cache.lookup_any(&request) {
    return cached;
  }

  match ctx.network.fetch(&request).await {
    Ok(response) => response,
    Err(e) => {
      tracing::debug!(url = %request.url, "network failed: {:#}", e);
      fallback::respond(class)
    }
  }
}

fn cached_get(ctx: &WorkerContext, path: &str) -> Option<Response> {
  let url = ctx.config.resolve(path).ok()?;
  let request = Request::get(url);
  ctx.cache.lookup_any(&request)
}

/// The cached root document (`/`), if any region holds it.
pub fn root_document(ctx: &WorkerContext) -> Option<Response> {
  cached_get(ctx, "/")
}

/// The cached offline page, or the synthesized one.
pub fn offline_document(ctx: &WorkerContext) -> Response {
  let cached = ctx
    .config
    .resolve(&ctx.config.offline_page)
    .ok()
    .and_then(|url| {
      ctx
        .cache
        .lookup_key(Region::OfflineCache, &CacheKey::new("GET", url.as_str()))
    });

  cached.unwrap_or_else(|| fallback::respond(RequestClass::Navigation))
}
