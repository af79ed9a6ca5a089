//! Cache layer that applies region policies on top of a storage backend.

use chrono::{DateTime, Duration, Utc};
use color_eyre::Result;
use std::sync::Arc;

use super::storage::CacheStorage;
use super::traits::{CacheKey, Region};
use crate::config::{CacheConfig, RegionPolicy};
use crate::http::{Request, Response};

/// Versioned, policy-aware view over the cache storage.
///
/// Storage failures never escape from lookups or writes: they are logged and
/// treated as a miss or a skipped write, so strategies degrade to
/// network-only behavior.
#[derive(Clone)]
pub struct CacheLayer {
  storage: Arc<dyn CacheStorage>,
  config: Arc<CacheConfig>,
}

impl CacheLayer {
  pub fn new(storage: Arc<dyn CacheStorage>, config: CacheConfig) -> Self {
    Self {
      storage,
      config: Arc::new(config),
    }
  }

  pub fn version(&self) -> &str {
    &self.config.version
  }

  pub fn name(&self, region: Region) -> String {
    region.versioned_name(&self.config.version)
  }

  pub fn policy(&self, region: Region) -> RegionPolicy {
    let policies = &self.config.regions;
    match region {
      Region::StaticAssets => policies.static_assets,
      Region::Images => policies.images,
      Region::ApiCache => policies.api,
      Region::PagesCache => policies.pages,
      Region::OfflineCache => policies.offline,
    }
  }

  /// Names every region must have under the current version.
  pub fn current_names(&self) -> Vec<String> {
    Region::ALL.iter().map(|r| self.name(*r)).collect()
  }

  fn is_expired(&self, region: Region, stored_at: DateTime<Utc>) -> bool {
    // Ages too large for a chrono duration never expire
    let max_age = self
      .policy(region)
      .max_age_seconds
      .and_then(|secs| i64::try_from(secs).ok())
      .and_then(Duration::try_seconds);
    match max_age {
      Some(max_age) => Utc::now() - stored_at > max_age,
      None => false,
    }
  }

  /// Look up a request in one region. Expired entries count as a miss.
  pub fn lookup(&self, region: Region, request: &Request) -> Option<Response> {
    if !request.is_get() {
      return None;
    }
    self.lookup_key(region, &CacheKey::for_request(request))
  }

  pub fn lookup_key(&self, region: Region, key: &CacheKey) -> Option<Response> {
    let name = self.name(region);
    match self.storage.get(&name, key) {
      Ok(Some(cached)) if self.is_expired(region, cached.stored_at) => {
        tracing::debug!(region = %name, url = key.url(), "cache entry expired");
        None
      }
      Ok(Some(cached)) => Some(cached.response),
      Ok(None) => None,
      Err(e) => {
        tracing::warn!(region = %name, url = key.url(), "cache lookup failed: {:#}", e);
        None
      }
    }
  }

  /// Look up a request across every current region, in declaration order.
  pub fn lookup_any(&self, request: &Request) -> Option<Response> {
    Region::ALL
      .iter()
      .find_map(|region| self.lookup(*region, request))
  }

  /// Store a response if it is eligible: `GET` request with a `200` status.
  /// Takes the cache's own copy of the response.
  pub fn store(&self, region: Region, request: &Request, response: Response) {
    if !request.is_get() || !response.is_cacheable() {
      return;
    }
    self.store_key(region, &CacheKey::for_request(request), response);
  }

  pub fn store_key(&self, region: Region, key: &CacheKey, response: Response) {
    let name = self.name(region);
    let max_entries = self.policy(region).max_entries;
    if let Err(e) = self
      .storage
      .put(&name, key, &response, Utc::now(), max_entries)
    {
      tracing::warn!(region = %name, url = key.url(), "cache write failed: {:#}", e);
    }
  }

  pub fn open(&self, region: Region) -> Result<()> {
    self.storage.open_region(&self.name(region))
  }

  /// Delete every stored region that is not part of the current version.
  /// Returns the names that were removed.
  pub fn purge_stale(&self) -> Result<Vec<String>> {
    let current = self.current_names();
    let mut purged = Vec::new();

    for name in self.storage.region_names()? {
      if current.contains(&name) {
        continue;
      }
      if self.storage.delete_region(&name)? {
        tracing::info!(region = %name, "deleted stale cache region");
        purged.push(name);
      }
    }

    Ok(purged)
  }

  /// Stored region names with their entry URLs, oldest first.
  pub fn inventory(&self) -> Result<Vec<(String, Vec<String>)>> {
    self
      .storage
      .region_names()?
      .into_iter()
      .map(|name| -> Result<(String, Vec<String>)> {
        let urls = self.storage.entry_urls(&name)?;
        Ok((name, urls))
      })
      .collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::storage::{NoopStorage, SqliteStorage};
  use crate::config::RegionPolicies;
  use crate::testing::FailingStorage;
  use url::Url;

  fn layer_with(regions: RegionPolicies) -> (CacheLayer, Arc<SqliteStorage>) {
    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let config = CacheConfig {
      regions,
      ..CacheConfig::default()
    };
    (CacheLayer::new(storage.clone(), config), storage)
  }

  fn get(path: &str) -> Request {
    Request::get(Url::parse("http://localhost").unwrap().join(path).unwrap())
  }

  #[test]
  fn test_images_region_keeps_two_newest() {
    let (layer, _) = layer_with(RegionPolicies {
      images: RegionPolicy::bounded(2, 3600),
      ..RegionPolicies::default()
    });

    for path in ["/A.png", "/B.png", "/C.png"] {
      layer.store(Region::Images, &get(path), Response::new(200));
    }

    let inventory = layer.inventory().unwrap();
    assert_eq!(
      inventory,
      vec![(
        "images-v1".to_string(),
        vec![
          "http://localhost/B.png".to_string(),
          "http://localhost/C.png".to_string()
        ]
      )]
    );
    assert!(layer.lookup(Region::Images, &get("/A.png")).is_none());
    assert!(layer.lookup(Region::Images, &get("/C.png")).is_some());
  }

  #[test]
  fn test_expired_entry_is_a_miss_but_still_stored() {
    let (layer, storage) = layer_with(RegionPolicies::default());
    let request = get("/api/loans");
    let key = CacheKey::for_request(&request);
    let eight_days_ago = Utc::now() - Duration::days(8);

    storage
      .put("api-cache-v1", &key, &Response::new(200), eight_days_ago, None)
      .unwrap();

    assert!(layer.lookup(Region::ApiCache, &request).is_none());
    assert!(storage.get("api-cache-v1", &key).unwrap().is_some());
  }

  #[test]
  fn test_non_200_and_non_get_are_not_stored() {
    let (layer, storage) = layer_with(RegionPolicies::default());

    layer.store(Region::ApiCache, &get("/api/a"), Response::new(404));
    layer.store(
      Region::ApiCache,
      &get("/api/b").with_method("POST"),
      Response::new(200),
    );

    assert!(storage.entry_urls("api-cache-v1").unwrap().is_empty());
  }

  #[test]
  fn test_purge_stale_keeps_current_generation() {
    let (layer, storage) = layer_with(RegionPolicies::default());
    storage.open_region("api-cache-v0").unwrap();
    storage.open_region("legacy").unwrap();
    layer.open(Region::OfflineCache).unwrap();

    let mut purged = layer.purge_stale().unwrap();
    purged.sort();

    assert_eq!(purged, vec!["api-cache-v0", "legacy"]);
    assert_eq!(storage.region_names().unwrap(), vec!["offline-cache-v1"]);
  }

  #[test]
  fn test_huge_max_age_never_expires() {
    for max_age in [u64::MAX, 10_000_000_000_000_000] {
      let (layer, _) = layer_with(RegionPolicies {
        api: RegionPolicy {
          max_entries: Some(100),
          max_age_seconds: Some(max_age),
        },
        ..RegionPolicies::default()
      });
      let request = get("/api/loans");

      layer.store(Region::ApiCache, &request, Response::new(200).with_body("[]"));

      let cached = layer.lookup(Region::ApiCache, &request).unwrap();
      assert_eq!(cached.body, b"[]");
    }
  }

  #[test]
  fn test_failing_storage_degrades_to_miss() {
    let layer = CacheLayer::new(Arc::new(FailingStorage), CacheConfig::default());
    let request = get("/api/loans");

    layer.store(Region::ApiCache, &request, Response::new(200));

    assert!(layer.lookup(Region::ApiCache, &request).is_none());
    assert!(layer.lookup_any(&request).is_none());
    assert!(layer.open(Region::OfflineCache).is_err());
    assert!(layer.purge_stale().is_err());
  }

  #[test]
  fn test_noop_storage_degrades_to_miss() {
    let layer = CacheLayer::new(Arc::new(NoopStorage), CacheConfig::default());
    layer.store(Region::PagesCache, &get("/"), Response::new(200));
    assert!(layer.lookup_any(&get("/")).is_none());
  }
}
