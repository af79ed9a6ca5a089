//! Core types for the response cache.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use crate::http::{Request, Response};

/// The cache regions owned by the worker. Stored names carry the cache
/// version as a suffix, see [`Region::versioned_name`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Region {
  StaticAssets,
  Images,
  ApiCache,
  PagesCache,
  OfflineCache,
}

impl Region {
  pub const ALL: [Region; 5] = [
    Region::StaticAssets,
    Region::Images,
    Region::ApiCache,
    Region::PagesCache,
    Region::OfflineCache,
  ];

  pub fn base_name(&self) -> &'static str {
    match self {
      Region::StaticAssets => "static-assets",
      Region::Images => "images",
      Region::ApiCache => "api-cache",
      Region::PagesCache => "pages-cache",
      Region::OfflineCache => "offline-cache",
    }
  }

  pub fn versioned_name(&self, version: &str) -> String {
    format!("{}-{}", self.base_name(), version)
  }
}

/// Normalized request identity: method plus absolute URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKey {
  method: String,
  url: String,
}

impl CacheKey {
  pub fn new(method: &str, url: &str) -> Self {
    Self {
      method: method.to_ascii_uppercase(),
      url: url.to_string(),
    }
  }

  pub fn for_request(request: &Request) -> Self {
    Self::new(&request.method, request.url.as_str())
  }

  pub fn method(&self) -> &str {
    &self.method
  }

  pub fn url(&self) -> &str {
    &self.url
  }

  /// SHA256 hash for stable, fixed-length storage keys.
  pub fn hash(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.method.as_bytes());
    hasher.update(b" ");
    hasher.update(self.url.as_bytes());
    hex::encode(hasher.finalize())
  }
}

/// A stored response with its insertion time.
#[derive(Debug, Clone)]
pub struct CachedResponse {
  pub response: Response,
  pub stored_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_versioned_names() {
    assert_eq!(Region::ApiCache.versioned_name("v3"), "api-cache-v3");
    assert_eq!(Region::OfflineCache.versioned_name("v1"), "offline-cache-v1");
  }

  #[test]
  fn test_key_hash_normalizes_method() {
    let a = CacheKey::new("get", "http://localhost/a");
    let b = CacheKey::new("GET", "http://localhost/a");
    let c = CacheKey::new("GET", "http://localhost/b");
    assert_eq!(a.hash(), b.hash());
    assert_ne!(a.hash(), c.hash());
    assert_eq!(a.hash().len(), 64);
  }
}
