use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Origin server that requests and replays are sent to
  pub origin: String,
  /// Path prefix that marks API requests
  pub api_prefix: String,
  /// Path of the dedicated offline page
  pub offline_page: String,
  /// Application routes that fall back to the cached root document
  pub primary_routes: Vec<String>,
  /// Where the cache and queue databases live (defaults to the XDG data dir)
  pub data_dir: Option<PathBuf>,
  /// Directory for rolling log files; stderr only when unset
  pub log_dir: Option<PathBuf>,
  pub cache: CacheConfig,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      origin: "http://localhost:8080".to_string(),
      api_prefix: "/api/".to_string(),
      offline_page: "/offline.html".to_string(),
      primary_routes: ["/", "/dashboard", "/loans", "/payments", "/borrowers", "/reports"]
        .into_iter()
        .map(String::from)
        .collect(),
      data_dir: None,
      log_dir: None,
      cache: CacheConfig::default(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// When false every region behaves as permanently empty
  pub enabled: bool,
  /// Generation suffix appended to every region name
  pub version: String,
  pub regions: RegionPolicies,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      version: "v1".to_string(),
      regions: RegionPolicies::default(),
    }
  }
}

/// Eviction bounds for one region. `None` means unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct RegionPolicy {
  pub max_entries: Option<usize>,
  pub max_age_seconds: Option<u64>,
}

impl RegionPolicy {
  pub const fn bounded(max_entries: usize, max_age_seconds: u64) -> Self {
    Self {
      max_entries: Some(max_entries),
      max_age_seconds: Some(max_age_seconds),
    }
  }
}

const DAY: u64 = 24 * 60 * 60;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RegionPolicies {
  pub static_assets: RegionPolicy,
  pub images: RegionPolicy,
  pub api: RegionPolicy,
  pub pages: RegionPolicy,
  pub offline: RegionPolicy,
}

impl Default for RegionPolicies {
  fn default() -> Self {
    Self {
      static_assets: RegionPolicy::bounded(60, 30 * DAY),
      images: RegionPolicy::bounded(60, 30 * DAY),
      api: RegionPolicy::bounded(100, 7 * DAY),
      pages: RegionPolicy::bounded(50, 7 * DAY),
      offline: RegionPolicy::default(),
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./offline-worker.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/offline-worker/config.yaml
  ///
  /// Falls back to defaults when no file is found. `OFFLINE_WORKER_ORIGIN`
  /// overrides the origin either way.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    let mut config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => Config::default(),
    };

    if let Ok(origin) = std::env::var("OFFLINE_WORKER_ORIGIN") {
      config.origin = origin;
    }

    config.origin_url()?;
    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("offline-worker.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("offline-worker").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn from_yaml(contents: &str) -> Result<Self> {
    serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))
  }

  pub fn origin_url(&self) -> Result<Url> {
    Url::parse(&self.origin).map_err(|e| eyre!("Invalid origin '{}': {}", self.origin, e))
  }

  /// Resolve a path (or absolute URL) against the origin.
  pub fn resolve(&self, path: &str) -> Result<Url> {
    self
      .origin_url()?
      .join(path)
      .map_err(|e| eyre!("Invalid request URL '{}': {}", path, e))
  }

  /// Exact match against the primary routes, ignoring a trailing slash.
  pub fn is_primary_route(&self, path: &str) -> bool {
    let normalized = normalize_route(path);
    self
      .primary_routes
      .iter()
      .any(|route| normalize_route(route) == normalized)
  }

  pub fn data_dir(&self) -> Result<PathBuf> {
    if let Some(dir) = &self.data_dir {
      return Ok(dir.clone());
    }

    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("offline-worker"))
  }
}

fn normalize_route(path: &str) -> &str {
  match path.trim_end_matches('/') {
    "" => "/",
    trimmed => trimmed,
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_defaults() {
    let config = Config::default();
    assert_eq!(config.cache.version, "v1");
    assert_eq!(config.cache.regions.api.max_entries, Some(100));
    assert_eq!(config.cache.regions.images.max_age_seconds, Some(30 * DAY));
    assert_eq!(config.cache.regions.offline, RegionPolicy::default());
  }

  #[test]
  fn test_partial_yaml_keeps_defaults() {
    let config = Config::from_yaml(
      r#"
origin: "https://loans.example.com"
cache:
  version: v7
  regions:
    images:
      max_entries: 2
"#,
    )
    .unwrap();

    assert_eq!(config.origin, "https://loans.example.com");
    assert_eq!(config.cache.version, "v7");
    assert!(config.cache.enabled);
    assert_eq!(config.cache.regions.images.max_entries, Some(2));
    assert_eq!(config.cache.regions.images.max_age_seconds, None);
    assert_eq!(config.api_prefix, "/api/");
  }

  #[test]
  fn test_primary_route_matching() {
    let config = Config::default();
    assert!(config.is_primary_route("/"));
    assert!(config.is_primary_route("/loans/"));
    assert!(!config.is_primary_route("/loans/42"));
    assert!(!config.is_primary_route("/settings"));
  }

  #[test]
  fn test_resolve_against_origin() {
    let config = Config::default();
    let url = config.resolve("/api/loans?page=2").unwrap();
    assert_eq!(url.as_str(), "http://localhost:8080/api/loans?page=2");
  }
}
