use super::Strategy;
use crate::cache::Region;
use crate::config::Config;
use crate::http::{Destination, Request};

/// Pick the strategy for a request. Predicates are checked in a fixed
/// priority order and the first match wins.
pub fn route(request: &Request, config: &Config) -> Strategy {
  if request.navigate {
    Strategy::Navigation
  } else if request.path().starts_with(&config.api_prefix) {
    Strategy::NetworkFirst(Region::ApiCache)
  } else if request.destination == Destination::Image {
    Strategy::CacheFirst(Region::Images)
  } else if request.destination.is_static_asset() {
    Strategy::StaleWhileRevalidate(Region::StaticAssets)
  } else {
    Strategy::CacheThenNetwork
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use url::Url;

  fn get(path: &str) -> Request {
    Request::get(Url::parse("http://localhost:8080").unwrap().join(path).unwrap())
  }

  #[test]
  fn test_navigation_wins_over_api_prefix() {
    let request = Request::navigate(Url::parse("http://localhost:8080/api/report").unwrap());
    assert_eq!(route(&request, &Config::default()), Strategy::Navigation);
  }

  #[test]
  fn test_api_wins_over_destination() {
    let request = get("/api/borrowers/7/photo").with_destination(Destination::Image);
    assert_eq!(
      route(&request, &Config::default()),
      Strategy::NetworkFirst(Region::ApiCache)
    );
  }

  #[test]
  fn test_destinations() {
    let config = Config::default();
    assert_eq!(
      route(&get("/a.png").with_destination(Destination::Image), &config),
      Strategy::CacheFirst(Region::Images)
    );
    for dest in [Destination::Style, Destination::Script, Destination::Font] {
      assert_eq!(
        route(&get("/asset").with_destination(dest), &config),
        Strategy::StaleWhileRevalidate(Region::StaticAssets)
      );
    }
    assert_eq!(route(&get("/manifest.json"), &config), Strategy::CacheThenNetwork);
  }

  #[test]
  fn test_custom_api_prefix() {
    let config = Config {
      api_prefix: "/v2/".to_string(),
      ..Config::default()
    };
    assert_eq!(route(&get("/api/loans"), &config), Strategy::CacheThenNetwork);
    assert_eq!(
      route(&get("/v2/loans"), &config),
      Strategy::NetworkFirst(Region::ApiCache)
    );
  }
}
