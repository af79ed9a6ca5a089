//! Request and response snapshots exchanged between the router, the
//! strategies, the cache store and the network.

use serde::{Deserialize, Serialize};
use url::Url;

/// Destination hint of an intercepted request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Destination {
  Document,
  Style,
  Script,
  Font,
  Image,
  /// No destination (fetch/XHR style requests)
  #[default]
  Empty,
}

impl Destination {
  /// Style, script and font resources share the static asset region.
  pub fn is_static_asset(&self) -> bool {
    matches!(self, Destination::Style | Destination::Script | Destination::Font)
  }
}

/// An intercepted HTTP-like request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
  pub method: String,
  pub url: Url,
  pub destination: Destination,
  /// Set for top-level page navigations
  pub navigate: bool,
  pub headers: Vec<(String, String)>,
  pub body: Option<Vec<u8>>,
}

impl Request {
  pub fn get(url: Url) -> Self {
    Self {
      method: "GET".to_string(),
      url,
      destination: Destination::Empty,
      navigate: false,
      headers: Vec::new(),
      body: None,
    }
  }

  /// A navigation request for a document.
  pub fn navigate(url: Url) -> Self {
    Self {
      destination: Destination::Document,
      navigate: true,
      ..Self::get(url)
    }
  }

  /// A `POST` carrying a JSON body.
  pub fn post_json(url: Url, payload: &serde_json::Value) -> color_eyre::Result<Self> {
    let body = serde_json::to_vec(payload)
      .map_err(|e| color_eyre::eyre::eyre!("Failed to serialize request body: {}", e))?;

    Ok(Self {
      method: "POST".to_string(),
      headers: vec![("Content-Type".to_string(), "application/json".to_string())],
      body: Some(body),
      ..Self::get(url)
    })
  }

  pub fn with_destination(mut self, destination: Destination) -> Self {
    self.destination = destination;
    self
  }

  pub fn with_method(mut self, method: &str) -> Self {
    self.method = method.to_ascii_uppercase();
    self
  }

  pub fn is_get(&self) -> bool {
    self.method.eq_ignore_ascii_case("GET")
  }

  pub fn path(&self) -> &str {
    self.url.path()
  }
}

/// A fully materialized response. The body has already been read from the
/// wire, so copies are explicit via [`Response::tee`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

impl Response {
  pub fn new(status: u16) -> Self {
    Self {
      status,
      headers: Vec::new(),
      body: Vec::new(),
    }
  }

  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self.headers.push((name.to_string(), value.to_string()));
    self
  }

  pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
    self.body = body.into();
    self
  }

  /// Status in the 200-299 range.
  pub fn is_ok(&self) -> bool {
    (200..300).contains(&self.status)
  }

  /// Only plain `200 OK` responses are stored in a region.
  pub fn is_cacheable(&self) -> bool {
    self.status == 200
  }

  /// Case-insensitive header lookup.
  #[cfg(test)]
  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(k, _)| k.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }

  /// Split one consumed response into two independent copies, one for the
  /// cache and one for the caller.
  pub fn tee(self) -> (Response, Response) {
    let copy = self.clone();
    (copy, self)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_header_lookup_is_case_insensitive() {
    let response = Response::new(200).with_header("Content-Type", "text/html");
    assert_eq!(response.header("content-type"), Some("text/html"));
    assert_eq!(response.header("etag"), None);
  }

  #[test]
  fn test_only_200_is_cacheable() {
    assert!(Response::new(200).is_cacheable());
    assert!(Response::new(204).is_ok());
    assert!(!Response::new(204).is_cacheable());
    assert!(!Response::new(500).is_ok());
  }

  #[test]
  fn test_post_json_sets_content_type() {
    let url = Url::parse("http://localhost/api/loans").unwrap();
    let request = Request::post_json(url, &serde_json::json!({"id": "l1"})).unwrap();
    assert_eq!(request.method, "POST");
    assert_eq!(
      request.headers,
      vec![("Content-Type".to_string(), "application/json".to_string())]
    );
    assert_eq!(request.body.as_deref(), Some(br#"{"id":"l1"}"#.as_slice()));
  }
}
