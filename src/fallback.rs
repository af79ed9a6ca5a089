//! Terminal responses for when neither the network nor the cache can
//! answer a request.

use crate::config::Config;
use crate::http::{Destination, Request, Response};

pub const OFFLINE_MESSAGE: &str = "You are offline. Please check your internet connection.";

const OFFLINE_HTML: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="utf-8">
  <meta name="viewport" content="width=device-width, initial-scale=1">
  <title>Offline</title>
</head>
<body>
  <main>
    <h1>You are offline</h1>
    <p>This page is not available offline. Check your internet connection and try again.</p>
  </main>
</body>
</html>
"#;

const PLACEHOLDER_SVG: &str = r##"<svg xmlns="http://www.w3.org/2000/svg" width="200" height="200" viewBox="0 0 200 200"><rect width="200" height="200" fill="#e5e7eb"/><text x="100" y="105" font-family="sans-serif" font-size="14" fill="#6b7280" text-anchor="middle">Image unavailable</text></svg>"##;

/// Request classes that get distinct fallbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
  Navigation,
  Api,
  Image,
  Other,
}

impl RequestClass {
  /// Classify with the same priority the router uses.
  pub fn of(request: &Request, config: &Config) -> Self {
    if request.navigate {
      RequestClass::Navigation
    } else if request.path().starts_with(&config.api_prefix) {
      RequestClass::Api
    } else if request.destination == Destination::Image {
      RequestClass::Image
    } else {
      RequestClass::Other
    }
  }
}

/// Synthesize the fallback for a request class. Always returns a
/// well-formed response.
pub fn respond(class: RequestClass) -> Response {
  match class {
    RequestClass::Navigation => offline_page(),
    RequestClass::Api => {
      let body = serde_json::json!({
        "error": true,
        "message": OFFLINE_MESSAGE,
        "offline": true,
      });
      Response::new(503)
        .with_header("Content-Type", "application/json")
        .with_body(body.to_string())
    }
    RequestClass::Image => Response::new(200)
      .with_header("Content-Type", "image/svg+xml")
      .with_body(PLACEHOLDER_SVG),
    RequestClass::Other => Response::new(504),
  }
}

/// The minimal offline HTML document.
pub fn offline_page() -> Response {
  Response::new(200)
    .with_header("Content-Type", "text/html; charset=utf-8")
    .with_body(OFFLINE_HTML)
}
