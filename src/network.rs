//! Outbound network access.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};

use crate::http::{Request, Response};

/// Anything that can perform a request against the origin.
///
/// `Err` means the network was unreachable. Every HTTP status, including
/// 4xx and 5xx, is returned as `Ok`.
#[async_trait]
pub trait Network: Send + Sync {
  async fn fetch(&self, request: &Request) -> Result<Response>;
}

/// Network backed by a `reqwest` client. No timeout is configured, so the
/// client defaults apply.
#[derive(Clone)]
pub struct HttpNetwork {
  client: reqwest::Client,
}

impl HttpNetwork {
  pub fn new() -> Result<Self> {
    let client = reqwest::Client::builder()
      .user_agent(concat!("offline-worker/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to build HTTP client: {}", e))?;

    Ok(Self { client })
  }
}

#[async_trait]
impl Network for HttpNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    let method = reqwest::Method::from_bytes(request.method.as_bytes())
      .map_err(|e| eyre!("Invalid method {}: {}", request.method, e))?;

    let mut builder = self.client.request(method, request.url.clone());
    for (name, value) in &request.headers {
      builder = builder.header(name.as_str(), value.as_str());
    }
    if let Some(body) = &request.body {
      builder = builder.body(body.clone());
    }

    let response = builder
      .send()
      .await
      .map_err(|e| eyre!("Failed to fetch {} {}: {}", request.method, request.url, e))?;

    let status = response.status().as_u16();
    let headers = response
      .headers()
      .iter()
      .filter_map(|(name, value)| {
        value
          .to_str()
          .ok()
          .map(|v| (name.as_str().to_string(), v.to_string()))
      })
      .collect();

    // The body stream can only be consumed once
    let body = response
      .bytes()
      .await
      .map_err(|e| eyre!("Failed to read body of {}: {}", request.url, e))?
      .to_vec();

    Ok(Response {
      status,
      headers,
      body,
    })
  }
}
