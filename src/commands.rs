//! Line protocol for `run` mode: one JSON command per stdin line, one JSON
//! reply per line on stdout.

use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::http::{Destination, Request, Response};
use crate::sync::{DrainReport, SyncTag};
use crate::worker::ClientMessage;

/// Description of a request to intercept.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FetchSpec {
  pub url: String,
  #[serde(default)]
  pub method: Option<String>,
  #[serde(default)]
  pub destination: Destination,
  #[serde(default)]
  pub navigate: bool,
}

impl FetchSpec {
  /// Build the request, resolving relative URLs against the origin.
  pub fn into_request(self, config: &Config) -> Result<Request> {
    let url = config.resolve(&self.url)?;
    let mut request = if self.navigate {
      Request::navigate(url)
    } else {
      Request::get(url).with_destination(self.destination)
    };
    if let Some(method) = &self.method {
      request = request.with_method(method);
    }
    Ok(request)
  }
}

#[derive(Debug, PartialEq, Eq)]
pub enum Command {
  Fetch(FetchSpec),
  Sync(SyncTag),
  Message(ClientMessage),
}

#[derive(Deserialize)]
#[serde(rename_all = "lowercase")]
enum RawCommand {
  Fetch(FetchSpec),
  Sync(String),
  Message(serde_json::Value),
}

/// Parse one input line.
pub fn parse(line: &str) -> Result<Command> {
  let raw: RawCommand =
    serde_json::from_str(line).map_err(|e| eyre!("Invalid command '{}': {}", line.trim(), e))?;

  Ok(match raw {
    RawCommand::Fetch(spec) => Command::Fetch(spec),
    RawCommand::Sync(tag) => Command::Sync(tag.parse()?),
    RawCommand::Message(value) => Command::Message(
      serde_json::from_value(value).map_err(|e| eyre!("Unknown client message: {}", e))?,
    ),
  })
}

/// Printable form of a response.
#[derive(Debug, Serialize)]
pub struct ResponseLine {
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: String,
}

impl From<Response> for ResponseLine {
  fn from(response: Response) -> Self {
    Self {
      status: response.status,
      headers: response.headers,
      body: String::from_utf8_lossy(&response.body).into_owned(),
    }
  }
}

#[derive(Debug, Serialize)]
pub struct SyncLine {
  pub tag: String,
  pub attempted: usize,
  pub replayed: usize,
  pub failed: usize,
}

impl From<DrainReport> for SyncLine {
  fn from(report: DrainReport) -> Self {
    Self {
      tag: report.tag.to_string(),
      attempted: report.attempted,
      replayed: report.replayed,
      failed: report.failed,
    }
  }
}
