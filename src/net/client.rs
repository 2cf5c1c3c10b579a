use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use reqwest::header::HeaderMap;
use thiserror::Error;
use tracing::debug;

use super::types::{Request, Response};

/// Failure to obtain any response from the network.
#[derive(Debug, Error)]
pub enum NetworkError {
  #[error("transport error: {0}")]
  Transport(#[from] reqwest::Error),
  #[error("network is offline")]
  Offline,
  #[error("network unreachable: {0}")]
  Unreachable(String),
}

/// Something that can turn a request into a response.
///
/// An HTTP error status is still a response; only transport-level failures
/// are errors.
#[async_trait]
pub trait Network: Send + Sync {
  async fn fetch(&self, request: &Request) -> Result<Response, NetworkError>;
}

/// Network backed by a reqwest client.
#[derive(Clone)]
pub struct HttpNetwork {
  client: reqwest::Client,
}

impl HttpNetwork {
  pub fn new() -> Result<Self> {
    let client = reqwest::Client::builder()
      .user_agent(concat!("shellcache/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client })
  }
}

#[async_trait]
impl Network for HttpNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response, NetworkError> {
    let mut builder = self
      .client
      .request(request.method.clone(), request.url.clone());

    for (name, value) in &request.headers {
      builder = builder.header(name.as_str(), value.as_str());
    }
    if let Some(body) = &request.body {
      builder = builder.body(body.clone());
    }

    let response = builder.send().await.map_err(send_error)?;
    let status = response.status().as_u16();
    let headers = collect_headers(response.headers());
    let body = response.bytes().await?.to_vec();

    Ok(Response {
      status,
      headers,
      body,
      opaque: false,
    })
  }
}

/// A refused or failed connection means the host is unreachable; anything
/// else is a transport error.
fn send_error(e: reqwest::Error) -> NetworkError {
  if e.is_connect() {
    let target = e
      .url()
      .map(|url| url.to_string())
      .unwrap_or_else(|| "unknown host".to_string());
    debug!(target = %target, error = %e, "connection failed");
    NetworkError::Unreachable(target)
  } else {
    NetworkError::Transport(e)
  }
}

/// Header values that are not valid UTF-8 are dropped.
fn collect_headers(headers: &HeaderMap) -> Vec<(String, String)> {
  headers
    .iter()
    .filter_map(|(name, value)| match value.to_str() {
      Ok(v) => Some((name.as_str().to_string(), v.to_string())),
      Err(_) => {
        debug!(header = %name, "dropping non-UTF-8 header value");
        None
      }
    })
    .collect()
}

/// Network that is never reachable.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineNetwork;

#[async_trait]
impl Network for OfflineNetwork {
  async fn fetch(&self, _request: &Request) -> Result<Response, NetworkError> {
    Err(NetworkError::Offline)
  }
}
