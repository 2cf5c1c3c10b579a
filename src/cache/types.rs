//! Core types for cached request/response pairs.

use std::fmt;

use chrono::{DateTime, Utc};
use reqwest::Method;
use sha2::{Digest, Sha256};
use url::Url;

use crate::net::{is_safe_method, Request, Response};

/// The cache key of a request: its method and absolute URL.
///
/// Fragments never reach the network, so they are not part of the identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestIdentity {
  method: Method,
  url: Url,
}

impl RequestIdentity {
  pub fn new(method: Method, url: &Url) -> Self {
    let mut url = url.clone();
    url.set_fragment(None);
    Self { method, url }
  }

  pub fn of(request: &Request) -> Self {
    Self::new(request.method.clone(), &request.url)
  }

  pub fn method(&self) -> &Method {
    &self.method
  }

  pub fn url(&self) -> &Url {
    &self.url
  }

  /// Non-safe methods never get a cache entry.
  pub fn is_cacheable(&self) -> bool {
    is_safe_method(&self.method)
  }

  /// Stable, fixed-length storage key.
  pub fn cache_key(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.to_string().as_bytes());
    hex::encode(hasher.finalize())
  }
}

impl fmt::Display for RequestIdentity {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{} {}", self.method, self.url)
  }
}

/// A stored response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResponse {
  pub response: Response,
  /// When the entry was written
  pub cached_at: DateTime<Utc>,
}

/// Result of an intercepted request, including where the response came from.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
  /// When the data was cached (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl<T> CacheResult<T> {
  /// Fresh data from the network.
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      cached_at: None,
    }
  }

  /// Data served from the current namespace.
  pub fn from_cache(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::Cache,
      cached_at: Some(cached_at),
    }
  }

  /// Data forwarded untouched from the network.
  pub fn passthrough(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Passthrough,
      cached_at: None,
    }
  }

  /// Degraded data: the network failed and a cached copy was offered instead.
  pub fn stale_fallback(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::StaleFallback,
      cached_at: Some(cached_at),
    }
  }

  /// Whether this result must not be presented as fresh data.
  pub fn is_degraded(&self) -> bool {
    self.source == CacheSource::StaleFallback
  }
}

/// Indicates where a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Live network response
  Network,
  /// Served from the current namespace without touching the network
  Cache,
  /// Forwarded to the network without consulting the cache
  Passthrough,
  /// Network failed; cached copy offered as a degraded fallback
  StaleFallback,
}

impl fmt::Display for CacheSource {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      Self::Network => "network",
      Self::Cache => "cache",
      Self::Passthrough => "passthrough",
      Self::StaleFallback => "stale-fallback",
    };
    f.write_str(name)
  }
}
