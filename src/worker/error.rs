use thiserror::Error;
use url::Url;

use crate::net::NetworkError;

/// The only failures an application session ever observes.
#[derive(Debug, Error)]
pub enum FetchError {
  /// No response could be obtained and no cache entry applied
  #[error("fetch failed for {url}: {source}")]
  Network {
    url: Url,
    #[source]
    source: NetworkError,
  },
  /// A network-first request could not reach the network
  #[error("network unavailable for {url}: {source}")]
  Unavailable {
    url: Url,
    #[source]
    source: NetworkError,
  },
}

impl FetchError {
  pub fn url(&self) -> &Url {
    match self {
      Self::Network { url, .. } | Self::Unavailable { url, .. } => url,
    }
  }

  /// True for the explicit "show an offline indicator" outcome.
  pub fn is_unavailable(&self) -> bool {
    matches!(self, Self::Unavailable { .. })
  }
}

/// Install and activation failures.
#[derive(Debug, Error)]
pub enum LifecycleError {
  #[error("install of {version} failed: could not fetch manifest entry {url}: {source}")]
  ManifestFetch {
    version: String,
    url: Url,
    #[source]
    source: NetworkError,
  },
  #[error("install of {version} failed: manifest entry {url} returned status {status}")]
  ManifestStatus {
    version: String,
    url: Url,
    status: u16,
  },
  #[error("install of {version} failed: could not store namespace {namespace}: {reason}")]
  Storage {
    version: String,
    namespace: String,
    reason: String,
  },
  #[error("install of {version} was superseded by a newer install")]
  Superseded { version: String },
  #[error("no installed version is waiting to activate")]
  NothingWaiting,
}
