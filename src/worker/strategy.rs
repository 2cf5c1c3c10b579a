//! Cache-first, network-first and passthrough resolution.

use tracing::{debug, warn};

use super::classifier::Strategy;
use super::error::FetchError;
use crate::cache::{CacheResult, CacheStorage, CachedResponse, RequestIdentity};
use crate::net::{Network, Request, Response};

/// Forward a request untouched. Used for passthrough and for sessions no
/// version controls.
pub async fn passthrough<N: Network + ?Sized>(
  network: &N,
  request: &Request,
) -> Result<CacheResult<Response>, FetchError> {
  network
    .fetch(request)
    .await
    .map(CacheResult::passthrough)
    .map_err(|source| FetchError::Network {
      url: request.url.clone(),
      source,
    })
}

/// Resolves a classified request against one namespace.
///
/// The namespace is passed in by the lifecycle controller; the executor never
/// decides which namespace is current.
pub struct StrategyExecutor<'a, S, N> {
  storage: &'a S,
  network: &'a N,
  namespace: &'a str,
  stale_fallback: bool,
}

impl<'a, S: CacheStorage, N: Network> StrategyExecutor<'a, S, N> {
  pub fn new(storage: &'a S, network: &'a N, namespace: &'a str) -> Self {
    Self {
      storage,
      network,
      namespace,
      stale_fallback: false,
    }
  }

  /// Offer a cached copy when network-first fails (off by default).
  pub fn with_stale_fallback(mut self, enabled: bool) -> Self {
    self.stale_fallback = enabled;
    self
  }

  pub async fn execute(
    &self,
    strategy: Strategy,
    request: &Request,
  ) -> Result<CacheResult<Response>, FetchError> {
    debug!(strategy = %strategy, method = %request.method, url = %request.url, "resolving request");
    match strategy {
      Strategy::CacheFirst => self.cache_first(request).await,
      Strategy::NetworkFirst => self.network_first(request).await,
      Strategy::Passthrough => passthrough(self.network, request).await,
    }
  }

  /// 1. Return the stored entry if present, without a network call
  /// 2. Otherwise fetch, store a copy if cacheable, return it
  /// 3. Network failure on a miss is a plain fetch failure
  pub async fn cache_first(&self, request: &Request) -> Result<CacheResult<Response>, FetchError> {
    let identity = RequestIdentity::of(request);
    if !identity.is_cacheable() {
      return passthrough(self.network, request).await;
    }

    if let Some(cached) = self.lookup(&identity) {
      debug!(namespace = self.namespace, request = %identity, "cache hit");
      return Ok(CacheResult::from_cache(cached.response, cached.cached_at));
    }

    debug!(namespace = self.namespace, request = %identity, "cache miss");
    let response = self
      .network
      .fetch(request)
      .await
      .map_err(|source| FetchError::Network {
        url: request.url.clone(),
        source,
      })?;

    if response.is_cacheable() {
      self.store(&identity, &response);
    } else {
      debug!(status = response.status, request = %identity, "not caching unsuccessful response");
    }

    Ok(CacheResult::from_network(response))
  }

  /// Always try the network. Responses are never cached here; on failure the
  /// caller gets [`FetchError::Unavailable`] unless stale fallback is enabled
  /// and an entry exists.
  pub async fn network_first(
    &self,
    request: &Request,
  ) -> Result<CacheResult<Response>, FetchError> {
    match self.network.fetch(request).await {
      Ok(response) => Ok(CacheResult::from_network(response)),
      Err(source) => {
        let identity = RequestIdentity::of(request);
        if self.stale_fallback && identity.is_cacheable() {
          if let Some(cached) = self.lookup(&identity) {
            warn!(request = %identity, error = %source, "network failed, serving stale fallback");
            return Ok(CacheResult::stale_fallback(
              cached.response,
              cached.cached_at,
            ));
          }
        }

        debug!(request = %identity, error = %source, "network unavailable");
        Err(FetchError::Unavailable {
          url: request.url.clone(),
          source,
        })
      }
    }
  }

  /// Storage errors degrade to a miss.
  fn lookup(&self, identity: &RequestIdentity) -> Option<CachedResponse> {
    match self.storage.get(self.namespace, identity) {
      Ok(entry) => entry,
      Err(e) => {
        warn!(namespace = self.namespace, request = %identity, error = %e, "cache lookup failed");
        None
      }
    }
  }

  /// Best-effort write; a failed write is skipped.
  fn store(&self, identity: &RequestIdentity, response: &Response) {
    if let Err(e) = self.storage.put(self.namespace, identity, response) {
      warn!(namespace = self.namespace, request = %identity, error = %e, "skipping cache write");
    }
  }
}
