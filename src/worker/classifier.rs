//! Per-request strategy selection.

use std::collections::BTreeSet;
use std::fmt;

use reqwest::Method;
use url::Url;

use super::manifest::Manifest;
use crate::net::{is_safe_method, Request};

pub const DEFAULT_API_PREFIX: &str = "/api/";

pub const DEFAULT_STATIC_EXTENSIONS: &[&str] = &[
  "css", "js", "mjs", "woff", "woff2", "ttf", "otf", "eot", "png", "jpg", "jpeg", "gif", "svg",
  "webp", "ico", "avif",
];

/// The worker script must always come from the network.
pub const DEFAULT_BYPASS: &[&str] = &["/service-worker.js"];

/// How an intercepted request is resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
  /// Serve from the namespace, populate it on a miss
  CacheFirst,
  /// Prefer the live network, fail explicitly when unreachable
  NetworkFirst,
  /// Forward to the network, never touch the cache
  Passthrough,
}

impl fmt::Display for Strategy {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      Self::CacheFirst => "cache-first",
      Self::NetworkFirst => "network-first",
      Self::Passthrough => "passthrough",
    };
    f.write_str(name)
  }
}

/// Pure function from request identity to [`Strategy`].
#[derive(Debug, Clone)]
pub struct Classifier {
  origin: Url,
  manifest: Manifest,
  api_prefix: String,
  static_extensions: BTreeSet<String>,
  bypass: BTreeSet<String>,
}

impl Classifier {
  pub fn new(origin: Url, manifest: Manifest) -> Self {
    Self {
      origin,
      manifest,
      api_prefix: DEFAULT_API_PREFIX.to_string(),
      static_extensions: DEFAULT_STATIC_EXTENSIONS
        .iter()
        .map(|s| s.to_string())
        .collect(),
      bypass: DEFAULT_BYPASS.iter().map(|s| s.to_string()).collect(),
    }
  }

  pub fn with_api_prefix(mut self, prefix: impl Into<String>) -> Self {
    self.api_prefix = prefix.into();
    self
  }

  pub fn with_static_extensions(mut self, extensions: BTreeSet<String>) -> Self {
    self.static_extensions = extensions;
    self
  }

  pub fn with_bypass(mut self, paths: BTreeSet<String>) -> Self {
    self.bypass = paths;
    self
  }

  pub fn manifest(&self) -> &Manifest {
    &self.manifest
  }

  pub fn classify(&self, request: &Request) -> Strategy {
    self.classify_parts(&request.method, &request.url)
  }

  /// Priority order:
  /// 1. non-safe method, non-http scheme or bypassed path: passthrough
  /// 2. verbatim manifest entry (any origin): cache-first
  /// 3. cross-origin: network-first
  /// 4. under the API prefix: network-first
  /// 5. static asset extension: cache-first
  /// 6. anything else: network-first
  pub fn classify_parts(&self, method: &Method, url: &Url) -> Strategy {
    if !is_safe_method(method) || !matches!(url.scheme(), "http" | "https") {
      return Strategy::Passthrough;
    }

    let same_origin = url.origin() == self.origin.origin();
    if same_origin && self.bypass.contains(url.path()) {
      return Strategy::Passthrough;
    }

    if self.manifest.contains(url) {
      return Strategy::CacheFirst;
    }

    if !same_origin || url.path().starts_with(&self.api_prefix) {
      return Strategy::NetworkFirst;
    }

    if self.is_static_asset(url) {
      Strategy::CacheFirst
    } else {
      Strategy::NetworkFirst
    }
  }

  fn is_static_asset(&self, url: &Url) -> bool {
    let file_name = url.path().rsplit('/').next().unwrap_or_default();
    match file_name.rsplit_once('.') {
      Some((stem, ext)) if !stem.is_empty() => {
        self.static_extensions.contains(&ext.to_ascii_lowercase())
      }
      _ => false,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn classifier() -> Classifier {
    let origin = Url::parse("http://localhost:5000").unwrap();
    let manifest = Manifest::resolve(
      &origin,
      [
        "/",
        "/static/css/style.css",
        "https://cdn.jsdelivr.net/npm/bootstrap@5.3.0/dist/css/bootstrap.min.css",
      ],
    )
    .unwrap();
    Classifier::new(origin, manifest)
  }

  fn classify(method: Method, url: &str) -> Strategy {
    classifier().classify_parts(&method, &Url::parse(url).unwrap())
  }

  #[test]
  fn test_non_safe_methods_pass_through_regardless_of_url() {
    for method in [Method::POST, Method::PUT, Method::DELETE, Method::PATCH] {
      assert_eq!(
        classify(method.clone(), "http://localhost:5000/static/css/style.css"),
        Strategy::Passthrough
      );
      assert_eq!(
        classify(method, "http://localhost:5000/api/equipment/items/3"),
        Strategy::Passthrough
      );
    }
  }

  #[test]
  fn test_manifest_entries_are_cache_first() {
    assert_eq!(
      classify(Method::GET, "http://localhost:5000/"),
      Strategy::CacheFirst
    );
    assert_eq!(
      classify(
        Method::GET,
        "https://cdn.jsdelivr.net/npm/bootstrap@5.3.0/dist/css/bootstrap.min.css"
      ),
      Strategy::CacheFirst
    );
  }

  #[test]
  fn test_static_assets_are_cache_first() {
    for url in [
      "http://localhost:5000/static/js/equipment.js",
      "http://localhost:5000/static/img/logo.PNG",
      "http://localhost:5000/static/fonts/inter.woff2",
      "http://localhost:5000/favicon.ico",
    ] {
      assert_eq!(classify(Method::GET, url), Strategy::CacheFirst, "{url}");
    }
  }

  #[test]
  fn test_api_paths_are_network_first() {
    assert_eq!(
      classify(Method::GET, "http://localhost:5000/api/equipment/items"),
      Strategy::NetworkFirst
    );
    // Even when they look like a static file
    assert_eq!(
      classify(Method::GET, "http://localhost:5000/api/equipment/export.csv"),
      Strategy::NetworkFirst
    );
    assert_eq!(
      classify(Method::GET, "http://localhost:5000/api/reports/chart.png"),
      Strategy::NetworkFirst
    );
  }

  #[test]
  fn test_unlisted_cross_origin_is_network_first() {
    assert_eq!(
      classify(Method::GET, "https://cdn.example.com/lib/other.js"),
      Strategy::NetworkFirst
    );
  }

  #[test]
  fn test_pages_are_network_first() {
    assert_eq!(
      classify(Method::GET, "http://localhost:5000/equipment/details/4"),
      Strategy::NetworkFirst
    );
    assert_eq!(
      classify(Method::GET, "http://localhost:5000/.css"),
      Strategy::NetworkFirst
    );
  }

  #[test]
  fn test_worker_script_is_bypassed() {
    assert_eq!(
      classify(Method::GET, "http://localhost:5000/service-worker.js"),
      Strategy::Passthrough
    );
  }

  #[test]
  fn test_non_http_schemes_pass_through() {
    assert_eq!(
      classify(Method::GET, "data:text/plain,hello"),
      Strategy::Passthrough
    );
  }

  #[test]
  fn test_head_is_classified_like_get() {
    assert_eq!(
      classify(Method::HEAD, "http://localhost:5000/static/css/style.css"),
      Strategy::CacheFirst
    );
  }

  #[test]
  fn test_custom_api_prefix() {
    let origin = Url::parse("http://localhost:5000").unwrap();
    let classifier = Classifier::new(origin, Manifest::default()).with_api_prefix("/data/");
    let url = Url::parse("http://localhost:5000/data/logo.png").unwrap();
    assert_eq!(classifier.classify_parts(&Method::GET, &url), Strategy::NetworkFirst);
  }
}
