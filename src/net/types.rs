//! Request and response values exchanged with the network and the cache.

use reqwest::Method;
use url::Url;

/// Status reported for opaque cross-origin responses.
pub const OPAQUE_STATUS: u16 = 0;

/// Returns true for methods that only read state and may be served from cache.
pub fn is_safe_method(method: &Method) -> bool {
  *method == Method::GET || *method == Method::HEAD
}

/// An outbound request issued by an application session.
#[derive(Debug, Clone)]
pub struct Request {
  pub method: Method,
  pub url: Url,
  pub headers: Vec<(String, String)>,
  pub body: Option<Vec<u8>>,
}

impl Request {
  pub fn new(method: Method, url: Url) -> Self {
    Self {
      method,
      url,
      headers: Vec::new(),
      body: None,
    }
  }

  pub fn get(url: Url) -> Self {
    Self::new(Method::GET, url)
  }

  pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.headers.push((name.into(), value.into()));
    self
  }

  pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
    self.body = Some(body.into());
    self
  }

  /// Whether this request is a safe read (eligible for caching).
  pub fn is_safe(&self) -> bool {
    is_safe_method(&self.method)
  }
}

/// A response as seen by the interception layer.
///
/// Payloads are opaque bytes; the layer never interprets them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
  /// Cross-origin response whose status cannot be inspected
  pub opaque: bool,
}

impl Response {
  pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
    Self {
      status,
      headers: Vec::new(),
      body: body.into(),
      opaque: false,
    }
  }

  /// An opaque response: servable bytes, unknown status.
  pub fn opaque(body: impl Into<Vec<u8>>) -> Self {
    Self {
      status: OPAQUE_STATUS,
      headers: Vec::new(),
      body: body.into(),
      opaque: true,
    }
  }

  pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.headers.push((name.into(), value.into()));
    self
  }

  /// Look up a header value (case-insensitive name match).
  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(n, _)| n.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }

  pub fn is_ok(&self) -> bool {
    (200..300).contains(&self.status)
  }

  /// Only successful or opaque responses are worth keeping in a namespace.
  pub fn is_cacheable(&self) -> bool {
    self.opaque || self.is_ok()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_safe_methods() {
    assert!(is_safe_method(&Method::GET));
    assert!(is_safe_method(&Method::HEAD));
    assert!(!is_safe_method(&Method::POST));
    assert!(!is_safe_method(&Method::PUT));
    assert!(!is_safe_method(&Method::DELETE));
    assert!(!is_safe_method(&Method::PATCH));
  }

  #[test]
  fn test_cacheable_responses() {
    assert!(Response::new(200, "ok").is_cacheable());
    assert!(Response::new(204, "").is_cacheable());
    assert!(Response::opaque("cdn bytes").is_cacheable());
    assert!(!Response::new(404, "missing").is_cacheable());
    assert!(!Response::new(500, "boom").is_cacheable());
  }

  #[test]
  fn test_header_lookup_ignores_case() {
    let response = Response::new(200, "").with_header("Content-Type", "text/css");
    assert_eq!(response.header("content-type"), Some("text/css"));
    assert_eq!(response.header("etag"), None);
  }
}
