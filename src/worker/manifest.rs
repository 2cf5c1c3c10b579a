use color_eyre::{eyre::eyre, Result};
use url::Url;

use crate::net::Request;

/// The fixed list of shell URLs eagerly cached on install.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
  entries: Vec<Url>,
}

impl Manifest {
  /// Resolve manifest entries against the application origin.
  ///
  /// Absolute entries (e.g. CDN assets) are kept as-is. Duplicates collapse
  /// to their first occurrence.
  pub fn resolve<I, S>(origin: &Url, entries: I) -> Result<Self>
  where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
  {
    let mut resolved: Vec<Url> = Vec::new();
    for entry in entries {
      let entry = entry.as_ref();
      let mut url = origin
        .join(entry)
        .map_err(|e| eyre!("Invalid manifest entry '{}': {}", entry, e))?;
      url.set_fragment(None);
      if !resolved.contains(&url) {
        resolved.push(url);
      }
    }
    Ok(Self { entries: resolved })
  }

  pub fn urls(&self) -> &[Url] {
    &self.entries
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  /// Whether `url` is listed verbatim (fragment ignored).
  pub fn contains(&self, url: &Url) -> bool {
    if url.fragment().is_none() {
      return self.entries.contains(url);
    }
    let mut bare = url.clone();
    bare.set_fragment(None);
    self.entries.contains(&bare)
  }

  /// GET requests used to populate a namespace.
  pub fn requests(&self) -> impl Iterator<Item = Request> + '_ {
    self.entries.iter().cloned().map(Request::get)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn origin() -> Url {
    Url::parse("http://localhost:5000").unwrap()
  }

  #[test]
  fn test_resolves_relative_and_absolute_entries() {
    let manifest = Manifest::resolve(
      &origin(),
      [
        "/",
        "/static/css/style.css",
        "https://cdn.jsdelivr.net/npm/bootstrap@5.3.0/dist/js/bootstrap.bundle.min.js",
      ],
    )
    .unwrap();

    let urls: Vec<&str> = manifest.urls().iter().map(Url::as_str).collect();
    assert_eq!(
      urls,
      vec![
        "http://localhost:5000/",
        "http://localhost:5000/static/css/style.css",
        "https://cdn.jsdelivr.net/npm/bootstrap@5.3.0/dist/js/bootstrap.bundle.min.js",
      ]
    );
  }

  #[test]
  fn test_deduplicates_entries() {
    let manifest = Manifest::resolve(&origin(), ["/shell.css", "shell.css", "/shell.css#x"]).unwrap();
    assert_eq!(manifest.len(), 1);
  }

  #[test]
  fn test_contains_ignores_fragment() {
    let manifest = Manifest::resolve(&origin(), ["/shell.js"]).unwrap();
    assert!(manifest.contains(&Url::parse("http://localhost:5000/shell.js#v").unwrap()));
    assert!(!manifest.contains(&Url::parse("http://localhost:5000/shell.js?v=2").unwrap()));
  }

  #[test]
  fn test_requests_are_gets() {
    let manifest = Manifest::resolve(&origin(), ["/a.css", "/b.js"]).unwrap();
    let requests: Vec<Request> = manifest.requests().collect();
    assert_eq!(requests.len(), 2);
    assert!(requests.iter().all(Request::is_safe));
  }
}
