use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use url::Url;

use crate::worker::{DEFAULT_API_PREFIX, DEFAULT_BYPASS, DEFAULT_STATIC_EXTENSIONS};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  /// Version tag of the deployed shell; changes on every deploy
  pub version: String,
  /// Origin of the application, used to resolve relative manifest entries
  pub origin: Url,
  #[serde(default = "default_cache_prefix")]
  pub cache_prefix: String,
  /// URLs eagerly cached on install (relative to origin, or absolute)
  #[serde(default)]
  pub manifest: Vec<String>,
  /// Path prefix of dynamic data endpoints
  #[serde(default = "default_api_prefix")]
  pub api_prefix: String,
  /// File extensions treated as static assets (case-insensitive)
  #[serde(
    default = "default_static_extensions",
    deserialize_with = "deserialize_lowercase_set"
  )]
  pub static_extensions: BTreeSet<String>,
  /// Same-origin paths that are never intercepted
  #[serde(default = "default_bypass")]
  pub bypass: BTreeSet<String>,
  /// Offer a cached copy when a network-first request fails
  #[serde(default)]
  pub network_first_fallback: bool,
  #[serde(default)]
  pub storage: StorageConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfig {
  /// SQLite database file (defaults to $XDG_DATA_HOME/shellcache/cache.db)
  pub path: Option<PathBuf>,
}

fn default_cache_prefix() -> String {
  "shell".to_string()
}

fn default_api_prefix() -> String {
  DEFAULT_API_PREFIX.to_string()
}

fn default_static_extensions() -> BTreeSet<String> {
  DEFAULT_STATIC_EXTENSIONS
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_bypass() -> BTreeSet<String> {
  DEFAULT_BYPASS.iter().map(|s| s.to_string()).collect()
}

fn deserialize_lowercase_set<'de, D>(deserializer: D) -> Result<BTreeSet<String>, D::Error>
where
  D: serde::Deserializer<'de>,
{
  let v: Vec<String> = Vec::deserialize(deserializer)?;
  Ok(
    v.into_iter()
      .map(|s| s.trim_start_matches('.').to_lowercase())
      .collect(),
  )
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./shellcache.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/shellcache/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/shellcache/config.yaml\n\
                 See shellcache.example.yaml for the format."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("shellcache.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("shellcache").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Invalid config file {}: {}", path.display(), e))
  }

  /// Parse and validate configuration from a YAML string.
  pub fn from_yaml(contents: &str) -> Result<Self> {
    let config: Config =
      serde_yaml::from_str(contents).map_err(|e| eyre!("Failed to parse config: {}", e))?;
    config.validate()?;
    Ok(config)
  }

  fn validate(&self) -> Result<()> {
    if self.version.trim().is_empty() {
      return Err(eyre!("version must not be empty"));
    }
    if self.cache_prefix.trim().is_empty() {
      return Err(eyre!("cache_prefix must not be empty"));
    }
    if !matches!(self.origin.scheme(), "http" | "https") {
      return Err(eyre!(
        "origin must be an http(s) URL, got {}",
        self.origin
      ));
    }
    if !self.api_prefix.starts_with('/') {
      return Err(eyre!("api_prefix must start with '/': {}", self.api_prefix));
    }
    Ok(())
  }

  /// Name of the cache namespace for the configured version.
  pub fn namespace(&self) -> String {
    crate::worker::namespace_name(&self.cache_prefix, &self.version)
  }

  /// Resolved path of the cache database.
  pub fn storage_path(&self) -> Result<PathBuf> {
    match &self.storage.path {
      Some(path) => Ok(path.clone()),
      None => crate::cache::SqliteStorage::default_path(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  const MINIMAL: &str = "version: v1\norigin: http://localhost:5000\n";

  #[test]
  fn test_defaults() {
    let config = Config::from_yaml(MINIMAL).unwrap();
    assert_eq!(config.namespace(), "shell-v1");
    assert_eq!(config.api_prefix, "/api/");
    assert!(config.manifest.is_empty());
    assert!(config.static_extensions.contains("css"));
    assert!(config.static_extensions.contains("woff2"));
    assert!(config.bypass.contains("/service-worker.js"));
    assert!(!config.network_first_fallback);
    assert!(config.storage.path.is_none());
  }

  #[test]
  fn test_full_config() {
    let yaml = r#"
version: "2024.06.1"
origin: https://trackhub.example
cache_prefix: trackhub
manifest:
  - /
  - /static/css/style.css
  - https://cdn.jsdelivr.net/npm/bootstrap@5.3.0/dist/css/bootstrap.min.css
api_prefix: /api/
static_extensions: [".CSS", js]
network_first_fallback: true
storage:
  path: /tmp/shellcache-test.db
"#;
    let config = Config::from_yaml(yaml).unwrap();
    assert_eq!(config.namespace(), "trackhub-2024.06.1");
    assert_eq!(config.manifest.len(), 3);
    assert_eq!(
      config.static_extensions,
      BTreeSet::from(["css".to_string(), "js".to_string()])
    );
    assert!(config.network_first_fallback);
    assert_eq!(
      config.storage_path().unwrap(),
      PathBuf::from("/tmp/shellcache-test.db")
    );
  }

  #[test]
  fn test_rejects_non_http_origin() {
    let err = Config::from_yaml("version: v1\norigin: file:///srv/app\n").unwrap_err();
    assert!(err.to_string().contains("origin"));
  }

  #[test]
  fn test_rejects_empty_version() {
    assert!(Config::from_yaml("version: ''\norigin: http://localhost:5000\n").is_err());
  }

  #[test]
  fn test_rejects_relative_api_prefix() {
    let yaml = "version: v1\norigin: http://localhost:5000\napi_prefix: api\n";
    assert!(Config::from_yaml(yaml).is_err());
  }

  #[test]
  fn test_load_explicit_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("shellcache.yaml");
    std::fs::write(&path, MINIMAL).unwrap();

    let config = Config::load(Some(&path)).unwrap();
    assert_eq!(config.version, "v1");
  }

  #[test]
  fn test_load_missing_explicit_path() {
    let dir = tempfile::tempdir().unwrap();
    let err = Config::load(Some(&dir.path().join("nope.yaml"))).unwrap_err();
    assert!(err.to_string().contains("Config file not found"));
  }
}
