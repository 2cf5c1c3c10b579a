//! Cache storage trait plus in-memory and SQLite implementations.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::types::{CachedResponse, RequestIdentity};
use crate::net::Response;

/// Key-value store of request identity to response, partitioned by namespace.
///
/// Writes into a namespace that does not exist fail rather than recreating
/// it, so a namespace deleted during activation cannot come back through a
/// late write from an in-flight request.
pub trait CacheStorage: Send + Sync {
  /// Create the namespace if missing. Returns true when it was created.
  fn open_namespace(&self, name: &str) -> Result<bool>;

  /// Names of all existing namespaces.
  fn list_namespaces(&self) -> Result<Vec<String>>;

  /// Delete a namespace and every entry in it. Returns false if it was absent.
  fn delete_namespace(&self, name: &str) -> Result<bool>;

  /// Look up a single entry.
  fn get(&self, namespace: &str, identity: &RequestIdentity) -> Result<Option<CachedResponse>>;

  /// Store (or overwrite) a single entry.
  fn put(&self, namespace: &str, identity: &RequestIdentity, response: &Response) -> Result<()>;

  /// Create the namespace if missing and store every entry, in one atomic
  /// step. On failure neither the namespace nor any entry is left behind.
  fn populate(&self, namespace: &str, entries: &[(RequestIdentity, Response)]) -> Result<()>;

  /// Number of entries in a namespace (0 if it does not exist).
  fn entry_count(&self, namespace: &str) -> Result<usize>;
}

fn ensure_cacheable(identity: &RequestIdentity) -> Result<()> {
  if identity.is_cacheable() {
    Ok(())
  } else {
    Err(eyre!("Refusing to cache non-safe request {}", identity))
  }
}

/// In-process storage. Nothing survives the process.
#[derive(Default)]
pub struct MemoryStorage {
  namespaces: Mutex<BTreeMap<String, HashMap<String, CachedResponse>>>,
}

impl MemoryStorage {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(
    &self,
  ) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, HashMap<String, CachedResponse>>>> {
    self
      .namespaces
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

impl CacheStorage for MemoryStorage {
  fn open_namespace(&self, name: &str) -> Result<bool> {
    let mut namespaces = self.lock()?;
    if namespaces.contains_key(name) {
      return Ok(false);
    }
    namespaces.insert(name.to_string(), HashMap::new());
    Ok(true)
  }

  fn list_namespaces(&self) -> Result<Vec<String>> {
    Ok(self.lock()?.keys().cloned().collect())
  }

  fn delete_namespace(&self, name: &str) -> Result<bool> {
    Ok(self.lock()?.remove(name).is_some())
  }

  fn get(&self, namespace: &str, identity: &RequestIdentity) -> Result<Option<CachedResponse>> {
    let namespaces = self.lock()?;
    Ok(
      namespaces
        .get(namespace)
        .and_then(|entries| entries.get(&identity.cache_key()))
        .cloned(),
    )
  }

  fn put(&self, namespace: &str, identity: &RequestIdentity, response: &Response) -> Result<()> {
    ensure_cacheable(identity)?;

    let mut namespaces = self.lock()?;
    let bucket = namespaces
      .get_mut(namespace)
      .ok_or_else(|| eyre!("Cache namespace {} does not exist", namespace))?;
    bucket.insert(
      identity.cache_key(),
      CachedResponse {
        response: response.clone(),
        cached_at: Utc::now(),
      },
    );
    Ok(())
  }

  fn populate(&self, namespace: &str, entries: &[(RequestIdentity, Response)]) -> Result<()> {
    for (identity, _) in entries {
      ensure_cacheable(identity)?;
    }

    let mut namespaces = self.lock()?;
    let bucket = namespaces.entry(namespace.to_string()).or_default();
    let cached_at = Utc::now();
    for (identity, response) in entries {
      bucket.insert(
        identity.cache_key(),
        CachedResponse {
          response: response.clone(),
          cached_at,
        },
      );
    }
    Ok(())
  }

  fn entry_count(&self, namespace: &str) -> Result<usize> {
    Ok(self.lock()?.get(namespace).map_or(0, HashMap::len))
  }
}

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open (or create) the database at the given path.
  pub fn open(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  /// Open a private in-memory database.
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;
    Self::with_connection(conn)
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("shellcache").join("cache.db"))
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;
    Ok(storage)
  }

  fn run_migrations(&self) -> Result<()> {
    self
      .lock()?
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
    self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS namespaces (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- One row per request identity; body kept as raw bytes
CREATE TABLE IF NOT EXISTS entries (
    namespace TEXT NOT NULL,
    request_key TEXT NOT NULL,
    method TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    opaque INTEGER NOT NULL DEFAULT 0,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (namespace, request_key),
    FOREIGN KEY (namespace) REFERENCES namespaces(name) ON DELETE CASCADE
);
"#;

fn namespace_exists(conn: &Connection, name: &str) -> Result<bool> {
  conn
    .query_row(
      "SELECT 1 FROM namespaces WHERE name = ?",
      params![name],
      |_| Ok(()),
    )
    .optional()
    .map(|row| row.is_some())
    .map_err(|e| eyre!("Failed to look up namespace {}: {}", name, e))
}

fn insert_entry(
  conn: &Connection,
  namespace: &str,
  identity: &RequestIdentity,
  response: &Response,
) -> Result<()> {
  let headers = serde_json::to_string(&response.headers)
    .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

  conn
    .execute(
      "INSERT OR REPLACE INTO entries
         (namespace, request_key, method, url, status, headers, body, opaque, cached_at)
       VALUES (?, ?, ?, ?, ?, ?, ?, ?, datetime('now'))",
      params![
        namespace,
        identity.cache_key(),
        identity.method().as_str(),
        identity.url().as_str(),
        response.status,
        headers,
        response.body,
        response.opaque,
      ],
    )
    .map_err(|e| eyre!("Failed to store {}: {}", identity, e))?;

  Ok(())
}

impl CacheStorage for SqliteStorage {
  fn open_namespace(&self, name: &str) -> Result<bool> {
    let conn = self.lock()?;
    let inserted = conn
      .execute(
        "INSERT OR IGNORE INTO namespaces (name) VALUES (?)",
        params![name],
      )
      .map_err(|e| eyre!("Failed to create namespace {}: {}", name, e))?;
    Ok(inserted > 0)
  }

  fn list_namespaces(&self) -> Result<Vec<String>> {
    let conn = self.lock()?;
    let mut stmt = conn
      .prepare("SELECT name FROM namespaces ORDER BY name")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list namespaces: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read namespace name: {}", e))?;

    Ok(names)
  }

  fn delete_namespace(&self, name: &str) -> Result<bool> {
    let conn = self.lock()?;
    let deleted = conn
      .execute("DELETE FROM namespaces WHERE name = ?", params![name])
      .map_err(|e| eyre!("Failed to delete namespace {}: {}", name, e))?;
    Ok(deleted > 0)
  }

  fn get(&self, namespace: &str, identity: &RequestIdentity) -> Result<Option<CachedResponse>> {
    let conn = self.lock()?;
    let row: Option<(u16, String, Vec<u8>, bool, String)> = conn
      .query_row(
        "SELECT status, headers, body, opaque, cached_at FROM entries
         WHERE namespace = ? AND request_key = ?",
        params![namespace, identity.cache_key()],
        |row| {
          Ok((
            row.get(0)?,
            row.get(1)?,
            row.get(2)?,
            row.get(3)?,
            row.get(4)?,
          ))
        },
      )
      .optional()
      .map_err(|e| eyre!("Failed to read {}: {}", identity, e))?;

    let Some((status, headers, body, opaque, cached_at)) = row else {
      return Ok(None);
    };

    let headers = serde_json::from_str(&headers)
      .map_err(|e| eyre!("Failed to deserialize headers for {}: {}", identity, e))?;

    Ok(Some(CachedResponse {
      response: Response {
        status,
        headers,
        body,
        opaque,
      },
      cached_at: parse_datetime(&cached_at)?,
    }))
  }

  fn put(&self, namespace: &str, identity: &RequestIdentity, response: &Response) -> Result<()> {
    ensure_cacheable(identity)?;

    let conn = self.lock()?;
    if !namespace_exists(&conn, namespace)? {
      return Err(eyre!("Cache namespace {} does not exist", namespace));
    }
    insert_entry(&conn, namespace, identity, response)
  }

  fn populate(&self, namespace: &str, entries: &[(RequestIdentity, Response)]) -> Result<()> {
    for (identity, _) in entries {
      ensure_cacheable(identity)?;
    }

    let mut conn = self.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(
      "INSERT OR IGNORE INTO namespaces (name) VALUES (?)",
      params![namespace],
    )
    .map_err(|e| eyre!("Failed to create namespace {}: {}", namespace, e))?;
    for (identity, response) in entries {
      insert_entry(&tx, namespace, identity, response)?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))
  }

  fn entry_count(&self, namespace: &str) -> Result<usize> {
    let conn = self.lock()?;
    let count: i64 = conn
      .query_row(
        "SELECT COUNT(*) FROM entries WHERE namespace = ?",
        params![namespace],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to count entries in {}: {}", namespace, e))?;

    usize::try_from(count).map_err(|e| eyre!("Invalid entry count {}: {}", count, e))
  }
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}
