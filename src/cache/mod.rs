//! Cache namespaces: named, versioned buckets of request/response pairs.
//!
//! This module only stores and retrieves opaque responses. Deciding what to
//! cache, and when a namespace is current, belongs to the worker.

mod storage;
mod types;

pub use storage::{CacheStorage, MemoryStorage, SqliteStorage};
pub use types::{CacheResult, CacheSource, CachedResponse, RequestIdentity};
