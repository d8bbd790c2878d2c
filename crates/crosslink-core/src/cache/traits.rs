//! Cache backend trait and types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::Result;

/// A cached entry with metadata.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// The cached data as bytes.
    pub value: Vec<u8>,
    /// When the entry was cached.
    pub cached_at: DateTime<Utc>,
    /// When the entry expires.
    pub expires_at: DateTime<Utc>,
    /// Size of the cached data in bytes.
    pub size_bytes: u64,
    /// When the entry was last read.
    pub last_accessed: DateTime<Utc>,
}

/// Statistics over live (unexpired) entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStats {
    pub entry_count: usize,
    pub total_size_bytes: u64,
    pub max_size_bytes: u64,
}

/// Generic cache backend trait.
///
/// Provides namespace-isolated key-value storage with TTL support and a
/// size budget. Reads never distinguish "never set" from "expired": both
/// are a miss. All operations are synchronous to match rusqlite's API.
pub trait CacheBackend: Send + Sync {
    /// Get cached data by key.
    ///
    /// Returns `None` if the key doesn't exist, has expired, or the stored
    /// record is unreadable (corruption degrades to a miss).
    fn get(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>>;

    /// Get cached data with full entry metadata.
    fn get_entry(&self, namespace: &str, key: &str) -> Result<Option<CacheEntry>>;

    /// Set cached data with TTL.
    ///
    /// Fully replaces any existing entry with the same key (value, TTL and
    /// size accounting). Evicts least-recently-read entries as needed to
    /// stay under the size budget; an entry larger than the whole budget is
    /// rejected with `CacheFull` and evicts nothing.
    fn put(&self, namespace: &str, key: &str, value: &[u8], ttl: Duration) -> Result<()>;

    /// Set cached data with an explicit expiration time.
    fn put_with_expiry(
        &self,
        namespace: &str,
        key: &str,
        value: &[u8],
        expires_at: DateTime<Utc>,
    ) -> Result<()>;

    /// Invalidate (delete) a specific key. Returns whether a row existed.
    fn invalidate(&self, namespace: &str, key: &str) -> Result<bool>;

    /// Invalidate all keys in a namespace. Returns the number removed.
    fn invalidate_namespace(&self, namespace: &str) -> Result<usize>;

    /// Statistics over live entries.
    fn stats(&self) -> Result<CacheStats>;

    /// Remove expired entries. Optional for correctness (reads re-check
    /// expiry); keeps the file small.
    fn cleanup_expired(&self) -> Result<usize>;
}
