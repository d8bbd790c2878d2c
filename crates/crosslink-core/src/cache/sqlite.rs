//! SQLite-based cache implementation.
//!
//! One database file per project, shared by every invocation. WAL mode plus
//! a busy timeout handle cross-process readers; eviction and replacement run
//! inside IMMEDIATE transactions so two concurrent writers never both
//! account the same budget.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use tracing::{debug, warn};

use super::traits::{CacheBackend, CacheEntry, CacheStats};
use crate::config::CacheSettings;
use crate::error::{CrosslinkError, Result};

/// How long a connection waits on a cross-process writer before failing.
const BUSY_TIMEOUT_MS: u32 = 5_000;

/// SQLite-backed cache.
///
/// Thread-safe via an internal mutex on the connection; cross-process safe
/// via WAL and transaction scope.
pub struct SqliteCache {
    conn: Arc<Mutex<Connection>>,
    settings: CacheSettings,
}

impl SqliteCache {
    /// Open (or create) the cache at `db_path`.
    pub fn open(db_path: impl AsRef<Path>, settings: CacheSettings) -> Result<Self> {
        let db_path = db_path.as_ref();

        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| CrosslinkError::io_with_path(e, parent.to_path_buf()))?;
        }

        let conn = Connection::open(db_path)?;
        conn.execute_batch(&format!(
            "PRAGMA journal_mode=WAL;\n\
             PRAGMA busy_timeout={BUSY_TIMEOUT_MS};\n\
             PRAGMA synchronous=NORMAL;"
        ))?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS cache_entries (
                namespace TEXT NOT NULL,
                key TEXT NOT NULL,
                value BLOB NOT NULL,
                cached_at TEXT NOT NULL,
                expires_at TEXT NOT NULL,
                size_bytes INTEGER NOT NULL,
                last_accessed TEXT NOT NULL,
                PRIMARY KEY (namespace, key)
            );

            CREATE INDEX IF NOT EXISTS idx_cache_expires
                ON cache_entries(expires_at);

            CREATE INDEX IF NOT EXISTS idx_cache_accessed
                ON cache_entries(last_accessed);
            "#,
        )?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            settings,
        })
    }

    pub fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    fn lock_conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| CrosslinkError::Database {
            message: "Failed to acquire cache connection lock".to_string(),
            source: None,
        })
    }

    /// Drop a row that failed to decode and report the miss.
    fn degrade_corrupt_row(conn: &Connection, namespace: &str, key: &str, message: &str) {
        warn!(
            "Cache record {}:{} unreadable, treating as miss: {}",
            namespace, key, message
        );
        let _ = conn.execute(
            "DELETE FROM cache_entries WHERE namespace = ?1 AND key = ?2",
            params![namespace, key],
        );
    }
}

type RawRow = (Vec<u8>, String, String, i64, String);

impl CacheBackend for SqliteCache {
    fn get(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>> {
        self.get_entry(namespace, key)
            .map(|opt| opt.map(|e| e.value))
    }

    fn get_entry(&self, namespace: &str, key: &str) -> Result<Option<CacheEntry>> {
        let conn = self.lock_conn()?;
        let now = Utc::now();

        let row: std::result::Result<Option<RawRow>, rusqlite::Error> = conn
            .query_row(
                r#"
                SELECT value, cached_at, expires_at, size_bytes, last_accessed
                FROM cache_entries
                WHERE namespace = ?1 AND key = ?2
                "#,
                params![namespace, key],
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
            .optional();

        let (value, cached_at_str, expires_at_str, size_bytes, last_accessed_str) = match row {
            Ok(Some(r)) => r,
            Ok(None) => return Ok(None),
            // A row that can't be decoded is corruption of that single
            // entry; the store itself stays healthy.
            Err(
                e @ (rusqlite::Error::InvalidColumnType(..) | rusqlite::Error::FromSqlConversionFailure(..)),
            ) => {
                Self::degrade_corrupt_row(&conn, namespace, key, &e.to_string());
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let parse = |s: &str| -> std::result::Result<DateTime<Utc>, chrono::ParseError> {
            DateTime::parse_from_rfc3339(s).map(|dt| dt.with_timezone(&Utc))
        };

        let (cached_at, expires_at, last_accessed) = match (
            parse(&cached_at_str),
            parse(&expires_at_str),
            parse(&last_accessed_str),
        ) {
            (Ok(c), Ok(e), Ok(a)) => (c, e, a),
            _ => {
                Self::degrade_corrupt_row(&conn, namespace, key, "invalid timestamp");
                return Ok(None);
            }
        };

        // Lazy expiry: an entry past its deadline is a miss and is
        // reclaimed on the spot.
        if expires_at <= now {
            let _ = conn.execute(
                "DELETE FROM cache_entries WHERE namespace = ?1 AND key = ?2",
                params![namespace, key],
            );
            return Ok(None);
        }

        // Reads refresh recency; eviction is least-recently-read.
        conn.execute(
            "UPDATE cache_entries SET last_accessed = ?1 WHERE namespace = ?2 AND key = ?3",
            params![now.to_rfc3339(), namespace, key],
        )?;

        Ok(Some(CacheEntry {
            value,
            cached_at,
            expires_at,
            size_bytes: size_bytes as u64,
            last_accessed,
        }))
    }

    fn put(&self, namespace: &str, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        let expires_at = Utc::now() + chrono::Duration::from_std(ttl).unwrap_or_default();
        self.put_with_expiry(namespace, key, value, expires_at)
    }

    fn put_with_expiry(
        &self,
        namespace: &str,
        key: &str,
        value: &[u8],
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        let size_bytes = value.len() as u64;
        let max_bytes = self.settings.max_size_bytes;

        if size_bytes > max_bytes {
            return Err(CrosslinkError::CacheFull {
                size_bytes,
                max_bytes,
            });
        }

        let mut conn = self.lock_conn()?;
        let now = Utc::now();
        let now_str = now.to_rfc3339();

        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        // Reclaim expired rows first so they never count against the budget
        // or survive an eviction pass they shouldn't.
        tx.execute(
            "DELETE FROM cache_entries WHERE expires_at <= ?1",
            params![now_str],
        )?;

        // Size of everything except the key being replaced.
        let other_size: i64 = tx.query_row(
            r#"
            SELECT COALESCE(SUM(size_bytes), 0) FROM cache_entries
            WHERE NOT (namespace = ?1 AND key = ?2)
            "#,
            params![namespace, key],
            |row| row.get(0),
        )?;

        let mut excess = (other_size as u64 + size_bytes).saturating_sub(max_bytes);
        if excess > 0 {
            let victims: Vec<(String, String, i64)> = {
                let mut stmt = tx.prepare(
                    r#"
                    SELECT namespace, key, size_bytes FROM cache_entries
                    WHERE NOT (namespace = ?1 AND key = ?2)
                    ORDER BY last_accessed ASC
                    "#,
                )?;
                let rows = stmt.query_map(params![namespace, key], |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?))
                })?;
                rows.collect::<std::result::Result<_, _>>()?
            };

            let mut evicted = 0usize;
            for (victim_ns, victim_key, victim_size) in victims {
                if excess == 0 {
                    break;
                }
                tx.execute(
                    "DELETE FROM cache_entries WHERE namespace = ?1 AND key = ?2",
                    params![victim_ns, victim_key],
                )?;
                excess = excess.saturating_sub(victim_size as u64);
                evicted += 1;
            }
            if evicted > 0 {
                debug!("Evicted {} cache entries to fit {}:{}", evicted, namespace, key);
            }
        }

        tx.execute(
            r#"
            INSERT OR REPLACE INTO cache_entries
            (namespace, key, value, cached_at, expires_at, size_bytes, last_accessed)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                namespace,
                key,
                value,
                now_str,
                expires_at.to_rfc3339(),
                size_bytes as i64,
                now_str
            ],
        )?;

        tx.commit()?;
        Ok(())
    }

    fn invalidate(&self, namespace: &str, key: &str) -> Result<bool> {
        let conn = self.lock_conn()?;
        let deleted = conn.execute(
            "DELETE FROM cache_entries WHERE namespace = ?1 AND key = ?2",
            params![namespace, key],
        )?;
        Ok(deleted > 0)
    }

    fn invalidate_namespace(&self, namespace: &str) -> Result<usize> {
        let conn = self.lock_conn()?;
        let deleted = conn.execute(
            "DELETE FROM cache_entries WHERE namespace = ?1",
            params![namespace],
        )?;
        debug!("Invalidated {} entries from namespace '{}'", deleted, namespace);
        Ok(deleted)
    }

    fn stats(&self) -> Result<CacheStats> {
        let conn = self.lock_conn()?;
        let now_str = Utc::now().to_rfc3339();

        let (entry_count, total_size): (i64, i64) = conn.query_row(
            r#"
            SELECT COUNT(*), COALESCE(SUM(size_bytes), 0)
            FROM cache_entries WHERE expires_at > ?1
            "#,
            params![now_str],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        Ok(CacheStats {
            entry_count: entry_count as usize,
            total_size_bytes: total_size as u64,
            max_size_bytes: self.settings.max_size_bytes,
        })
    }

    fn cleanup_expired(&self) -> Result<usize> {
        let conn = self.lock_conn()?;
        let deleted = conn.execute(
            "DELETE FROM cache_entries WHERE expires_at <= ?1",
            params![Utc::now().to_rfc3339()],
        )?;
        if deleted > 0 {
            debug!("Cleaned up {} expired cache entries", deleted);
        }
        Ok(deleted)
    }
}
