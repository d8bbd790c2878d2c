//! Persisted token-bucket limiter.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use tracing::{debug, warn};

use crate::config::LimiterSettings;
use crate::error::{CrosslinkError, Result};

const BUSY_TIMEOUT_MS: u32 = 5_000;

/// Outcome of one `acquire` evaluation.
///
/// The limiter never sleeps; a `Wait` tells the caller how long to suspend
/// before re-evaluating.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Decision {
    /// Tokens were consumed; the request may proceed now.
    Granted,
    /// Insufficient tokens; retry after the given duration.
    Wait(Duration),
    /// The cost exceeds the burst capacity and can never be satisfied.
    Denied,
}

/// A host's persisted budget, for inspection.
#[derive(Debug, Clone)]
pub struct HostBudget {
    pub host: String,
    pub tokens: f64,
    pub last_refill: DateTime<Utc>,
    pub burst_capacity: f64,
    pub refill_rate_per_sec: f64,
    pub penalty_until: Option<DateTime<Utc>>,
}

/// Token-bucket rate limiter with one SQLite row per host.
///
/// Refill is lazy: tokens accrue at `refill_rate_per_sec` whenever the
/// budget is next evaluated, capped at `burst_capacity`. The balance never
/// goes negative; shortfalls produce `Wait`, not debt.
pub struct RateLimiter {
    conn: Arc<Mutex<Connection>>,
    settings: LimiterSettings,
}

impl RateLimiter {
    /// Open (or create) the budget database at `db_path`.
    pub fn open(db_path: impl AsRef<Path>, settings: LimiterSettings) -> Result<Self> {
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
            CREATE TABLE IF NOT EXISTS host_budgets (
                host TEXT PRIMARY KEY,
                tokens REAL NOT NULL,
                last_refill TEXT NOT NULL,
                penalty_until TEXT
            );
            "#,
        )?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            settings,
        })
    }

    /// Evaluate (and on success consume) `cost` tokens for `host`.
    ///
    /// The read, refill and consume happen in one IMMEDIATE transaction so
    /// two concurrent invocations can't both spend the same tokens.
    pub fn acquire(&self, host: &str, cost: f64) -> Result<Decision> {
        if cost > self.settings.burst_capacity {
            return Ok(Decision::Denied);
        }

        let mut conn = self.lock_conn()?;
        let now = Utc::now();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let (mut tokens, last_refill, penalty_until) = Self::read_budget(&tx, host, &self.settings, now)?;

        // A penalty window overrides the refill schedule entirely.
        if let Some(until) = penalty_until {
            if until > now {
                let wait = (until - now).to_std().unwrap_or(Duration::ZERO);
                tx.commit()?;
                return Ok(Decision::Wait(wait));
            }
        }

        // Lazy refill since the last evaluation, capped at burst.
        let elapsed = (now - last_refill).to_std().unwrap_or(Duration::ZERO);
        tokens = (tokens + elapsed.as_secs_f64() * self.settings.refill_rate_per_sec)
            .min(self.settings.burst_capacity);

        let decision = if tokens >= cost {
            tokens -= cost;
            Decision::Granted
        } else {
            let deficit = cost - tokens;
            Decision::Wait(Duration::from_secs_f64(
                deficit / self.settings.refill_rate_per_sec,
            ))
        };

        tx.execute(
            r#"
            INSERT INTO host_budgets (host, tokens, last_refill, penalty_until)
            VALUES (?1, ?2, ?3, NULL)
            ON CONFLICT(host) DO UPDATE SET
                tokens = ?2,
                last_refill = ?3,
                penalty_until = NULL
            "#,
            params![host, tokens, now.to_rfc3339()],
        )?;
        tx.commit()?;

        Ok(decision)
    }

    /// React to an observed rejection (e.g. HTTP 429) from `host`.
    ///
    /// Zeroes the budget and blocks grants until `retry_after` elapses, so a
    /// single observed rejection protects every concurrent caller sharing
    /// the persisted budget.
    pub fn penalize(&self, host: &str, retry_after: Duration) -> Result<()> {
        let mut conn = self.lock_conn()?;
        let now = Utc::now();
        let until = now + chrono::Duration::from_std(retry_after).unwrap_or_default();

        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute(
            r#"
            INSERT INTO host_budgets (host, tokens, last_refill, penalty_until)
            VALUES (?1, 0.0, ?2, ?3)
            ON CONFLICT(host) DO UPDATE SET
                tokens = 0.0,
                last_refill = ?2,
                penalty_until = ?3
            "#,
            params![host, now.to_rfc3339(), until.to_rfc3339()],
        )?;
        tx.commit()?;

        warn!("Penalized host {} for {:?}", host, retry_after);
        Ok(())
    }

    /// Inspect the persisted budget for `host`, if one exists.
    pub fn budget(&self, host: &str) -> Result<Option<HostBudget>> {
        let conn = self.lock_conn()?;

        let row: Option<(f64, String, Option<String>)> = conn
            .query_row(
                "SELECT tokens, last_refill, penalty_until FROM host_budgets WHERE host = ?1",
                params![host],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        let Some((tokens, last_refill_str, penalty_str)) = row else {
            return Ok(None);
        };

        let last_refill = DateTime::parse_from_rfc3339(&last_refill_str)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now());
        let penalty_until = penalty_str
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|dt| dt.with_timezone(&Utc));

        Ok(Some(HostBudget {
            host: host.to_string(),
            tokens,
            last_refill,
            burst_capacity: self.settings.burst_capacity,
            refill_rate_per_sec: self.settings.refill_rate_per_sec,
            penalty_until,
        }))
    }

    fn lock_conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| CrosslinkError::Database {
            message: "Failed to acquire limiter connection lock".to_string(),
            source: None,
        })
    }

    /// Read (or initialize) a host row. A row with unreadable timestamps is
    /// reset to a full budget rather than wedging the host forever.
    fn read_budget(
        tx: &rusqlite::Transaction<'_>,
        host: &str,
        settings: &LimiterSettings,
        now: DateTime<Utc>,
    ) -> Result<(f64, DateTime<Utc>, Option<DateTime<Utc>>)> {
        let row: Option<(f64, String, Option<String>)> = tx
            .query_row(
                "SELECT tokens, last_refill, penalty_until FROM host_budgets WHERE host = ?1",
                params![host],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        let Some((tokens, last_refill_str, penalty_str)) = row else {
            // First sight of this host: start with a full bucket.
            return Ok((settings.burst_capacity, now, None));
        };

        let last_refill = match DateTime::parse_from_rfc3339(&last_refill_str) {
            Ok(dt) => dt.with_timezone(&Utc),
            Err(e) => {
                debug!("Resetting unreadable budget row for {}: {}", host, e);
                return Ok((settings.burst_capacity, now, None));
            }
        };
        let penalty_until = penalty_str
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|dt| dt.with_timezone(&Utc));

        // Clamp: a hand-edited or stale row never yields more than burst
        // or less than zero.
        let tokens = tokens.clamp(0.0, settings.burst_capacity);

        Ok((tokens, last_refill, penalty_until))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_limiter(refill: f64, burst: f64) -> (TempDir, RateLimiter) {
        let temp = TempDir::new().unwrap();
        let limiter = RateLimiter::open(
            temp.path().join("limits.sqlite"),
            LimiterSettings {
                refill_rate_per_sec: refill,
                burst_capacity: burst,
            },
        )
        .unwrap();
        (temp, limiter)
    }

    #[test]
    fn test_grants_within_burst() {
        let (_temp, limiter) = create_test_limiter(1.0, 3.0);

        for _ in 0..3 {
            assert_eq!(limiter.acquire("api.example.com", 1.0).unwrap(), Decision::Granted);
        }
        // Bucket drained: next acquire must wait.
        match limiter.acquire("api.example.com", 1.0).unwrap() {
            Decision::Wait(d) => assert!(d > Duration::ZERO && d <= Duration::from_secs(1)),
            other => panic!("expected Wait, got {:?}", other),
        }
    }

    #[test]
    fn test_never_grants_above_burst_or_below_zero() {
        let (_temp, limiter) = create_test_limiter(1000.0, 5.0);

        // Even after a refill-heavy idle period the balance caps at burst.
        limiter.acquire("h", 1.0).unwrap();
        std::thread::sleep(Duration::from_millis(50));
        limiter.acquire("h", 1.0).unwrap();

        let budget = limiter.budget("h").unwrap().unwrap();
        assert!(budget.tokens <= 5.0);
        assert!(budget.tokens >= 0.0);
    }

    #[test]
    fn test_denied_when_cost_exceeds_burst() {
        let (_temp, limiter) = create_test_limiter(1.0, 5.0);
        assert_eq!(limiter.acquire("h", 6.0).unwrap(), Decision::Denied);
    }

    #[test]
    fn test_penalize_blocks_until_retry_after_elapses() {
        let (_temp, limiter) = create_test_limiter(100.0, 10.0);

        limiter.penalize("h", Duration::from_millis(80)).unwrap();
        match limiter.acquire("h", 1.0).unwrap() {
            Decision::Wait(d) => assert!(d <= Duration::from_millis(80)),
            other => panic!("expected Wait during penalty, got {:?}", other),
        }

        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(limiter.acquire("h", 1.0).unwrap(), Decision::Granted);
    }

    #[test]
    fn test_budget_survives_reopen() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("limits.sqlite");
        let settings = LimiterSettings {
            refill_rate_per_sec: 0.001,
            burst_capacity: 2.0,
        };

        let limiter = RateLimiter::open(&path, settings.clone()).unwrap();
        assert_eq!(limiter.acquire("h", 2.0).unwrap(), Decision::Granted);
        drop(limiter);

        // A separate invocation sees the drained bucket.
        let reopened = RateLimiter::open(&path, settings).unwrap();
        match reopened.acquire("h", 1.0).unwrap() {
            Decision::Wait(_) => {}
            other => panic!("expected Wait after reopen, got {:?}", other),
        }
    }

    #[test]
    fn test_hosts_are_independent() {
        let (_temp, limiter) = create_test_limiter(0.001, 1.0);

        assert_eq!(limiter.acquire("a", 1.0).unwrap(), Decision::Granted);
        assert_eq!(limiter.acquire("b", 1.0).unwrap(), Decision::Granted);
        assert!(matches!(limiter.acquire("a", 1.0).unwrap(), Decision::Wait(_)));
    }
}
