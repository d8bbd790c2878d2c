//! Append-only audit log.
//!
//! Every attempted and executed mutating action lands here, one immutable
//! JSON record per line. Appends hold an exclusive cross-process lock so
//! concurrent invocations never interleave partial records. Nothing in the
//! core ever rewrites or deletes a record.

use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::warn;
use uuid::Uuid;

use crate::error::{CrosslinkError, Result};
use crate::lockfile::ScopedLock;

/// How long an append waits on a concurrent writer before failing.
const APPEND_LOCK_WAIT: Duration = Duration::from_secs(5);

/// Final (or intent) state of an audited action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "reason")]
pub enum AuditOutcome {
    /// Intent record, written before a real external write is attempted.
    Attempted,
    /// Dry-run: fully evaluated, no external effect.
    Simulated,
    /// The external write succeeded.
    Succeeded,
    /// The external write failed; the action stays retryable.
    Failed(String),
}

/// One immutable audit record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Time-ordered unique id (UUIDv7).
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub actor: String,
    pub action: String,
    /// The acted-upon resource, e.g. a ticket key.
    pub target: String,
    pub dry_run: bool,
    /// SHA-256 of the proposed payload, so the log stays compact but
    /// verifiable.
    pub payload_digest: String,
    pub outcome: AuditOutcome,
}

impl AuditEntry {
    /// Build a new entry stamped with a fresh id and the current time.
    pub fn new(
        actor: impl Into<String>,
        action: impl Into<String>,
        target: impl Into<String>,
        dry_run: bool,
        payload_digest: impl Into<String>,
        outcome: AuditOutcome,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            timestamp: Utc::now(),
            actor: actor.into(),
            action: action.into(),
            target: target.into(),
            dry_run,
            payload_digest: payload_digest.into(),
            outcome,
        }
    }
}

/// SHA-256 hex digest of a payload, as recorded in audit entries.
pub fn payload_digest(payload: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(payload.as_bytes());
    hex::encode(hasher.finalize())
}

/// Durable append-only log, shared across invocations.
pub struct AuditLog {
    path: PathBuf,
    lock_path: PathBuf,
}

impl AuditLog {
    /// Use the log at `path`; the file is created on first append.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let lock_path = path.with_extension("lock");
        Self { path, lock_path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Durably append one record.
    ///
    /// The record is fully written and synced before the lock is released;
    /// failure at any step is `AuditWrite`, which callers on the apply path
    /// treat as fatal (an apply whose intent can't be recorded must not
    /// reach the external service).
    pub fn append(&self, entry: &AuditEntry) -> Result<()> {
        let _lock = ScopedLock::acquire(&self.lock_path, APPEND_LOCK_WAIT).map_err(|e| {
            CrosslinkError::AuditWrite {
                message: format!("could not lock audit log: {e}"),
            }
        })?;

        let line = serde_json::to_string(entry).map_err(|e| CrosslinkError::AuditWrite {
            message: format!("could not serialize audit entry: {e}"),
        })?;

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| CrosslinkError::AuditWrite {
                message: format!("could not create audit directory: {e}"),
            })?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| CrosslinkError::AuditWrite {
                message: format!("could not open audit log: {e}"),
            })?;

        file.write_all(line.as_bytes())
            .and_then(|_| file.write_all(b"\n"))
            .and_then(|_| file.flush())
            .and_then(|_| file.sync_data())
            .map_err(|e| CrosslinkError::AuditWrite {
                message: format!("could not append audit entry: {e}"),
            })?;

        Ok(())
    }

    /// Read every parseable record, oldest first.
    ///
    /// An unparseable line is skipped with a warning; the read side never
    /// mutates the log.
    pub fn entries(&self) -> Result<Vec<AuditEntry>> {
        let file = match std::fs::File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(CrosslinkError::io_with_path(e, self.path.clone())),
        };

        let reader = BufReader::new(file);
        let mut entries = Vec::new();
        for (lineno, line) in reader.lines().enumerate() {
            let line = line.map_err(|e| CrosslinkError::io_with_path(e, self.path.clone()))?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<AuditEntry>(&line) {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    warn!("Skipping unparseable audit line {}: {}", lineno + 1, e);
                }
            }
        }
        Ok(entries)
    }

    /// Records whose `target` matches, oldest first.
    pub fn entries_for_target(&self, target: &str) -> Result<Vec<AuditEntry>> {
        Ok(self
            .entries()?
            .into_iter()
            .filter(|e| e.target == target)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_log() -> (TempDir, AuditLog) {
        let temp = TempDir::new().unwrap();
        let log = AuditLog::open(temp.path().join("audit.log"));
        (temp, log)
    }

    fn entry(target: &str, outcome: AuditOutcome) -> AuditEntry {
        AuditEntry::new(
            "tester",
            "ticket.comment",
            target,
            true,
            payload_digest("proposed text"),
            outcome,
        )
    }

    #[test]
    fn test_append_and_read_back() {
        let (_temp, log) = create_test_log();

        log.append(&entry("PROJ-1", AuditOutcome::Simulated)).unwrap();
        log.append(&entry("PROJ-2", AuditOutcome::Attempted)).unwrap();

        let entries = log.entries().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].target, "PROJ-1");
        assert_eq!(entries[1].outcome, AuditOutcome::Attempted);
    }

    #[test]
    fn test_ids_are_time_ordered() {
        let (_temp, log) = create_test_log();

        for i in 0..5 {
            log.append(&entry(&format!("PROJ-{i}"), AuditOutcome::Simulated))
                .unwrap();
        }

        let entries = log.entries().unwrap();
        let mut ids: Vec<_> = entries.iter().map(|e| e.id).collect();
        let sorted = {
            let mut s = ids.clone();
            s.sort();
            s
        };
        assert_eq!(ids, sorted);
        ids.dedup();
        assert_eq!(ids.len(), 5);
    }

    #[test]
    fn test_corrupt_line_is_skipped_on_read() {
        let (_temp, log) = create_test_log();

        log.append(&entry("PROJ-1", AuditOutcome::Simulated)).unwrap();

        // Simulate a torn write from a crashed process.
        use std::io::Write as _;
        let mut file = OpenOptions::new().append(true).open(log.path()).unwrap();
        writeln!(file, "{{\"id\": \"truncat").unwrap();

        log.append(&entry("PROJ-2", AuditOutcome::Simulated)).unwrap();

        let entries = log.entries().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].target, "PROJ-2");
    }

    #[test]
    fn test_entries_for_target() {
        let (_temp, log) = create_test_log();

        log.append(&entry("PROJ-1", AuditOutcome::Attempted)).unwrap();
        log.append(&entry("PROJ-2", AuditOutcome::Simulated)).unwrap();
        log.append(&entry("PROJ-1", AuditOutcome::Failed("boom".into())))
            .unwrap();

        let for_one = log.entries_for_target("PROJ-1").unwrap();
        assert_eq!(for_one.len(), 2);
        assert_eq!(for_one[1].outcome, AuditOutcome::Failed("boom".into()));
    }

    #[test]
    fn test_missing_file_reads_empty() {
        let (_temp, log) = create_test_log();
        assert!(log.entries().unwrap().is_empty());
    }

    #[test]
    fn test_payload_digest_is_stable() {
        assert_eq!(payload_digest("x"), payload_digest("x"));
        assert_ne!(payload_digest("x"), payload_digest("y"));
        assert_eq!(payload_digest("x").len(), 64);
    }

    #[test]
    fn test_concurrent_appends_never_interleave() {
        let (_temp, log) = create_test_log();
        let log = std::sync::Arc::new(log);

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let log = log.clone();
                std::thread::spawn(move || {
                    for j in 0..10 {
                        log.append(&entry(&format!("PROJ-{i}-{j}"), AuditOutcome::Simulated))
                            .unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        // Every line parses: no torn or interleaved records.
        let entries = log.entries().unwrap();
        assert_eq!(entries.len(), 80);
    }
}
