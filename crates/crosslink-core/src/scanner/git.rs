//! Source-control history reading.
//!
//! The scanner consumes `CommitRecord`s through the `HistoryReader` trait;
//! `GitHistoryReader` is the in-tree implementation that shells out to
//! `git log` with a NUL-delimited format so commit bodies can't confuse the
//! parser. Entries that fail to parse are skipped, not fatal.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{CrosslinkError, Result};

/// Field separator inside one log record.
const FIELD_SEP: char = '\u{0}';
/// Record terminator between commits.
const RECORD_SEP: char = '\u{1}';

/// An immutable commit read from source control.
#[derive(Debug, Clone, PartialEq)]
pub struct CommitRecord {
    pub sha: String,
    pub message: String,
    pub author_name: String,
    pub author_email: String,
    pub timestamp: DateTime<Utc>,
    /// Branch the commit was read from, when known.
    pub branch: Option<String>,
}

impl CommitRecord {
    /// Abbreviated SHA.
    pub fn short_sha(&self) -> &str {
        &self.sha[..self.sha.len().min(7)]
    }

    /// First line of the commit message.
    pub fn subject(&self) -> &str {
        self.message.lines().next().unwrap_or("")
    }
}

/// A lazy, finite, restartable source of commit history.
#[async_trait]
pub trait HistoryReader: Send + Sync {
    /// Most recent commits first, up to `limit`, from `branch` or the
    /// currently checked-out branch.
    async fn recent_commits(&self, limit: usize, branch: Option<&str>) -> Result<Vec<CommitRecord>>;
}

/// `git`-subprocess-backed history reader.
pub struct GitHistoryReader {
    repo_path: PathBuf,
}

impl GitHistoryReader {
    pub fn new(repo_path: impl Into<PathBuf>) -> Self {
        Self {
            repo_path: repo_path.into(),
        }
    }

    pub fn repo_path(&self) -> &Path {
        &self.repo_path
    }

    /// Name of the currently checked-out branch, if any.
    pub async fn current_branch(&self) -> Result<Option<String>> {
        let out = self.run_git(&["branch", "--show-current"]).await?;
        let name = out.trim().to_string();
        Ok(if name.is_empty() { None } else { Some(name) })
    }

    async fn run_git(&self, args: &[&str]) -> Result<String> {
        debug!("Running: git {}", args.join(" "));
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.repo_path)
            .output()
            .await
            .map_err(|e| CrosslinkError::Git {
                message: format!("failed to spawn git: {e}"),
            })?;

        if !output.status.success() {
            return Err(CrosslinkError::Git {
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn parse_record(record: &str, branch: Option<&str>) -> Option<CommitRecord> {
        let parts: Vec<&str> = record.split(FIELD_SEP).collect();
        if parts.len() < 5 {
            return None;
        }

        let sha = parts[0].trim().to_string();
        if sha.is_empty() {
            return None;
        }
        let timestamp = DateTime::parse_from_rfc3339(parts[4].trim())
            .ok()?
            .with_timezone(&Utc);

        Some(CommitRecord {
            sha,
            message: parts[1].trim_end_matches('\n').to_string(),
            author_name: parts[2].to_string(),
            author_email: parts[3].to_string(),
            timestamp,
            branch: branch.map(|b| b.to_string()),
        })
    }
}

#[async_trait]
impl HistoryReader for GitHistoryReader {
    async fn recent_commits(&self, limit: usize, branch: Option<&str>) -> Result<Vec<CommitRecord>> {
        let branch_name = match branch {
            Some(b) => Some(b.to_string()),
            None => self.current_branch().await?,
        };

        let count_arg = format!("-{limit}");
        let format_arg = format!("--format=%H{FIELD_SEP}%B{FIELD_SEP}%an{FIELD_SEP}%ae{FIELD_SEP}%aI{RECORD_SEP}");
        let mut args: Vec<&str> = vec!["log", count_arg.as_str(), format_arg.as_str(), "--no-merges"];
        if let Some(ref b) = branch_name {
            args.push(b.as_str());
        }

        let stdout = self.run_git(&args).await?;

        let mut commits = Vec::new();
        for record in stdout.split(RECORD_SEP) {
            let record = record.trim_matches('\n');
            if record.is_empty() {
                continue;
            }
            match Self::parse_record(record, branch_name.as_deref()) {
                Some(commit) => commits.push(commit),
                None => warn!("Failed to parse commit record, skipping"),
            }
        }
        Ok(commits)
    }
}
