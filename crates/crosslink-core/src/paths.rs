//! Repository discovery and on-disk state layout.
//!
//! All shared mutable state (cache, rate budgets, audit log, lock files)
//! lives under a single `.crosslink/` directory at the repository root so
//! that every invocation against the same project converges on the same
//! files.

use std::path::{Path, PathBuf};
use std::process::Command;

use crate::config::PathsConfig;
use crate::error::{CrosslinkError, Result};

/// Find the root of the git repository containing `start`.
pub fn discover_repo_root(start: &Path) -> Result<PathBuf> {
    let output = Command::new("git")
        .args(["rev-parse", "--show-toplevel"])
        .current_dir(start)
        .output()
        .map_err(|_| CrosslinkError::RepoNotFound(start.to_path_buf()))?;

    if !output.status.success() {
        return Err(CrosslinkError::RepoNotFound(start.to_path_buf()));
    }

    let root = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if root.is_empty() {
        return Err(CrosslinkError::RepoNotFound(start.to_path_buf()));
    }
    Ok(PathBuf::from(root))
}

/// Resolved locations of the durable per-project resources.
#[derive(Debug, Clone)]
pub struct StatePaths {
    repo_root: PathBuf,
}

impl StatePaths {
    /// Build the layout for a known repository root.
    pub fn new(repo_root: impl Into<PathBuf>) -> Self {
        Self {
            repo_root: repo_root.into(),
        }
    }

    /// Build the layout by discovering the repository root from `start`.
    pub fn discover(start: &Path) -> Result<Self> {
        Ok(Self::new(discover_repo_root(start)?))
    }

    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    pub fn state_dir(&self) -> PathBuf {
        self.repo_root.join(PathsConfig::STATE_DIR_NAME)
    }

    pub fn cache_db(&self) -> PathBuf {
        self.state_dir().join(PathsConfig::CACHE_DB_FILENAME)
    }

    pub fn limits_db(&self) -> PathBuf {
        self.state_dir().join(PathsConfig::LIMITS_DB_FILENAME)
    }

    pub fn audit_log(&self) -> PathBuf {
        self.state_dir().join(PathsConfig::AUDIT_LOG_FILENAME)
    }

    pub fn locks_dir(&self) -> PathBuf {
        self.state_dir().join(PathsConfig::LOCKS_DIR_NAME)
    }

    /// Create the state directories if they don't exist.
    pub fn ensure(&self) -> Result<()> {
        for dir in [self.state_dir(), self.locks_dir()] {
            std::fs::create_dir_all(&dir)
                .map_err(|e| CrosslinkError::io_with_path(e, dir.clone()))?;
        }
        Ok(())
    }
}
