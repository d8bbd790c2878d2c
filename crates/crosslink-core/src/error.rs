//! Error types for crosslink.
//!
//! One enum covers the whole crate so callers match on a single type.
//! Per-item faults (a single cache row, a single suggestion) are isolated
//! by the components that produce them and never abort a batch; the
//! variants here surface the faults that do reach the caller.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Main error type for crosslink operations.
#[derive(Debug, Error)]
pub enum CrosslinkError {
    // Cache errors
    #[error("Cache entry of {size_bytes} bytes exceeds the {max_bytes} byte budget")]
    CacheFull { size_bytes: u64, max_bytes: u64 },

    #[error("Cache record for '{key}' is unreadable: {message}")]
    CacheCorruption { key: String, message: String },

    // Rate limiting
    #[error("Rate limited for host {host}, retry after {retry_after:?}")]
    RateLimited {
        host: String,
        retry_after: Option<Duration>,
    },

    // Configuration
    #[error("Invalid extraction pattern '{pattern}': {message}")]
    PatternConfig { pattern: String, message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    // Suggestion pipeline
    #[error("Text generation failed for {ticket_key}: {message}")]
    Generation { ticket_key: String, message: String },

    #[error("Apply failed for {ticket_key} (external write occurred: {wrote_remote}): {message}")]
    Apply {
        ticket_key: String,
        wrote_remote: bool,
        message: String,
    },

    #[error("Audit log write failed: {message}")]
    AuditWrite { message: String },

    // Collaborator boundary
    #[error("Remote service error{}: {message}", .status.map(|s| format!(" ({s})")).unwrap_or_default())]
    Remote {
        message: String,
        status: Option<u16>,
        retry_after: Option<Duration>,
    },

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    // Source control
    #[error("Git command failed: {message}")]
    Git { message: String },

    #[error("Not inside a git repository: {0}")]
    RepoNotFound(PathBuf),

    // Storage
    #[error("Database error: {message}")]
    Database {
        message: String,
        #[source]
        source: Option<rusqlite::Error>,
    },

    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    #[error("Resource '{resource}' is locked by another invocation")]
    LockBusy { resource: String },

    // Cancellation
    #[error("Operation was cancelled")]
    Cancelled,
}

/// Result type alias for crosslink operations.
pub type Result<T> = std::result::Result<T, CrosslinkError>;

impl From<std::io::Error> for CrosslinkError {
    fn from(err: std::io::Error) -> Self {
        CrosslinkError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for CrosslinkError {
    fn from(err: serde_json::Error) -> Self {
        CrosslinkError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<rusqlite::Error> for CrosslinkError {
    fn from(err: rusqlite::Error) -> Self {
        CrosslinkError::Database {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<reqwest::Error> for CrosslinkError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            CrosslinkError::Timeout(Duration::from_secs(0))
        } else {
            CrosslinkError::Remote {
                message: err.to_string(),
                status: err.status().map(|s| s.as_u16()),
                retry_after: None,
            }
        }
    }
}

impl CrosslinkError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        CrosslinkError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// Check if this error should trigger a retry.
    ///
    /// Rate-limit and transient transport failures are retryable; everything
    /// else (config, pattern, audit, apply) is not.
    pub fn is_retryable(&self) -> bool {
        match self {
            CrosslinkError::RateLimited { .. } | CrosslinkError::Timeout(_) => true,
            CrosslinkError::Remote { status, .. } => {
                matches!(status, None | Some(429) | Some(500..=599))
            }
            _ => false,
        }
    }

    /// The retry-after hint carried by rate-limit style errors, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            CrosslinkError::RateLimited { retry_after, .. }
            | CrosslinkError::Remote { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}
