//! Configuration surface consumed by the crosslink core.
//!
//! The core never parses configuration files; the host layer deserializes
//! into these structs (serde) and hands them over. `CrosslinkConfig::validate`
//! is the fail-fast gate: malformed extraction patterns and out-of-range
//! values are rejected here, before any scanning or suggestion work starts.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CrosslinkError, Result};
use crate::scanner::PatternSet;

/// Default pattern matches PROJ-123 style ticket keys.
pub const DEFAULT_TICKET_PATTERN: &str = r"\b([A-Z][A-Z0-9]+-\d+)\b";

/// Top-level configuration for a crosslink workspace.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct CrosslinkConfig {
    /// Actor name recorded in audit entries.
    pub actor: ActorConfig,
    pub scan: ScanSettings,
    pub cache: CacheSettings,
    pub limiter: LimiterSettings,
    pub suggest: SuggestSettings,
    pub apply: ApplySettings,
}

impl CrosslinkConfig {
    /// Validate the whole configuration and compile the extraction patterns.
    ///
    /// Returns the compiled pattern set so callers pay the regex compilation
    /// cost exactly once, at load time.
    pub fn validate(&self) -> Result<PatternSet> {
        self.cache.validate()?;
        self.limiter.validate()?;
        self.suggest.validate()?;
        PatternSet::compile(&self.scan.commit_patterns, &self.scan.branch_patterns)
    }
}

/// Identity recorded as `actor` on every audit entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ActorConfig {
    pub name: String,
}

impl Default for ActorConfig {
    fn default() -> Self {
        Self {
            name: "crosslink".to_string(),
        }
    }
}

/// Ticket-key extraction patterns for commit messages and branch names.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ScanSettings {
    /// Regex patterns applied to commit messages. Capture group 1, when
    /// present, yields the ticket key; otherwise the whole match does.
    pub commit_patterns: Vec<String>,
    /// Regex patterns applied to branch names.
    pub branch_patterns: Vec<String>,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            commit_patterns: vec![DEFAULT_TICKET_PATTERN.to_string()],
            branch_patterns: vec![DEFAULT_TICKET_PATTERN.to_string()],
        }
    }
}

/// Cache TTL and size budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct CacheSettings {
    /// Default TTL for cache entries.
    pub default_ttl: Duration,
    /// Maximum total size of live entries in bytes.
    pub max_size_bytes: u64,
}

impl CacheSettings {
    /// Default time-to-live for cache entries (5 minutes).
    pub const DEFAULT_TTL_SECS: u64 = 300;
    /// Default maximum cache size (100 MB).
    pub const DEFAULT_MAX_SIZE_BYTES: u64 = 100 * 1024 * 1024;

    fn validate(&self) -> Result<()> {
        if self.default_ttl.is_zero() {
            return Err(CrosslinkError::Config {
                message: "cache.default_ttl must be greater than zero".to_string(),
            });
        }
        if self.max_size_bytes == 0 {
            return Err(CrosslinkError::Config {
                message: "cache.max_size_bytes must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(CacheSettings::DEFAULT_TTL_SECS),
            max_size_bytes: CacheSettings::DEFAULT_MAX_SIZE_BYTES,
        }
    }
}

/// Per-host token-bucket parameters shared by every invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LimiterSettings {
    /// Tokens replenished per second.
    pub refill_rate_per_sec: f64,
    /// Maximum tokens a host budget can hold.
    pub burst_capacity: f64,
}

impl LimiterSettings {
    pub const DEFAULT_REFILL_RATE: f64 = 2.0;
    pub const DEFAULT_BURST_CAPACITY: f64 = 10.0;

    fn validate(&self) -> Result<()> {
        if !(self.refill_rate_per_sec > 0.0) {
            return Err(CrosslinkError::Config {
                message: "limiter.refill_rate_per_sec must be positive".to_string(),
            });
        }
        if !(self.burst_capacity >= 1.0) {
            return Err(CrosslinkError::Config {
                message: "limiter.burst_capacity must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

impl Default for LimiterSettings {
    fn default() -> Self {
        Self {
            refill_rate_per_sec: LimiterSettings::DEFAULT_REFILL_RATE,
            burst_capacity: LimiterSettings::DEFAULT_BURST_CAPACITY,
        }
    }
}

/// Whether a confidence exactly at the threshold is accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdMode {
    /// `confidence >= threshold` passes (the default).
    #[default]
    Inclusive,
    /// `confidence > threshold` passes.
    Exclusive,
}

impl ThresholdMode {
    /// Whether a result with `confidence` clears `threshold` under this mode.
    pub fn accepts(&self, confidence: f64, threshold: f64) -> bool {
        match self {
            ThresholdMode::Inclusive => confidence >= threshold,
            ThresholdMode::Exclusive => confidence > threshold,
        }
    }
}

/// Suggestion engine parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SuggestSettings {
    /// Minimum confidence a generated suggestion must meet to be surfaced.
    pub confidence_threshold: f64,
    pub threshold_mode: ThresholdMode,
    /// Maximum number of commits summarized per ticket.
    pub context_depth: usize,
}

impl SuggestSettings {
    pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.7;
    pub const DEFAULT_CONTEXT_DEPTH: usize = 10;

    fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(CrosslinkError::Config {
                message: format!(
                    "suggest.confidence_threshold must be within [0.0, 1.0], got {}",
                    self.confidence_threshold
                ),
            });
        }
        if self.context_depth == 0 {
            return Err(CrosslinkError::Config {
                message: "suggest.context_depth must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

impl Default for SuggestSettings {
    fn default() -> Self {
        Self {
            confidence_threshold: SuggestSettings::DEFAULT_CONFIDENCE_THRESHOLD,
            threshold_mode: ThresholdMode::default(),
            context_depth: SuggestSettings::DEFAULT_CONTEXT_DEPTH,
        }
    }
}

/// Write-path defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ApplySettings {
    /// When true (the default), every apply simulates unless the caller
    /// passes an explicit execute signal.
    pub dry_run_default: bool,
}

impl Default for ApplySettings {
    fn default() -> Self {
        Self {
            dry_run_default: true,
        }
    }
}

/// Engine-level timeouts and retry bounds.
pub struct EngineConfig;

impl EngineConfig {
    /// Timeout for one text-generation call.
    pub const GENERATE_TIMEOUT: Duration = Duration::from_secs(60);
    /// Timeout for one remote fetch.
    pub const FETCH_TIMEOUT: Duration = Duration::from_secs(30);
    /// How many times the engine re-evaluates `acquire` for one fetch
    /// before giving up on that item.
    pub const ACQUIRE_MAX_ATTEMPTS: u32 = 5;
    /// Remote fetch retry attempts (transient failures).
    pub const FETCH_RETRY_ATTEMPTS: u32 = 3;
}

/// On-disk layout under the repository root.
pub struct PathsConfig;

impl PathsConfig {
    pub const STATE_DIR_NAME: &'static str = ".crosslink";
    pub const CACHE_DB_FILENAME: &'static str = "cache.sqlite";
    pub const LIMITS_DB_FILENAME: &'static str = "limits.sqlite";
    pub const AUDIT_LOG_FILENAME: &'static str = "audit.log";
    pub const LOCKS_DIR_NAME: &'static str = "locks";
}
