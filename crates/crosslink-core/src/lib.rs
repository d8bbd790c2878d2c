//! Crosslink Core - Headless library correlating source-control activity
//! with external ticket/document records.
//!
//! This crate provides the core engine behind the crosslink tooling: it
//! scans git history for ticket references, drafts updates through a
//! text-generation collaborator, and routes every state-changing action
//! through an audited, dry-run-by-default gate. CLI, TUI and web front-ends
//! live outside this crate and drive it through [`Crosslink`].
//!
//! Multiple invocations (an interactive command, a TUI session, a local web
//! server request) may run at overlapping times against the same project;
//! the cache, rate budgets and audit log are durable, cross-process-safe
//! resources under the repository's `.crosslink/` directory.
//!
//! # Example
//!
//! ```rust,ignore
//! use crosslink_core::{ApplyMode, CancellationToken, Crosslink, CrosslinkConfig};
//!
//! #[tokio::main]
//! async fn main() -> crosslink_core::Result<()> {
//!     let app = Crosslink::discover(
//!         std::env::current_dir()?.as_path(),
//!         CrosslinkConfig::default(),
//!         remote_client,   // impl RemoteClient (external crate)
//!         generator,       // impl Generator (external crate)
//!     )?;
//!
//!     let batch = app.suggest_recent(10, None, &CancellationToken::new()).await?;
//!     for mut suggestion in batch.suggestions {
//!         // Dry-run by default: simulated, audited, no external write.
//!         let report = app.apply(&mut suggestion, ApplyMode::Default).await?;
//!         println!("{}: {:?}", report.ticket_key, report.outcome);
//!     }
//!     Ok(())
//! }
//! ```

pub mod audit;
pub mod cache;
pub mod cancel;
pub mod config;
pub mod error;
pub mod gate;
pub mod lockfile;
pub mod paths;
pub mod ratelimit;
pub mod scanner;
pub mod suggest;

// Re-export commonly used types
pub use audit::{payload_digest, AuditEntry, AuditLog, AuditOutcome};
pub use cache::{query_fingerprint, CacheBackend, CacheEntry, CacheStats, SqliteCache};
pub use cancel::CancellationToken;
pub use config::{CrosslinkConfig, ThresholdMode};
pub use error::{CrosslinkError, Result};
pub use gate::{ApplyMode, ApplyReport, DryRunGate};
pub use paths::StatePaths;
pub use ratelimit::{Decision, RateLimiter};
pub use scanner::{scan, CommitRecord, GitHistoryReader, HistoryReader, PatternSet, TicketReference};
pub use suggest::{
    GeneratedUpdate, Generator, RemoteClient, ResourceKind, SuggestBatch, Suggestion,
    SuggestionEngine, SuggestionStatus,
};

use std::path::Path;
use std::sync::Arc;

/// Main entry point wiring the durable stores, the suggestion engine and
/// the dry-run gate for one repository.
pub struct Crosslink {
    paths: StatePaths,
    patterns: PatternSet,
    cache: Arc<SqliteCache>,
    limiter: Arc<RateLimiter>,
    audit: Arc<AuditLog>,
    reader: GitHistoryReader,
    engine: SuggestionEngine,
    gate: DryRunGate,
}

impl Crosslink {
    /// Open a workspace at a known repository root.
    ///
    /// Validates the configuration (compiling the extraction patterns) and
    /// opens the shared on-disk state under `.crosslink/`.
    pub fn open(
        repo_root: impl AsRef<Path>,
        config: CrosslinkConfig,
        remote: Arc<dyn RemoteClient>,
        generator: Arc<dyn Generator>,
    ) -> Result<Self> {
        let patterns = config.validate()?;

        let paths = StatePaths::new(repo_root.as_ref());
        paths.ensure()?;

        let cache = Arc::new(SqliteCache::open(paths.cache_db(), config.cache.clone())?);
        let limiter = Arc::new(RateLimiter::open(
            paths.limits_db(),
            config.limiter.clone(),
        )?);
        let audit = Arc::new(AuditLog::open(paths.audit_log()));
        let reader = GitHistoryReader::new(paths.repo_root());

        let engine = SuggestionEngine::new(
            cache.clone(),
            limiter.clone(),
            remote.clone(),
            generator,
            config.suggest.clone(),
            config.cache.default_ttl,
        );
        let gate = DryRunGate::new(
            audit.clone(),
            remote,
            paths.locks_dir(),
            config.apply.dry_run_default,
            config.actor.name.clone(),
        );

        Ok(Self {
            paths,
            patterns,
            cache,
            limiter,
            audit,
            reader,
            engine,
            gate,
        })
    }

    /// Open a workspace by discovering the repository root from `start`.
    pub fn discover(
        start: &Path,
        config: CrosslinkConfig,
        remote: Arc<dyn RemoteClient>,
        generator: Arc<dyn Generator>,
    ) -> Result<Self> {
        let root = paths::discover_repo_root(start)?;
        Self::open(root, config, remote, generator)
    }

    pub fn repo_root(&self) -> &Path {
        self.paths.repo_root()
    }

    /// Scan the most recent history window for ticket references.
    ///
    /// Returns the commits read and the ordered, deduplicated references
    /// extracted from them.
    pub async fn scan_recent(
        &self,
        limit: usize,
        branch: Option<&str>,
    ) -> Result<(Vec<CommitRecord>, Vec<TicketReference>)> {
        let commits = self.reader.recent_commits(limit, branch).await?;
        let references = scan(&commits, &self.patterns);
        Ok((commits, references))
    }

    /// Scan recent history and draft suggestions for every referenced
    /// ticket. Per-ticket failures are reported in the batch, not raised.
    pub async fn suggest_recent(
        &self,
        limit: usize,
        branch: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<SuggestBatch> {
        let (commits, references) = self.scan_recent(limit, branch).await?;
        Ok(self.engine.suggest(&references, &commits, cancel).await)
    }

    /// Apply one suggestion through the dry-run gate.
    pub async fn apply(&self, suggestion: &mut Suggestion, mode: ApplyMode) -> Result<ApplyReport> {
        self.gate.apply(suggestion, mode).await
    }

    /// Explicitly reject a suggestion (terminal, audited).
    pub fn reject(&self, suggestion: &mut Suggestion) -> Result<()> {
        self.gate.reject(suggestion)
    }

    /// Statistics over the live cache contents.
    pub fn cache_stats(&self) -> Result<CacheStats> {
        self.cache.stats()
    }

    /// Drop a cached record, forcing the next suggest to re-fetch it.
    pub fn invalidate_context(&self, resource: ResourceKind, id: &str) -> Result<bool> {
        self.cache.invalidate(resource.namespace(), id)
    }

    /// The audit trail, oldest first.
    pub fn audit_entries(&self) -> Result<Vec<AuditEntry>> {
        self.audit.entries()
    }

    /// Inspect the persisted rate budget for a host.
    pub fn rate_budget(&self, host: &str) -> Result<Option<ratelimit::HostBudget>> {
        self.limiter.budget(host)
    }
}
