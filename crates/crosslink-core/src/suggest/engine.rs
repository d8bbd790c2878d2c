//! The suggestion engine.
//!
//! Combines scanner output with cache-backed ticket context and the
//! text-generation capability, yielding confidence-filtered suggestions.
//! Every per-ticket fault (fetch, rate-limit exhaustion, generation error,
//! malformed response, timeout) fails that ticket alone; the batch
//! continues and partial results stay valid.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use super::classify::summarize_commits;
use super::generate::Generator;
use super::remote::{RemoteClient, ResourceKind};
use super::{Suggestion, SuggestionStatus};
use crate::cache::CacheBackend;
use crate::cancel::CancellationToken;
use crate::config::{EngineConfig, SuggestSettings};
use crate::error::{CrosslinkError, Result};
use crate::ratelimit::{retry_async, BackoffConfig, Decision, RateLimiter};
use crate::scanner::{CommitRecord, TicketReference};

/// Penalty applied for a 429 that carried no retry-after hint.
const DEFAULT_RATE_LIMIT_PENALTY: Duration = Duration::from_secs(60);
/// Penalty applied for a transient (5xx) server error.
const SERVER_ERROR_PENALTY: Duration = Duration::from_secs(15);

/// A per-ticket failure surfaced alongside the successful suggestions.
#[derive(Debug, Clone)]
pub struct SuggestFailure {
    pub ticket_key: String,
    pub error: String,
}

/// Result of one suggestion batch.
#[derive(Debug, Clone, Default)]
pub struct SuggestBatch {
    /// Threshold-accepted suggestions, all Pending.
    pub suggestions: Vec<Suggestion>,
    /// Tickets whose suggestion failed; the batch continued past them.
    pub failed: Vec<SuggestFailure>,
    /// Tickets whose generated confidence fell below the threshold.
    pub rejected_count: usize,
    /// True when the batch stopped early on cancellation; everything
    /// computed so far is still valid.
    pub cancelled: bool,
}

/// Correlation and suggestion engine.
pub struct SuggestionEngine {
    cache: Arc<dyn CacheBackend>,
    limiter: Arc<RateLimiter>,
    remote: Arc<dyn RemoteClient>,
    generator: Arc<dyn Generator>,
    settings: SuggestSettings,
    /// TTL applied when populating fetched ticket context.
    context_ttl: Duration,
}

impl SuggestionEngine {
    pub fn new(
        cache: Arc<dyn CacheBackend>,
        limiter: Arc<RateLimiter>,
        remote: Arc<dyn RemoteClient>,
        generator: Arc<dyn Generator>,
        settings: SuggestSettings,
        context_ttl: Duration,
    ) -> Self {
        Self {
            cache,
            limiter,
            remote,
            generator,
            settings,
            context_ttl,
        }
    }

    /// Produce suggestions for the given references.
    ///
    /// `commits` is the scanned history window the references were built
    /// from; it supplies the messages summarized per ticket, bounded by the
    /// configured context depth.
    pub async fn suggest(
        &self,
        references: &[TicketReference],
        commits: &[CommitRecord],
        cancel: &CancellationToken,
    ) -> SuggestBatch {
        let by_sha: HashMap<&str, &CommitRecord> =
            commits.iter().map(|c| (c.sha.as_str(), c)).collect();

        let mut batch = SuggestBatch::default();

        for reference in references {
            if cancel.is_cancelled() {
                debug!(
                    "Suggestion batch cancelled after {} of {} tickets",
                    batch.suggestions.len() + batch.failed.len() + batch.rejected_count,
                    references.len()
                );
                batch.cancelled = true;
                break;
            }

            match self.suggest_one(reference, &by_sha).await {
                Ok(Some(suggestion)) => batch.suggestions.push(suggestion),
                Ok(None) => batch.rejected_count += 1,
                Err(e) => {
                    warn!("Suggestion for {} failed: {}", reference.key, e);
                    batch.failed.push(SuggestFailure {
                        ticket_key: reference.key.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        batch
    }

    /// One ticket: context, summaries, generation, threshold.
    ///
    /// `Ok(None)` means the generated confidence did not clear the
    /// threshold (the result is discarded, never surfaced).
    async fn suggest_one(
        &self,
        reference: &TicketReference,
        by_sha: &HashMap<&str, &CommitRecord>,
    ) -> Result<Option<Suggestion>> {
        let context = self.ticket_context(&reference.key).await?;

        let selected: Vec<&CommitRecord> = reference
            .commit_shas
            .iter()
            .filter_map(|sha| by_sha.get(sha.as_str()).copied())
            .take(self.settings.context_depth)
            .collect();
        let summaries = summarize_commits(&selected);

        let update = tokio::time::timeout(
            EngineConfig::GENERATE_TIMEOUT,
            self.generator.generate(&context, &summaries),
        )
        .await
        .map_err(|_| CrosslinkError::Timeout(EngineConfig::GENERATE_TIMEOUT))?
        .map_err(|e| CrosslinkError::Generation {
            ticket_key: reference.key.clone(),
            message: e.to_string(),
        })?;

        if let Some(problem) = update.validation_error() {
            return Err(CrosslinkError::Generation {
                ticket_key: reference.key.clone(),
                message: format!("malformed response: {problem}"),
            });
        }

        if !self
            .settings
            .threshold_mode
            .accepts(update.confidence, self.settings.confidence_threshold)
        {
            debug!(
                "Discarding suggestion for {} (confidence {} below threshold {})",
                reference.key, update.confidence, self.settings.confidence_threshold
            );
            return Ok(None);
        }

        Ok(Some(Suggestion {
            ticket_key: reference.key.clone(),
            proposed_text: update.proposed_text,
            confidence: update.confidence,
            rationale: update.rationale,
            source_commits: reference.commit_shas.clone(),
            status: SuggestionStatus::Pending,
        }))
    }

    /// Ticket context from the cache, falling back to a rate-limiter-gated
    /// remote fetch that then repopulates the cache.
    async fn ticket_context(&self, ticket_key: &str) -> Result<String> {
        let namespace = ResourceKind::Ticket.namespace();

        if let Some(bytes) = self.cache.get(namespace, ticket_key)? {
            debug!("Ticket context cache hit for {}", ticket_key);
            return Ok(String::from_utf8_lossy(&bytes).into_owned());
        }

        self.acquire_budget().await?;

        let backoff = BackoffConfig::default()
            .with_max_attempts(EngineConfig::FETCH_RETRY_ATTEMPTS)
            .with_base_delay(Duration::from_millis(500));

        let fetched = retry_async(
            &backoff,
            || async {
                match tokio::time::timeout(
                    EngineConfig::FETCH_TIMEOUT,
                    self.remote.fetch(ResourceKind::Ticket, ticket_key),
                )
                .await
                {
                    Ok(result) => result,
                    Err(_) => Err(CrosslinkError::Timeout(EngineConfig::FETCH_TIMEOUT)),
                }
            },
            // Rate-limit responses are not retried here: the penalty below
            // makes the shared budget hold everyone back instead.
            |e| e.is_retryable() && penalty_for(e).is_none(),
        )
        .await;

        match fetched {
            Ok(value) => {
                let text = value.to_string();
                // A cache failure degrades to an uncached fetch; it never
                // fails the suggestion itself.
                if let Err(e) =
                    self.cache
                        .put(namespace, ticket_key, text.as_bytes(), self.context_ttl)
                {
                    warn!("Could not cache ticket context for {}: {}", ticket_key, e);
                }
                Ok(text)
            }
            Err(e) => {
                if let Some(penalty) = penalty_for(&e) {
                    let _ = self.limiter.penalize(self.remote.host(), penalty);
                }
                Err(e)
            }
        }
    }

    /// Spend one token from the remote host's budget, suspending for the
    /// durations the limiter asks for, bounded in attempts.
    async fn acquire_budget(&self) -> Result<()> {
        let host = self.remote.host();
        let mut last_wait = None;

        for _ in 0..EngineConfig::ACQUIRE_MAX_ATTEMPTS {
            match self.limiter.acquire(host, 1.0)? {
                Decision::Granted => return Ok(()),
                Decision::Denied => {
                    return Err(CrosslinkError::RateLimited {
                        host: host.to_string(),
                        retry_after: None,
                    })
                }
                Decision::Wait(d) => {
                    last_wait = Some(d);
                    tokio::time::sleep(d).await;
                }
            }
        }

        Err(CrosslinkError::RateLimited {
            host: host.to_string(),
            retry_after: last_wait,
        })
    }
}

/// Penalty to apply to the shared budget for an observed remote rejection,
/// if the error calls for one.
fn penalty_for(error: &CrosslinkError) -> Option<Duration> {
    match error {
        CrosslinkError::Remote {
            status: Some(429),
            retry_after,
            ..
        } => Some(retry_after.unwrap_or(DEFAULT_RATE_LIMIT_PENALTY)),
        CrosslinkError::Remote {
            status: Some(500..=599),
            ..
        } => Some(SERVER_ERROR_PENALTY),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::SqliteCache;
    use crate::config::{CacheSettings, LimiterSettings, ThresholdMode};
    use crate::suggest::GeneratedUpdate;
    use async_trait::async_trait;
    use chrono::Utc;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tempfile::TempDir;

    struct StubRemote {
        fetch_calls: AtomicU32,
        fail_with: Option<CrosslinkError>,
    }

    impl StubRemote {
        fn ok() -> Self {
            Self {
                fetch_calls: AtomicU32::new(0),
                fail_with: None,
            }
        }

        fn failing(error: CrosslinkError) -> Self {
            Self {
                fetch_calls: AtomicU32::new(0),
                fail_with: Some(error),
            }
        }
    }

    #[async_trait]
    impl RemoteClient for StubRemote {
        fn host(&self) -> &str {
            "tracker.example.com"
        }

        async fn fetch(&self, _resource: ResourceKind, id: &str) -> Result<serde_json::Value> {
            self.fetch_calls.fetch_add(1, Ordering::SeqCst);
            match &self.fail_with {
                Some(CrosslinkError::Remote {
                    message,
                    status,
                    retry_after,
                }) => Err(CrosslinkError::Remote {
                    message: message.clone(),
                    status: *status,
                    retry_after: *retry_after,
                }),
                Some(_) => Err(CrosslinkError::Timeout(Duration::from_secs(1))),
                None => Ok(json!({"key": id, "status": "In Progress"})),
            }
        }

        async fn write(
            &self,
            _resource: ResourceKind,
            _id: &str,
            _payload: &serde_json::Value,
        ) -> Result<()> {
            Ok(())
        }
    }

    struct StubGenerator {
        confidence: f64,
        fail: bool,
    }

    #[async_trait]
    impl Generator for StubGenerator {
        async fn generate(
            &self,
            _ticket_context: &str,
            commit_summaries: &str,
        ) -> Result<GeneratedUpdate> {
            if self.fail {
                return Err(CrosslinkError::Generation {
                    ticket_key: "?".to_string(),
                    message: "provider unavailable".to_string(),
                });
            }
            Ok(GeneratedUpdate {
                proposed_text: format!("Work done:\n{commit_summaries}"),
                confidence: self.confidence,
                rationale: "stub".to_string(),
            })
        }
    }

    struct Fixture {
        _temp: TempDir,
        engine: SuggestionEngine,
        remote: Arc<StubRemote>,
        limiter: Arc<RateLimiter>,
    }

    fn fixture(remote: StubRemote, generator: StubGenerator, threshold: f64) -> Fixture {
        let temp = TempDir::new().unwrap();
        let cache = Arc::new(
            SqliteCache::open(temp.path().join("cache.sqlite"), CacheSettings::default()).unwrap(),
        );
        let limiter = Arc::new(
            RateLimiter::open(
                temp.path().join("limits.sqlite"),
                LimiterSettings {
                    refill_rate_per_sec: 1000.0,
                    burst_capacity: 100.0,
                },
            )
            .unwrap(),
        );
        let remote = Arc::new(remote);

        let engine = SuggestionEngine::new(
            cache,
            limiter.clone(),
            remote.clone(),
            Arc::new(generator),
            SuggestSettings {
                confidence_threshold: threshold,
                threshold_mode: ThresholdMode::Inclusive,
                context_depth: 10,
            },
            Duration::from_secs(300),
        );

        Fixture {
            _temp: temp,
            engine,
            remote,
            limiter,
        }
    }

    fn commit(sha: &str, message: &str) -> CommitRecord {
        CommitRecord {
            sha: sha.to_string(),
            message: message.to_string(),
            author_name: "Ann".to_string(),
            author_email: "ann@example.com".to_string(),
            timestamp: Utc::now(),
            branch: None,
        }
    }

    fn reference(key: &str, shas: &[&str]) -> TicketReference {
        TicketReference {
            key: key.to_string(),
            commit_shas: shas.iter().map(|s| s.to_string()).collect(),
            occurrence_count: shas.len() as u32,
        }
    }

    #[tokio::test]
    async fn test_accepted_suggestion_is_pending() {
        let f = fixture(StubRemote::ok(), StubGenerator { confidence: 0.9, fail: false }, 0.7);
        let commits = vec![commit("sha1", "PROJ-1: fix crash")];
        let refs = vec![reference("PROJ-1", &["sha1"])];

        let batch = f
            .engine
            .suggest(&refs, &commits, &CancellationToken::new())
            .await;

        assert_eq!(batch.suggestions.len(), 1);
        let s = &batch.suggestions[0];
        assert_eq!(s.status, SuggestionStatus::Pending);
        assert_eq!(s.ticket_key, "PROJ-1");
        assert_eq!(s.source_commits, vec!["sha1"]);
        assert!(batch.failed.is_empty());
    }

    #[tokio::test]
    async fn test_below_threshold_never_returned() {
        let f = fixture(StubRemote::ok(), StubGenerator { confidence: 0.4, fail: false }, 0.7);
        let commits = vec![commit("sha1", "PROJ-1: tweak")];
        let refs = vec![reference("PROJ-1", &["sha1"])];

        let batch = f
            .engine
            .suggest(&refs, &commits, &CancellationToken::new())
            .await;

        assert!(batch.suggestions.is_empty());
        assert!(batch.failed.is_empty());
        assert_eq!(batch.rejected_count, 1);
    }

    #[tokio::test]
    async fn test_context_is_cached_across_batches() {
        let f = fixture(StubRemote::ok(), StubGenerator { confidence: 0.9, fail: false }, 0.5);
        let commits = vec![commit("sha1", "PROJ-1: work")];
        let refs = vec![reference("PROJ-1", &["sha1"])];

        f.engine
            .suggest(&refs, &commits, &CancellationToken::new())
            .await;
        f.engine
            .suggest(&refs, &commits, &CancellationToken::new())
            .await;

        assert_eq!(f.remote.fetch_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_generation_failure_isolates_single_ticket() {
        let f = fixture(StubRemote::ok(), StubGenerator { confidence: 0.9, fail: true }, 0.5);
        let commits = vec![
            commit("sha1", "PROJ-1: one"),
            commit("sha2", "PROJ-2: two"),
        ];
        let refs = vec![reference("PROJ-1", &["sha1"]), reference("PROJ-2", &["sha2"])];

        let batch = f
            .engine
            .suggest(&refs, &commits, &CancellationToken::new())
            .await;

        // Both fail (generator always fails), but the batch processed both.
        assert_eq!(batch.failed.len(), 2);
        assert!(!batch.cancelled);
    }

    #[tokio::test]
    async fn test_cancellation_returns_partial_batch() {
        let f = fixture(StubRemote::ok(), StubGenerator { confidence: 0.9, fail: false }, 0.5);
        let commits = vec![commit("sha1", "PROJ-1: one")];
        let refs: Vec<TicketReference> =
            (1..=5).map(|i| reference(&format!("PROJ-{i}"), &["sha1"])).collect();

        let cancel = CancellationToken::new();
        cancel.cancel();

        let batch = f.engine.suggest(&refs, &commits, &cancel).await;
        assert!(batch.cancelled);
        assert!(batch.suggestions.is_empty());
    }

    #[tokio::test]
    async fn test_rate_limit_response_penalizes_shared_budget() {
        let f = fixture(
            StubRemote::failing(CrosslinkError::Remote {
                message: "too many requests".to_string(),
                status: Some(429),
                retry_after: Some(Duration::from_secs(120)),
            }),
            StubGenerator { confidence: 0.9, fail: false },
            0.5,
        );
        let commits = vec![commit("sha1", "PROJ-1: one")];
        let refs = vec![reference("PROJ-1", &["sha1"])];

        let batch = f
            .engine
            .suggest(&refs, &commits, &CancellationToken::new())
            .await;

        assert_eq!(batch.failed.len(), 1);
        // One observed 429 protects every caller sharing the budget.
        let budget = f.limiter.budget("tracker.example.com").unwrap().unwrap();
        assert!(budget.penalty_until.is_some());
        // No retry hammering on a 429.
        assert_eq!(f.remote.fetch_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_context_depth_bounds_summaries() {
        let f = fixture(StubRemote::ok(), StubGenerator { confidence: 0.9, fail: false }, 0.5);
        let commits: Vec<CommitRecord> = (0..20)
            .map(|i| commit(&format!("sha{i}"), &format!("PROJ-1: change {i}")))
            .collect();
        let shas: Vec<&str> = commits.iter().map(|c| c.sha.as_str()).collect();
        let refs = vec![reference("PROJ-1", &shas)];

        let batch = f
            .engine
            .suggest(&refs, &commits, &CancellationToken::new())
            .await;

        let text = &batch.suggestions[0].proposed_text;
        // context_depth is 10: the 11th commit never reaches the generator.
        assert!(text.contains("change 9"));
        assert!(!text.contains("change 10"));
        // But the suggestion still cites every source commit.
        assert_eq!(batch.suggestions[0].source_commits.len(), 20);
    }
}
