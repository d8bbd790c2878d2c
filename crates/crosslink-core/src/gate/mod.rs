//! The dry-run gate: single choke point for state-changing actions.
//!
//! Every mutating path goes through `apply`. Dry-run is the default; a real
//! external write requires an unambiguous execute signal, holds a
//! per-ticket cross-process lock, and records durable intent in the audit
//! log before the external service is touched.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tracing::{debug, warn};

use crate::audit::{payload_digest, AuditEntry, AuditLog, AuditOutcome};
use crate::error::{CrosslinkError, Result};
use crate::lockfile::ScopedLock;
use crate::suggest::{RemoteClient, ResourceKind, Suggestion, SuggestionStatus};

/// How long an apply waits for another invocation's apply on the same
/// ticket before giving up.
const APPLY_LOCK_WAIT: Duration = Duration::from_secs(10);

/// Audit action recorded for ticket updates.
const ACTION_UPDATE: &str = "ticket.update";
/// Audit action recorded for explicit rejections.
const ACTION_REJECT: &str = "suggestion.reject";

/// How the caller wants the apply performed.
///
/// `Default` resolves to the configured dry-run default. A real write only
/// ever happens through `Execute`, or through `Default` when the operator
/// has explicitly configured the default off; never through inference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyMode {
    Default,
    DryRun,
    Execute,
}

/// What an apply did, including whether any external write occurred.
#[derive(Debug, Clone)]
pub struct ApplyReport {
    pub ticket_key: String,
    pub dry_run: bool,
    pub status: SuggestionStatus,
    pub outcome: AuditOutcome,
    /// True iff this call performed an external write.
    pub wrote_remote: bool,
}

/// Gate through which every suggestion apply must pass.
pub struct DryRunGate {
    audit: Arc<AuditLog>,
    remote: Arc<dyn RemoteClient>,
    locks_dir: PathBuf,
    dry_run_default: bool,
    actor: String,
}

impl DryRunGate {
    pub fn new(
        audit: Arc<AuditLog>,
        remote: Arc<dyn RemoteClient>,
        locks_dir: impl Into<PathBuf>,
        dry_run_default: bool,
        actor: impl Into<String>,
    ) -> Self {
        Self {
            audit,
            remote,
            locks_dir: locks_dir.into(),
            dry_run_default,
            actor: actor.into(),
        }
    }

    /// Apply a suggestion.
    ///
    /// Dry-run: one Simulated audit record, no external effect, status →
    /// Simulated. Real write: per-ticket lock, durable Attempted record,
    /// external write, completion record; on remote failure the status
    /// stays Pending (retryable) and the error states that no write
    /// happened.
    pub async fn apply(&self, suggestion: &mut Suggestion, mode: ApplyMode) -> Result<ApplyReport> {
        match suggestion.status {
            SuggestionStatus::Pending | SuggestionStatus::Approved => {}
            other => {
                return Err(CrosslinkError::Apply {
                    ticket_key: suggestion.ticket_key.clone(),
                    wrote_remote: false,
                    message: format!("cannot apply a suggestion in state {other:?}"),
                })
            }
        }

        let dry_run = match mode {
            ApplyMode::Default => self.dry_run_default,
            ApplyMode::DryRun => true,
            ApplyMode::Execute => false,
        };

        if dry_run {
            self.apply_dry_run(suggestion)
        } else {
            self.apply_execute(suggestion).await
        }
    }

    /// Explicitly reject a suggestion. Terminal, audited, no external
    /// effect.
    pub fn reject(&self, suggestion: &mut Suggestion) -> Result<()> {
        match suggestion.status {
            SuggestionStatus::Pending | SuggestionStatus::Approved => {}
            other => {
                return Err(CrosslinkError::Apply {
                    ticket_key: suggestion.ticket_key.clone(),
                    wrote_remote: false,
                    message: format!("cannot reject a suggestion in state {other:?}"),
                })
            }
        }

        self.audit.append(&AuditEntry::new(
            &self.actor,
            ACTION_REJECT,
            &suggestion.ticket_key,
            true,
            payload_digest(&suggestion.proposed_text),
            AuditOutcome::Simulated,
        ))?;
        suggestion.status = SuggestionStatus::Rejected;
        Ok(())
    }

    fn apply_dry_run(&self, suggestion: &mut Suggestion) -> Result<ApplyReport> {
        self.audit.append(&AuditEntry::new(
            &self.actor,
            ACTION_UPDATE,
            &suggestion.ticket_key,
            true,
            payload_digest(&suggestion.proposed_text),
            AuditOutcome::Simulated,
        ))?;

        suggestion.status = SuggestionStatus::Simulated;
        Ok(ApplyReport {
            ticket_key: suggestion.ticket_key.clone(),
            dry_run: true,
            status: SuggestionStatus::Simulated,
            outcome: AuditOutcome::Simulated,
            wrote_remote: false,
        })
    }

    async fn apply_execute(&self, suggestion: &mut Suggestion) -> Result<ApplyReport> {
        let ticket_key = suggestion.ticket_key.clone();
        let digest = payload_digest(&suggestion.proposed_text);

        // Serialize real writes per ticket key across invocations.
        let lock_path = self.locks_dir.join(format!("{}.lock", lock_name(&ticket_key)));
        let _lock = ScopedLock::acquire(&lock_path, APPLY_LOCK_WAIT)?;

        // If a concurrent invocation already applied this exact payload,
        // don't write it again.
        let already_applied = self
            .audit
            .entries_for_target(&ticket_key)?
            .iter()
            .any(|e| e.payload_digest == digest && e.outcome == AuditOutcome::Succeeded);
        if already_applied {
            debug!(
                "Identical update for {} already applied by another invocation",
                ticket_key
            );
            suggestion.status = SuggestionStatus::Applied;
            return Ok(ApplyReport {
                ticket_key,
                dry_run: false,
                status: SuggestionStatus::Applied,
                outcome: AuditOutcome::Succeeded,
                wrote_remote: false,
            });
        }

        // Durable intent before any external effect. If this fails, the
        // apply stops here: no record, no write.
        self.audit.append(&AuditEntry::new(
            &self.actor,
            ACTION_UPDATE,
            &ticket_key,
            false,
            &digest,
            AuditOutcome::Attempted,
        ))?;

        let payload = json!({ "body": suggestion.proposed_text });
        match self
            .remote
            .write(ResourceKind::Ticket, &ticket_key, &payload)
            .await
        {
            Ok(()) => {
                suggestion.status = SuggestionStatus::Applied;
                self.audit
                    .append(&AuditEntry::new(
                        &self.actor,
                        ACTION_UPDATE,
                        &ticket_key,
                        false,
                        &digest,
                        AuditOutcome::Succeeded,
                    ))
                    .map_err(|e| CrosslinkError::Apply {
                        ticket_key: ticket_key.clone(),
                        wrote_remote: true,
                        message: format!(
                            "external write succeeded but the completion record failed: {e}"
                        ),
                    })?;

                Ok(ApplyReport {
                    ticket_key,
                    dry_run: false,
                    status: SuggestionStatus::Applied,
                    outcome: AuditOutcome::Succeeded,
                    wrote_remote: true,
                })
            }
            Err(e) => {
                // A failed real write is never silently treated as final:
                // status stays Pending so the caller can retry.
                if let Err(audit_err) = self.audit.append(&AuditEntry::new(
                    &self.actor,
                    ACTION_UPDATE,
                    &ticket_key,
                    false,
                    &digest,
                    AuditOutcome::Failed(e.to_string()),
                )) {
                    warn!("Could not record failed apply for {}: {}", ticket_key, audit_err);
                }

                Err(CrosslinkError::Apply {
                    ticket_key,
                    wrote_remote: false,
                    message: e.to_string(),
                })
            }
        }
    }
}

/// Ticket keys become lock file names; keep them filesystem-safe.
fn lock_name(ticket_key: &str) -> String {
    ticket_key
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}
