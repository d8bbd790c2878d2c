//! Suggestion types and the correlation/suggestion engine.

mod classify;
mod engine;
mod generate;
mod remote;

pub use classify::{classify_message, summarize_commits, CommitKind};
pub use engine::{SuggestBatch, SuggestFailure, SuggestionEngine};
pub use generate::{GeneratedUpdate, Generator};
pub use remote::{host_for, RemoteClient, ResourceKind};

use serde::{Deserialize, Serialize};

use crate::error::{CrosslinkError, Result};

/// Lifecycle of one proposed ticket update.
///
/// `Pending → {Simulated | Applied | Rejected}`; `Approved` is an optional
/// caller-set waypoint before apply. `Rejected` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionStatus {
    Pending,
    Approved,
    Applied,
    Simulated,
    Rejected,
}

/// A confidence-scored proposed update for one ticket.
///
/// Created by the engine; its status is mutated only by the dry-run gate's
/// apply step (and the explicit approve/reject transitions below).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Suggestion {
    pub ticket_key: String,
    pub proposed_text: String,
    /// Confidence in [0.0, 1.0] as reported by the generation capability.
    pub confidence: f64,
    pub rationale: String,
    /// Shas of the commits that motivated this suggestion, earliest first.
    pub source_commits: Vec<String>,
    pub status: SuggestionStatus,
}

impl Suggestion {
    /// Mark a pending suggestion as approved by the caller.
    pub fn approve(&mut self) -> Result<()> {
        match self.status {
            SuggestionStatus::Pending => {
                self.status = SuggestionStatus::Approved;
                Ok(())
            }
            other => Err(CrosslinkError::Apply {
                ticket_key: self.ticket_key.clone(),
                wrote_remote: false,
                message: format!("cannot approve a suggestion in state {other:?}"),
            }),
        }
    }
}
