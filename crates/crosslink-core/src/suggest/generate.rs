//! Text-generation capability contract.
//!
//! The capability is inherently non-deterministic and provider details are
//! out of scope; the engine only relies on this request/response shape,
//! which keeps the correlation and threshold logic deterministically
//! testable with a fixed-response stand-in.

use async_trait::async_trait;

use crate::error::Result;

/// A generated proposed update with the capability's self-reported
/// confidence.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedUpdate {
    pub proposed_text: String,
    /// Must be within [0.0, 1.0]; anything else is a malformed response.
    pub confidence: f64,
    pub rationale: String,
}

impl GeneratedUpdate {
    /// Check the response is well-formed. Returns the problem, if any.
    pub fn validation_error(&self) -> Option<String> {
        if !self.confidence.is_finite() || !(0.0..=1.0).contains(&self.confidence) {
            return Some(format!(
                "confidence {} outside [0.0, 1.0]",
                self.confidence
            ));
        }
        if self.proposed_text.trim().is_empty() {
            return Some("empty proposed text".to_string());
        }
        None
    }
}

/// Text-generation collaborator.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Produce a proposed update from ticket context and commit summaries.
    async fn generate(&self, ticket_context: &str, commit_summaries: &str)
        -> Result<GeneratedUpdate>;
}
