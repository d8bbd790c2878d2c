//! Ticket-key extraction patterns.
//!
//! Patterns are user-configured regexes compiled once at configuration load
//! time; a pattern that fails to compile is rejected there, never during a
//! scan. Matching is case-sensitive (ticket keys are conventionally
//! upper-case). A pattern's first capture group yields the key when
//! present; otherwise the whole match does.

use regex::Regex;

use crate::error::{CrosslinkError, Result};

/// Compiled commit-message and branch-name patterns.
#[derive(Debug, Clone)]
pub struct PatternSet {
    commit: Vec<Regex>,
    branch: Vec<Regex>,
}

impl PatternSet {
    /// Compile both pattern lists, failing fast on the first bad pattern.
    pub fn compile(commit_patterns: &[String], branch_patterns: &[String]) -> Result<Self> {
        Ok(Self {
            commit: Self::compile_all(commit_patterns)?,
            branch: Self::compile_all(branch_patterns)?,
        })
    }

    fn compile_all(patterns: &[String]) -> Result<Vec<Regex>> {
        patterns
            .iter()
            .map(|p| {
                Regex::new(p).map_err(|e| CrosslinkError::PatternConfig {
                    pattern: p.clone(),
                    message: e.to_string(),
                })
            })
            .collect()
    }

    /// Keys found in a commit message, in order of appearance, deduplicated.
    pub fn commit_keys(&self, message: &str) -> Vec<String> {
        Self::extract(&self.commit, message)
    }

    /// Keys found in a branch name, in order of appearance, deduplicated.
    pub fn branch_keys(&self, branch: &str) -> Vec<String> {
        Self::extract(&self.branch, branch)
    }

    fn extract(patterns: &[Regex], text: &str) -> Vec<String> {
        let mut keys = Vec::new();
        let mut seen = std::collections::HashSet::new();

        for pattern in patterns {
            for caps in pattern.captures_iter(text) {
                let key = caps
                    .get(1)
                    .or_else(|| caps.get(0))
                    .map(|m| m.as_str().to_string());
                if let Some(key) = key {
                    if seen.insert(key.clone()) {
                        keys.push(key);
                    }
                }
            }
        }
        keys
    }
}
