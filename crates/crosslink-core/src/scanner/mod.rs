//! Commit-to-ticket correlation.
//!
//! Extracts ordered, deduplicated ticket-key candidates from a window of
//! source-control history using the configured pattern sets.

mod git;
mod patterns;

pub use git::{CommitRecord, GitHistoryReader, HistoryReader};
pub use patterns::PatternSet;

use std::collections::HashMap;

/// A ticket key observed in the scanned history.
///
/// Built fresh per scan; not persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct TicketReference {
    pub key: String,
    /// Commits referencing the key, in scan order, deduplicated.
    pub commit_shas: Vec<String>,
    /// Number of commits that referenced the key (a commit counts once no
    /// matter how many times it matches).
    pub occurrence_count: u32,
}

/// Scan `commits` in order and collect ticket references.
///
/// Output is ordered by first occurrence (position of the first commit that
/// mentioned the key) and deduplicated by key. Commit patterns run against
/// the message; branch patterns run against the originating branch name
/// when one is known. Commits with no matches are skipped silently.
pub fn scan(commits: &[CommitRecord], patterns: &PatternSet) -> Vec<TicketReference> {
    let mut order: Vec<String> = Vec::new();
    let mut refs: HashMap<String, TicketReference> = HashMap::new();

    for commit in commits {
        let mut keys = patterns.commit_keys(&commit.message);
        if let Some(branch) = &commit.branch {
            keys.extend(patterns.branch_keys(branch));
        }

        let mut seen_in_commit = std::collections::HashSet::new();
        for key in keys {
            // One occurrence per commit per key, even if message and branch
            // both matched.
            if !seen_in_commit.insert(key.clone()) {
                continue;
            }

            let reference = refs.entry(key.clone()).or_insert_with(|| {
                order.push(key.clone());
                TicketReference {
                    key: key.clone(),
                    commit_shas: Vec::new(),
                    occurrence_count: 0,
                }
            });
            reference.commit_shas.push(commit.sha.clone());
            reference.occurrence_count += 1;
        }
    }

    order
        .into_iter()
        .filter_map(|key| refs.remove(&key))
        .collect()
}
