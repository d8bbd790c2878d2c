//! Commit classification for summary assembly.
//!
//! Groups the commits feeding one suggestion by change kind so the
//! generation request reads as a structured digest instead of a raw log
//! dump. Conventional-commit prefixes are authoritative; keyword inference
//! is the fallback.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;

use crate::scanner::CommitRecord;

/// Normalized change kind of a commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommitKind {
    Feature,
    Bugfix,
    Refactor,
    Docs,
    Test,
    Chore,
}

impl fmt::Display for CommitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CommitKind::Feature => "Feature",
            CommitKind::Bugfix => "Bugfix",
            CommitKind::Refactor => "Refactor",
            CommitKind::Docs => "Docs",
            CommitKind::Test => "Test",
            CommitKind::Chore => "Chore",
        };
        write!(f, "{name}")
    }
}

fn conventional_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^(\w+)(?:\([^)]+\))?!?:\s+.+").expect("static pattern"))
}

/// Classify a commit message by its conventional-commit prefix, falling
/// back to keyword inference for free-form messages.
pub fn classify_message(message: &str) -> CommitKind {
    let subject = message.lines().next().unwrap_or("");

    if let Some(caps) = conventional_pattern().captures(subject) {
        let kind = caps.get(1).map(|m| m.as_str().to_lowercase());
        match kind.as_deref() {
            Some("feat") => return CommitKind::Feature,
            Some("fix" | "bug") => return CommitKind::Bugfix,
            Some("refactor" | "perf" | "style") => return CommitKind::Refactor,
            Some("docs" | "doc") => return CommitKind::Docs,
            Some("test" | "tests") => return CommitKind::Test,
            Some("chore" | "ci" | "build") => return CommitKind::Chore,
            _ => {}
        }
    }

    let lower = subject.to_lowercase();
    let contains_any = |words: &[&str]| words.iter().any(|w| lower.contains(w));

    if contains_any(&["fix", "bug", "issue", "error", "crash"]) {
        CommitKind::Bugfix
    } else if contains_any(&["add", "implement", "feature", "new"]) {
        CommitKind::Feature
    } else if contains_any(&["refactor", "clean", "improve", "optimize"]) {
        CommitKind::Refactor
    } else if contains_any(&["doc", "readme", "comment"]) {
        CommitKind::Docs
    } else if contains_any(&["test", "spec"]) {
        CommitKind::Test
    } else {
        CommitKind::Chore
    }
}

/// Render the commits feeding one suggestion as a grouped digest.
pub fn summarize_commits(commits: &[&CommitRecord]) -> String {
    let mut groups: Vec<(CommitKind, Vec<&CommitRecord>)> = Vec::new();

    for commit in commits {
        let kind = classify_message(&commit.message);
        match groups.iter_mut().find(|(k, _)| *k == kind) {
            Some((_, list)) => list.push(commit),
            None => groups.push((kind, vec![commit])),
        }
    }

    let mut lines = Vec::new();
    for (kind, members) in groups {
        lines.push(format!("{kind}:"));
        for commit in members {
            lines.push(format!("- {}: {}", commit.short_sha(), commit.subject()));
        }
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

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

    #[test]
    fn test_conventional_prefixes() {
        assert_eq!(classify_message("feat(auth): add login"), CommitKind::Feature);
        assert_eq!(classify_message("fix: null deref"), CommitKind::Bugfix);
        assert_eq!(classify_message("perf: faster index"), CommitKind::Refactor);
        assert_eq!(classify_message("docs: update readme"), CommitKind::Docs);
        assert_eq!(classify_message("ci: cache builds"), CommitKind::Chore);
    }

    #[test]
    fn test_keyword_fallback() {
        assert_eq!(classify_message("Fixed a crash on startup"), CommitKind::Bugfix);
        assert_eq!(classify_message("Implement retry logic"), CommitKind::Feature);
        assert_eq!(classify_message("misc housekeeping"), CommitKind::Chore);
    }

    #[test]
    fn test_summary_groups_by_kind() {
        let c1 = commit("aaaaaaaa1", "fix: broken pagination");
        let c2 = commit("bbbbbbbb2", "feat: export to CSV");
        let c3 = commit("cccccccc3", "fix: off-by-one in export");

        let summary = summarize_commits(&[&c1, &c2, &c3]);

        let bugfix_pos = summary.find("Bugfix:").unwrap();
        let feature_pos = summary.find("Feature:").unwrap();
        // First-seen kind leads.
        assert!(bugfix_pos < feature_pos);
        assert!(summary.contains("- aaaaaaa: fix: broken pagination"));
        assert!(summary.contains("- ccccccc: fix: off-by-one in export"));
    }
}
