//! Job identity generation.
//!
//! Identities have the form `task_<unix_seconds>_<task>` and contain only
//! ASCII alphanumerics, `-` and `_`, so they are safe as file names and URL
//! path segments. Uniqueness is enforced by the orchestrator, which appends a
//! numeric suffix while holding the job table lock.

use chrono::{DateTime, Utc};

use super::model::JobId;

/// Longest task fragment kept in an identity.
pub const MAX_TASK_CHARS: usize = 100;

/// Keep only characters that are valid in file names and URL segments.
pub fn sanitize(raw: &str) -> String {
    raw.chars()
        .map(|c| if c.is_whitespace() { '_' } else { c })
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect()
}

/// Candidate identity for a task submitted at `submitted_at`.
pub fn candidate(task: &str, submitted_at: DateTime<Utc>) -> String {
    let task: String = sanitize(task).chars().take(MAX_TASK_CHARS).collect();
    let task = task.trim_matches('_');

    if task.is_empty() {
        format!("task_{}", submitted_at.timestamp())
    } else {
        format!("task_{}_{}", submitted_at.timestamp(), task)
    }
}

/// First identity derived from `base` that `taken` does not already hold.
pub fn allocate(base: &str, mut taken: impl FnMut(&str) -> bool) -> JobId {
    if !taken(base) {
        return JobId::from(base);
    }

    let mut n: u64 = 2;
    loop {
        let next = format!("{}_{}", base, n);
        if !taken(&next) {
            return JobId::from(next);
        }
        n += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rstest::rstest;
    use std::collections::HashSet;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[rstest]
    #[case("foo", "task_1700000000_foo")]
    #[case("What is Rust?", "task_1700000000_What_is_Rust")]
    #[case("../../etc/passwd", "task_1700000000_etcpasswd")]
    #[case("a\\b/c\0d", "task_1700000000_abcd")]
    #[case("日本語", "task_1700000000")]
    fn test_candidate(#[case] task: &str, #[case] expected: &str) {
        assert_eq!(candidate(task, at(1_700_000_000)), expected);
    }

    #[test]
    fn test_candidate_truncates_long_tasks() {
        let task = "x".repeat(1000);
        let id = candidate(&task, at(1_700_000_000));
        assert_eq!(id.len(), "task_1700000000_".len() + MAX_TASK_CHARS);
    }

    #[test]
    fn test_candidate_differs_from_task_text() {
        let id = candidate("foo", Utc::now());
        assert_ne!(id, "foo");
    }

    #[test]
    fn test_allocate_appends_suffix_on_collision() {
        let mut taken: HashSet<String> = HashSet::new();
        let mut issued = Vec::new();

        for _ in 0..4 {
            let id = allocate("task_1_foo", |candidate| taken.contains(candidate));
            taken.insert(id.to_string());
            issued.push(id.to_string());
        }

        assert_eq!(
            issued,
            vec!["task_1_foo", "task_1_foo_2", "task_1_foo_3", "task_1_foo_4"]
        );
    }
}
