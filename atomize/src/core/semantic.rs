//! Business rules a plan must satisfy beyond its JSON Schema.
//!
//! Checks run against the governing snapshot's file list and never touch the
//! repository. Every violation carries a stable rule name so correction
//! prompts and error details can cite exactly what was broken.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::core::types::{CommitPlan, CommitUnit, Warning};

/// How to treat units without a scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ScopePolicy {
    Require,
    #[default]
    Warn,
    Allow,
}

impl FromStr for ScopePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "require" => Ok(ScopePolicy::Require),
            "warn" => Ok(ScopePolicy::Warn),
            "allow" => Ok(ScopePolicy::Allow),
            other => Err(format!(
                "unknown scope policy '{other}' (expected require, warn or allow)"
            )),
        }
    }
}

/// A single broken rule, attributable to a unit when possible.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Violation {
    pub rule: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    pub message: String,
}

impl Violation {
    pub fn new(rule: &'static str, unit: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            rule,
            unit: unit.map(str::to_string),
            message: message.into(),
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.unit {
            Some(unit) => write!(f, "[{}] {}: {}", self.rule, unit, self.message),
            None => write!(f, "[{}] {}", self.rule, self.message),
        }
    }
}

/// Result of a semantic pass: hard violations plus non-fatal warnings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SemanticReport {
    pub violations: Vec<Violation>,
    pub warnings: Vec<Warning>,
}

impl SemanticReport {
    pub fn is_ok(&self) -> bool {
        self.violations.is_empty()
    }
}

static SUMMARY_PREFIX_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(feat|fix|refactor|style|docs|test|chore|build|perf|ci)(\[[^\]]*\]|\([^)]*\))?!?\s*:")
        .expect("summary prefix regex should compile")
});

static LIST_MARKER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*([-*+•]|\d+[.)])(\s|$)").expect("list marker regex should compile")
});

static SCOPE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]+(-[a-z0-9]+)*$").expect("scope regex should compile")
});

static META_LABEL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(summary|body|files?|type|scope|hunks?|commit(\s+\d+)?)\s*:|^\s*commit\s+\d+\b")
        .expect("meta label regex should compile")
});

/// Validate plan units against `snapshot_files`.
pub fn validate_semantics(
    plan: &CommitPlan,
    snapshot_files: &[String],
    scope_policy: ScopePolicy,
) -> SemanticReport {
    let mut report = SemanticReport::default();
    let known: HashSet<&str> = snapshot_files.iter().map(String::as_str).collect();
    let mut seen_ids: HashSet<&str> = HashSet::new();
    let mut claimed: HashMap<&str, &str> = HashMap::new();

    if plan.plan.is_empty() {
        report
            .violations
            .push(Violation::new("plan_empty", None, "plan contains no commit units"));
    }

    for unit in &plan.plan {
        let id = unit.id.as_str();
        if id.trim().is_empty() {
            report
                .violations
                .push(Violation::new("id_empty", None, "commit unit has a blank id"));
        } else if !seen_ids.insert(id) {
            report.violations.push(Violation::new(
                "id_duplicate",
                Some(id),
                format!("id '{id}' is used by more than one unit"),
            ));
        }

        for file in &unit.files {
            if !known.contains(file.as_str()) {
                report.violations.push(Violation::new(
                    "file_not_in_diff",
                    Some(id),
                    format!("file '{file}' is not part of the diff"),
                ));
            }
            if let Some(owner) = claimed.insert(file.as_str(), id)
                && owner != id
            {
                report.violations.push(Violation::new(
                    "file_claimed_twice",
                    Some(id),
                    format!("file '{file}' is already claimed by unit '{owner}'"),
                ));
            }
        }

        check_message(unit, scope_policy, &mut report);
    }

    report
}

fn check_message(unit: &CommitUnit, scope_policy: ScopePolicy, report: &mut SemanticReport) {
    let id = unit.id.as_str();

    if SUMMARY_PREFIX_RE.is_match(&unit.summary) {
        report.violations.push(Violation::new(
            "summary_prefix",
            Some(id),
            "summary must not repeat the type[scope]: prefix",
        ));
    }
    if unit.summary.trim_end().ends_with('.') {
        report.warnings.push(
            Warning::new(
                "summary_trailing_period",
                format!("unit '{id}' summary ends with a period"),
            )
            .with_details(serde_json::json!({ "id": id })),
        );
    }

    for (index, line) in unit.body.iter().enumerate() {
        if line.trim().is_empty() {
            report.violations.push(Violation::new(
                "body_line_empty",
                Some(id),
                format!("body line {index} is empty"),
            ));
        } else if LIST_MARKER_RE.is_match(line) {
            report.violations.push(Violation::new(
                "body_list_marker",
                Some(id),
                format!("body line {index} starts with a list marker"),
            ));
        } else if META_LABEL_RE.is_match(line) {
            report.violations.push(Violation::new(
                "body_meta_label",
                Some(id),
                format!("body line {index} carries a process label"),
            ));
        }
    }

    match unit.scope.as_deref() {
        Some(scope) if !is_kebab_case(scope) => report.violations.push(Violation::new(
            "scope_invalid",
            Some(id),
            format!("scope '{scope}' is not kebab-case"),
        )),
        Some(_) => {}
        None => match scope_policy {
            ScopePolicy::Require => report.violations.push(Violation::new(
                "scope_missing",
                Some(id),
                "scope is required",
            )),
            ScopePolicy::Warn => report.warnings.push(
                Warning::new("scope_missing", format!("unit '{id}' uses a global scope"))
                    .with_details(serde_json::json!({ "id": id })),
            ),
            ScopePolicy::Allow => {}
        },
    }
}

pub fn is_kebab_case(value: &str) -> bool {
    SCOPE_RE.is_match(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::CommitPlan;
    use crate::test_support::unit;

    fn files(names: &[&str]) -> Vec<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    fn rules(report: &SemanticReport) -> Vec<&'static str> {
        report.violations.iter().map(|v| v.rule).collect()
    }

    #[test]
    fn clean_plan_passes() {
        let plan = CommitPlan::new(vec![unit("c1", &["a.txt"]), unit("c2", &["b.txt"])]);
        let report = validate_semantics(&plan, &files(&["a.txt", "b.txt"]), ScopePolicy::Warn);
        assert!(report.is_ok(), "{:?}", report.violations);
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn file_outside_diff_is_rejected() {
        let plan = CommitPlan::new(vec![unit("c1", &["a.txt", "ghost.txt"])]);
        let report = validate_semantics(&plan, &files(&["a.txt"]), ScopePolicy::Warn);
        assert_eq!(rules(&report), vec!["file_not_in_diff"]);
        assert!(report.violations[0].message.contains("ghost.txt"));
    }

    #[test]
    fn file_claimed_by_two_units_is_rejected() {
        let plan = CommitPlan::new(vec![unit("c1", &["a.txt"]), unit("c2", &["a.txt"])]);
        let report = validate_semantics(&plan, &files(&["a.txt"]), ScopePolicy::Warn);
        assert_eq!(rules(&report), vec!["file_claimed_twice"]);
        assert_eq!(report.violations[0].unit.as_deref(), Some("c2"));
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let plan = CommitPlan::new(vec![unit("c1", &["a.txt"]), unit("c1", &["b.txt"])]);
        let report = validate_semantics(&plan, &files(&["a.txt", "b.txt"]), ScopePolicy::Warn);
        assert_eq!(rules(&report), vec!["id_duplicate"]);
    }

    #[test]
    fn summary_prefix_is_rejected() {
        let mut u = unit("c1", &["a.txt"]);
        u.summary = "feat[cli]: add deterministic JSON output for the plan command".to_string();
        let report = validate_semantics(&CommitPlan::new(vec![u]), &files(&["a.txt"]), ScopePolicy::Warn);
        assert_eq!(rules(&report), vec!["summary_prefix"]);
    }

    #[test]
    fn body_markers_and_labels_are_rejected() {
        let mut u = unit("c1", &["a.txt"]);
        u.body = vec![
            "- bullet line".to_string(),
            "Summary: restated".to_string(),
            "2) numbered".to_string(),
        ];
        let report = validate_semantics(&CommitPlan::new(vec![u]), &files(&["a.txt"]), ScopePolicy::Warn);
        assert_eq!(
            rules(&report),
            vec!["body_list_marker", "body_meta_label", "body_list_marker"]
        );
    }

    #[test]
    fn hyphenated_prose_is_not_a_list_marker() {
        let mut u = unit("c1", &["a.txt"]);
        u.body = vec!["Keep -v output stable for scripts".to_string()];
        let report = validate_semantics(&CommitPlan::new(vec![u]), &files(&["a.txt"]), ScopePolicy::Warn);
        assert!(report.is_ok(), "{:?}", report.violations);
    }

    #[test]
    fn missing_scope_follows_policy() {
        let mut u = unit("c1", &["a.txt"]);
        u.scope = None;
        let plan = CommitPlan::new(vec![u]);
        let known = files(&["a.txt"]);

        let warn = validate_semantics(&plan, &known, ScopePolicy::Warn);
        assert!(warn.is_ok());
        assert_eq!(warn.warnings[0].code, "scope_missing");

        let require = validate_semantics(&plan, &known, ScopePolicy::Require);
        assert_eq!(rules(&require), vec!["scope_missing"]);

        let allow = validate_semantics(&plan, &known, ScopePolicy::Allow);
        assert!(allow.is_ok());
        assert!(allow.warnings.is_empty());
    }

    #[test]
    fn kebab_case_matches_scope_pattern() {
        assert!(is_kebab_case("cli"));
        assert!(is_kebab_case("git-apply2"));
        assert!(!is_kebab_case("Git"));
        assert!(!is_kebab_case("-cli"));
        assert!(!is_kebab_case("a--b"));
        assert!(!is_kebab_case(""));
        assert!(!is_kebab_case("cli\n"));
    }

    /// Any mix of in-diff / out-of-diff / shared files: accepted iff every file
    /// is known and no file appears twice.
    #[test]
    fn membership_and_overlap_decide_acceptance() {
        let known = files(&["a", "b", "c"]);
        let candidates: [&[&str]; 6] = [&["a"], &["b"], &["c"], &["x"], &["a", "b"], &["c", "y"]];
        for first in candidates {
            for second in candidates {
                let plan = CommitPlan::new(vec![unit("u1", first), unit("u2", second)]);
                let all: Vec<&str> = first.iter().chain(second.iter()).copied().collect();
                let unique: HashSet<&str> = all.iter().copied().collect();
                let expected = all.iter().all(|f| known.iter().any(|k| k == f)) && unique.len() == all.len();
                let report = validate_semantics(&plan, &known, ScopePolicy::Warn);
                assert_eq!(report.is_ok(), expected, "{first:?} / {second:?}");
            }
        }
    }
}
