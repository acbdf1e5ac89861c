//! Plan validation: structural (JSON + JSON Schema) then semantic.

use std::sync::LazyLock;

use jsonschema::{Draft, Validator};
use serde_json::Value;
use tracing::debug;

use crate::core::semantic::{ScopePolicy, Violation, validate_semantics};
use crate::core::types::{CommitPlan, Warning};

const COMMIT_PLAN_SCHEMA: &str = include_str!("../schemas/commit_plan/v1.schema.json");
const COMMIT_APPLY_SCHEMA: &str = include_str!("../schemas/commit_apply/v1.schema.json");
const ERROR_SCHEMA: &str = include_str!("../schemas/error/v1.schema.json");

/// Published JSON contracts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaKind {
    CommitPlan,
    CommitApply,
    Error,
}

static COMMIT_PLAN_VALIDATOR: LazyLock<Validator> =
    LazyLock::new(|| compile(COMMIT_PLAN_SCHEMA, "commit_plan"));
static COMMIT_APPLY_VALIDATOR: LazyLock<Validator> =
    LazyLock::new(|| compile(COMMIT_APPLY_SCHEMA, "commit_apply"));
static ERROR_VALIDATOR: LazyLock<Validator> = LazyLock::new(|| compile(ERROR_SCHEMA, "error"));

fn compile(source: &str, name: &str) -> Validator {
    let schema: Value = serde_json::from_str(source)
        .unwrap_or_else(|err| panic!("{name} schema should be valid JSON: {err}"));
    jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(&schema)
        .unwrap_or_else(|err| panic!("{name} schema should compile: {err}"))
}

/// Schema errors for `value`, empty when it conforms.
pub fn schema_errors(kind: SchemaKind, value: &Value) -> Vec<String> {
    let validator: &Validator = match kind {
        SchemaKind::CommitPlan => &COMMIT_PLAN_VALIDATOR,
        SchemaKind::CommitApply => &COMMIT_APPLY_VALIDATOR,
        SchemaKind::Error => &ERROR_VALIDATOR,
    };
    validator
        .iter_errors(value)
        .map(|err| err.to_string())
        .collect()
}

/// A plan that passed both validation stages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedPlan {
    pub plan: CommitPlan,
    /// Validator warnings only; generator warnings stay on `plan.warnings`.
    pub warnings: Vec<Warning>,
}

/// Strip one surrounding Markdown code fence, if present.
pub fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let Some(body) = rest.strip_suffix("```") else {
        return trimmed;
    };
    // Drop the info string (e.g. `json`) on the opening line.
    match body.split_once('\n') {
        Some((_, inner)) => inner.trim(),
        None => body.trim(),
    }
}

/// Structural stage: raw text to a schema-conforming, typed plan.
pub fn parse_plan(raw: &str) -> Result<CommitPlan, Vec<Violation>> {
    let text = strip_code_fence(raw);
    let value: Value = serde_json::from_str(text).map_err(|err| {
        vec![Violation::new(
            "invalid_json",
            None,
            format!("reply is not a JSON object: {err}"),
        )]
    })?;
    let errors = schema_errors(SchemaKind::CommitPlan, &value);
    if !errors.is_empty() {
        return Err(errors
            .into_iter()
            .map(|message| Violation::new("schema", None, message))
            .collect());
    }
    serde_json::from_value(value)
        .map_err(|err| vec![Violation::new("schema", None, err.to_string())])
}

/// Run both stages against the snapshot's file list.
pub fn validate_plan(
    raw: &str,
    snapshot_files: &[String],
    scope_policy: ScopePolicy,
) -> Result<ValidatedPlan, Vec<Violation>> {
    let plan = parse_plan(raw)?;
    let report = validate_semantics(&plan, snapshot_files, scope_policy);
    if !report.is_ok() {
        debug!(violations = report.violations.len(), "semantic validation failed");
        return Err(report.violations);
    }
    Ok(ValidatedPlan {
        plan,
        warnings: report.warnings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{CommitPlan, ErrorDetail, ErrorResponse, SCHEMA_VERSION};
    use crate::test_support::{plan_json, unit};

    fn files(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn accepts_valid_plan() {
        let raw = plan_json(&[unit("c1", &["a.txt"])]);
        let validated = validate_plan(&raw, &files(&["a.txt"]), ScopePolicy::Warn).expect("valid");
        assert_eq!(validated.plan.plan.len(), 1);
        assert!(validated.warnings.is_empty());
    }

    #[test]
    fn strips_a_surrounding_fence() {
        let raw = format!("```json\n{}\n```\n", plan_json(&[unit("c1", &["a.txt"])]));
        assert!(parse_plan(&raw).is_ok());
        assert_eq!(strip_code_fence("  {}  "), "{}");
        assert_eq!(strip_code_fence("```\n{}\n```"), "{}");
    }

    #[test]
    fn rejects_non_json() {
        let err = parse_plan("Sure! Here is your plan.").expect_err("invalid");
        assert_eq!(err[0].rule, "invalid_json");
    }

    #[test]
    fn schema_enforces_summary_length_and_hunks() {
        let mut short = unit("c1", &["a.txt"]);
        short.summary = "too short".to_string();
        let err = parse_plan(&plan_json(&[short])).expect_err("short summary");
        assert!(err.iter().all(|v| v.rule == "schema"));

        let mut value: Value =
            serde_json::from_str(&plan_json(&[unit("c1", &["a.txt"])])).expect("json");
        value["plan"][0]["hunks"] = serde_json::json!([{ "file": "a.txt", "header": "@@ -1 +1 @@" }]);
        assert!(parse_plan(&value.to_string()).is_err());
    }

    #[test]
    fn schema_rejects_unknown_type_and_bad_scope() {
        let mut value: Value =
            serde_json::from_str(&plan_json(&[unit("c1", &["a.txt"])])).expect("json");
        value["plan"][0]["type"] = Value::from("feature");
        assert!(parse_plan(&value.to_string()).is_err());

        value["plan"][0]["type"] = Value::from("fix");
        value["plan"][0]["scope"] = Value::from("Not Kebab");
        assert!(parse_plan(&value.to_string()).is_err());

        value["plan"][0]["scope"] = Value::Null;
        assert!(parse_plan(&value.to_string()).is_ok());
    }

    #[test]
    fn schema_rejects_empty_plan_and_wrong_version() {
        assert!(parse_plan(r#"{"schema_version":"v1","plan":[]}"#).is_err());
        let mut value: Value =
            serde_json::from_str(&plan_json(&[unit("c1", &["a.txt"])])).expect("json");
        value["schema_version"] = Value::from("v2");
        assert!(parse_plan(&value.to_string()).is_err());
    }

    #[test]
    fn semantic_stage_runs_after_structural() {
        let raw = plan_json(&[unit("c1", &["ghost.txt"])]);
        let err = validate_plan(&raw, &files(&["a.txt"]), ScopePolicy::Warn).expect_err("ghost");
        assert_eq!(err[0].rule, "file_not_in_diff");
    }

    /// Any accepted plan serializes back to text that is accepted again.
    #[test]
    fn accepted_plans_reparse_identically() {
        let mut second = unit("c2", &["b.txt", "c.txt"]);
        second.scope = None;
        second.body = vec!["One".to_string(), "Two".to_string(), "Three".to_string()];
        let raw = plan_json(&[unit("c1", &["a.txt"]), second]);
        let known = files(&["a.txt", "b.txt", "c.txt"]);
        let first = validate_plan(&raw, &known, ScopePolicy::Allow).expect("valid");
        let again = serde_json::to_string(&first.plan).expect("serialize");
        let second = validate_plan(&again, &known, ScopePolicy::Allow).expect("valid");
        assert_eq!(first, second);
    }

    #[test]
    fn error_envelope_matches_its_schema() {
        let envelope = ErrorResponse {
            schema_version: SCHEMA_VERSION.to_string(),
            request_id: None,
            error: ErrorDetail {
                code: "git_error".to_string(),
                message: "drift".to_string(),
                details: None,
            },
        };
        let value = serde_json::to_value(&envelope).expect("serialize");
        assert!(schema_errors(SchemaKind::Error, &value).is_empty());
        let plan = serde_json::to_value(CommitPlan::new(Vec::new())).expect("serialize");
        assert!(!schema_errors(SchemaKind::CommitPlan, &plan).is_empty());
    }
}
