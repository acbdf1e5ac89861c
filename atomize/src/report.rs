//! Output payloads and their JSON / human renderings.

use std::fmt::Write as _;
use std::str::FromStr;

use crate::core::message::commit_header;
use crate::core::types::{
    CommitApplyResponse, CommitPlan, ErrorResponse, ExecutionResult, InputMeta, SCHEMA_VERSION,
    UnitStatus, Warning,
};
use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Json,
    Human,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(OutputFormat::Json),
            "human" => Ok(OutputFormat::Human),
            other => Err(format!("unknown format '{other}' (expected json or human)")),
        }
    }
}

pub fn apply_response(
    request_id: Option<String>,
    input: Option<InputMeta>,
    plan: &CommitPlan,
    results: Vec<ExecutionResult>,
    warnings: Vec<Warning>,
) -> CommitApplyResponse {
    CommitApplyResponse {
        schema_version: SCHEMA_VERSION.to_string(),
        request_id,
        input,
        plan: plan.plan.clone(),
        results,
        warnings,
    }
}

pub fn error_response(request_id: Option<String>, err: &Error) -> ErrorResponse {
    ErrorResponse {
        schema_version: SCHEMA_VERSION.to_string(),
        request_id,
        error: err.to_detail(),
    }
}

pub fn render_plan(plan: &CommitPlan, format: OutputFormat) -> String {
    match format {
        OutputFormat::Json => to_json(plan),
        OutputFormat::Human => {
            let mut out = String::new();
            for unit in &plan.plan {
                let _ = writeln!(out, "{}  {}", unit.id, commit_header(unit));
                for line in &unit.body {
                    let _ = writeln!(out, "    {line}");
                }
                let _ = writeln!(out, "    files: {}", unit.files.join(", "));
            }
            push_warnings(&mut out, plan.warnings.as_deref().unwrap_or_default());
            out
        }
    }
}

pub fn render_apply(response: &CommitApplyResponse, format: OutputFormat) -> String {
    match format {
        OutputFormat::Json => to_json(response),
        OutputFormat::Human => {
            let mut out = String::new();
            for (result, unit) in response.results.iter().zip(&response.plan) {
                let status = match result.status {
                    UnitStatus::Planned => "planned",
                    UnitStatus::Applied => "applied",
                    UnitStatus::Skipped => "skipped",
                    UnitStatus::Failed => "failed",
                };
                let _ = write!(out, "{status:<8} {}  {}", result.id, commit_header(unit));
                if let Some(hash) = &result.commit_hash {
                    let _ = write!(out, "  ({})", short(hash));
                }
                out.push('\n');
                if let Some(error) = &result.error {
                    let _ = writeln!(out, "         {}: {}", error.code, error.message);
                }
            }
            push_warnings(&mut out, &response.warnings);
            out
        }
    }
}

pub fn render_error(response: &ErrorResponse, format: OutputFormat) -> String {
    match format {
        OutputFormat::Json => to_json(response),
        OutputFormat::Human => format!("error[{}]: {}\n", response.error.code, response.error.message),
    }
}

fn push_warnings(out: &mut String, warnings: &[Warning]) {
    for warning in warnings {
        let _ = writeln!(out, "warning[{}]: {}", warning.code, warning.message);
    }
}

fn short(hash: &str) -> &str {
    hash.get(..12).unwrap_or(hash)
}

fn to_json<T: serde::Serialize>(value: &T) -> String {
    match serde_json::to_string_pretty(value) {
        Ok(mut json) => {
            json.push('\n');
            json
        }
        Err(err) => format!("{{\"schema_version\":\"v1\",\"error\":{{\"code\":\"usage_error\",\"message\":\"serialize output: {err}\"}}}}\n"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GitError;
    use crate::test_support::unit;
    use crate::validate::{SchemaKind, schema_errors};

    #[test]
    fn apply_json_matches_schema() {
        let plan = CommitPlan::new(vec![unit("c1", &["a.txt"]), unit("c2", &["b.txt"])]);
        let mut applied = ExecutionResult::new("c1", UnitStatus::Applied);
        applied.commit_hash = Some("0123456789abcdef".to_string());
        let mut failed = ExecutionResult::new("c2", UnitStatus::Failed);
        failed.error = Some(Error::Git(GitError::StagedDiffEmpty { id: "c2".into() }).to_detail());
        let response = apply_response(Some("req".into()), None, &plan, vec![applied, failed], Vec::new());

        let value: serde_json::Value =
            serde_json::from_str(&render_apply(&response, OutputFormat::Json)).expect("json");
        assert!(schema_errors(SchemaKind::CommitApply, &value).is_empty());
    }

    #[test]
    fn human_apply_lists_status_and_errors() {
        let plan = CommitPlan::new(vec![unit("c1", &["a.txt"])]);
        let mut failed = ExecutionResult::new("c1", UnitStatus::Failed);
        failed.error = Some(Error::Interrupted.to_detail());
        let response = apply_response(None, None, &plan, vec![failed], Vec::new());
        let text = render_apply(&response, OutputFormat::Human);
        assert!(text.starts_with("failed   c1  feat[core]: "));
        assert!(text.contains("interrupted: interrupted"));
    }

    #[test]
    fn human_error_is_one_line() {
        let response = error_response(None, &Error::InputInvalid("diff is empty".into()));
        assert_eq!(
            render_error(&response, OutputFormat::Human),
            "error[input_invalid]: diff is empty\n"
        );
    }

    #[test]
    fn format_parses() {
        assert_eq!("HUMAN".parse::<OutputFormat>(), Ok(OutputFormat::Human));
        assert!("yaml".parse::<OutputFormat>().is_err());
    }
}
