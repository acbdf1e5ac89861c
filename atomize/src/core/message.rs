//! Commit message rendering for a validated unit.

use crate::core::types::CommitUnit;

const ASSISTED_BY_PREFIX: &str = "Assisted by: ";

/// `type[scope]: summary`, or `type: summary` for a global change.
pub fn commit_header(unit: &CommitUnit) -> String {
    match unit.scope.as_deref() {
        Some(scope) => format!("{}[{}]: {}", unit.commit_type, scope, unit.summary.trim()),
        None => format!("{}: {}", unit.commit_type, unit.summary.trim()),
    }
}

/// Full commit message: header, blank line, body lines, then an optional
/// `Assisted by:` trailer separated by one blank line.
pub fn build_commit_message(unit: &CommitUnit, assisted_by: Option<&str>) -> String {
    let mut message = commit_header(unit);
    let body: Vec<&str> = unit
        .body
        .iter()
        .map(|line| line.trim())
        .filter(|line| !line.is_empty())
        .collect();
    if !body.is_empty() {
        message.push_str("\n\n");
        message.push_str(&body.join("\n"));
    }
    if let Some(model) = assisted_by.map(str::trim).filter(|m| !m.is_empty()) {
        message.push_str("\n\n");
        message.push_str(ASSISTED_BY_PREFIX);
        message.push_str(model);
    }
    message.push('\n');
    message
}
