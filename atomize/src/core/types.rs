//! Wire types shared by the planner, validator, orchestrator and outputs.
//!
//! These types define the stable JSON contracts (`schemas/*/v1.schema.json`).
//! Field order and serde names must stay aligned with the schemas.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Version tag stamped on every JSON payload.
pub const SCHEMA_VERSION: &str = "v1";

/// Which part of the repository state a diff is taken from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffMode {
    /// Unstaged changes only (index vs worktree).
    Worktree,
    /// Index-only changes (base vs index).
    Staged,
    /// Staged and unstaged changes, one section per file (base vs worktree).
    All,
}

impl DiffMode {
    pub fn as_str(self) -> &'static str {
        match self {
            DiffMode::Worktree => "worktree",
            DiffMode::Staged => "staged",
            DiffMode::All => "all",
        }
    }
}

impl fmt::Display for DiffMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DiffMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "worktree" => Ok(DiffMode::Worktree),
            "staged" => Ok(DiffMode::Staged),
            "all" => Ok(DiffMode::All),
            other => Err(format!(
                "unknown diff mode '{other}' (expected worktree, staged or all)"
            )),
        }
    }
}

/// Where a diff came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputSource {
    Repo,
    Diff,
}

/// Conventional-commit kinds accepted in a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitType {
    Feat,
    Fix,
    Refactor,
    Style,
    Docs,
    Test,
    Chore,
    Build,
    Perf,
    Ci,
}

impl CommitType {
    pub const ALL: [CommitType; 10] = [
        CommitType::Feat,
        CommitType::Fix,
        CommitType::Refactor,
        CommitType::Style,
        CommitType::Docs,
        CommitType::Test,
        CommitType::Chore,
        CommitType::Build,
        CommitType::Perf,
        CommitType::Ci,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            CommitType::Feat => "feat",
            CommitType::Fix => "fix",
            CommitType::Refactor => "refactor",
            CommitType::Style => "style",
            CommitType::Docs => "docs",
            CommitType::Test => "test",
            CommitType::Chore => "chore",
            CommitType::Build => "build",
            CommitType::Perf => "perf",
            CommitType::Ci => "ci",
        }
    }
}

impl fmt::Display for CommitType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Hunk selector. Always empty in v1 plans (whole-file staging only).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hunk {
    pub file: String,
    pub header: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

/// One planned atomic commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitUnit {
    pub id: String,
    #[serde(rename = "type")]
    pub commit_type: CommitType,
    pub scope: Option<String>,
    pub summary: String,
    pub body: Vec<String>,
    pub files: Vec<String>,
    pub hunks: Vec<Hunk>,
}

/// Non-fatal annotation attached to a plan or report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Warning {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl Warning {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// Audit metadata describing the diff a payload was computed against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputMeta {
    pub source: InputSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff_mode: Option<DiffMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_untracked: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff_hash: Option<String>,
}

/// Commit plan document (`schemas/commit_plan/v1.schema.json`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitPlan {
    pub schema_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warnings: Option<Vec<Warning>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<InputMeta>,
    pub plan: Vec<CommitUnit>,
}

impl CommitPlan {
    pub fn new(plan: Vec<CommitUnit>) -> Self {
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            request_id: None,
            warnings: None,
            input: None,
            plan,
        }
    }
}

/// Per-unit execution status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    Planned,
    Applied,
    Skipped,
    Failed,
}

/// Structured error payload used in envelopes and failed unit results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// Outcome for one commit unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub id: String,
    pub status: UnitStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetail>,
}

impl ExecutionResult {
    pub fn new(id: &str, status: UnitStatus) -> Self {
        Self {
            id: id.to_string(),
            status,
            commit_hash: None,
            error: None,
        }
    }
}

/// Apply report document (`schemas/commit_apply/v1.schema.json`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitApplyResponse {
    pub schema_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<InputMeta>,
    pub plan: Vec<CommitUnit>,
    pub results: Vec<ExecutionResult>,
    pub warnings: Vec<Warning>,
}

/// Error envelope (`schemas/error/v1.schema.json`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub schema_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub error: ErrorDetail,
}
