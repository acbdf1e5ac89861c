//! Error taxonomy shared by the CLI and the service.
//!
//! Every variant maps to a stable envelope code, a process exit code and
//! structured details so callers can act on failures without parsing text.

use std::path::PathBuf;

use serde_json::{Value, json};
use thiserror::Error;

use crate::core::semantic::Violation;
use crate::core::types::ErrorDetail;
use crate::exit_codes;

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Usage(String),

    #[error("{0}")]
    InputInvalid(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("plan generator failed: {0}")]
    LlmRuntime(String),

    #[error("{message}")]
    LlmParse {
        message: String,
        violations: Vec<Violation>,
    },

    #[error(transparent)]
    Git(#[from] GitError),

    #[error("unit '{id}' claims '{file}', already committed by unit '{claimed_by}'")]
    PlanConflict {
        id: String,
        file: String,
        claimed_by: String,
    },

    #[error("plan generator timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("interrupted")]
    Interrupted,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum GitError {
    #[error("git {args} failed ({status}): {stderr}")]
    CommandFailed {
        args: String,
        status: String,
        stderr: String,
    },

    #[error("failed to spawn git {args}: {source}")]
    Spawn {
        args: String,
        #[source]
        source: std::io::Error,
    },

    #[error("git {args} produced non-UTF-8 output")]
    OutputNotUtf8 { args: String },

    #[error("{} is not a git work tree", path.display())]
    NotARepository { path: PathBuf },

    #[error("worktree changed since the diff was captured")]
    WorktreeDrift { expected: String, actual: String },

    #[error("staged files for unit '{id}' do not match the plan")]
    StagedFilesMismatch {
        id: String,
        expected: Vec<String>,
        actual: Vec<String>,
    },

    #[error("staged content for unit '{id}' differs from the captured diff")]
    StagedContentMismatch { id: String, files: Vec<String> },

    #[error("nothing staged for unit '{id}'")]
    StagedDiffEmpty { id: String },

    #[error("another apply is running for {} (lock: .git/atomize.lock)", path.display())]
    RepoLocked { path: PathBuf },

    #[error("lock file {}: {source}", path.display())]
    LockFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("illegal execution transition {from} -> {to}")]
    IllegalTransition { from: String, to: String },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file {} not found", path.display())]
    Missing { path: PathBuf },

    #[error("read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("environment variable {var}={value:?} is invalid: {reason}")]
    Env {
        var: String,
        value: String,
        reason: String,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

impl Error {
    /// Envelope code (`schemas/error/v1.schema.json`).
    pub fn code(&self) -> &'static str {
        match self {
            Error::Usage(_) => "usage_error",
            Error::InputInvalid(_) => "input_invalid",
            Error::Config(_) => "config_error",
            Error::LlmRuntime(_) => "llm_runtime_error",
            Error::LlmParse { .. } | Error::PlanConflict { .. } => "llm_parse_error",
            Error::Git(_) => "git_error",
            Error::Timeout { .. } => "timeout",
            Error::Interrupted => "interrupted",
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Usage(_) => exit_codes::USAGE,
            Error::InputInvalid(_) => exit_codes::INPUT_INVALID,
            Error::Config(_) => exit_codes::CONFIG,
            Error::LlmRuntime(_) | Error::Timeout { .. } => exit_codes::LLM_RUNTIME,
            Error::LlmParse { .. } | Error::PlanConflict { .. } => exit_codes::LLM_PARSE,
            Error::Git(_) => exit_codes::GIT,
            Error::Interrupted => exit_codes::INTERRUPTED,
        }
    }

    pub fn details(&self) -> Option<Value> {
        match self {
            Error::LlmParse { violations, .. } => Some(json!({ "violations": violations })),
            Error::PlanConflict {
                id,
                file,
                claimed_by,
            } => Some(json!({ "kind": "plan_conflict", "id": id, "file": file, "claimed_by": claimed_by })),
            Error::Timeout { secs } => Some(json!({ "timeout_secs": secs })),
            Error::Git(err) => err.details(),
            _ => None,
        }
    }

    pub fn to_detail(&self) -> ErrorDetail {
        ErrorDetail {
            code: self.code().to_string(),
            message: self.to_string(),
            details: self.details(),
        }
    }
}

impl GitError {
    pub fn kind(&self) -> &'static str {
        match self {
            GitError::CommandFailed { .. } => "command_failed",
            GitError::Spawn { .. } => "spawn",
            GitError::OutputNotUtf8 { .. } => "output_not_utf8",
            GitError::NotARepository { .. } => "not_a_repository",
            GitError::WorktreeDrift { .. } => "worktree_drift",
            GitError::StagedFilesMismatch { .. } => "staged_files_mismatch",
            GitError::StagedContentMismatch { .. } => "staged_content_mismatch",
            GitError::StagedDiffEmpty { .. } => "staged_diff_empty",
            GitError::RepoLocked { .. } => "repo_locked",
            GitError::LockFile { .. } => "lock_file",
            GitError::IllegalTransition { .. } => "illegal_transition",
        }
    }

    pub fn details(&self) -> Option<Value> {
        let kind = self.kind();
        let details = match self {
            GitError::CommandFailed { args, status, .. } => {
                json!({ "kind": kind, "args": args, "status": status })
            }
            GitError::WorktreeDrift { expected, actual } => {
                json!({ "kind": kind, "expected": expected, "actual": actual })
            }
            GitError::StagedFilesMismatch {
                id,
                expected,
                actual,
            } => json!({ "kind": kind, "id": id, "expected": expected, "actual": actual }),
            GitError::StagedContentMismatch { id, files } => {
                json!({ "kind": kind, "id": id, "files": files })
            }
            GitError::StagedDiffEmpty { id } => json!({ "kind": kind, "id": id }),
            GitError::NotARepository { path }
            | GitError::RepoLocked { path }
            | GitError::LockFile { path, .. } => {
                json!({ "kind": kind, "path": path.display().to_string() })
            }
            GitError::IllegalTransition { from, to } => {
                json!({ "kind": kind, "from": from, "to": to })
            }
            GitError::Spawn { .. } | GitError::OutputNotUtf8 { .. } => json!({ "kind": kind }),
        };
        Some(details)
    }
}
