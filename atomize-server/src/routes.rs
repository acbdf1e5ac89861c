//! HTTP route handlers for the plan and apply API.

use std::path::PathBuf;

use atomize::apply::{ApplyMode, ApplyOptions};
use atomize::core::types::DiffMode;
use atomize::error::{Error, GitError};
use atomize::io::config::{AtomizeConfig, ConfigOverrides};
use atomize::pipeline::{self, DiffInput, PlanSource};
use atomize::report;
use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::state::AppState;

/// Build the API router.
pub fn api_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/plan", post(plan))
        .route("/apply", post(apply))
}

async fn health() -> &'static str {
    "ok"
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PlanRequest {
    /// Explicit diff text; wins over `repo`.
    pub diff: Option<String>,
    pub repo: Option<PathBuf>,
    pub diff_mode: Option<DiffMode>,
    pub include_untracked: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ApplyRequest {
    pub repo: PathBuf,
    #[serde(default)]
    pub diff: Option<String>,
    #[serde(default)]
    pub diff_mode: Option<DiffMode>,
    #[serde(default)]
    pub include_untracked: Option<bool>,
    #[serde(default)]
    pub execute: bool,
    #[serde(default)]
    pub cleanup_on_error: bool,
    #[serde(default)]
    pub assisted_by: Option<String>,
    /// Previously produced plan; the generator is skipped when present.
    #[serde(default)]
    pub plan: Option<Value>,
}

/// POST /api/plan - validated commit plan for a diff.
pub async fn plan(State(state): State<AppState>, Json(req): Json<PlanRequest>) -> Response {
    let request_id = pipeline::new_request_id();
    let cfg = request_config(&state.config, req.diff_mode, req.include_untracked);
    let id = request_id.clone();
    let joined = tokio::task::spawn_blocking(move || {
        let input = DiffInput {
            diff: req.diff,
            repo: req.repo,
        };
        pipeline::run_plan(&input, &*state.generator, &cfg, &id, &state.shutdown)
    })
    .await;

    match joined {
        Ok(Ok(plan)) => {
            info!(request_id = %request_id, units = plan.plan.len(), "plan served");
            (StatusCode::OK, Json(plan)).into_response()
        }
        Ok(Err(err)) => error_response(&request_id, &err),
        Err(err) => worker_failed(&request_id, &err),
    }
}

/// POST /api/apply - simulate (default) or execute a plan against a repository.
pub async fn apply(State(state): State<AppState>, Json(req): Json<ApplyRequest>) -> Response {
    let request_id = pipeline::new_request_id();
    let cfg = request_config(&state.config, req.diff_mode, req.include_untracked);
    let options = ApplyOptions {
        mode: if req.execute {
            ApplyMode::Execute
        } else {
            ApplyMode::Simulate
        },
        cleanup_on_error: req.cleanup_on_error,
        assisted_by: req.assisted_by,
        limits: pipeline::limits(&cfg),
    };
    let id = request_id.clone();
    let joined = tokio::task::spawn_blocking(move || {
        let source = match &req.plan {
            Some(plan) => PlanSource::Supplied(plan.to_string()),
            None => PlanSource::Generate(&*state.generator),
        };
        pipeline::run_apply(
            &state.locks,
            &req.repo,
            req.diff,
            source,
            &cfg,
            &options,
            &id,
            &state.shutdown,
        )
    })
    .await;

    match joined {
        Ok(Ok(outcome)) => {
            let status = outcome.failure.as_ref().map_or(StatusCode::OK, status_for);
            info!(request_id = %request_id, exit_code = outcome.exit_code, "apply served");
            (status, Json(outcome.response)).into_response()
        }
        Ok(Err(err)) => error_response(&request_id, &err),
        Err(err) => worker_failed(&request_id, &err),
    }
}

fn request_config(
    base: &AtomizeConfig,
    diff_mode: Option<DiffMode>,
    include_untracked: Option<bool>,
) -> AtomizeConfig {
    let mut cfg = base.clone();
    cfg.apply_overrides(&ConfigOverrides {
        diff_mode,
        include_untracked,
        ..ConfigOverrides::default()
    });
    cfg
}

/// HTTP status for an error envelope.
pub fn status_for(err: &Error) -> StatusCode {
    match err {
        Error::Usage(_) | Error::InputInvalid(_) => StatusCode::BAD_REQUEST,
        Error::LlmParse { .. } | Error::PlanConflict { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        Error::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        Error::LlmRuntime(_) => StatusCode::BAD_GATEWAY,
        Error::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        Error::Git(GitError::RepoLocked { .. } | GitError::WorktreeDrift { .. }) => {
            StatusCode::CONFLICT
        }
        Error::Git(GitError::NotARepository { .. }) => StatusCode::BAD_REQUEST,
        Error::Git(_) => StatusCode::INTERNAL_SERVER_ERROR,
        Error::Interrupted => StatusCode::SERVICE_UNAVAILABLE,
    }
}

fn error_response(request_id: &str, err: &Error) -> Response {
    warn!(request_id, code = err.code(), error = %err, "request failed");
    let envelope = report::error_response(Some(request_id.to_string()), err);
    (status_for(err), Json(envelope)).into_response()
}

fn worker_failed(request_id: &str, err: &tokio::task::JoinError) -> Response {
    warn!(request_id, error = %err, "worker task failed");
    (StatusCode::INTERNAL_SERVER_ERROR, "worker task failed").into_response()
}
