//! End-to-end `plan` and `apply` flows shared by the CLI and the service.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, instrument};
use uuid::Uuid;

use crate::apply::{ApplyOptions, apply_plan};
use crate::cancel::CancelToken;
use crate::core::types::{CommitApplyResponse, CommitPlan, InputMeta};
use crate::error::Error;
use crate::io::config::AtomizeConfig;
use crate::io::generator::PlanGenerator;
use crate::io::git::Git;
use crate::io::lock::RepoLocks;
use crate::plan::{accept_plan, check_recorded_input, generate_plan, recorded_input};
use crate::report::apply_response;
use crate::snapshot::{DiffSnapshot, SnapshotLimits, capture_explicit, capture_repo};

/// Fresh identifier stamped on every payload and envelope of one call.
pub fn new_request_id() -> String {
    Uuid::new_v4().to_string()
}

/// Where the diff comes from. Explicit text wins over the repository.
#[derive(Debug, Clone, Default)]
pub struct DiffInput {
    pub diff: Option<String>,
    pub repo: Option<PathBuf>,
}

/// How the plan for an apply is obtained.
pub enum PlanSource<'a> {
    Generate(&'a dyn PlanGenerator),
    /// Raw plan text produced by an earlier `plan` call.
    Supplied(String),
}

/// Apply payload plus the failure that stopped the run, if any.
#[derive(Debug)]
pub struct ApplyOutcome {
    pub response: CommitApplyResponse,
    pub failure: Option<Error>,
    pub exit_code: i32,
}

pub fn limits(cfg: &AtomizeConfig) -> SnapshotLimits {
    SnapshotLimits {
        max_diff_bytes: cfg.max_diff_bytes,
    }
}

fn capture(input: &DiffInput, git: Option<&Git>, cfg: &AtomizeConfig) -> Result<DiffSnapshot, Error> {
    match (&input.diff, git) {
        (Some(text), _) => capture_explicit(
            text.clone(),
            cfg.diff_mode,
            cfg.include_untracked,
            limits(cfg),
        ),
        (None, Some(git)) => capture_repo(git, cfg.diff_mode, cfg.include_untracked, limits(cfg)),
        (None, None) => Err(Error::InputInvalid(
            "no diff provided and no repo path supplied".to_string(),
        )),
    }
}

fn governed_config(cfg: &AtomizeConfig, recorded: Option<&InputMeta>) -> AtomizeConfig {
    let mut governed = cfg.clone();
    if let Some(recorded) = recorded {
        if let Some(mode) = recorded.diff_mode {
            governed.diff_mode = mode;
        }
        if let Some(include_untracked) = recorded.include_untracked {
            governed.include_untracked = include_untracked;
        }
    }
    governed
}

/// Produce a validated plan for `input`.
#[instrument(skip_all, fields(request_id = %request_id))]
pub fn run_plan(
    input: &DiffInput,
    generator: &dyn PlanGenerator,
    cfg: &AtomizeConfig,
    request_id: &str,
    cancel: &CancelToken,
) -> Result<CommitPlan, Error> {
    let git = match (&input.diff, &input.repo) {
        (None, Some(repo)) => Some(Git::open(repo)?),
        _ => None,
    };
    let snapshot = capture(input, git.as_ref(), cfg)?;
    let repo = git.as_ref().map(Git::workdir);
    let mut outcome = generate_plan(generator, &snapshot, cfg, repo, cancel)?;
    outcome.plan.request_id = Some(request_id.to_string());
    Ok(outcome.plan)
}

/// Lease `repo`, capture, plan and apply.
///
/// A supplied plan that records its input is captured with the recorded diff
/// mode and untracked setting and must still match the recorded hash.
/// `Err` means nothing was attempted; a run that stopped part way comes back
/// as an [`ApplyOutcome`] carrying its failure.
#[allow(clippy::too_many_arguments)]
#[instrument(skip_all, fields(repo = %repo.display(), mode = ?options.mode))]
pub fn run_apply(
    locks: &Arc<RepoLocks>,
    repo: &Path,
    diff: Option<String>,
    source: PlanSource<'_>,
    cfg: &AtomizeConfig,
    options: &ApplyOptions,
    request_id: &str,
    cancel: &CancelToken,
) -> Result<ApplyOutcome, Error> {
    let git = Git::open(repo)?;
    let lease = locks.try_acquire(&git)?;
    let input = DiffInput {
        diff,
        repo: Some(repo.to_path_buf()),
    };
    let recorded = match &source {
        PlanSource::Supplied(raw) => recorded_input(raw),
        PlanSource::Generate(_) => None,
    };
    let cfg = &governed_config(cfg, recorded.as_ref());
    let snapshot = capture(&input, Some(lease.git()), cfg)?;
    if let Some(recorded) = &recorded {
        check_recorded_input(recorded, &snapshot)?;
    }

    let plan = match source {
        PlanSource::Generate(generator) => {
            generate_plan(generator, &snapshot, cfg, Some(lease.path()), cancel)?.plan
        }
        PlanSource::Supplied(raw) => accept_plan(&raw, &snapshot, cfg.scope_policy)?.plan,
    };

    let report = apply_plan(&lease, &plan, &snapshot, options, cancel)?;
    let exit_code = report.exit_code();
    info!(
        applied = report.applied(),
        state = %report.final_state,
        exit_code,
        "apply done"
    );
    let response = apply_response(
        Some(request_id.to_string()),
        Some(snapshot.input_meta()),
        &plan,
        report.results,
        report.warnings,
    );
    Ok(ApplyOutcome {
        response,
        failure: report.failure,
        exit_code,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apply::ApplyMode;
    use crate::core::types::{DiffMode, UnitStatus};
    use crate::error::GitError;
    use crate::test_support::{ScriptedGenerator, TestRepo, plan_json, unit};

    fn cfg() -> AtomizeConfig {
        AtomizeConfig::default()
    }

    #[test]
    fn plan_from_repo_carries_request_id_and_input() {
        let repo = TestRepo::with_commit(&[("a.txt", "a\n")]);
        repo.write("a.txt", "a2\n");
        let generator = ScriptedGenerator::new(vec![Ok(plan_json(&[unit("c1", &["a.txt"])]))]);
        let input = DiffInput {
            diff: None,
            repo: Some(repo.root().to_path_buf()),
        };
        let plan = run_plan(&input, &generator, &cfg(), "req-1", &CancelToken::new())
            .expect("plan");
        assert_eq!(plan.request_id.as_deref(), Some("req-1"));
        let meta = plan.input.expect("input");
        assert_eq!(meta.diff_mode, Some(DiffMode::All));
        assert!(meta.diff_hash.expect("hash").starts_with("sha256:"));
    }

    #[test]
    fn plan_without_any_diff_is_invalid_input() {
        let generator = ScriptedGenerator::new(Vec::new());
        let err = run_plan(&DiffInput::default(), &generator, &cfg(), "r", &CancelToken::new())
            .expect_err("no input");
        assert_eq!(err.code(), "input_invalid");
        assert_eq!(err.exit_code(), 3);
        assert_eq!(generator.calls(), 0);
    }

    #[test]
    fn held_lock_fails_before_generation() {
        let repo = TestRepo::with_commit(&[("a.txt", "a\n")]);
        repo.write("a.txt", "a2\n");
        let locks = RepoLocks::new();
        let _held = locks.try_acquire(&repo.git()).expect("first lease");
        let generator = ScriptedGenerator::new(Vec::new());

        let err = run_apply(
            &locks,
            repo.root(),
            None,
            PlanSource::Generate(&generator),
            &cfg(),
            &ApplyOptions::default(),
            "r",
            &CancelToken::new(),
        )
        .expect_err("locked");
        assert!(matches!(err, Error::Git(GitError::RepoLocked { .. })));
        assert_eq!(generator.calls(), 0);
    }

    #[test]
    fn supplied_plan_is_applied_and_lease_released() {
        let repo = TestRepo::with_commit(&[("a.txt", "a\n")]);
        repo.write("a.txt", "a2\n");
        let locks = RepoLocks::new();
        let options = ApplyOptions {
            mode: ApplyMode::Execute,
            ..ApplyOptions::default()
        };

        let outcome = run_apply(
            &locks,
            repo.root(),
            None,
            PlanSource::Supplied(plan_json(&[unit("c1", &["a.txt"])])),
            &cfg(),
            &options,
            "r",
            &CancelToken::new(),
        )
        .expect("apply");
        assert_eq!(outcome.exit_code, 0);
        assert_eq!(outcome.response.results[0].status, UnitStatus::Applied);
        assert_eq!(outcome.response.request_id.as_deref(), Some("r"));
        assert_eq!(repo.commit_count(), 2);
        assert!(!locks.is_held(repo.root()));
    }

    #[test]
    fn request_ids_are_unique_uuids() {
        let a = new_request_id();
        assert_eq!(a.len(), 36);
        assert_ne!(a, new_request_id());
    }

    #[test]
    fn supplied_plan_refuses_a_diff_changed_since_planning() {
        let repo = TestRepo::with_commit(&[("a.txt", "a\n")]);
        repo.write("a.txt", "a2\n");
        let generator = ScriptedGenerator::new(vec![Ok(plan_json(&[unit("c1", &["a.txt"])]))]);
        let input = DiffInput {
            diff: None,
            repo: Some(repo.root().to_path_buf()),
        };
        let plan = run_plan(&input, &generator, &cfg(), "r", &CancelToken::new()).expect("plan");
        repo.write("a.txt", "something else entirely\n");

        let locks = RepoLocks::new();
        let options = ApplyOptions {
            mode: ApplyMode::Execute,
            ..ApplyOptions::default()
        };
        let err = run_apply(
            &locks,
            repo.root(),
            None,
            PlanSource::Supplied(serde_json::to_string(&plan).expect("json")),
            &cfg(),
            &options,
            "r",
            &CancelToken::new(),
        )
        .expect_err("drift");
        assert!(matches!(err, Error::Git(GitError::WorktreeDrift { .. })));
        assert_eq!(repo.commit_count(), 1);
        assert_eq!(repo.show("HEAD:a.txt"), "a\n");
    }

    #[test]
    fn supplied_plan_is_captured_with_its_recorded_mode() {
        let repo = TestRepo::with_commit(&[("a.txt", "a\n")]);
        repo.write("a.txt", "staged\n");
        repo.git().add_paths(&["a.txt".to_string()]).expect("stage");
        repo.write("a.txt", "unstaged\n");
        let staged = AtomizeConfig {
            diff_mode: DiffMode::Staged,
            ..cfg()
        };
        let generator = ScriptedGenerator::new(vec![Ok(plan_json(&[unit("c1", &["a.txt"])]))]);
        let input = DiffInput {
            diff: None,
            repo: Some(repo.root().to_path_buf()),
        };
        let plan = run_plan(&input, &generator, &staged, "r", &CancelToken::new()).expect("plan");

        let locks = RepoLocks::new();
        let options = ApplyOptions {
            mode: ApplyMode::Execute,
            ..ApplyOptions::default()
        };
        let outcome = run_apply(
            &locks,
            repo.root(),
            None,
            PlanSource::Supplied(serde_json::to_string(&plan).expect("json")),
            &cfg(),
            &options,
            "r",
            &CancelToken::new(),
        )
        .expect("apply");
        assert!(outcome.failure.is_none(), "{:?}", outcome.failure);
        assert_eq!(repo.show("HEAD:a.txt"), "staged\n");
        assert_eq!(repo.read("a.txt"), "unstaged\n");
    }
}
