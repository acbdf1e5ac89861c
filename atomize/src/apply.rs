//! Execution orchestrator: turns an accepted plan into commits, or aborts cleanly.
//!
//! The run is strictly sequential and driven by [`ExecMachine`]. Simulated
//! runs perform the preflight drift check and the per-unit membership and
//! conflict checks without touching the index or `HEAD`. Executed runs stage,
//! verify and commit one unit at a time. Commits that already landed are never
//! undone; a failing unit stops the run and the remaining units are skipped.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use tracing::{debug, info, instrument, warn};

use crate::cancel::CancelToken;
use crate::core::diff::{diff_files, diff_hash};
use crate::core::message::build_commit_message;
use crate::core::semantic::Violation;
use crate::core::state::{ExecMachine, ExecState};
use crate::core::types::{CommitPlan, CommitUnit, DiffMode, ExecutionResult, UnitStatus, Warning};
use crate::error::{Error, GitError};
use crate::exit_codes;
use crate::io::git::{Git, IndexEntry};
use crate::io::lock::RepoLease;
use crate::snapshot::{DiffSnapshot, SnapshotLimits, SnapshotSource, render_repo_diff};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ApplyMode {
    #[default]
    Simulate,
    Execute,
}

#[derive(Debug, Clone, Default)]
pub struct ApplyOptions {
    pub mode: ApplyMode,
    /// Reset the failing unit's index entries before returning.
    pub cleanup_on_error: bool,
    /// Model name for the `Assisted by:` trailer.
    pub assisted_by: Option<String>,
    pub limits: SnapshotLimits,
}

/// Outcome of a run that got past preflight.
#[derive(Debug)]
pub struct ApplyReport {
    pub final_state: ExecState,
    pub results: Vec<ExecutionResult>,
    pub warnings: Vec<Warning>,
    /// Why the run stopped early, if it did.
    pub failure: Option<Error>,
}

impl ApplyReport {
    pub fn exit_code(&self) -> i32 {
        self.failure
            .as_ref()
            .map_or(exit_codes::OK, Error::exit_code)
    }

    pub fn applied(&self) -> usize {
        self.results
            .iter()
            .filter(|r| r.status == UnitStatus::Applied)
            .count()
    }
}

/// Index entries recorded before the loop, restored for files no commit consumed.
#[derive(Debug, Default)]
struct ParkedIndex {
    entries: HashMap<String, IndexEntry>,
}

impl ParkedIndex {
    fn park(git: &Git, files: &[String]) -> Result<Self, GitError> {
        let recorded = git.index_entries(files)?;
        let mut entries: HashMap<String, IndexEntry> = files
            .iter()
            .map(|f| (f.clone(), IndexEntry::removal(f)))
            .collect();
        for entry in recorded.into_iter().filter(|e| e.stage == 0) {
            entries.insert(entry.path.clone(), entry);
        }
        git.reset_paths(files)?;
        debug!(files = files.len(), "index parked");
        Ok(Self { entries })
    }

    fn entries_for(&self, files: &[String]) -> Vec<IndexEntry> {
        files
            .iter()
            .filter_map(|f| self.entries.get(f).cloned())
            .collect()
    }
}

/// Apply `plan` against `snapshot` while holding `lease`.
///
/// Returns `Err` only when nothing was attempted: preflight drift, capture
/// failures or an illegal transition. Unit failures and cancellation come
/// back inside the report.
#[instrument(skip_all, fields(mode = ?options.mode, units = plan.plan.len()))]
pub fn apply_plan(
    lease: &RepoLease,
    plan: &CommitPlan,
    snapshot: &DiffSnapshot,
    options: &ApplyOptions,
    cancel: &CancelToken,
) -> Result<ApplyReport, Error> {
    let git = lease.git();
    let units = &plan.plan;
    let simulate = options.mode == ApplyMode::Simulate;
    let mut machine = ExecMachine::new(units.len(), simulate);
    let mut warnings = plan.warnings.clone().unwrap_or_default();

    machine.advance(ExecState::PreflightVerify)?;
    preflight(git, snapshot, options.limits)?;

    let mut results: Vec<ExecutionResult> = units
        .iter()
        .map(|u| ExecutionResult::new(&u.id, UnitStatus::Skipped))
        .collect();

    let parked = if !simulate && matches!(snapshot.mode, DiffMode::Staged | DiffMode::All) {
        Some(ParkedIndex::park(git, &snapshot.files)?)
    } else {
        None
    };
    let sections = snapshot.sections();
    let mut consumed: HashMap<&str, &str> = HashMap::new();

    if units.is_empty() {
        machine.advance(ExecState::Completed)?;
    } else {
        machine.advance(ExecState::Staging(0))?;
    }

    for (index, unit) in units.iter().enumerate() {
        if cancel.is_cancelled() {
            info!(index, "cancelled at unit boundary");
            machine.advance(ExecState::Aborted)?;
            restore_parked(git, parked.as_ref(), &snapshot.files, &consumed, &[], &mut warnings);
            return Ok(ApplyReport {
                final_state: machine.state(),
                results,
                warnings,
                failure: Some(Error::Interrupted),
            });
        }

        let outcome = if simulate {
            check_unit(unit, snapshot, &consumed)
                .and_then(|()| machine.advance(ExecState::VerifyStaged(index)).map_err(Error::from))
                .map(|()| None)
        } else {
            execute_unit(
                git,
                &mut machine,
                index,
                unit,
                snapshot,
                &sections,
                parked.as_ref(),
                &consumed,
                options,
            )
            .map(Some)
        };

        match outcome {
            Ok(commit_hash) => {
                let result = &mut results[index];
                result.status = if simulate {
                    UnitStatus::Planned
                } else {
                    UnitStatus::Applied
                };
                result.commit_hash = commit_hash;
                for file in &unit.files {
                    consumed.insert(file.as_str(), unit.id.as_str());
                }
                machine.finish_unit(index)?;
            }
            Err(err) => {
                warn!(unit = %unit.id, code = err.code(), error = %err, "unit failed");
                if matches!(err, Error::Git(GitError::IllegalTransition { .. })) {
                    return Err(err);
                }
                let terminal = if simulate {
                    ExecState::Aborted
                } else {
                    ExecState::Failed
                };
                machine.advance(terminal)?;
                results[index].status = UnitStatus::Failed;
                results[index].error = Some(err.to_detail());
                if !simulate && options.cleanup_on_error {
                    cleanup_unit(git, unit, &mut warnings);
                }
                restore_parked(
                    git,
                    parked.as_ref(),
                    &snapshot.files,
                    &consumed,
                    &unit.files,
                    &mut warnings,
                );
                return Ok(ApplyReport {
                    final_state: machine.state(),
                    results,
                    warnings,
                    failure: Some(err),
                });
            }
        }
    }

    restore_parked(git, parked.as_ref(), &snapshot.files, &consumed, &[], &mut warnings);
    info!(state = %machine.state(), "apply finished");
    Ok(ApplyReport {
        final_state: machine.state(),
        results,
        warnings,
        failure: None,
    })
}

/// Re-render the repository diff and require it to still describe the snapshot.
///
/// Repository captures must hash identically. Explicit text must match the
/// repository's current section, header-normalized, for every file it names.
fn preflight(git: &Git, snapshot: &DiffSnapshot, limits: SnapshotLimits) -> Result<(), Error> {
    let (current, _) = render_repo_diff(git, snapshot.mode, snapshot.include_untracked, limits)?;
    let actual = diff_hash(&current);
    let drifted = match snapshot.source {
        SnapshotSource::Repo => actual != snapshot.diff_hash,
        SnapshotSource::Explicit => {
            let expected = snapshot.sections();
            let now = snapshot.sections_of(&current);
            let stale: Vec<&str> = expected
                .iter()
                .filter(|(path, text)| now.get(*path) != Some(*text))
                .map(|(path, _)| path.as_str())
                .collect();
            if !stale.is_empty() {
                debug!(files = ?stale, "explicit sections differ from the repository");
            }
            !stale.is_empty()
        }
    };
    if drifted {
        warn!(expected = %snapshot.diff_hash, actual = %actual, "worktree drift");
        return Err(GitError::WorktreeDrift {
            expected: snapshot.diff_hash.clone(),
            actual,
        }
        .into());
    }
    debug!("preflight verified");
    Ok(())
}

/// Membership and conflict checks shared by both modes; no git access.
fn check_unit(
    unit: &CommitUnit,
    snapshot: &DiffSnapshot,
    consumed: &HashMap<&str, &str>,
) -> Result<(), Error> {
    for file in &unit.files {
        if let Some(owner) = consumed.get(file.as_str()) {
            return Err(Error::PlanConflict {
                id: unit.id.clone(),
                file: file.clone(),
                claimed_by: owner.to_string(),
            });
        }
    }
    let missing: Vec<Violation> = unit
        .files
        .iter()
        .filter(|f| !snapshot.files.contains(f))
        .map(|f| {
            Violation::new(
                "file_not_in_diff",
                Some(&unit.id),
                format!("file '{f}' is not part of the diff"),
            )
        })
        .collect();
    if !missing.is_empty() {
        return Err(Error::LlmParse {
            message: format!("unit '{}' references files outside the diff", unit.id),
            violations: missing,
        });
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn execute_unit(
    git: &Git,
    machine: &mut ExecMachine,
    index: usize,
    unit: &CommitUnit,
    snapshot: &DiffSnapshot,
    sections: &BTreeMap<String, String>,
    parked: Option<&ParkedIndex>,
    consumed: &HashMap<&str, &str>,
    options: &ApplyOptions,
) -> Result<String, Error> {
    check_unit(unit, snapshot, consumed)?;

    git.reset_paths(&unit.files)?;
    stage_unit(git, unit, snapshot, parked)?;

    machine.advance(ExecState::VerifyStaged(index))?;
    verify_staged(git, unit, snapshot, sections)?;

    machine.advance(ExecState::Committing(index))?;
    let message = build_commit_message(unit, options.assisted_by.as_deref());
    let sha = git.commit(&message)?;
    info!(unit = %unit.id, commit = %sha, "unit committed");
    Ok(sha)
}

fn stage_unit(
    git: &Git,
    unit: &CommitUnit,
    snapshot: &DiffSnapshot,
    parked: Option<&ParkedIndex>,
) -> Result<(), GitError> {
    match (snapshot.mode, parked) {
        (DiffMode::Staged, Some(parked)) => {
            let (from_worktree, from_index): (Vec<String>, Vec<String>) = unit
                .files
                .iter()
                .cloned()
                .partition(|f| snapshot.is_untracked(f));
            git.write_index_entries(&parked.entries_for(&from_index))?;
            git.add_paths(&from_worktree)
        }
        _ => git.add_paths(&unit.files),
    }
}

fn verify_staged(
    git: &Git,
    unit: &CommitUnit,
    snapshot: &DiffSnapshot,
    sections: &BTreeMap<String, String>,
) -> Result<(), GitError> {
    let staged = git.staged_diff()?;
    let staged_files: BTreeSet<String> = diff_files(&staged).into_iter().collect();
    if staged_files.is_empty() {
        return Err(GitError::StagedDiffEmpty {
            id: unit.id.clone(),
        });
    }
    let expected: BTreeSet<String> = unit.files.iter().cloned().collect();
    if staged_files != expected {
        return Err(GitError::StagedFilesMismatch {
            id: unit.id.clone(),
            expected: expected.into_iter().collect(),
            actual: staged_files.into_iter().collect(),
        });
    }
    let staged_sections = snapshot.sections_of(&staged);
    let mismatched: Vec<String> = expected
        .into_iter()
        .filter(|f| staged_sections.get(f) != sections.get(f))
        .collect();
    if !mismatched.is_empty() {
        return Err(GitError::StagedContentMismatch {
            id: unit.id.clone(),
            files: mismatched,
        });
    }
    debug!(unit = %unit.id, "staged diff verified");
    Ok(())
}

fn cleanup_unit(git: &Git, unit: &CommitUnit, warnings: &mut Vec<Warning>) {
    if let Err(err) = git.reset_paths(&unit.files) {
        warn!(unit = %unit.id, error = %err, "cleanup failed");
        warnings.push(
            Warning::new("cleanup_failed", format!("could not reset unit '{}': {err}", unit.id))
                .with_details(serde_json::json!({ "id": unit.id })),
        );
    }
}

/// Put parked entries back for snapshot files that no commit consumed,
/// leaving `exclude` (the failing unit's files) as they are.
fn restore_parked(
    git: &Git,
    parked: Option<&ParkedIndex>,
    snapshot_files: &[String],
    consumed: &HashMap<&str, &str>,
    exclude: &[String],
    warnings: &mut Vec<Warning>,
) {
    let Some(parked) = parked else {
        return;
    };
    let files: Vec<String> = snapshot_files
        .iter()
        .filter(|f| !consumed.contains_key(f.as_str()) && !exclude.contains(*f))
        .cloned()
        .collect();
    if let Err(err) = git.write_index_entries(&parked.entries_for(&files)) {
        warn!(error = %err, "index restore failed");
        warnings.push(Warning::new(
            "index_restore_failed",
            format!("could not restore staged state for uncommitted files: {err}"),
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::lock::RepoLocks;
    use crate::snapshot::{capture_explicit, capture_repo};
    use crate::test_support::{TestRepo, unit};

    fn snapshot(repo: &TestRepo, mode: DiffMode) -> DiffSnapshot {
        capture_repo(&repo.git(), mode, true, SnapshotLimits::default()).expect("snapshot")
    }

    fn execute() -> ApplyOptions {
        ApplyOptions {
            mode: ApplyMode::Execute,
            ..ApplyOptions::default()
        }
    }

    #[test]
    fn execute_commits_each_unit_in_order() {
        let repo = TestRepo::with_commit(&[("a.txt", "a\n"), ("b.txt", "b\n")]);
        repo.write("a.txt", "a2\n");
        repo.write("b.txt", "b2\n");
        let snap = snapshot(&repo, DiffMode::All);
        let plan = CommitPlan::new(vec![unit("c1", &["a.txt"]), unit("c2", &["b.txt"])]);

        let locks = RepoLocks::new();
        let lease = locks.try_acquire(&repo.git()).expect("lease");
        let report = apply_plan(&lease, &plan, &snap, &execute(), &CancelToken::new())
            .expect("apply");

        assert_eq!(report.final_state, ExecState::Completed);
        assert_eq!(report.applied(), 2);
        assert!(report.failure.is_none());
        assert_eq!(repo.commit_count(), 3);
        assert_eq!(repo.files_in_head_commit(), vec!["b.txt"]);
        assert_eq!(
            report.results[1].commit_hash,
            repo.git().head().expect("head")
        );
    }

    #[test]
    fn simulate_reports_planned_and_conflicts() {
        let repo = TestRepo::with_commit(&[("a.txt", "a\n")]);
        repo.write("a.txt", "a2\n");
        let snap = snapshot(&repo, DiffMode::All);
        let plan = CommitPlan::new(vec![unit("c1", &["a.txt"]), unit("c2", &["a.txt"])]);

        let locks = RepoLocks::new();
        let lease = locks.try_acquire(&repo.git()).expect("lease");
        let report = apply_plan(&lease, &plan, &snap, &ApplyOptions::default(), &CancelToken::new())
            .expect("apply");

        assert_eq!(report.final_state, ExecState::Aborted);
        assert_eq!(report.results[0].status, UnitStatus::Planned);
        assert_eq!(report.results[1].status, UnitStatus::Failed);
        assert!(matches!(report.failure, Some(Error::PlanConflict { .. })));
        assert_eq!(report.exit_code(), exit_codes::LLM_PARSE);
    }

    #[test]
    fn conflict_in_execute_keeps_earlier_commit() {
        let repo = TestRepo::with_commit(&[("a.txt", "a\n")]);
        repo.write("a.txt", "a2\n");
        let snap = snapshot(&repo, DiffMode::All);
        let plan = CommitPlan::new(vec![unit("c1", &["a.txt"]), unit("c2", &["a.txt"])]);

        let locks = RepoLocks::new();
        let lease = locks.try_acquire(&repo.git()).expect("lease");
        let report = apply_plan(&lease, &plan, &snap, &execute(), &CancelToken::new())
            .expect("apply");

        assert_eq!(report.final_state, ExecState::Failed);
        assert_eq!(report.results[0].status, UnitStatus::Applied);
        let err = report.results[1].error.as_ref().expect("error");
        assert_eq!(err.code, "llm_parse_error");
        assert_eq!(err.details.as_ref().expect("details")["claimed_by"], "c1");
        assert_eq!(repo.commit_count(), 2);
    }

    #[test]
    fn worktree_mode_rejects_foreign_staged_entries() {
        let repo = TestRepo::with_commit(&[("a.txt", "a\n"), ("b.txt", "b\n")]);
        repo.write("a.txt", "a2\n");
        repo.write("b.txt", "b2\n");
        repo.git().add_paths(&["b.txt".to_string()]).expect("stage b");
        let snap = snapshot(&repo, DiffMode::Worktree);
        assert_eq!(snap.files, vec!["a.txt"]);
        let plan = CommitPlan::new(vec![unit("c1", &["a.txt"])]);

        let locks = RepoLocks::new();
        let lease = locks.try_acquire(&repo.git()).expect("lease");
        let report = apply_plan(&lease, &plan, &snap, &execute(), &CancelToken::new())
            .expect("apply");

        let err = report.results[0].error.as_ref().expect("error");
        let details = err.details.as_ref().expect("details");
        assert_eq!(details["kind"], "staged_files_mismatch");
        assert_eq!(repo.commit_count(), 1);
    }

    #[test]
    fn staged_mode_commits_index_content_not_worktree() {
        let repo = TestRepo::with_commit(&[("a.txt", "a\n"), ("b.txt", "b\n")]);
        repo.write("a.txt", "staged\n");
        repo.write("b.txt", "staged b\n");
        repo.git()
            .add_paths(&["a.txt".to_string(), "b.txt".to_string()])
            .expect("stage");
        repo.write("a.txt", "unstaged edit\n");
        let snap = snapshot(&repo, DiffMode::Staged);
        let plan = CommitPlan::new(vec![unit("c1", &["a.txt"]), unit("c2", &["b.txt"])]);

        let locks = RepoLocks::new();
        let lease = locks.try_acquire(&repo.git()).expect("lease");
        let report = apply_plan(&lease, &plan, &snap, &execute(), &CancelToken::new())
            .expect("apply");

        assert!(report.failure.is_none(), "{:?}", report.failure);
        assert_eq!(repo.show("HEAD~1:a.txt"), "staged\n");
        assert_eq!(repo.read("a.txt"), "unstaged edit\n");
    }

    #[test]
    fn cancellation_skips_remaining_units() {
        let repo = TestRepo::with_commit(&[("a.txt", "a\n")]);
        repo.write("a.txt", "a2\n");
        let snap = snapshot(&repo, DiffMode::All);
        let plan = CommitPlan::new(vec![unit("c1", &["a.txt"])]);
        let cancel = CancelToken::new();
        cancel.cancel();

        let locks = RepoLocks::new();
        let lease = locks.try_acquire(&repo.git()).expect("lease");
        let report = apply_plan(&lease, &plan, &snap, &execute(), &cancel).expect("apply");

        assert_eq!(report.final_state, ExecState::Aborted);
        assert_eq!(report.results[0].status, UnitStatus::Skipped);
        assert_eq!(report.exit_code(), exit_codes::INTERRUPTED);
        assert_eq!(repo.commit_count(), 1);
    }

    #[test]
    fn assisted_by_trailer_lands_in_commit() {
        let repo = TestRepo::with_commit(&[("a.txt", "a\n")]);
        repo.write("a.txt", "a2\n");
        let snap = snapshot(&repo, DiffMode::All);
        let plan = CommitPlan::new(vec![unit("c1", &["a.txt"])]);
        let options = ApplyOptions {
            assisted_by: Some("local-model".to_string()),
            ..execute()
        };

        let locks = RepoLocks::new();
        let lease = locks.try_acquire(&repo.git()).expect("lease");
        apply_plan(&lease, &plan, &snap, &options, &CancelToken::new()).expect("apply");
        assert!(repo.last_message().ends_with("Assisted by: local-model"));
    }

    #[test]
    fn staged_mode_keeps_unplanned_files_staged() {
        let repo = TestRepo::with_commit(&[("a.txt", "a\n"), ("b.txt", "b\n")]);
        repo.write("a.txt", "staged a\n");
        repo.write("b.txt", "staged b\n");
        repo.git()
            .add_paths(&["a.txt".to_string(), "b.txt".to_string()])
            .expect("stage");
        repo.write("b.txt", "worktree b\n");
        let snap = snapshot(&repo, DiffMode::Staged);
        let plan = CommitPlan::new(vec![unit("c1", &["a.txt"])]);

        let locks = RepoLocks::new();
        let lease = locks.try_acquire(&repo.git()).expect("lease");
        let report = apply_plan(&lease, &plan, &snap, &execute(), &CancelToken::new())
            .expect("apply");

        assert_eq!(report.final_state, ExecState::Completed);
        assert!(report.failure.is_none(), "{:?}", report.failure);
        assert_eq!(repo.files_in_head_commit(), vec!["a.txt"]);
        assert_eq!(repo.show(":b.txt"), "staged b\n");
        assert_eq!(repo.read("b.txt"), "worktree b\n");
    }

    #[test]
    fn explicit_git_diff_output_applies() {
        let repo = TestRepo::with_commit(&[("a.txt", "a\n")]);
        repo.write("a.txt", "a2\n");
        let plain = repo.run_git(&["diff"]);
        let snap = capture_explicit(plain, DiffMode::All, true, SnapshotLimits::default())
            .expect("snapshot");
        let plan = CommitPlan::new(vec![unit("c1", &["a.txt"])]);

        let locks = RepoLocks::new();
        let lease = locks.try_acquire(&repo.git()).expect("lease");
        let report = apply_plan(&lease, &plan, &snap, &execute(), &CancelToken::new())
            .expect("apply");

        assert!(report.failure.is_none(), "{:?}", report.failure);
        assert_eq!(repo.commit_count(), 2);
        assert_eq!(repo.show("HEAD:a.txt"), "a2\n");
    }

    #[test]
    fn stale_explicit_diff_is_drift() {
        let repo = TestRepo::with_commit(&[("a.txt", "a\n")]);
        repo.write("a.txt", "a2\n");
        let plain = repo.run_git(&["diff"]);
        repo.write("a.txt", "something else\n");
        let snap = capture_explicit(plain, DiffMode::All, true, SnapshotLimits::default())
            .expect("snapshot");
        let plan = CommitPlan::new(vec![unit("c1", &["a.txt"])]);

        let locks = RepoLocks::new();
        let lease = locks.try_acquire(&repo.git()).expect("lease");
        let err = apply_plan(&lease, &plan, &snap, &execute(), &CancelToken::new())
            .expect_err("drift");
        assert!(matches!(err, Error::Git(GitError::WorktreeDrift { .. })));
        assert_eq!(repo.commit_count(), 1);
    }
}
