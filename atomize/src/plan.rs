//! Plan session: prompt the generator, validate, and retry at most once.

use std::path::Path;

use tracing::{debug, info, instrument, warn};

use crate::cancel::CancelToken;
use crate::core::semantic::{ScopePolicy, Violation};
use crate::core::types::{CommitPlan, InputMeta, Warning};
use crate::error::{Error, GitError};
use crate::io::config::AtomizeConfig;
use crate::io::generator::{GenerateRequest, PlanGenerator};
use crate::io::prompt::{PromptEngine, PromptInputs};
use crate::logging::diff_preview;
use crate::snapshot::DiffSnapshot;
use crate::validate::{ValidatedPlan, strip_code_fence, validate_plan};

/// Correction re-prompts allowed after the first rejected reply.
pub const MAX_CORRECTIONS: u8 = 1;

/// Accepted plan, frozen, with all warnings folded into `plan.warnings`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanOutcome {
    pub plan: CommitPlan,
    /// Corrections consumed (0 or 1).
    pub corrections: u8,
}

impl PlanOutcome {
    pub fn warnings(&self) -> &[Warning] {
        self.plan.warnings.as_deref().unwrap_or_default()
    }
}

/// Ask `generator` for a plan covering `snapshot`.
#[instrument(skip_all, fields(files = snapshot.files.len(), hash = %snapshot.diff_hash))]
pub fn generate_plan(
    generator: &dyn PlanGenerator,
    snapshot: &DiffSnapshot,
    cfg: &AtomizeConfig,
    repo: Option<&Path>,
    cancel: &CancelToken,
) -> Result<PlanOutcome, Error> {
    let engine = PromptEngine::new();
    let inputs = PromptInputs {
        diff: snapshot.diff_text.clone(),
        files: snapshot.files.clone(),
        diff_mode: snapshot.mode,
        include_untracked: snapshot.include_untracked,
        repo: repo.map(Path::to_path_buf),
        scope_policy: cfg.scope_policy,
    };
    debug!(
        diff_bytes = snapshot.diff_text.len(),
        diff = ?diff_preview(&snapshot.diff_text, cfg.log_diff),
        "planning diff"
    );

    let mut prompt = engine.render_plan(&inputs)?;
    let mut corrections = 0u8;
    loop {
        if cancel.is_cancelled() {
            return Err(Error::Interrupted);
        }
        let raw = generator.generate(&GenerateRequest::from_config(prompt, cfg, cancel))?;
        let violations = match validate_plan(&raw, &snapshot.files, cfg.scope_policy) {
            Ok(validated) => {
                info!(units = validated.plan.plan.len(), corrections, "plan accepted");
                return Ok(freeze(validated, snapshot, corrections));
            }
            Err(violations) => violations,
        };
        if corrections >= MAX_CORRECTIONS {
            warn!(violations = violations.len(), "plan rejected after correction");
            return Err(rejected(violations, corrections));
        }
        corrections += 1;
        warn!(violations = violations.len(), "plan rejected, requesting correction");
        prompt = engine.render_correction(&inputs, &raw, &violations)?;
    }
}

/// Validate a caller-supplied plan (no generator, no retry).
pub fn accept_plan(
    raw: &str,
    snapshot: &DiffSnapshot,
    scope_policy: ScopePolicy,
) -> Result<PlanOutcome, Error> {
    validate_plan(raw, &snapshot.files, scope_policy)
        .map(|validated| freeze(validated, snapshot, 0))
        .map_err(|violations| rejected(violations, 0))
}

/// The `input` block a supplied plan was produced against, if it carries one.
///
/// Read leniently; a malformed plan is reported by validation instead.
pub fn recorded_input(raw: &str) -> Option<InputMeta> {
    let value: serde_json::Value = serde_json::from_str(strip_code_fence(raw)).ok()?;
    serde_json::from_value(value.get("input")?.clone()).ok()
}

/// Refuse a supplied plan whose recorded diff is no longer what `snapshot` shows.
///
/// Only comparable recordings are checked: same source kind and a hash present.
pub fn check_recorded_input(recorded: &InputMeta, snapshot: &DiffSnapshot) -> Result<(), Error> {
    let current = snapshot.input_meta();
    let Some(expected) = recorded.diff_hash.as_ref() else {
        return Ok(());
    };
    if recorded.source != current.source {
        debug!(recorded = ?recorded.source, current = ?current.source, "plan input source differs, hash not compared");
        return Ok(());
    }
    if *expected != snapshot.diff_hash {
        warn!(expected = %expected, actual = %snapshot.diff_hash, "diff changed since the plan was made");
        return Err(GitError::WorktreeDrift {
            expected: expected.clone(),
            actual: snapshot.diff_hash.clone(),
        }
        .into());
    }
    Ok(())
}

fn freeze(validated: ValidatedPlan, snapshot: &DiffSnapshot, corrections: u8) -> PlanOutcome {
    let ValidatedPlan {
        mut plan,
        warnings: validator_warnings,
    } = validated;
    let mut warnings = plan.warnings.take().unwrap_or_default();
    warnings.extend(validator_warnings);
    plan.warnings = (!warnings.is_empty()).then_some(warnings);
    plan.input = Some(snapshot.input_meta());
    PlanOutcome { plan, corrections }
}

fn rejected(violations: Vec<Violation>, corrections: u8) -> Error {
    let message = match corrections {
        0 => format!("plan rejected: {} violation(s)", violations.len()),
        _ => format!(
            "plan rejected after correction: {} violation(s)",
            violations.len()
        ),
    };
    Error::LlmParse {
        message,
        violations,
    }
}
