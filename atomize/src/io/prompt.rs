//! Prompt builder for the plan generator.
//!
//! Templates live in `prompts/` and are rendered with minijinja. The
//! correction prompt includes the original prompt verbatim and appends the
//! violations and the rejected reply.

use std::path::PathBuf;

use minijinja::{Environment, context};

use crate::core::semantic::{ScopePolicy, Violation};
use crate::core::types::{CommitType, DiffMode};
use crate::error::Error;

const PLAN_TEMPLATE: &str = include_str!("prompts/plan.md");
const CORRECTION_TEMPLATE: &str = include_str!("prompts/correction.md");

/// Everything the plan prompt mentions.
#[derive(Debug, Clone)]
pub struct PromptInputs {
    pub diff: String,
    pub files: Vec<String>,
    pub diff_mode: DiffMode,
    pub include_untracked: bool,
    pub repo: Option<PathBuf>,
    pub scope_policy: ScopePolicy,
}

/// Template engine wrapper around minijinja.
pub struct PromptEngine {
    env: Environment<'static>,
}

impl Default for PromptEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl PromptEngine {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.add_template("plan", PLAN_TEMPLATE)
            .expect("plan template should be valid");
        env.add_template("correction", CORRECTION_TEMPLATE)
            .expect("correction template should be valid");
        Self { env }
    }

    pub fn render_plan(&self, input: &PromptInputs) -> Result<String, Error> {
        self.render("plan", input, None, &[])
    }

    pub fn render_correction(
        &self,
        input: &PromptInputs,
        previous: &str,
        violations: &[Violation],
    ) -> Result<String, Error> {
        self.render("correction", input, Some(previous), violations)
    }

    fn render(
        &self,
        name: &str,
        input: &PromptInputs,
        previous: Option<&str>,
        violations: &[Violation],
    ) -> Result<String, Error> {
        let template = self.env.get_template(name).map_err(template_error)?;
        let types: Vec<&str> = CommitType::ALL.iter().map(|t| t.as_str()).collect();
        let violations: Vec<String> = violations.iter().map(Violation::to_string).collect();
        template
            .render(context! {
                diff => input.diff.trim_end(),
                files => &input.files,
                diff_mode => input.diff_mode.as_str(),
                include_untracked => input.include_untracked,
                repo => input.repo.as_ref().map(|p| p.display().to_string()),
                scope_policy => input.scope_policy,
                types => types,
                previous => previous.map(str::trim),
                violations => violations,
            })
            .map_err(template_error)
    }
}

fn template_error(err: minijinja::Error) -> Error {
    Error::LlmRuntime(format!("render prompt: {err}"))
}
