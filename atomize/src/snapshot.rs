//! Diff snapshots: the single source of truth a plan is made and applied against.

use std::collections::BTreeMap;

use tracing::{debug, instrument};

use crate::core::diff::{diff_files, diff_hash, normalized_sections, split_sections};
use crate::core::types::{DiffMode, InputMeta, InputSource};
use crate::error::Error;
use crate::io::git::Git;

/// Bounds applied while capturing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotLimits {
    pub max_diff_bytes: usize,
}

impl Default for SnapshotLimits {
    fn default() -> Self {
        Self {
            max_diff_bytes: 2_000_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotSource {
    Repo,
    Explicit,
}

/// Immutable capture of a diff plus everything derived from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffSnapshot {
    pub source: SnapshotSource,
    pub mode: DiffMode,
    pub include_untracked: bool,
    pub diff_text: String,
    pub diff_hash: String,
    pub files: Vec<String>,
    /// Paths that entered the text as synthetic additions.
    pub untracked: Vec<String>,
}

impl DiffSnapshot {
    fn build(
        source: SnapshotSource,
        mode: DiffMode,
        include_untracked: bool,
        diff_text: String,
        untracked: Vec<String>,
        limits: SnapshotLimits,
    ) -> Result<Self, Error> {
        check_size(&diff_text, limits)?;
        if diff_text.trim().is_empty() {
            return Err(Error::InputInvalid("diff is empty; nothing to plan".to_string()));
        }
        let files = diff_files(&diff_text);
        if files.is_empty() {
            return Err(Error::InputInvalid(
                "diff has no `diff --git` file sections".to_string(),
            ));
        }
        let diff_hash = diff_hash(&diff_text);
        debug!(bytes = diff_text.len(), files = files.len(), hash = %diff_hash, "snapshot captured");
        Ok(Self {
            source,
            mode,
            include_untracked,
            diff_text,
            diff_hash,
            files,
            untracked,
        })
    }

    /// Per-file sections of the captured text, in the form staged diffs are
    /// compared against.
    pub fn sections(&self) -> BTreeMap<String, String> {
        self.sections_of(&self.diff_text)
    }

    /// Split `text` the way this snapshot compares sections: exactly for
    /// repository captures, header-normalized for explicit text.
    pub fn sections_of(&self, text: &str) -> BTreeMap<String, String> {
        match self.source {
            SnapshotSource::Repo => split_sections(text),
            SnapshotSource::Explicit => normalized_sections(text),
        }
    }

    pub fn is_untracked(&self, path: &str) -> bool {
        self.untracked.iter().any(|p| p == path)
    }

    /// Audit block for plan and apply payloads.
    pub fn input_meta(&self) -> InputMeta {
        InputMeta {
            source: match self.source {
                SnapshotSource::Repo => InputSource::Repo,
                SnapshotSource::Explicit => InputSource::Diff,
            },
            diff_mode: Some(self.mode),
            include_untracked: Some(self.include_untracked),
            diff_hash: Some(self.diff_hash.clone()),
        }
    }
}

/// Capture the repository's diff for `mode`.
#[instrument(skip_all, fields(mode = %mode, include_untracked))]
pub fn capture_repo(
    git: &Git,
    mode: DiffMode,
    include_untracked: bool,
    limits: SnapshotLimits,
) -> Result<DiffSnapshot, Error> {
    let (text, untracked) = render_repo_diff(git, mode, include_untracked, limits)?;
    DiffSnapshot::build(
        SnapshotSource::Repo,
        mode,
        include_untracked,
        text,
        untracked,
        limits,
    )
}

/// Wrap caller-supplied diff text. `mode` and `include_untracked` are only recorded.
pub fn capture_explicit(
    text: String,
    mode: DiffMode,
    include_untracked: bool,
    limits: SnapshotLimits,
) -> Result<DiffSnapshot, Error> {
    DiffSnapshot::build(
        SnapshotSource::Explicit,
        mode,
        include_untracked,
        text,
        Vec::new(),
        limits,
    )
}

/// Render the current repository diff and the untracked paths it includes.
pub fn render_repo_diff(
    git: &Git,
    mode: DiffMode,
    include_untracked: bool,
    limits: SnapshotLimits,
) -> Result<(String, Vec<String>), Error> {
    let mut text = git.diff(mode)?;
    check_size(&text, limits)?;
    let mut untracked = Vec::new();
    if include_untracked {
        for path in git.untracked_files()? {
            text.push_str(&git.untracked_diff(&path)?);
            check_size(&text, limits)?;
            untracked.push(path);
        }
    }
    Ok((text, untracked))
}

fn check_size(text: &str, limits: SnapshotLimits) -> Result<(), Error> {
    if text.len() > limits.max_diff_bytes {
        return Err(Error::InputInvalid(format!(
            "diff is larger than max_diff_bytes ({} > {})",
            text.len(),
            limits.max_diff_bytes
        )));
    }
    Ok(())
}
