//! Test helpers: scratch repositories, plan builders and a scripted generator.

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Mutex;

use tempfile::TempDir;

use crate::core::types::{CommitPlan, CommitType, CommitUnit};
use crate::error::Error;
use crate::io::generator::{GenerateRequest, PlanGenerator};
use crate::io::git::Git;

/// Throwaway git repository with a fixed identity.
pub struct TestRepo {
    dir: TempDir,
}

impl Default for TestRepo {
    fn default() -> Self {
        Self::new()
    }
}

impl TestRepo {
    /// Empty repository on an unborn branch.
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let repo = Self { dir };
        repo.run_git(&["init", "-q"]);
        repo.run_git(&["config", "user.name", "Atomize Test"]);
        repo.run_git(&["config", "user.email", "atomize@example.com"]);
        repo.run_git(&["config", "commit.gpgsign", "false"]);
        repo
    }

    /// Repository with one initial commit containing `files`.
    pub fn with_commit(files: &[(&str, &str)]) -> Self {
        let repo = Self::new();
        for (path, contents) in files {
            repo.write(path, contents);
        }
        repo.run_git(&["add", "-A"]);
        repo.run_git(&["commit", "-q", "-m", "initial"]);
        repo
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn git(&self) -> Git {
        Git::new(self.root())
    }

    pub fn path(&self, rel: &str) -> PathBuf {
        self.root().join(rel)
    }

    pub fn write(&self, rel: &str, contents: &str) {
        let path = self.path(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent");
        }
        fs::write(path, contents).expect("write file");
    }

    pub fn read(&self, rel: &str) -> String {
        fs::read_to_string(self.path(rel)).expect("read file")
    }

    pub fn remove(&self, rel: &str) {
        fs::remove_file(self.path(rel)).expect("remove file");
    }

    /// Commits reachable from `HEAD` (0 on an unborn branch).
    pub fn commit_count(&self) -> usize {
        if self.git().head().expect("head").is_none() {
            return 0;
        }
        self.run_git(&["rev-list", "--count", "HEAD"])
            .trim()
            .parse()
            .expect("count")
    }

    pub fn last_message(&self) -> String {
        self.run_git(&["log", "-1", "--format=%B"]).trim().to_string()
    }

    /// Paths changed by the `HEAD` commit.
    pub fn files_in_head_commit(&self) -> Vec<String> {
        self.run_git(&["diff-tree", "--root", "--no-commit-id", "--name-only", "-r", "HEAD"])
            .lines()
            .map(str::to_string)
            .collect()
    }

    /// `git show <rev>` output, e.g. `HEAD~1:a.txt`.
    pub fn show(&self, rev: &str) -> String {
        self.run_git(&["show", rev])
    }

    /// Raw index listing, for before/after comparisons.
    pub fn index_listing(&self) -> String {
        self.run_git(&["ls-files", "-s"])
    }

    pub fn run_git(&self, args: &[&str]) -> String {
        let output = Command::new("git")
            .args(args)
            .current_dir(self.root())
            .output()
            .expect("spawn git");
        assert!(
            output.status.success(),
            "git {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr)
        );
        String::from_utf8(output.stdout).expect("utf8 git output")
    }
}

/// Valid unit touching `files`, with a 51-char summary and one body line.
pub fn unit(id: &str, files: &[&str]) -> CommitUnit {
    CommitUnit {
        id: id.to_string(),
        commit_type: CommitType::Feat,
        scope: Some("core".to_string()),
        summary: "add deterministic handling for planner output files".to_string(),
        body: vec!["Keep the behaviour stable across repeated runs".to_string()],
        files: files.iter().map(|f| f.to_string()).collect(),
        hunks: Vec::new(),
    }
}

/// Serialized `CommitPlan` wrapping `units`.
pub fn plan_json(units: &[CommitUnit]) -> String {
    serde_json::to_string(&CommitPlan::new(units.to_vec())).expect("serialize plan")
}

/// Generator that replays queued replies and records every prompt it sees.
#[derive(Default)]
pub struct ScriptedGenerator {
    replies: Mutex<VecDeque<Result<String, Error>>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedGenerator {
    pub fn new(replies: Vec<Result<String, Error>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().expect("prompts lock").len()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().expect("prompts lock").clone()
    }
}

impl PlanGenerator for ScriptedGenerator {
    fn generate(&self, request: &GenerateRequest) -> Result<String, Error> {
        self.prompts
            .lock()
            .expect("prompts lock")
            .push(request.prompt.clone());
        self.replies
            .lock()
            .expect("replies lock")
            .pop_front()
            .unwrap_or_else(|| Err(Error::LlmRuntime("scripted replies exhausted".to_string())))
    }
}
