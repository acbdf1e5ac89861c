//! Git adapter for snapshot capture and plan execution.
//!
//! Every repository read and mutation goes through this small, explicit
//! wrapper around `git` subprocess calls. Diff commands share one flag set so
//! that worktree, staged and combined views render byte-identical sections.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

use tracing::{debug, instrument, warn};

use crate::core::types::DiffMode;
use crate::error::GitError;

/// Object id of the empty tree, used as the base on an unborn branch.
pub const EMPTY_TREE: &str = "4b825dc642cb6eb9a060e54bf8d69288fbee4904";

const NULL_SHA: &str = "0000000000000000000000000000000000000000";

const DIFF_FLAGS: [&str; 4] = ["--no-color", "--no-ext-diff", "--no-renames", "--full-index"];

/// One stage-0 index record as printed by `git ls-files -s`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub mode: String,
    pub sha: String,
    pub stage: u8,
    pub path: String,
}

impl IndexEntry {
    /// Record that removes `path` from the index when fed to `--index-info`.
    pub fn removal(path: &str) -> Self {
        Self {
            mode: "0".to_string(),
            sha: NULL_SHA.to_string(),
            stage: 0,
            path: path.to_string(),
        }
    }

    fn to_index_info(&self) -> String {
        format!("{} {} {}\t{}\0", self.mode, self.sha, self.stage, self.path)
    }
}

/// Wrapper for executing git commands in a working directory.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    /// Open the work tree containing `path`, rooted at its top level.
    #[instrument(skip_all, fields(path = %path.display()))]
    pub fn open(path: &Path) -> Result<Self, GitError> {
        let not_repo = || GitError::NotARepository {
            path: path.to_path_buf(),
        };
        if !path.is_dir() {
            return Err(not_repo());
        }
        let probe = Git::new(path);
        let output = probe
            .run(&["rev-parse", "--show-toplevel"], None)
            .map_err(|_| not_repo())?;
        if !output.status.success() {
            debug!("rev-parse failed, not a work tree");
            return Err(not_repo());
        }
        let top = String::from_utf8(output.stdout).map_err(|_| not_repo())?;
        let top = top.trim();
        if top.is_empty() {
            return Err(not_repo());
        }
        Ok(Git::new(top))
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Absolute path of the repository's git directory.
    pub fn git_dir(&self) -> Result<PathBuf, GitError> {
        let out = self.run_capture(&["rev-parse", "--absolute-git-dir"])?;
        Ok(PathBuf::from(out.trim()))
    }

    /// `HEAD` when it resolves to a commit, otherwise the empty tree.
    pub fn base_rev(&self) -> Result<&'static str, GitError> {
        Ok(if self.head()?.is_some() { "HEAD" } else { EMPTY_TREE })
    }

    /// Current `HEAD` commit id, or `None` on an unborn branch.
    pub fn head(&self) -> Result<Option<String>, GitError> {
        let output = self.run(&["rev-parse", "--verify", "--quiet", "HEAD^{commit}"], None)?;
        if !output.status.success() {
            return Ok(None);
        }
        let sha = utf8("rev-parse HEAD", output.stdout)?;
        Ok(Some(sha.trim().to_string()))
    }

    /// Tracked-file diff for `mode`. Untracked files are never included here.
    #[instrument(skip_all, fields(mode = %mode))]
    pub fn diff(&self, mode: DiffMode) -> Result<String, GitError> {
        let mut args = vec!["diff"];
        args.extend(DIFF_FLAGS);
        match mode {
            DiffMode::Worktree => {}
            DiffMode::Staged => args.extend(["--cached", self.base_rev()?]),
            DiffMode::All => args.push(self.base_rev()?),
        }
        args.push("--");
        let out = self.run_capture(&args)?;
        debug!(bytes = out.len(), "diff captured");
        Ok(out)
    }

    /// Diff of the index against the base, i.e. what the next commit would contain.
    pub fn staged_diff(&self) -> Result<String, GitError> {
        self.diff(DiffMode::Staged)
    }

    /// Untracked, non-ignored files in `git ls-files` order.
    pub fn untracked_files(&self) -> Result<Vec<String>, GitError> {
        let out = self.run_capture(&["ls-files", "--others", "--exclude-standard", "-z"])?;
        Ok(split_nul(&out))
    }

    /// Whole-file addition diff for an untracked `path`.
    pub fn untracked_diff(&self, path: &str) -> Result<String, GitError> {
        let mut args = vec!["diff", "--no-index"];
        args.extend(DIFF_FLAGS);
        args.extend(["--", "/dev/null", path]);
        // --no-index exits 1 when the inputs differ, which is always the case here.
        let output = self.run(&args, None)?;
        match output.status.code() {
            Some(0) | Some(1) => utf8(&args.join(" "), output.stdout),
            _ => Err(command_failed(&args, &output)),
        }
    }

    /// Stage-0 index entries for `paths`. Paths absent from the index are omitted.
    pub fn index_entries(&self, paths: &[String]) -> Result<Vec<IndexEntry>, GitError> {
        if paths.is_empty() {
            return Ok(Vec::new());
        }
        let mut args = vec!["ls-files", "-s", "-z", "--"];
        args.extend(paths.iter().map(String::as_str));
        let out = self.run_capture(&args)?;
        parse_index_entries(&out)
    }

    /// Reset index entries for `paths` back to the base.
    #[instrument(skip_all, fields(paths = paths.len()))]
    pub fn reset_paths(&self, paths: &[String]) -> Result<(), GitError> {
        if paths.is_empty() {
            return Ok(());
        }
        let mut args: Vec<&str> = if self.head()?.is_some() {
            vec!["reset", "-q", "HEAD", "--"]
        } else {
            vec!["rm", "-q", "-r", "--cached", "--ignore-unmatch", "--"]
        };
        args.extend(paths.iter().map(String::as_str));
        self.run_checked(&args)?;
        Ok(())
    }

    /// Stage `paths` from the worktree, including deletions.
    #[instrument(skip_all, fields(paths = paths.len()))]
    pub fn add_paths(&self, paths: &[String]) -> Result<(), GitError> {
        if paths.is_empty() {
            return Ok(());
        }
        let mut args = vec!["add", "-A", "--"];
        args.extend(paths.iter().map(String::as_str));
        self.run_checked(&args)?;
        Ok(())
    }

    /// Write raw index records (`git update-index --index-info`).
    #[instrument(skip_all, fields(entries = entries.len()))]
    pub fn write_index_entries(&self, entries: &[IndexEntry]) -> Result<(), GitError> {
        if entries.is_empty() {
            return Ok(());
        }
        let input: String = entries.iter().map(IndexEntry::to_index_info).collect();
        self.run_checked_with_stdin(&["update-index", "-z", "--index-info"], input.as_bytes())?;
        Ok(())
    }

    /// Commit the index with `message` and return the new `HEAD`.
    #[instrument(skip_all)]
    pub fn commit(&self, message: &str) -> Result<String, GitError> {
        self.run_checked_with_stdin(&["commit", "-q", "-F", "-"], message.as_bytes())?;
        match self.head()? {
            Some(sha) => {
                debug!(commit = %sha, "committed");
                Ok(sha)
            }
            None => {
                warn!("HEAD missing after commit");
                Err(GitError::CommandFailed {
                    args: "rev-parse HEAD".to_string(),
                    status: "missing".to_string(),
                    stderr: "HEAD does not resolve after commit".to_string(),
                })
            }
        }
    }

    fn run_capture(&self, args: &[&str]) -> Result<String, GitError> {
        let output = self.run_checked(args)?;
        utf8(&args.join(" "), output.stdout)
    }

    fn run_checked(&self, args: &[&str]) -> Result<Output, GitError> {
        let output = self.run(args, None)?;
        if !output.status.success() {
            return Err(command_failed(args, &output));
        }
        Ok(output)
    }

    fn run_checked_with_stdin(&self, args: &[&str], input: &[u8]) -> Result<Output, GitError> {
        let output = self.run(args, Some(input))?;
        if !output.status.success() {
            return Err(command_failed(args, &output));
        }
        Ok(output)
    }

    fn run(&self, args: &[&str], stdin: Option<&[u8]>) -> Result<Output, GitError> {
        let spawn_err = |source| GitError::Spawn {
            args: args.join(" "),
            source,
        };
        let mut cmd = Command::new("git");
        cmd.args(["-c", "core.quotepath=off"])
            .args(args)
            .current_dir(&self.workdir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            });
        let mut child = cmd.spawn().map_err(spawn_err)?;
        if let Some(input) = stdin
            && let Some(mut pipe) = child.stdin.take()
        {
            pipe.write_all(input).map_err(spawn_err)?;
        }
        child.wait_with_output().map_err(spawn_err)
    }
}

fn command_failed(args: &[&str], output: &Output) -> GitError {
    let status = output
        .status
        .code()
        .map(|code| code.to_string())
        .unwrap_or_else(|| "signal".to_string());
    GitError::CommandFailed {
        args: args.join(" "),
        status,
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    }
}

fn utf8(args: &str, bytes: Vec<u8>) -> Result<String, GitError> {
    String::from_utf8(bytes).map_err(|_| GitError::OutputNotUtf8 {
        args: args.to_string(),
    })
}

fn split_nul(out: &str) -> Vec<String> {
    out.split('\0')
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_index_entries(out: &str) -> Result<Vec<IndexEntry>, GitError> {
    let mut entries = Vec::new();
    for record in out.split('\0').filter(|r| !r.is_empty()) {
        entries.push(parse_index_record(record)?);
    }
    Ok(entries)
}

fn parse_index_record(record: &str) -> Result<IndexEntry, GitError> {
    let malformed = || GitError::CommandFailed {
        args: "ls-files -s".to_string(),
        status: "0".to_string(),
        stderr: format!("unexpected index record: '{record}'"),
    };
    let (meta, path) = record.split_once('\t').ok_or_else(malformed)?;
    let mut fields = meta.split(' ');
    let mode = fields.next().ok_or_else(malformed)?;
    let sha = fields.next().ok_or_else(malformed)?;
    let stage = fields
        .next()
        .and_then(|s| s.parse::<u8>().ok())
        .ok_or_else(malformed)?;
    Ok(IndexEntry {
        mode: mode.to_string(),
        sha: sha.to_string(),
        stage,
        path: path.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::TestRepo;

    #[test]
    fn parses_index_record() {
        let e = parse_index_record(
            "100644 e69de29bb2d1d6434b8b29ae775ad8c2e48c5391 0\tdocs/my notes.md",
        )
        .expect("parse");
        assert_eq!(
            e,
            IndexEntry {
                mode: "100644".to_string(),
                sha: "e69de29bb2d1d6434b8b29ae775ad8c2e48c5391".to_string(),
                stage: 0,
                path: "docs/my notes.md".to_string(),
            }
        );
    }

    #[test]
    fn rejects_record_without_tab() {
        assert!(parse_index_record("100644 abc 0 file").is_err());
    }

    #[test]
    fn removal_record_uses_null_sha() {
        let info = IndexEntry::removal("a.txt").to_index_info();
        assert_eq!(info, format!("0 {NULL_SHA} 0\ta.txt\0"));
    }

    #[test]
    fn open_rejects_plain_directory() {
        let temp = tempfile::tempdir().expect("tempdir");
        let err = Git::open(temp.path()).expect_err("not a repo");
        assert!(matches!(err, GitError::NotARepository { .. }));
    }

    #[test]
    fn git_dir_is_absolute() {
        let repo = TestRepo::new();
        let dir = repo.git().git_dir().expect("git dir");
        assert!(dir.is_absolute());
        assert!(dir.ends_with(".git"));
    }

    #[test]
    fn unborn_branch_uses_empty_tree() {
        let repo = TestRepo::new();
        assert_eq!(repo.git().head().expect("head"), None);
        assert_eq!(repo.git().base_rev().expect("base"), EMPTY_TREE);
    }

    #[test]
    fn staged_and_all_diffs_render_identical_sections() {
        let repo = TestRepo::with_commit(&[("a.txt", "one\n")]);
        repo.write("a.txt", "one\ntwo\n");
        let all = repo.git().diff(DiffMode::All).expect("all");
        repo.git().add_paths(&["a.txt".to_string()]).expect("add");
        let staged = repo.git().staged_diff().expect("staged");
        assert!(!all.is_empty());
        assert_eq!(all, staged);
    }

    #[test]
    fn untracked_diff_matches_staged_addition() {
        let repo = TestRepo::with_commit(&[("a.txt", "one\n")]);
        repo.write("new file.txt", "hello\n");
        assert_eq!(repo.git().untracked_files().expect("ls"), vec!["new file.txt"]);
        let synthetic = repo.git().untracked_diff("new file.txt").expect("diff");
        repo.git().add_paths(&["new file.txt".to_string()]).expect("add");
        assert_eq!(synthetic, repo.git().staged_diff().expect("staged"));
    }

    #[test]
    fn index_entries_round_trip_through_update_index() {
        let repo = TestRepo::with_commit(&[("a.txt", "one\n")]);
        repo.write("a.txt", "two\n");
        let paths = vec!["a.txt".to_string()];
        repo.git().add_paths(&paths).expect("add");
        let parked = repo.git().index_entries(&paths).expect("entries");
        repo.git().reset_paths(&paths).expect("reset");
        assert!(repo.git().staged_diff().expect("staged").is_empty());
        repo.git().write_index_entries(&parked).expect("restore");
        assert_eq!(repo.git().index_entries(&paths).expect("entries"), parked);
    }

    #[test]
    fn commit_returns_new_head() {
        let repo = TestRepo::with_commit(&[("a.txt", "one\n")]);
        let before = repo.git().head().expect("head").expect("born");
        repo.write("a.txt", "two\n");
        repo.git().add_paths(&["a.txt".to_string()]).expect("add");
        let sha = repo.git().commit("fix: change a\n").expect("commit");
        assert_ne!(sha, before);
        assert_eq!(repo.last_message(), "fix: change a");
    }
}
