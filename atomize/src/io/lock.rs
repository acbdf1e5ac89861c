//! Repository leases: one apply per repository, across threads and processes.
//!
//! The in-process set keeps concurrent service requests apart without touching
//! the filesystem; the `atomize.lock` file under the git directory keeps
//! separate `atomize` processes apart. Both are released when the lease drops.

use std::collections::HashSet;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, warn};

use crate::error::GitError;
use crate::io::git::Git;

/// File name of the cross-process lock inside the git directory.
pub const LOCK_FILE: &str = "atomize.lock";

/// Set of canonical repository paths currently leased.
#[derive(Debug, Default)]
pub struct RepoLocks {
    held: Mutex<HashSet<PathBuf>>,
}

impl RepoLocks {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Lease `git`'s work tree, failing fast when another lease holds it.
    pub fn try_acquire(self: &Arc<Self>, git: &Git) -> Result<RepoLease, GitError> {
        let path = canonical(git.workdir());
        {
            let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
            if !held.insert(path.clone()) {
                debug!(path = %path.display(), "repository already leased");
                return Err(GitError::RepoLocked { path });
            }
        }
        let created = git
            .git_dir()
            .and_then(|dir| LockFile::create(dir.join(LOCK_FILE), &path));
        let lock_file = match created {
            Ok(lock_file) => lock_file,
            Err(err) => {
                self.release(&path);
                return Err(err);
            }
        };
        debug!(path = %path.display(), "repository leased");
        Ok(RepoLease {
            locks: Arc::clone(self),
            path,
            git: git.clone(),
            lock_file: Some(lock_file),
        })
    }

    pub fn is_held(&self, path: &Path) -> bool {
        let held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        held.contains(&canonical(path))
    }

    fn release(&self, path: &Path) {
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        held.remove(path);
    }
}

/// Exclusive mutation access to one repository; released on drop.
#[derive(Debug)]
pub struct RepoLease {
    locks: Arc<RepoLocks>,
    path: PathBuf,
    git: Git,
    lock_file: Option<LockFile>,
}

impl RepoLease {
    pub fn git(&self) -> &Git {
        &self.git
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RepoLease {
    fn drop(&mut self) {
        drop(self.lock_file.take());
        self.locks.release(&self.path);
        debug!(path = %self.path.display(), "repository lease released");
    }
}

/// Exclusively created lock file holding the owner's pid; removed on drop.
#[derive(Debug)]
struct LockFile {
    path: PathBuf,
}

impl LockFile {
    fn create(path: PathBuf, repo: &Path) -> Result<Self, GitError> {
        let mut file = match fs::OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                let holder = fs::read_to_string(&path).unwrap_or_default();
                debug!(lock = %path.display(), holder = %holder.trim(), "lock file present");
                return Err(GitError::RepoLocked {
                    path: repo.to_path_buf(),
                });
            }
            Err(source) => return Err(GitError::LockFile { path, source }),
        };
        let lock = Self { path };
        let meta = serde_json::json!({ "pid": std::process::id() });
        writeln!(file, "{meta}")
            .and_then(|()| file.sync_all())
            .map_err(|source| GitError::LockFile {
                path: lock.path.clone(),
                source,
            })?;
        Ok(lock)
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_file(&self.path) {
            warn!(lock = %self.path.display(), error = %err, "could not remove lock file");
        }
    }
}

fn canonical(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}
