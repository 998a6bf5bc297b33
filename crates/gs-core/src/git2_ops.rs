//! Native git read operations via libgit2 (git2 crate).
//!
//! Pre-flight and checkpoint queries (HEAD, status, detached state) run on
//! every commit, so they go through libgit2 in-process instead of spawning
//! `git`. Writes (add, commit) stay as shell-outs in [`crate::git`].
//!
//! # Feature gated
//!
//! Only compiled with the `libgit2` feature (enabled by default). Without it
//! every read falls back to the shell path.

use std::path::Path;

use crate::backend::{BackendError, CommitRecord};

// ---------------------------------------------------------------------------
// Error bridging
// ---------------------------------------------------------------------------

impl From<git2::Error> for BackendError {
    fn from(e: git2::Error) -> Self {
        BackendError::GitCommand(e.message().to_string())
    }
}

// ---------------------------------------------------------------------------
// Native read operations
// ---------------------------------------------------------------------------

/// Stateless: opens the repository fresh for each call so the index is never
/// stale after a shelled-out commit.
pub struct Git2ReadOps;

impl Git2ReadOps {
    fn open(workdir: &Path) -> Result<git2::Repository, BackendError> {
        git2::Repository::open(workdir).map_err(|e| match e.code() {
            git2::ErrorCode::NotFound => BackendError::NotARepo(workdir.display().to_string()),
            _ => BackendError::from(e),
        })
    }

    /// Whether `workdir` is the root of a repository.
    pub fn is_repo(workdir: &Path) -> bool {
        git2::Repository::open(workdir).is_ok()
    }

    /// Full hex id of HEAD, `None` on an unborn branch.
    pub fn head_oid(workdir: &Path) -> Result<Option<String>, BackendError> {
        let repo = Self::open(workdir)?;
        let head = match repo.head() {
            Ok(head) => head,
            Err(e) if matches!(e.code(), git2::ErrorCode::UnbornBranch | git2::ErrorCode::NotFound) => {
                return Ok(None)
            }
            Err(e) => return Err(e.into()),
        };
        Ok(head.target().map(|oid| oid.to_string()))
    }

    /// Any staged or unstaged change to a tracked file outside
    /// `ignored_prefix`. Untracked files are not considered.
    pub fn is_dirty(workdir: &Path, ignored_prefix: &str) -> Result<bool, BackendError> {
        let repo = Self::open(workdir)?;
        let mut opts = git2::StatusOptions::new();
        opts.include_untracked(false)
            .include_ignored(false)
            .exclude_submodules(true);

        let statuses = repo.statuses(Some(&mut opts))?;
        let dirty = statuses.iter().any(|entry| {
            let path = entry.path().unwrap_or("");
            let status = entry.status();
            !status.is_empty()
                && !status.contains(git2::Status::WT_NEW)
                && !status.contains(git2::Status::IGNORED)
                && !path.starts_with(ignored_prefix)
        });
        Ok(dirty)
    }

    pub fn is_detached(workdir: &Path) -> Result<bool, BackendError> {
        let repo = Self::open(workdir)?;
        Ok(repo.head_detached()?)
    }

    pub fn head_commit(workdir: &Path) -> Result<Option<CommitRecord>, BackendError> {
        let repo = Self::open(workdir)?;
        let head = match repo.head() {
            Ok(head) => head,
            Err(e) if matches!(e.code(), git2::ErrorCode::UnbornBranch | git2::ErrorCode::NotFound) => {
                return Ok(None)
            }
            Err(e) => return Err(e.into()),
        };
        let commit = head.peel_to_commit()?;
        let author = commit.author();
        Ok(Some(CommitRecord {
            hash: commit.id().to_string(),
            parent: commit.parent_id(0).ok().map(|oid| oid.to_string()),
            author_email: author.email().unwrap_or("").to_string(),
            author_time: author.when().seconds(),
        }))
    }

    /// `commit.gpgsign` from the repository's effective config.
    pub fn signing_enabled(workdir: &Path) -> Result<bool, BackendError> {
        let repo = Self::open(workdir)?;
        let config = repo.config()?;
        Ok(config.get_bool("commit.gpgsign").unwrap_or(false))
    }
}
