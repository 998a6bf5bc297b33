//! [`VersionControlBackend`] for a real git checkout.
//!
//! Reads go through libgit2 when the `libgit2` feature is enabled and fall
//! back to the `git` binary otherwise (or when libgit2 errors). Writes
//! always shell out through a [`GitRunner`] so tests can substitute a mock.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::backend::{BackendError, CommitRecord, VersionControlBackend};
use crate::types::Author;

/// `git add` is invoked with at most this many paths per call.
const ADD_BATCH_SIZE: usize = 1000;

// ---------------------------------------------------------------------------
// GitRunner trait (for testability)
// ---------------------------------------------------------------------------

/// Abstraction over git CLI invocations so they can be mocked in tests.
pub trait GitRunner: Send + Sync {
    /// Run `git <args>` in `dir` with extra environment variables.
    fn run_git(&self, dir: &Path, args: &[&str], env: &[(&str, String)]) -> Result<GitOutput, String>;
}

#[derive(Debug, Clone)]
pub struct GitOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

/// Real git runner that shells out to the `git` binary.
pub struct RealGitRunner;

impl GitRunner for RealGitRunner {
    fn run_git(&self, dir: &Path, args: &[&str], env: &[(&str, String)]) -> Result<GitOutput, String> {
        let mut cmd = std::process::Command::new("git");
        cmd.args(args).current_dir(dir);
        for (key, value) in env {
            cmd.env(key, value);
        }
        let output = cmd.output().map_err(|e| e.to_string())?;

        Ok(GitOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// GitBackend
// ---------------------------------------------------------------------------

pub struct GitBackend {
    workdir: PathBuf,
    /// Repository-relative prefix (with trailing `/`) ignored by `is_dirty`.
    state_prefix: String,
    git: Box<dyn GitRunner>,
}

impl GitBackend {
    /// Backend for `workdir` using the real git binary. `state_dir` is the
    /// engine's state directory, excluded from the cleanliness check.
    pub fn new(workdir: impl Into<PathBuf>, state_dir: &Path) -> Self {
        Self::with_git_runner(workdir, state_dir, Box::new(RealGitRunner))
    }

    /// Backend with a custom git runner (for testing).
    pub fn with_git_runner(workdir: impl Into<PathBuf>, state_dir: &Path, git: Box<dyn GitRunner>) -> Self {
        let workdir = workdir.into();
        let rel = state_dir.strip_prefix(&workdir).unwrap_or(state_dir);
        let mut state_prefix = rel.to_string_lossy().replace('\\', "/");
        if !state_prefix.ends_with('/') {
            state_prefix.push('/');
        }
        Self {
            workdir,
            state_prefix,
            git,
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    fn run(&self, args: &[&str]) -> Result<GitOutput, BackendError> {
        self.run_with_env(args, &[])
    }

    fn run_with_env(&self, args: &[&str], env: &[(&str, String)]) -> Result<GitOutput, BackendError> {
        debug!(args = ?args, "git");
        self.git
            .run_git(&self.workdir, args, env)
            .map_err(BackendError::GitCommand)
    }

    fn run_checked(&self, args: &[&str], env: &[(&str, String)]) -> Result<String, BackendError> {
        let out = self.run_with_env(args, env)?;
        if !out.success {
            let detail = if out.stderr.trim().is_empty() {
                out.stdout.trim().to_string()
            } else {
                out.stderr.trim().to_string()
            };
            return Err(BackendError::GitCommand(format!("git {}: {detail}", args.join(" "))));
        }
        Ok(out.stdout)
    }

    /// Whether the working directory is the root of a repository.
    pub fn is_repo(&self) -> bool {
        #[cfg(feature = "libgit2")]
        {
            if crate::git2_ops::Git2ReadOps::is_repo(&self.workdir) {
                return true;
            }
        }
        self.workdir.join(".git").exists()
    }

    /// Run `git init` when no repository exists yet. Returns `true` if one
    /// was created.
    pub fn init_if_missing(&self) -> Result<bool, BackendError> {
        if self.is_repo() {
            return Ok(false);
        }
        info!(workdir = %self.workdir.display(), "initialising git repository");
        self.run_checked(&["init", "-q"], &[])?;
        Ok(true)
    }

    fn head_shell(&self) -> Result<Option<String>, BackendError> {
        let out = self.run(&["rev-parse", "--verify", "-q", "HEAD"])?;
        if !out.success {
            return Ok(None);
        }
        let hash = out.stdout.trim();
        Ok((!hash.is_empty()).then(|| hash.to_string()))
    }

    fn stage(&self, files: &[String]) -> Result<(), BackendError> {
        for batch in files.chunks(ADD_BATCH_SIZE) {
            let mut args: Vec<&str> = vec!["add", "--"];
            args.extend(batch.iter().map(String::as_str));
            self.run_checked(&args, &[])?;
        }
        Ok(())
    }

    /// Drop `files` from the index after a failed attempt so the next
    /// pre-flight does not see our own staging as a dirty tree.
    fn unstage(&self, files: &[String]) {
        // `git reset` needs a HEAD to reset against.
        let born = matches!(self.current_head(), Ok(Some(_)));
        let base: &[&str] = if born {
            &["reset", "-q", "--"]
        } else {
            &["rm", "--cached", "-q", "--ignore-unmatch", "--"]
        };
        for batch in files.chunks(ADD_BATCH_SIZE) {
            let mut args = base.to_vec();
            args.extend(batch.iter().map(String::as_str));
            if let Err(e) = self.run_checked(&args, &[]) {
                warn!(error = %e, "failed to unstage files after a failed commit");
                return;
            }
        }
        debug!(files = files.len(), "unstaged files of the failed commit");
    }
}

impl VersionControlBackend for GitBackend {
    fn current_head(&self) -> Result<Option<String>, BackendError> {
        #[cfg(feature = "libgit2")]
        {
            if let Ok(head) = crate::git2_ops::Git2ReadOps::head_oid(&self.workdir) {
                return Ok(head);
            }
        }
        self.head_shell()
    }

    fn is_dirty(&self) -> Result<bool, BackendError> {
        #[cfg(feature = "libgit2")]
        {
            if let Ok(dirty) = crate::git2_ops::Git2ReadOps::is_dirty(&self.workdir, &self.state_prefix) {
                return Ok(dirty);
            }
        }
        let stdout = self.run_checked(&["status", "--porcelain"], &[])?;
        Ok(porcelain_is_dirty(&stdout, &self.state_prefix))
    }

    fn is_detached_head(&self) -> Result<bool, BackendError> {
        #[cfg(feature = "libgit2")]
        {
            if let Ok(detached) = crate::git2_ops::Git2ReadOps::is_detached(&self.workdir) {
                return Ok(detached);
            }
        }
        // symbolic-ref fails only when HEAD is not a symbolic ref.
        let out = self.run(&["symbolic-ref", "-q", "HEAD"])?;
        Ok(!out.success)
    }

    fn stage_and_commit(
        &self,
        files: &[String],
        author: &Author,
        timestamp: DateTime<Utc>,
        message: &str,
    ) -> Result<String, BackendError> {
        let (present, missing): (Vec<String>, Vec<String>) =
            files.iter().cloned().partition(|f| self.workdir.join(f).exists());
        for path in missing.iter().take(5) {
            warn!(path = %path, "file missing, skipping");
        }
        if missing.len() > 5 {
            warn!(missing = missing.len(), "files missing in total, skipping them");
        }
        if present.is_empty() {
            return Err(BackendError::GitCommand(format!(
                "all {} files of this commit are missing",
                files.len()
            )));
        }

        let date = timestamp.to_rfc3339();
        let env = [
            ("GIT_AUTHOR_NAME", author.name.clone()),
            ("GIT_AUTHOR_EMAIL", author.email.clone()),
            ("GIT_AUTHOR_DATE", date.clone()),
            ("GIT_COMMITTER_NAME", author.name.clone()),
            ("GIT_COMMITTER_EMAIL", author.email.clone()),
            ("GIT_COMMITTER_DATE", date),
        ];
        let committed = self
            .stage(&present)
            .and_then(|()| self.run_checked(&["commit", "-q", "-m", message], &env));
        if let Err(e) = committed {
            self.unstage(&present);
            return Err(e);
        }

        self.current_head()?
            .ok_or_else(|| BackendError::GitCommand("HEAD missing after commit".into()))
    }

    fn head_commit(&self) -> Result<Option<CommitRecord>, BackendError> {
        #[cfg(feature = "libgit2")]
        {
            if let Ok(record) = crate::git2_ops::Git2ReadOps::head_commit(&self.workdir) {
                return Ok(record);
            }
        }
        let out = self.run(&["log", "-1", "--format=%H%n%P%n%ae%n%at"])?;
        if !out.success {
            return Ok(None);
        }
        Ok(parse_log_record(&out.stdout))
    }

    fn signing_enabled(&self) -> bool {
        #[cfg(feature = "libgit2")]
        {
            if let Ok(enabled) = crate::git2_ops::Git2ReadOps::signing_enabled(&self.workdir) {
                return enabled;
            }
        }
        self.run(&["config", "--bool", "commit.gpgsign"])
            .map(|out| out.success && out.stdout.trim() == "true")
            .unwrap_or(false)
    }
}

/// Dirty means a tracked change: anything other than `??` (untracked) or
/// `!!` (ignored) outside the state directory.
pub fn porcelain_is_dirty(stdout: &str, state_prefix: &str) -> bool {
    stdout.lines().filter(|l| l.len() > 3).any(|line| {
        let code = &line[..2];
        let path = line[3..].trim_matches('"');
        code != "??" && code != "!!" && !path.starts_with(state_prefix)
    })
}

/// Parse `git log -1 --format=%H%n%P%n%ae%n%at`.
pub fn parse_log_record(stdout: &str) -> Option<CommitRecord> {
    let mut lines = stdout.lines();
    let hash = lines.next()?.trim().to_string();
    if hash.is_empty() {
        return None;
    }
    let parent = lines
        .next()
        .and_then(|p| p.split_whitespace().next())
        .map(str::to_string);
    let author_email = lines.next().unwrap_or("").trim().to_string();
    let author_time = lines.next().and_then(|t| t.trim().parse().ok()).unwrap_or(0);
    Some(CommitRecord {
        hash,
        parent,
        author_email,
        author_time,
    })
}
