use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::Author;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("git command failed: {0}")]
    GitCommand(String),

    #[error("not a git repository: {0}")]
    NotARepo(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// CommitRecord
// ---------------------------------------------------------------------------

/// The bits of HEAD the engine inspects when reconciling after a crash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRecord {
    pub hash: String,
    /// First parent; `None` for a root commit.
    pub parent: Option<String>,
    pub author_email: String,
    /// Author time, seconds since the epoch.
    pub author_time: i64,
}

// ---------------------------------------------------------------------------
// VersionControlBackend
// ---------------------------------------------------------------------------

/// Repository primitives the execution engine drives.
///
/// `current_head` is `None` on an unborn branch (no commits yet).
pub trait VersionControlBackend {
    fn current_head(&self) -> Result<Option<String>, BackendError>;

    /// `true` when tracked files have staged or unstaged modifications.
    /// Untracked files do not count.
    fn is_dirty(&self) -> Result<bool, BackendError>;

    fn is_detached_head(&self) -> Result<bool, BackendError>;

    /// Stage exactly `files` and commit them with the given identity and
    /// date. Returns the new commit hash.
    fn stage_and_commit(
        &self,
        files: &[String],
        author: &Author,
        timestamp: DateTime<Utc>,
        message: &str,
    ) -> Result<String, BackendError>;

    /// Describe the commit HEAD points at.
    fn head_commit(&self) -> Result<Option<CommitRecord>, BackendError>;

    /// Whether commits will be signed (and may block on a passphrase).
    fn signing_enabled(&self) -> bool {
        false
    }
}

impl<B: VersionControlBackend + ?Sized> VersionControlBackend for &B {
    fn current_head(&self) -> Result<Option<String>, BackendError> {
        (**self).current_head()
    }

    fn is_dirty(&self) -> Result<bool, BackendError> {
        (**self).is_dirty()
    }

    fn is_detached_head(&self) -> Result<bool, BackendError> {
        (**self).is_detached_head()
    }

    fn stage_and_commit(
        &self,
        files: &[String],
        author: &Author,
        timestamp: DateTime<Utc>,
        message: &str,
    ) -> Result<String, BackendError> {
        (**self).stage_and_commit(files, author, timestamp, message)
    }

    fn head_commit(&self) -> Result<Option<CommitRecord>, BackendError> {
        (**self).head_commit()
    }

    fn signing_enabled(&self) -> bool {
        (**self).signing_enabled()
    }
}
