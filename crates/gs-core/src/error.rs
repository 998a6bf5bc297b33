use crate::backend::BackendError;

// ---------------------------------------------------------------------------
// ShuffleError
// ---------------------------------------------------------------------------

/// Every failure the planner, chunker and execution engine can surface.
///
/// Each message names the guard that tripped so the operator can
/// tell a safety guard apart from a transient backend failure.
#[derive(Debug, thiserror::Error)]
pub enum ShuffleError {
    /// Bad patterns, unparseable durations/dates, invalid authors.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The planner resolved to zero slots.
    #[error("empty plan: {0}")]
    EmptyPlan(String),

    /// The chunker was handed an empty file set.
    #[error("insufficient files: cannot partition an empty file set into commits")]
    InsufficientFiles,

    /// Another live process holds the apply lock.
    #[error("lock contention: apply already running (pid={pid}, acquired_at={acquired_at})")]
    LockContention { pid: u32, acquired_at: String },

    #[error("dirty repository: uncommitted changes to tracked files (override with --allow-dirty)")]
    DirtyRepository,

    #[error("detached HEAD: commits would not belong to any branch (override with --allow-detached)")]
    DetachedHead,

    /// The persisted state was produced from different inputs.
    #[error(
        "manifest hash mismatch: plan drift detected (state={expected}, current={actual}); \
         files or configuration changed since the interrupted run (use --fresh to start over)"
    )]
    PlanDrift { expected: String, actual: String },

    /// HEAD moved between runs in a way the engine did not cause.
    #[error(
        "history tampered: recorded head {expected} but repository head is {actual}; \
         commits were made or reset outside gitshuffle"
    )]
    HistoryTampered { expected: String, actual: String },

    /// The backend kept failing after the retry budget was spent.
    #[error("commit {index} failed after {attempts} attempt(s): {source}")]
    Commit {
        index: usize,
        attempts: u32,
        #[source]
        source: BackendError,
    },

    /// Non-commit backend failures (reading HEAD, status, ...).
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    /// The state file exists but cannot be understood.
    #[error("state file {path} is unreadable: {reason} (use --fresh to discard it)")]
    CorruptState { path: String, reason: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ShuffleError>;

impl ShuffleError {
    /// `true` for errors that leave a resumable state on disk.
    pub fn is_resumable(&self) -> bool {
        matches!(self, ShuffleError::Commit { .. } | ShuffleError::LockContention { .. })
    }
}
