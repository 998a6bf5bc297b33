//! Persistent execution state.
//!
//! One JSON document per repository (`state.json` in the state directory).
//! It is rewritten after every successful commit so that a crash leaves at
//! most one commit whose bookkeeping is missing; the engine reconciles that
//! case on the next run.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, ShuffleError};

pub const STATE_FILE_NAME: &str = "state.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    InProgress,
    Completed,
    /// Retries were exhausted; resumable from `failed_index`.
    Failed,
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InProgress => write!(f, "in_progress"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionState {
    pub manifest_hash: String,
    /// Highest commit index known to be applied; `None` before the first.
    pub last_completed_index: Option<usize>,
    /// HEAD right after the last applied commit (or before the first one).
    pub last_recorded_head: Option<String>,
    pub status: ExecutionStatus,
    pub total_commits: usize,
    /// Anchor used to build the plan; reused on resume.
    pub reference_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_index: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl ExecutionState {
    /// Fresh state for a plan that has not applied anything yet.
    pub fn begin(
        manifest_hash: impl Into<String>,
        total_commits: usize,
        reference_time: DateTime<Utc>,
        head: Option<String>,
    ) -> Self {
        Self {
            manifest_hash: manifest_hash.into(),
            last_completed_index: None,
            last_recorded_head: head,
            status: ExecutionStatus::InProgress,
            total_commits,
            reference_time,
            failed_index: None,
            last_error: None,
            updated_at: Utc::now(),
        }
    }

    /// First index that still needs applying.
    pub fn next_index(&self) -> usize {
        self.last_completed_index.map_or(0, |i| i + 1)
    }

    /// Number of commits already applied.
    pub fn applied(&self) -> usize {
        self.next_index()
    }

    pub fn is_complete(&self) -> bool {
        self.status == ExecutionStatus::Completed
    }

    /// Record `index` as applied with the resulting HEAD.
    pub fn record_commit(&mut self, index: usize, head: String) {
        self.last_completed_index = Some(index);
        self.last_recorded_head = Some(head);
        self.status = ExecutionStatus::InProgress;
        self.failed_index = None;
        self.last_error = None;
        self.updated_at = Utc::now();
    }

    pub fn mark_failed(&mut self, index: usize, error: impl Into<String>) {
        self.status = ExecutionStatus::Failed;
        self.failed_index = Some(index);
        self.last_error = Some(error.into());
        self.updated_at = Utc::now();
    }

    pub fn mark_completed(&mut self) {
        self.status = ExecutionStatus::Completed;
        self.failed_index = None;
        self.last_error = None;
        self.updated_at = Utc::now();
    }
}

// ---------------------------------------------------------------------------
// StateStore
// ---------------------------------------------------------------------------

/// Loads and atomically persists [`ExecutionState`].
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at `<state_dir>/state.json`.
    pub fn in_dir(state_dir: &Path) -> Self {
        Self::new(state_dir.join(STATE_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `Ok(None)` when no state has been written yet.
    pub fn load(&self) -> Result<Option<ExecutionState>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| ShuffleError::CorruptState {
                path: self.path.display().to_string(),
                reason: e.to_string(),
            })
    }

    /// Write to a sibling temp file, fsync, then rename over the target so a
    /// reader never observes a partial document.
    pub fn save(&self, state: &ExecutionState) -> Result<()> {
        let parent = self.path.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(parent)?;

        let json = serde_json::to_vec_pretty(state)?;
        let tmp = parent.join(format!(
            ".{}.tmp.{}",
            self.path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| STATE_FILE_NAME.to_string()),
            std::process::id()
        ));

        let write = || -> std::io::Result<()> {
            let mut file = File::create(&tmp)?;
            file.write_all(&json)?;
            file.sync_all()?;
            fs::rename(&tmp, &self.path)?;
            Ok(())
        };
        if let Err(e) = write() {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }

        #[cfg(unix)]
        if let Ok(dir) = File::open(parent) {
            let _ = dir.sync_all();
        }

        debug!(
            path = %self.path.display(),
            next = state.next_index(),
            status = %state.status,
            "state persisted"
        );
        Ok(())
    }

    /// Remove the state file (used by `--fresh`).
    pub fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
