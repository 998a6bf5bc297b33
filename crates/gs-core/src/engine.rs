//! Execution engine: walks a [`Plan`] against a live repository.
//!
//! Every apply runs the same pre-flight sequence (lock, cleanliness, detached
//! HEAD, drift, tamper) before touching anything. Progress is checkpointed
//! to the [`StateStore`] after each commit, so an interrupted run resumes at
//! `last_completed_index + 1` without re-applying or skipping entries.

use std::path::{Path, PathBuf};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, info_span, warn};

use crate::backend::{BackendError, CommitRecord, VersionControlBackend};
use crate::config::{RetryConfig, ShuffleConfig};
use crate::error::{Result, ShuffleError};
use crate::lockfile::{ApplyLock, LockGuard, LOCK_FILE_NAME};
use crate::plan::{Plan, PreviewRow};
use crate::state::{ExecutionState, StateStore};
use crate::types::{CommitSpec, FileSet};

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Bounded retry with exponential backoff for a single commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: StdDuration,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: StdDuration::from_millis(config.backoff_ms),
        }
    }

    /// Delay after the `attempt`-th failure (1-based): base, 2x, 4x, ...
    pub fn delay_for(&self, attempt: u32) -> StdDuration {
        let shift = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1 << shift)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

#[derive(Debug, Clone, Default)]
pub struct ApplyOptions {
    pub dry_run: bool,
    pub allow_dirty: bool,
    pub allow_detached: bool,
    /// Discard any persisted state and start over.
    pub fresh: bool,
    pub retry: RetryPolicy,
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyOutcome {
    Completed,
    /// A completed state for the same manifest already exists.
    AlreadyComplete,
    DryRun,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedCommit {
    pub index: usize,
    pub hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyReport {
    pub manifest_hash: String,
    pub total: usize,
    /// Entries already applied by an earlier run.
    pub skipped: usize,
    /// Entries applied (or adopted after a crash) by this run.
    pub applied: Vec<AppliedCommit>,
    /// Entries a dry run would apply.
    pub would_apply: Vec<PreviewRow>,
    pub resumed: bool,
    pub outcome: ApplyOutcome,
}

/// Snapshot for `gitshuffle status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    pub state: Option<ExecutionState>,
    pub lock_holder: Option<ApplyLock>,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct Engine<B: VersionControlBackend> {
    backend: B,
    state_dir: PathBuf,
}

impl<B: VersionControlBackend> Engine<B> {
    pub fn new(backend: B, state_dir: impl Into<PathBuf>) -> Self {
        Self {
            backend,
            state_dir: state_dir.into(),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    pub fn store(&self) -> StateStore {
        StateStore::in_dir(&self.state_dir)
    }

    fn lock_path(&self) -> PathBuf {
        self.state_dir.join(LOCK_FILE_NAME)
    }

    /// Persisted state and current lock holder. Read-only.
    pub fn status(&self) -> Result<StatusReport> {
        Ok(StatusReport {
            state: self.store().load()?,
            lock_holder: ApplyLock::holder(&self.lock_path()),
        })
    }

    /// Build the plan for `files` anchored at `now` and apply it.
    pub fn apply(
        &self,
        config: &ShuffleConfig,
        files: &FileSet,
        now: DateTime<Utc>,
        opts: &ApplyOptions,
    ) -> Result<ApplyReport> {
        let plan = Plan::build(config, files, now)?;
        let span = info_span!("apply", manifest = %short(&plan.manifest_hash), dry_run = opts.dry_run);
        let _enter = span.enter();

        // (1) Lock. Dry runs only check for a live holder.
        let _guard: Option<LockGuard> = if opts.dry_run {
            if let Some(holder) = ApplyLock::holder(&self.lock_path()) {
                return Err(ShuffleError::LockContention {
                    pid: holder.pid,
                    acquired_at: holder.acquired_at,
                });
            }
            None
        } else {
            Some(ApplyLock::acquire(&self.lock_path())?)
        };

        self.check_worktree(opts)?;

        let store = self.store();
        let persisted = if opts.fresh {
            if !opts.dry_run {
                store.clear()?;
            }
            info!("fresh run requested, ignoring persisted state");
            None
        } else {
            store.load()?
        };

        let (plan, mut state, resumed) = match persisted {
            // (4) Drift.
            Some(state) if state.manifest_hash != plan.manifest_hash => {
                return Err(ShuffleError::PlanDrift {
                    expected: state.manifest_hash,
                    actual: plan.manifest_hash,
                });
            }
            Some(state) => {
                let plan = if state.reference_time == plan.reference_time {
                    plan
                } else {
                    Plan::build(config, files, state.reference_time)?
                };
                if state.total_commits != plan.len() {
                    return Err(ShuffleError::CorruptState {
                        path: store.path().display().to_string(),
                        reason: format!(
                            "records {} commits but the plan has {}",
                            state.total_commits,
                            plan.len()
                        ),
                    });
                }
                (plan, state, true)
            }
            None => {
                let head = self.backend.current_head()?;
                let state =
                    ExecutionState::begin(plan.manifest_hash.clone(), plan.len(), plan.reference_time, head);
                if !opts.dry_run {
                    store.save(&state)?;
                }
                (plan, state, false)
            }
        };

        let mut report = ApplyReport {
            manifest_hash: plan.manifest_hash.clone(),
            total: plan.len(),
            skipped: 0,
            applied: Vec::new(),
            would_apply: Vec::new(),
            resumed,
            outcome: if opts.dry_run {
                ApplyOutcome::DryRun
            } else {
                ApplyOutcome::Completed
            },
        };

        if resumed {
            if state.is_complete() {
                info!(total = plan.len(), "plan already fully applied");
                report.skipped = plan.len();
                report.outcome = ApplyOutcome::AlreadyComplete;
                return Ok(report);
            }
            // (5) Tamper.
            if let Some(adopted) = self.verify_head(&plan, &state)? {
                info!(index = state.next_index(), hash = %adopted.hash, "adopting commit made before the interruption");
                report.applied.push(AppliedCommit {
                    index: state.next_index(),
                    hash: adopted.hash.clone(),
                });
                state.record_commit(state.next_index(), adopted.hash);
                if !opts.dry_run {
                    store.save(&state)?;
                }
            }
            info!(
                next = state.next_index(),
                total = plan.len(),
                status = %state.status,
                "resuming"
            );
        }
        report.skipped = state.next_index() - report.applied.len();

        let next = state.next_index();
        if opts.dry_run {
            report.would_apply = plan.preview().into_iter().filter(|r| r.index >= next).collect();
            info!(would_apply = report.would_apply.len(), "dry run complete, nothing written");
            return Ok(report);
        }

        for spec in plan.commits.iter().filter(|c| c.index >= next) {
            match self.commit_with_retry(spec, &state, &opts.retry) {
                Ok(hash) => {
                    let head = self.backend.current_head()?.unwrap_or_else(|| hash.clone());
                    state.record_commit(spec.index, head);
                    store.save(&state)?;
                    info!(
                        index = spec.index,
                        total = plan.len(),
                        hash = %short(&hash),
                        files = spec.files.len(),
                        "commit applied"
                    );
                    report.applied.push(AppliedCommit {
                        index: spec.index,
                        hash,
                    });
                }
                Err(e) => {
                    state.mark_failed(spec.index, e.to_string());
                    store.save(&state)?;
                    warn!(index = spec.index, error = %e, "apply stopped; rerun to resume");
                    return Err(e);
                }
            }
        }

        state.mark_completed();
        store.save(&state)?;
        info!(applied = report.applied.len(), total = plan.len(), "plan completed");
        Ok(report)
    }

    /// Pre-flight checks (2) and (3).
    fn check_worktree(&self, opts: &ApplyOptions) -> Result<()> {
        if self.backend.is_dirty()? {
            if !opts.allow_dirty {
                return Err(ShuffleError::DirtyRepository);
            }
            warn!("repository has uncommitted changes; continuing (--allow-dirty)");
        }
        if self.backend.is_detached_head()? {
            if !opts.allow_detached {
                return Err(ShuffleError::DetachedHead);
            }
            warn!("HEAD is detached; continuing (--allow-detached)");
        }
        if self.backend.signing_enabled() {
            warn!("commit.gpgsign is enabled; each commit may prompt for a passphrase");
        }
        Ok(())
    }

    /// Compare HEAD with the recorded head. Returns the commit to adopt when
    /// HEAD is exactly the next planned commit whose checkpoint was lost.
    fn verify_head(&self, plan: &Plan, state: &ExecutionState) -> Result<Option<CommitRecord>> {
        let head = self.backend.current_head()?;
        if head == state.last_recorded_head {
            return Ok(None);
        }
        if let Some(spec) = plan.commits.get(state.next_index()) {
            if let Some(record) = self.landed(spec, state)? {
                return Ok(Some(record));
            }
        }
        Err(ShuffleError::HistoryTampered {
            expected: state
                .last_recorded_head
                .clone()
                .unwrap_or_else(|| "<unborn>".into()),
            actual: head.unwrap_or_else(|| "<unborn>".into()),
        })
    }

    /// HEAD, if it is `spec` committed directly on top of the recorded head.
    fn landed(&self, spec: &CommitSpec, state: &ExecutionState) -> Result<Option<CommitRecord>> {
        let Some(record) = self.backend.head_commit()? else {
            return Ok(None);
        };
        let matches = record.parent == state.last_recorded_head
            && record.author_email == spec.author.email
            && record.author_time == spec.timestamp.timestamp();
        Ok(matches.then_some(record))
    }

    fn commit_with_retry(
        &self,
        spec: &CommitSpec,
        state: &ExecutionState,
        policy: &RetryPolicy,
    ) -> Result<String> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            debug!(index = spec.index, attempt, "stage_and_commit");
            let err: BackendError = match self.backend.stage_and_commit(
                &spec.files,
                &spec.author,
                spec.timestamp,
                &spec.message,
            ) {
                Ok(hash) => return Ok(hash),
                Err(e) => e,
            };

            // The commit may have landed before the failure was reported.
            if let Some(record) = self.landed(spec, state)? {
                info!(index = spec.index, hash = %short(&record.hash), "commit landed despite error; adopting");
                return Ok(record.hash);
            }
            if attempt >= policy.max_attempts {
                return Err(ShuffleError::Commit {
                    index: spec.index,
                    attempts: attempt,
                    source: err,
                });
            }
            let delay = policy.delay_for(attempt);
            warn!(
                index = spec.index,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "commit failed, retrying"
            );
            std::thread::sleep(delay);
        }
    }
}

fn short(hash: &str) -> &str {
    hash.get(..12).unwrap_or(hash)
}
