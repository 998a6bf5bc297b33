//! GitBackend against a real repository in a temp directory.
//!
//! Skipped when no `git` binary is on PATH.

use std::path::Path;
use std::process::Command;

use chrono::{DateTime, Utc};

use gs_core::backend::VersionControlBackend;
use gs_core::config::{AuthorConfig, ShuffleConfig, DEFAULT_STATE_DIR};
use gs_core::engine::{ApplyOptions, ApplyOutcome, Engine, RetryPolicy};
use gs_core::git::GitBackend;
use gs_core::scan::SafeScan;
use gs_core::state::ExecutionStatus;
use gs_core::types::Author;
use gs_core::ShuffleError;

fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

fn git(dir: &Path, args: &[&str]) -> String {
    let out = Command::new("git").args(args).current_dir(dir).output().unwrap();
    assert!(out.status.success(), "git {args:?}: {}", String::from_utf8_lossy(&out.stderr));
    String::from_utf8_lossy(&out.stdout).to_string()
}

fn write(dir: &Path, rel: &str, body: &str) {
    let path = dir.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, body).unwrap();
}

fn backend(dir: &Path) -> GitBackend {
    GitBackend::new(dir, &dir.join(DEFAULT_STATE_DIR))
}

fn single_author_config(root: &Path, commits: u32) -> ShuffleConfig {
    ShuffleConfig {
        repo_path: root.to_path_buf(),
        duration: Some("1d".into()),
        total_commits: Some(commits),
        authors: vec![AuthorConfig {
            name: "A".into(),
            email: "a@x.com".into(),
            weight: None,
        }],
        ..ShuffleConfig::default()
    }
}

#[test]
fn init_and_inspect_fresh_repository() {
    if !git_available() {
        eprintln!("git not available, skipping");
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let backend = backend(dir.path());

    assert!(!backend.is_repo());
    assert!(backend.init_if_missing().unwrap());
    assert!(!backend.init_if_missing().unwrap());

    assert_eq!(backend.current_head().unwrap(), None);
    assert!(!backend.is_detached_head().unwrap());
    write(dir.path(), "untracked.txt", "x");
    assert!(!backend.is_dirty().unwrap());
}

#[test]
fn commit_uses_planned_identity_and_date() {
    if !git_available() {
        eprintln!("git not available, skipping");
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let backend = backend(dir.path());
    backend.init_if_missing().unwrap();
    write(dir.path(), "a.txt", "alpha");
    write(dir.path(), "b.txt", "beta");

    let ts = DateTime::parse_from_rfc3339("2021-07-04T15:30:00Z")
        .unwrap()
        .with_timezone(&Utc);
    let author = Author::new("Ada", "ada@example.com", 1.0);
    let hash = backend
        .stage_and_commit(&["a.txt".into(), "b.txt".into()], &author, ts, "Update 2 files")
        .unwrap();

    assert_eq!(backend.current_head().unwrap().as_deref(), Some(hash.as_str()));
    let log = git(dir.path(), &["log", "-1", "--format=%an|%ae|%at|%ce|%ct|%s"]);
    assert_eq!(log.trim(), "Ada|ada@example.com|1625412600|ada@example.com|1625412600|Update 2 files");

    let record = backend.head_commit().unwrap().unwrap();
    assert_eq!(record.hash, hash);
    assert_eq!(record.parent, None);
    assert_eq!(record.author_time, ts.timestamp());

    // Modifying a tracked file makes the tree dirty.
    write(dir.path(), "a.txt", "changed");
    assert!(backend.is_dirty().unwrap());
}

#[test]
fn detached_head_is_reported() {
    if !git_available() {
        eprintln!("git not available, skipping");
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let backend = backend(dir.path());
    backend.init_if_missing().unwrap();
    write(dir.path(), "a.txt", "alpha");
    let hash = backend
        .stage_and_commit(&["a.txt".into()], &Author::new("A", "a@x.com", 1.0), Utc::now(), "one")
        .unwrap();

    git(dir.path(), &["checkout", "-q", "--detach", &hash]);
    assert!(backend.is_detached_head().unwrap());
}

#[test]
fn end_to_end_apply_and_resume_is_idempotent() {
    if !git_available() {
        eprintln!("git not available, skipping");
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    for name in ["src/a.py", "src/b.py", "src/c.py", "docs/readme.md", "notes.txt"] {
        write(root, name, name);
    }
    write(root, "node_modules/dep/index.js", "ignored");
    write(root, ".cache/blob.py", "ignored");

    let config = single_author_config(root, 3);

    let backend = backend(root);
    backend.init_if_missing().unwrap();
    let files = SafeScan::new(&config.file_patterns)
        .unwrap()
        .deny_dir(DEFAULT_STATE_DIR)
        .scan(root)
        .unwrap();
    assert_eq!(files.len(), 5);

    let now = DateTime::parse_from_rfc3339("2024-01-10T12:00:00Z")
        .unwrap()
        .with_timezone(&Utc);
    let engine = Engine::new(&backend, config.state_dir_path());
    let report = engine.apply(&config, &files, now, &ApplyOptions::default()).unwrap();
    assert_eq!(report.outcome, ApplyOutcome::Completed);
    assert_eq!(report.applied.len(), 3);

    let count = git(root, &["rev-list", "--count", "HEAD"]);
    assert_eq!(count.trim(), "3");
    let tracked = git(root, &["ls-files"]);
    assert!(tracked.contains("src/a.py"));
    assert!(!tracked.contains("node_modules"));
    assert!(!tracked.contains(".gitshuffle"));

    let again = engine.apply(&config, &files, now, &ApplyOptions::default()).unwrap();
    assert_eq!(again.outcome, ApplyOutcome::AlreadyComplete);
    assert_eq!(git(root, &["rev-list", "--count", "HEAD"]).trim(), "3");
}

#[cfg(unix)]
#[test]
fn rejected_commit_leaves_index_clean_and_resumes() {
    use std::os::unix::fs::PermissionsExt;

    if !git_available() {
        eprintln!("git not available, skipping");
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();
    let root = dir.path();
    for name in ["a.txt", "b.txt", "c.txt"] {
        write(root, name, name);
    }
    let backend = backend(root);
    backend.init_if_missing().unwrap();

    // Accepts the first commit, rejects every later one.
    let marker = scratch.path().join("seen");
    let hook = root.join(".git/hooks/pre-commit");
    std::fs::create_dir_all(hook.parent().unwrap()).unwrap();
    std::fs::write(
        &hook,
        format!(
            "#!/bin/sh\nif [ -f '{m}' ]; then exit 1; fi\ntouch '{m}'\nexit 0\n",
            m = marker.display()
        ),
    )
    .unwrap();
    std::fs::set_permissions(&hook, std::fs::Permissions::from_mode(0o755)).unwrap();

    let config = single_author_config(root, 3);
    let files = SafeScan::new(&[])
        .unwrap()
        .deny_dir(DEFAULT_STATE_DIR)
        .scan(root)
        .unwrap();
    let now = DateTime::parse_from_rfc3339("2024-01-10T12:00:00Z")
        .unwrap()
        .with_timezone(&Utc);
    let opts = ApplyOptions {
        retry: RetryPolicy {
            max_attempts: 1,
            base_delay: std::time::Duration::ZERO,
        },
        ..ApplyOptions::default()
    };
    let engine = Engine::new(&backend, config.state_dir_path());

    let err = engine.apply(&config, &files, now, &opts).unwrap_err();
    assert!(matches!(err, ShuffleError::Commit { index: 1, .. }), "got {err}");
    let state = engine.status().unwrap().state.unwrap();
    assert_eq!(state.status, ExecutionStatus::Failed);

    // Nothing this run staged is left in the index.
    let porcelain = git(root, &["status", "--porcelain"]);
    assert!(
        porcelain.lines().all(|l| l.starts_with("??")),
        "staged leftovers: {porcelain}"
    );
    assert!(!backend.is_dirty().unwrap());

    std::fs::remove_file(&hook).unwrap();
    let report = engine.apply(&config, &files, now, &opts).unwrap();
    assert!(report.resumed);
    assert_eq!(report.outcome, ApplyOutcome::Completed);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.applied.len(), 2);
    assert_eq!(git(root, &["rev-list", "--count", "HEAD"]).trim(), "3");
}
