//! Planner + Chunker end to end: determinism, exact partitioning and the
//! documented two-day scenario.

use chrono::{DateTime, Duration, Utc};

use gs_core::config::{AuthorConfig, ChunkStrategy, ScheduleMode, ShuffleConfig};
use gs_core::plan::Plan;
use gs_core::scan::{RawEntry, SafeScan};
use gs_core::types::{FileEntry, FileSet};
use gs_core::ShuffleError;

// ===========================================================================
// Helpers
// ===========================================================================

fn now() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2024-06-15T18:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

fn two_day_config() -> ShuffleConfig {
    ShuffleConfig {
        duration: Some("2d".into()),
        total_commits: Some(4),
        mode: ScheduleMode::Even,
        authors: vec![AuthorConfig {
            name: "A".into(),
            email: "a@x.com".into(),
            weight: Some(1.0),
        }],
        ..ShuffleConfig::default()
    }
}

fn file_set(names: &[&str]) -> FileSet {
    names.iter().map(|n| FileEntry::new(*n, 10)).collect()
}

// ===========================================================================
// Scenarios
// ===========================================================================

#[test]
fn two_day_window_four_commits() {
    let plan = Plan::build(&two_day_config(), &file_set(&["f1", "f2", "f3", "f4"]), now()).unwrap();

    assert_eq!(plan.len(), 4);
    assert!(plan.commits.iter().all(|c| c.files.len() == 1));
    assert!(plan.commits.iter().all(|c| c.author.name == "A"));
    for pair in plan.commits.windows(2) {
        assert_eq!(pair[1].timestamp - pair[0].timestamp, Duration::hours(12));
    }
    // Backward from now by default: the window is [now - 2d, now].
    assert_eq!(plan.commits[3].timestamp, now());
    assert!(plan.commits[0].timestamp >= now() - Duration::days(2));
}

#[test]
fn identical_inputs_give_identical_plans() {
    let mut cfg = two_day_config();
    cfg.mode = ScheduleMode::Random;
    cfg.total_commits = Some(7);
    cfg.authors.push(AuthorConfig {
        name: "B".into(),
        email: "b@x.com".into(),
        weight: Some(2.0),
    });
    let files = file_set(&["a.py", "b.py", "c.md", "d.txt", "e.rs", "f.rs", "g.rs", "h.rs", "i.rs"]);

    let first = Plan::build(&cfg, &files, now()).unwrap();
    let second = Plan::build(&cfg, &files, now()).unwrap();
    assert_eq!(first, second);
    assert_eq!(
        serde_json::to_string(&first).unwrap(),
        serde_json::to_string(&second).unwrap()
    );
}

#[test]
fn changing_the_file_set_changes_the_hash() {
    let cfg = two_day_config();
    let base = Plan::build(&cfg, &file_set(&["f1", "f2", "f3", "f4"]), now()).unwrap();
    let added = Plan::build(&cfg, &file_set(&["f1", "f2", "f3", "f4", "f5"]), now()).unwrap();
    let removed = Plan::build(&cfg, &file_set(&["f1", "f2", "f3"]), now()).unwrap();
    assert_ne!(base.manifest_hash, added.manifest_hash);
    assert_ne!(base.manifest_hash, removed.manifest_hash);
}

#[test]
fn hash_ignores_reference_time() {
    let cfg = two_day_config();
    let files = file_set(&["f1", "f2"]);
    let a = Plan::build(&cfg, &files, now()).unwrap();
    let b = Plan::build(&cfg, &files, now() + Duration::hours(5)).unwrap();
    assert_eq!(a.manifest_hash, b.manifest_hash);
    assert_ne!(a.commits[0].timestamp, b.commits[0].timestamp);
}

#[test]
fn every_file_lands_in_exactly_one_commit() {
    let names: Vec<String> = (0..37).map(|i| format!("src/m{i:02}.rs")).collect();
    let files: FileSet = names.iter().map(|n| FileEntry::new(n.clone(), 1 + n.len() as u64)).collect();
    for chunking in [ChunkStrategy::RoundRobin, ChunkStrategy::SizeWeighted] {
        let cfg = ShuffleConfig {
            total_commits: Some(8),
            chunking,
            ..two_day_config()
        };
        let plan = Plan::build(&cfg, &files, now()).unwrap();
        let mut seen: Vec<String> = plan.commits.iter().flat_map(|c| c.files.clone()).collect();
        seen.sort();
        assert_eq!(seen, names);
        assert_eq!(plan.file_count(), 37);
    }
}

#[test]
fn fewer_files_than_slots_collapses() {
    let cfg = ShuffleConfig {
        total_commits: Some(10),
        ..two_day_config()
    };
    let plan = Plan::build(&cfg, &file_set(&["only.txt", "two.txt"]), now()).unwrap();
    assert_eq!(plan.len(), 2);
    let indices: Vec<usize> = plan.commits.iter().map(|c| c.index).collect();
    assert_eq!(indices, vec![0, 1]);
}

#[test]
fn empty_file_set_is_rejected() {
    let err = Plan::build(&two_day_config(), &FileSet::new(), now()).unwrap_err();
    assert!(matches!(
        err,
        ShuffleError::EmptyPlan(_) | ShuffleError::InsufficientFiles
    ));
}

#[test]
fn huge_window_is_rejected_without_panicking() {
    let cfg = ShuffleConfig {
        duration: None,
        days_active: Some(4_000_000_000),
        ..two_day_config()
    };
    assert!(cfg.validate().is_err());
    let err = Plan::build(&cfg, &file_set(&["f1", "f2"]), now()).unwrap_err();
    assert!(matches!(err, ShuffleError::Configuration(_)));
}

#[test]
fn backward_plan_never_dates_past_now() {
    let cfg = ShuffleConfig {
        duration: Some("5s".into()),
        total_commits: Some(12),
        ..two_day_config()
    };
    let names: Vec<String> = (0..12).map(|i| format!("f{i:02}")).collect();
    let files: FileSet = names.iter().map(|n| FileEntry::new(n.clone(), 1)).collect();
    let plan = Plan::build(&cfg, &files, now()).unwrap();
    assert_eq!(plan.len(), 12);
    assert!(plan.commits.iter().all(|c| c.timestamp <= now()));
}

#[test]
fn scan_then_plan() {
    let listing = vec![
        RawEntry::file("src/main.py", 120),
        RawEntry::file("src/util.py", 80),
        RawEntry::file("node_modules/pkg/index.js", 10),
        RawEntry::file(".git/HEAD", 10),
        RawEntry::file("docs/readme.md", 5),
    ];
    let scan = SafeScan::new(&["**/*.py".to_string()]).unwrap();
    let files = scan.filter(listing).unwrap();
    assert_eq!(files.len(), 2);

    let plan = Plan::build(&two_day_config(), &files, now()).unwrap();
    assert_eq!(plan.len(), 2);
    let preview = plan.preview();
    assert_eq!(preview[0].author_email, "a@x.com");
    assert!(preview[1].timestamp.ends_with('Z'));
}
