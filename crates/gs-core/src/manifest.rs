//! Manifest hash: a SHA-256 digest over the planning configuration and the
//! exact FileSet, used to detect drift between an interrupted run and now.
//!
//! The reference time is deliberately absent so that a window anchored to
//! "now" hashes the same across invocations; the state file pins the
//! reference time separately.

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::config::{ChunkStrategy, Direction, ScheduleMode, ShuffleConfig};
use crate::error::Result;
use crate::types::{Author, FileSet};

/// Bumped whenever planning semantics change in a way that would alter the
/// plan for identical inputs.
const MANIFEST_VERSION: u32 = 1;

#[derive(Serialize)]
struct PlanningFingerprint<'a> {
    version: u32,
    window_secs: i64,
    start_date: Option<String>,
    direction: Direction,
    total_commits: Option<u32>,
    commits_per_day_min: Option<u32>,
    commits_per_day_max: Option<u32>,
    mode: ScheduleMode,
    jitter_secs: Option<(i64, i64)>,
    authors: &'a [Author],
    file_patterns: &'a [String],
    chunking: ChunkStrategy,
}

/// Compute the manifest hash (lowercase hex) for `config` over `files`.
pub fn manifest_hash(config: &ShuffleConfig, files: &FileSet) -> Result<String> {
    let authors = config.authors()?;
    let fingerprint = PlanningFingerprint {
        version: MANIFEST_VERSION,
        window_secs: config.window_length()?.num_seconds(),
        start_date: config.start_date()?.map(|d| d.to_rfc3339()),
        direction: config.direction(),
        total_commits: config.total_commits,
        commits_per_day_min: config.commits_per_day_min,
        commits_per_day_max: config.commits_per_day_max,
        mode: config.mode,
        jitter_secs: config
            .jitter_bounds()?
            .map(|(lo, hi)| (lo.num_seconds(), hi.num_seconds())),
        authors: &authors,
        file_patterns: &config.file_patterns,
        chunking: config.chunking,
    };

    let mut hasher = Sha256::new();
    hasher.update(serde_json::to_vec(&fingerprint)?);
    hasher.update(b"\n");
    // Sizes only influence the partition under size-weighted chunking.
    let with_sizes = config.chunking == ChunkStrategy::SizeWeighted;
    for entry in files.iter() {
        hasher.update(entry.path.as_bytes());
        if with_sizes {
            hasher.update(b"\0");
            hasher.update(entry.size.to_string().as_bytes());
        }
        hasher.update(b"\n");
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Derive the planning seed from the first 64 bits of a manifest hash.
pub fn seed_from_hash(hash: &str) -> u64 {
    hash.get(..16)
        .and_then(|prefix| u64::from_str_radix(prefix, 16).ok())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FileEntry;

    fn config() -> ShuffleConfig {
        ShuffleConfig {
            duration: Some("2d".into()),
            author_name: Some("A".into()),
            author_email: Some("a@x.com".into()),
            ..ShuffleConfig::default()
        }
    }

    fn files(paths: &[&str]) -> FileSet {
        paths.iter().map(|p| FileEntry::new(*p, 1)).collect()
    }

    #[test]
    fn stable_for_identical_inputs() {
        let a = manifest_hash(&config(), &files(&["a", "b"])).unwrap();
        let b = manifest_hash(&config(), &files(&["b", "a"])).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn changes_with_files_or_config() {
        let base = manifest_hash(&config(), &files(&["a", "b"])).unwrap();
        let more = manifest_hash(&config(), &files(&["a", "b", "c"])).unwrap();
        assert_ne!(base, more);

        let mut cfg = config();
        cfg.total_commits = Some(2);
        assert_ne!(base, manifest_hash(&cfg, &files(&["a", "b"])).unwrap());
    }

    #[test]
    fn sizes_only_matter_for_size_weighted() {
        let small: FileSet = vec![FileEntry::new("a", 1)].into_iter().collect();
        let large: FileSet = vec![FileEntry::new("a", 999)].into_iter().collect();
        let cfg = config();
        assert_eq!(
            manifest_hash(&cfg, &small).unwrap(),
            manifest_hash(&cfg, &large).unwrap()
        );

        let mut weighted = config();
        weighted.chunking = ChunkStrategy::SizeWeighted;
        assert_ne!(
            manifest_hash(&weighted, &small).unwrap(),
            manifest_hash(&weighted, &large).unwrap()
        );
    }

    #[test]
    fn seed_uses_hash_prefix() {
        assert_eq!(seed_from_hash("00000000000000ff0000"), 255);
        assert_eq!(seed_from_hash("zz"), 0);
    }
}
