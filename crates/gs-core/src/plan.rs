use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::chunker;
use crate::config::ShuffleConfig;
use crate::error::Result;
use crate::manifest::{manifest_hash, seed_from_hash};
use crate::planner::Planner;
use crate::types::{CommitSpec, FileSet};

// ---------------------------------------------------------------------------
// Plan
// ---------------------------------------------------------------------------

/// The immutable schedule handed to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub manifest_hash: String,
    /// The "now" the window was anchored to (ignored when a start date is
    /// configured, but always recorded).
    pub reference_time: DateTime<Utc>,
    pub commits: Vec<CommitSpec>,
}

/// One row of the human-readable plan preview.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreviewRow {
    pub index: usize,
    pub timestamp: String,
    pub author_email: String,
    pub file_count: usize,
}

impl Plan {
    /// Run Planner then Chunker. Identical inputs give identical plans.
    pub fn build(config: &ShuffleConfig, files: &FileSet, reference_time: DateTime<Utc>) -> Result<Self> {
        let hash = manifest_hash(config, files)?;
        let planner = Planner::from_config(config, seed_from_hash(&hash))?;
        let reference_time = DateTime::from_timestamp(reference_time.timestamp(), 0).unwrap_or(reference_time);
        let slots = planner.plan(reference_time, files.len())?;
        let commits = chunker::chunk(files, slots, config.chunking)?;
        Ok(Self {
            manifest_hash: hash,
            reference_time,
            commits,
        })
    }

    pub fn len(&self) -> usize {
        self.commits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commits.is_empty()
    }

    pub fn file_count(&self) -> usize {
        self.commits.iter().map(|c| c.files.len()).sum()
    }

    pub fn preview(&self) -> Vec<PreviewRow> {
        self.commits
            .iter()
            .map(|c| PreviewRow {
                index: c.index,
                timestamp: c.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
                author_email: c.author.email.clone(),
                file_count: c.files.len(),
            })
            .collect()
    }
}
