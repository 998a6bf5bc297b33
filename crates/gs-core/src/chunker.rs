//! Chunker: partition a [`FileSet`] across schedule slots.
//!
//! The partition is exact (every file in exactly one commit) and no commit is
//! empty. When there are fewer files than slots the slot sequence is first
//! collapsed: the first and last slots are retained so the overall time range
//! survives, and the dropped slots fold into their retained neighbours.

use tracing::debug;

use crate::config::ChunkStrategy;
use crate::error::{Result, ShuffleError};
use crate::types::{CommitSpec, FileEntry, FileSet, ScheduleSlot};

pub fn chunk(
    files: &FileSet,
    slots: Vec<ScheduleSlot>,
    strategy: ChunkStrategy,
) -> Result<Vec<CommitSpec>> {
    if files.is_empty() {
        return Err(ShuffleError::InsufficientFiles);
    }
    if slots.is_empty() {
        return Err(ShuffleError::EmptyPlan("no slots to fill".into()));
    }

    let slots = if files.len() < slots.len() {
        debug!(files = files.len(), slots = slots.len(), "collapsing slots to file count");
        collapse_slots(slots, files.len())
    } else {
        slots
    };

    let entries: Vec<FileEntry> = files.iter().collect();
    let buckets = match strategy {
        ChunkStrategy::RoundRobin => round_robin(&entries, slots.len()),
        ChunkStrategy::SizeWeighted => size_weighted(&entries, slots.len()),
    };

    Ok(slots
        .into_iter()
        .zip(buckets)
        .map(|(slot, files)| CommitSpec {
            index: slot.index,
            timestamp: slot.timestamp,
            message: CommitSpec::message_for(&files),
            author: slot.author,
            files,
        })
        .collect())
}

/// Reduce `slots` to `keep` entries, retaining both endpoints and spreading
/// the survivors evenly. Indices are renumbered densely.
pub fn collapse_slots(slots: Vec<ScheduleSlot>, keep: usize) -> Vec<ScheduleSlot> {
    let n = slots.len();
    if keep >= n {
        return slots;
    }
    let retained: Vec<usize> = match keep {
        0 => Vec::new(),
        // Everything folds forward into the final slot.
        1 => vec![n - 1],
        _ => (0..keep)
            .map(|i| ((i * (n - 1)) as f64 / (keep - 1) as f64).round() as usize)
            .collect(),
    };

    // `retained` is strictly increasing, so a single cursor walks it.
    let mut wanted = retained.into_iter().peekable();
    slots
        .into_iter()
        .enumerate()
        .filter(|(i, _)| {
            let hit = wanted.peek() == Some(i);
            if hit {
                wanted.next();
            }
            hit
        })
        .map(|(_, slot)| slot)
        .enumerate()
        .map(|(index, slot)| ScheduleSlot { index, ..slot })
        .collect()
}

fn round_robin(entries: &[FileEntry], k: usize) -> Vec<Vec<String>> {
    let mut buckets = vec![Vec::new(); k];
    for (i, entry) in entries.iter().enumerate() {
        buckets[i % k].push(entry.path.clone());
    }
    buckets
}

/// Seed each bucket with one file, then hand each remaining file to the
/// lightest bucket (lowest index on ties).
fn size_weighted(entries: &[FileEntry], k: usize) -> Vec<Vec<String>> {
    let mut buckets: Vec<Vec<String>> = vec![Vec::new(); k];
    let mut totals = vec![0u64; k];
    for (i, entry) in entries.iter().enumerate() {
        let target = if i < k {
            i
        } else {
            totals
                .iter()
                .enumerate()
                .min_by_key(|(idx, total)| (**total, *idx))
                .map(|(idx, _)| idx)
                .unwrap_or(0)
        };
        buckets[target].push(entry.path.clone());
        totals[target] += entry.size;
    }
    buckets
}
