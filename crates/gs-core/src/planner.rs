//! Planner: configuration -> ordered [`ScheduleSlot`]s.
//!
//! Pure over its inputs. Every random draw comes from an RNG seeded from the
//! manifest hash and a per-purpose stream id, advanced per slot index, so the
//! same configuration and file set always yield the same schedule.

use chrono::{DateTime, Duration, Utc};
use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, warn};

use crate::config::{Direction, ScheduleMode, ShuffleConfig};
use crate::error::{Result, ShuffleError};
use crate::types::{Author, ScheduleSlot};

/// One commit per this many files when no count or rate is configured.
const FILES_PER_DERIVED_COMMIT: usize = 5;

/// Sustained rates above this are flagged as unrealistic.
const MAX_COMMITS_PER_MINUTE: f64 = 2.0;

const STREAM_RATE: u64 = 1;
const STREAM_GAPS: u64 = 2;
const STREAM_AUTHOR: u64 = 3;

/// How the slot count is determined, in precedence order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotCount {
    Total(u32),
    PerDay { min: u32, max: u32 },
    FromFiles,
}

/// Resolved planning parameters.
#[derive(Debug, Clone)]
pub struct Planner {
    pub window: Duration,
    pub start_date: Option<DateTime<Utc>>,
    pub direction: Direction,
    pub count: SlotCount,
    pub mode: ScheduleMode,
    pub jitter: Option<(Duration, Duration)>,
    pub authors: Vec<Author>,
    pub seed: u64,
}

impl Planner {
    pub fn from_config(config: &ShuffleConfig, seed: u64) -> Result<Self> {
        let count = match (
            config.total_commits,
            config.commits_per_day_min,
            config.commits_per_day_max,
        ) {
            (Some(n), _, _) => SlotCount::Total(n),
            (None, Some(min), Some(max)) => SlotCount::PerDay { min, max },
            (None, Some(min), None) => SlotCount::PerDay { min, max: min },
            (None, None, Some(max)) => SlotCount::PerDay { min: 0, max },
            (None, None, None) => SlotCount::FromFiles,
        };
        Ok(Self {
            window: config.window_length()?,
            start_date: config.start_date()?,
            direction: config.direction(),
            count,
            mode: config.mode,
            jitter: config.jitter_bounds()?,
            authors: config.authors()?,
            seed,
        })
    }

    /// Absolute window `[start, end]` for a given reference time.
    pub fn window_bounds(&self, reference_time: DateTime<Utc>) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
        let anchor = floor_to_second(self.start_date.unwrap_or(reference_time));
        let bounds = match self.direction {
            Direction::Forward => anchor.checked_add_signed(self.window).map(|end| (anchor, end)),
            Direction::Backward => anchor.checked_sub_signed(self.window).map(|start| (start, anchor)),
        };
        bounds.ok_or_else(|| {
            ShuffleError::Configuration(format!(
                "a {}s window from {anchor} falls outside the representable date range",
                self.window.num_seconds()
            ))
        })
    }

    /// Build the schedule.
    pub fn plan(&self, reference_time: DateTime<Utc>, file_count: usize) -> Result<Vec<ScheduleSlot>> {
        if file_count == 0 {
            return Err(ShuffleError::EmptyPlan("no files to schedule".into()));
        }
        let n = self.slot_count(file_count);
        if n == 0 {
            return Err(ShuffleError::EmptyPlan(format!(
                "slot count resolved to zero for a {}s window",
                self.window.num_seconds()
            )));
        }

        let (start, end) = self.window_bounds(reference_time)?;
        let timestamps = match self.mode {
            ScheduleMode::Even => self.even_timestamps(start, end, n),
            ScheduleMode::Random => self.random_timestamps(start, end, n),
        };
        let timestamps = enforce_spacing(timestamps, end);
        if timestamps.first().is_some_and(|first| *first < start) {
            warn!(
                slots = n,
                window_secs = self.window.num_seconds(),
                "window too short for one-second spacing; earliest commits start before the window"
            );
        }

        let minutes = self.window.num_seconds() as f64 / 60.0;
        if minutes > 0.0 && n as f64 / minutes > MAX_COMMITS_PER_MINUTE {
            warn!(
                slots = n,
                window_secs = self.window.num_seconds(),
                "schedule exceeds {MAX_COMMITS_PER_MINUTE} commits per minute; unrealistic for human activity"
            );
        }

        let slots = timestamps
            .into_iter()
            .enumerate()
            .map(|(index, timestamp)| -> Result<ScheduleSlot> {
                Ok(ScheduleSlot {
                    index,
                    timestamp,
                    author: self.author_for(index)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        debug!(slots = slots.len(), start = %start, end = %end, "schedule built");
        Ok(slots)
    }

    /// Resolve the number of slots.
    pub fn slot_count(&self, file_count: usize) -> usize {
        match self.count {
            SlotCount::Total(n) => n as usize,
            SlotCount::FromFiles => (file_count / FILES_PER_DERIVED_COMMIT).max(1),
            SlotCount::PerDay { min, max } => {
                let mut rng = stream_rng(self.seed, STREAM_RATE, 0);
                let secs = self.window.num_seconds();
                let full_days = secs / 86_400;
                if full_days == 0 {
                    // Sub-day windows treat the bounds as a total range.
                    return rng.gen_range(min..=max) as usize;
                }
                let mut total = 0usize;
                for _ in 0..full_days {
                    total += rng.gen_range(min..=max) as usize;
                }
                let fraction = (secs % 86_400) as f64 / 86_400.0;
                if fraction > 0.0 {
                    total += (rng.gen_range(min..=max) as f64 * fraction).round() as usize;
                }
                total
            }
        }
    }

    fn even_timestamps(&self, start: DateTime<Utc>, end: DateTime<Utc>, n: usize) -> Vec<DateTime<Utc>> {
        let step_ms = (end - start).num_milliseconds() / n as i64;
        (0..n)
            .map(|i| match self.direction {
                Direction::Forward => start + Duration::milliseconds(step_ms * i as i64),
                Direction::Backward => end - Duration::milliseconds(step_ms * (n - 1 - i) as i64),
            })
            .map(floor_to_second)
            .collect()
    }

    /// Jittered gaps, re-normalized so every slot lands inside the window.
    fn random_timestamps(&self, start: DateTime<Utc>, end: DateTime<Utc>, n: usize) -> Vec<DateTime<Utc>> {
        let span_ms = (end - start).num_milliseconds() as f64;
        let (lo, hi) = match self.jitter {
            Some((lo, hi)) => (lo.num_milliseconds() as f64, hi.num_milliseconds() as f64),
            None => {
                let mean = span_ms / n as f64;
                (mean * 0.25, mean * 1.75)
            }
        };

        // n + 1 gaps: one before each slot and a trailing one, so the last
        // slot sits strictly inside the window.
        let gaps: Vec<f64> = (0..=n)
            .map(|i| {
                let mut rng = stream_rng(self.seed, STREAM_GAPS, i as u64);
                if hi > lo {
                    rng.gen_range(lo..=hi)
                } else {
                    lo
                }
            })
            .collect();
        let total: f64 = gaps.iter().sum();
        let scale = if total > 0.0 { span_ms / total } else { 0.0 };

        let mut cumulative = 0.0;
        gaps.iter()
            .take(n)
            .map(|gap| {
                cumulative += gap;
                floor_to_second(start + Duration::milliseconds((cumulative * scale) as i64))
            })
            .collect()
    }

    fn author_for(&self, index: usize) -> Result<Author> {
        match self.authors.as_slice() {
            [] => Err(ShuffleError::Configuration("no authors configured".into())),
            [only] => Ok(only.clone()),
            authors => {
                let dist = WeightedIndex::new(authors.iter().map(|a| a.weight)).map_err(|e| {
                    ShuffleError::Configuration(format!("invalid author weights: {e}"))
                })?;
                let mut rng = stream_rng(self.seed, STREAM_AUTHOR, index as u64);
                Ok(authors[dist.sample(&mut rng)].clone())
            }
        }
    }
}

fn stream_rng(seed: u64, stream: u64, index: u64) -> StdRng {
    StdRng::seed_from_u64(seed.wrapping_add(stream << 48).wrapping_add(index))
}

fn floor_to_second(t: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp(t.timestamp(), 0).unwrap_or(t)
}

/// Keep timestamps strictly increasing, at least one second apart, with
/// none later than `end`. Slots that do not fit are pulled earlier.
fn enforce_spacing(mut timestamps: Vec<DateTime<Utc>>, end: DateTime<Utc>) -> Vec<DateTime<Utc>> {
    let second = Duration::seconds(1);
    for i in 1..timestamps.len() {
        let floor = timestamps[i - 1] + second;
        if timestamps[i] < floor {
            timestamps[i] = floor;
        }
    }
    let mut ceiling = end;
    for ts in timestamps.iter_mut().rev() {
        if *ts > ceiling {
            *ts = ceiling;
        }
        ceiling = *ts - second;
    }
    timestamps
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-03-10T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn planner(count: SlotCount, mode: ScheduleMode) -> Planner {
        Planner {
            window: Duration::days(2),
            start_date: None,
            direction: Direction::Forward,
            count,
            mode,
            jitter: None,
            authors: vec![Author::new("A", "a@x.com", 1.0)],
            seed: 42,
        }
    }

    #[test]
    fn even_mode_spaces_uniformly() {
        let p = planner(SlotCount::Total(4), ScheduleMode::Even);
        let slots = p.plan(reference(), 4).unwrap();
        assert_eq!(slots.len(), 4);
        for pair in slots.windows(2) {
            assert_eq!(pair[1].timestamp - pair[0].timestamp, Duration::hours(12));
        }
        assert_eq!(slots[0].timestamp, reference());
    }

    #[test]
    fn backward_even_ends_at_anchor() {
        let mut p = planner(SlotCount::Total(4), ScheduleMode::Even);
        p.direction = Direction::Backward;
        let slots = p.plan(reference(), 4).unwrap();
        assert_eq!(slots[3].timestamp, reference());
        assert_eq!(slots[0].timestamp, reference() - Duration::hours(36));
    }

    #[test]
    fn start_date_overrides_reference() {
        let mut p = planner(SlotCount::Total(2), ScheduleMode::Even);
        let fixed = DateTime::parse_from_rfc3339("2023-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        p.start_date = Some(fixed);
        let slots = p.plan(reference(), 2).unwrap();
        assert_eq!(slots[0].timestamp, fixed);
    }

    #[test]
    fn random_mode_stays_in_window_and_is_ordered() {
        let p = planner(SlotCount::Total(50), ScheduleMode::Random);
        let (start, end) = p.window_bounds(reference()).unwrap();
        let slots = p.plan(reference(), 100).unwrap();
        assert_eq!(slots.len(), 50);
        for pair in slots.windows(2) {
            assert!(pair[1].timestamp > pair[0].timestamp);
        }
        assert!(slots.iter().all(|s| s.timestamp >= start && s.timestamp <= end));
    }

    #[test]
    fn random_mode_is_reproducible() {
        let p = planner(SlotCount::Total(20), ScheduleMode::Random);
        assert_eq!(p.plan(reference(), 20).unwrap(), p.plan(reference(), 20).unwrap());

        let mut other = p.clone();
        other.seed = 43;
        assert_ne!(p.plan(reference(), 20).unwrap(), other.plan(reference(), 20).unwrap());
    }

    #[test]
    fn explicit_jitter_is_honoured() {
        let mut p = planner(SlotCount::Total(10), ScheduleMode::Random);
        p.jitter = Some((Duration::hours(1), Duration::hours(2)));
        let slots = p.plan(reference(), 10).unwrap();
        assert_eq!(slots.len(), 10);
    }

    #[test]
    fn tiny_window_still_one_second_apart() {
        let mut p = planner(SlotCount::Total(10), ScheduleMode::Even);
        p.window = Duration::seconds(3);
        let slots = p.plan(reference(), 10).unwrap();
        for pair in slots.windows(2) {
            assert!(pair[1].timestamp - pair[0].timestamp >= Duration::seconds(1));
        }
    }

    #[test]
    fn crowded_backward_window_never_passes_its_end() {
        let mut p = planner(SlotCount::Total(10), ScheduleMode::Even);
        p.direction = Direction::Backward;
        p.window = Duration::seconds(3);
        let slots = p.plan(reference(), 10).unwrap();
        assert_eq!(slots[9].timestamp, reference());
        assert!(slots.iter().all(|s| s.timestamp <= reference()));
        for pair in slots.windows(2) {
            assert_eq!(pair[1].timestamp - pair[0].timestamp, Duration::seconds(1));
        }
    }

    #[test]
    fn spacing_pulls_overflow_back_inside() {
        let end = reference();
        let bunched = vec![end - Duration::seconds(1), end, end];
        let spaced = enforce_spacing(bunched, end);
        assert_eq!(
            spaced,
            vec![end - Duration::seconds(2), end - Duration::seconds(1), end]
        );
    }

    #[test]
    fn unrepresentable_window_is_a_configuration_error() {
        let mut p = planner(SlotCount::Total(2), ScheduleMode::Even);
        p.window = Duration::days(365 * 300_000);
        assert!(matches!(
            p.plan(reference(), 2),
            Err(ShuffleError::Configuration(_))
        ));
    }

    #[test]
    fn zero_slots_is_empty_plan() {
        let p = planner(SlotCount::PerDay { min: 0, max: 0 }, ScheduleMode::Even);
        assert!(matches!(p.plan(reference(), 3), Err(ShuffleError::EmptyPlan(_))));
    }

    #[test]
    fn zero_files_is_empty_plan() {
        let p = planner(SlotCount::Total(3), ScheduleMode::Even);
        assert!(matches!(p.plan(reference(), 0), Err(ShuffleError::EmptyPlan(_))));
    }

    #[test]
    fn per_day_rate_within_bounds() {
        let p = planner(SlotCount::PerDay { min: 2, max: 4 }, ScheduleMode::Even);
        let n = p.slot_count(100);
        assert!((4..=8).contains(&n), "got {n}");
    }

    #[test]
    fn derived_from_files() {
        let p = planner(SlotCount::FromFiles, ScheduleMode::Even);
        assert_eq!(p.slot_count(3), 1);
        assert_eq!(p.slot_count(23), 4);
    }

    #[test]
    fn weighted_authors_follow_weights() {
        let mut p = planner(SlotCount::Total(400), ScheduleMode::Even);
        p.window = Duration::days(30);
        p.authors = vec![
            Author::new("A", "a@x.com", 0.9),
            Author::new("B", "b@x.com", 0.1),
        ];
        let slots = p.plan(reference(), 400).unwrap();
        let a = slots.iter().filter(|s| s.author.email == "a@x.com").count();
        assert!(a > 300, "expected A to dominate, got {a}");
        assert!(a < 400, "expected some B commits");
    }
}
