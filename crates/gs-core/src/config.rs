use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::duration::{parse_duration, parse_jitter, parse_start_date};
use crate::error::{Result, ShuffleError};
use crate::types::Author;

/// Default config file name looked up by the CLI.
pub const DEFAULT_CONFIG_FILE: &str = "gitshuffle.json";

/// Default directory (relative to the repository root) for state and lock.
pub const DEFAULT_STATE_DIR: &str = ".gitshuffle";

/// Longest accepted window (about a century).
pub const MAX_WINDOW_DAYS: i64 = 36_525;

// ---------------------------------------------------------------------------
// Enumerations
// ---------------------------------------------------------------------------

/// How slot timestamps are spread across the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleMode {
    #[default]
    Even,
    /// Bursty: jittered gaps re-normalized to the window.
    Random,
}

/// Which way the window extends from its anchor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Forward,
    Backward,
}

/// How files are distributed across slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkStrategy {
    #[default]
    RoundRobin,
    SizeWeighted,
}

// ---------------------------------------------------------------------------
// Section structs
// ---------------------------------------------------------------------------

/// An author entry as written in the config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorConfig {
    pub name: String,
    pub email: String,
    /// Relative weight; defaults to 1.0 before normalization.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
}

/// Retry policy for a single failing commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Base backoff; doubles after each failed attempt.
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_backoff_ms() -> u64 {
    500
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_ms: default_backoff_ms(),
        }
    }
}

// ---------------------------------------------------------------------------
// ShuffleConfig
// ---------------------------------------------------------------------------

/// Top-level configuration, loaded from `gitshuffle.json` (or a `.toml`
/// file).
///
/// Unknown fields are ignored. `duration` supersedes the legacy
/// `days_active`; an `authors` list supersedes the legacy single-author
/// fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShuffleConfig {
    pub repo_path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub days_active: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub direction: Option<Direction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_commits: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commits_per_day_min: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commits_per_day_max: Option<u32>,
    pub mode: ScheduleMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jitter: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub authors: Vec<AuthorConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author_email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_author: Option<AuthorConfig>,
    pub file_patterns: Vec<String>,
    pub chunking: ChunkStrategy,
    pub retry: RetryConfig,
    pub state_dir: PathBuf,
}

impl Default for ShuffleConfig {
    fn default() -> Self {
        Self {
            repo_path: PathBuf::from("."),
            duration: None,
            days_active: None,
            start_date: None,
            direction: None,
            total_commits: None,
            commits_per_day_min: None,
            commits_per_day_max: None,
            mode: ScheduleMode::default(),
            jitter: None,
            authors: Vec::new(),
            author_name: None,
            author_email: None,
            default_author: None,
            file_patterns: Vec::new(),
            chunking: ChunkStrategy::default(),
            retry: RetryConfig::default(),
            state_dir: PathBuf::from(DEFAULT_STATE_DIR),
        }
    }
}

impl ShuffleConfig {
    /// Load from a specific path. `.toml` files are parsed as TOML, anything
    /// else as JSON. A relative `repo_path` is resolved against the config
    /// file's directory.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            ShuffleError::Configuration(format!("cannot read {}: {e}", path.display()))
        })?;
        let mut cfg = Self::parse(&text, path)?;
        if cfg.repo_path.is_relative() {
            let base = path.parent().unwrap_or_else(|| Path::new("."));
            cfg.repo_path = base.join(&cfg.repo_path);
        }
        cfg.validate()?;
        Ok(cfg)
    }

    fn parse(text: &str, path: &Path) -> Result<Self> {
        let is_toml = path.extension().and_then(|e| e.to_str()) == Some("toml");
        if is_toml {
            toml::from_str(text).map_err(|e| {
                ShuffleError::Configuration(format!("invalid TOML in {}: {e}", path.display()))
            })
        } else {
            serde_json::from_str(text).map_err(|e| {
                ShuffleError::Configuration(format!("invalid JSON in {}: {e}", path.display()))
            })
        }
    }

    /// Serialize to pretty JSON (the format written by `init`).
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Starter configuration written by `gitshuffle init`.
    pub fn template() -> Self {
        Self {
            duration: Some("7d".into()),
            commits_per_day_min: Some(1),
            commits_per_day_max: Some(5),
            authors: vec![
                AuthorConfig {
                    name: "Alice".into(),
                    email: "alice@example.com".into(),
                    weight: Some(0.5),
                },
                AuthorConfig {
                    name: "Bob".into(),
                    email: "bob@example.com".into(),
                    weight: Some(0.5),
                },
            ],
            file_patterns: vec!["**/*.py".into(), "**/*.md".into(), "**/*.txt".into()],
            ..Self::default()
        }
    }

    /// Semantic validation for settings that types alone do not enforce.
    pub fn validate(&self) -> Result<()> {
        self.window_length()?;
        self.start_date()?;
        self.authors()?;
        self.jitter_bounds()?;
        crate::scan::build_globset(&self.file_patterns)?;

        if self.total_commits == Some(0) {
            return Err(ShuffleError::Configuration(
                "total_commits must be at least 1".into(),
            ));
        }
        if let (Some(min), Some(max)) = (self.commits_per_day_min, self.commits_per_day_max) {
            if max < min {
                return Err(ShuffleError::Configuration(format!(
                    "commits_per_day_max ({max}) must be >= commits_per_day_min ({min})"
                )));
            }
        }
        if self.retry.max_attempts == 0 {
            return Err(ShuffleError::Configuration(
                "retry.max_attempts must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Length of the simulated window. `duration` wins over `days_active`.
    pub fn window_length(&self) -> Result<Duration> {
        let span = match (&self.duration, self.days_active) {
            (Some(d), _) => parse_duration(d)?,
            (None, Some(days)) => Duration::try_days(i64::from(days)).ok_or_else(|| {
                ShuffleError::Configuration(format!("days_active {days} is out of range"))
            })?,
            (None, None) => {
                return Err(ShuffleError::Configuration(
                    "one of 'duration' or 'days_active' is required".into(),
                ))
            }
        };
        if span <= Duration::zero() {
            return Err(ShuffleError::Configuration(
                "duration must be greater than zero".into(),
            ));
        }
        if span > Duration::days(MAX_WINDOW_DAYS) {
            return Err(ShuffleError::Configuration(format!(
                "duration must not exceed {MAX_WINDOW_DAYS} days"
            )));
        }
        Ok(span)
    }

    /// Fixed anchor, if configured.
    pub fn start_date(&self) -> Result<Option<DateTime<Utc>>> {
        self.start_date.as_deref().map(parse_start_date).transpose()
    }

    /// Effective direction: explicit, else forward from a start date and
    /// backward from "now".
    pub fn direction(&self) -> Direction {
        self.direction.unwrap_or(if self.start_date.is_some() {
            Direction::Forward
        } else {
            Direction::Backward
        })
    }

    pub fn jitter_bounds(&self) -> Result<Option<(Duration, Duration)>> {
        self.jitter.as_deref().map(parse_jitter).transpose()
    }

    /// Resolve the author list with weights normalized to sum to 1.0.
    pub fn authors(&self) -> Result<Vec<Author>> {
        let raw: Vec<(String, String, f64)> = if !self.authors.is_empty() {
            self.authors
                .iter()
                .map(|a| (a.name.clone(), a.email.clone(), a.weight.unwrap_or(1.0)))
                .collect()
        } else {
            let (name, email) = match (&self.author_name, &self.author_email, &self.default_author)
            {
                (Some(n), Some(e), _) => (n.clone(), e.clone()),
                (_, _, Some(d)) => (d.name.clone(), d.email.clone()),
                _ => {
                    return Err(ShuffleError::Configuration(
                        "provide an 'authors' list or 'author_name'/'author_email' \
                         (or 'default_author')"
                            .into(),
                    ))
                }
            };
            vec![(name, email, 1.0)]
        };

        for (name, email, weight) in &raw {
            if name.trim().is_empty() || email.trim().is_empty() {
                return Err(ShuffleError::Configuration(
                    "every author needs a non-empty name and email".into(),
                ));
            }
            if !weight.is_finite() || *weight <= 0.0 {
                return Err(ShuffleError::Configuration(format!(
                    "author weight for {email} must be > 0 (got {weight})"
                )));
            }
        }

        let total: f64 = raw.iter().map(|(_, _, w)| w).sum();
        Ok(raw
            .into_iter()
            .map(|(name, email, weight)| Author::new(name, email, weight / total))
            .collect())
    }

    /// `<repo>/<state_dir>`.
    pub fn state_dir_path(&self) -> PathBuf {
        if self.state_dir.is_absolute() {
            self.state_dir.clone()
        } else {
            self.repo_path.join(&self.state_dir)
        }
    }
}
