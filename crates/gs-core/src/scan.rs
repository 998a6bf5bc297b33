//! SafeScan: turn a raw recursive listing into the [`FileSet`] a plan may
//! touch.
//!
//! Three rules, applied per path:
//!
//! 1. A directory whose name is on the deny-list (VCS metadata, dependency
//!    and build output, caches) or starts with `.` prunes its whole subtree.
//! 2. Symbolic links are excluded and never followed, and so is anything
//!    that sits beneath one.
//! 3. What remains must match at least one configured glob. With no patterns
//!    configured, everything matches.
//!
//! [`SafeScan::filter`] is pure over a listing; [`SafeScan::scan`] produces
//! the listing with `ignore::WalkBuilder`, pruning denied directories while
//! walking so they are never descended into.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use globset::{Glob, GlobSet, GlobSetBuilder};
use tracing::{debug, warn};

use crate::error::{Result, ShuffleError};
use crate::types::{FileEntry, FileSet};

/// Directory names that are never traversed.
pub const DENY_LIST: &[&str] = &[
    ".git",
    "node_modules",
    "dist",
    "build",
    ".next",
    "vendor",
    "__pycache__",
    ".venv",
    "env",
    "venv",
    "target",
];

/// Paths longer than this get a portability warning.
const LONG_PATH_WARN: usize = 250;

// ---------------------------------------------------------------------------
// Raw listing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Dir,
    Symlink,
}

/// One entry of a raw listing. `path` is relative to the scan root and
/// `/`-separated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEntry {
    pub path: String,
    pub kind: EntryKind,
    pub size: u64,
}

impl RawEntry {
    pub fn file(path: impl Into<String>, size: u64) -> Self {
        Self {
            path: path.into(),
            kind: EntryKind::File,
            size,
        }
    }

    pub fn dir(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind: EntryKind::Dir,
            size: 0,
        }
    }

    pub fn symlink(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind: EntryKind::Symlink,
            size: 0,
        }
    }
}

/// Compile glob patterns. `None` when no patterns are configured.
pub fn build_globset(patterns: &[String]) -> Result<Option<GlobSet>> {
    if patterns.is_empty() {
        return Ok(None);
    }
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|e| {
            ShuffleError::Configuration(format!("invalid file pattern '{pattern}': {e}"))
        })?;
        builder.add(glob);
    }
    let set = builder
        .build()
        .map_err(|e| ShuffleError::Configuration(format!("invalid file patterns: {e}")))?;
    Ok(Some(set))
}

// ---------------------------------------------------------------------------
// SafeScan
// ---------------------------------------------------------------------------

pub struct SafeScan {
    globs: Option<GlobSet>,
    extra_denied: Vec<String>,
}

impl SafeScan {
    pub fn new(patterns: &[String]) -> Result<Self> {
        Ok(Self {
            globs: build_globset(patterns)?,
            extra_denied: Vec::new(),
        })
    }

    /// Also prune directories with this name (e.g. the state directory).
    pub fn deny_dir(mut self, name: impl Into<String>) -> Self {
        self.extra_denied.push(name.into());
        self
    }

    fn is_denied_dir(&self, name: &str) -> bool {
        name.starts_with('.')
            || DENY_LIST.contains(&name)
            || self.extra_denied.iter().any(|d| d == name)
    }

    fn matches(&self, path: &str) -> bool {
        match &self.globs {
            None => true,
            Some(globs) => {
                let file_name = path.rsplit('/').next().unwrap_or(path);
                globs.is_match(path) || globs.is_match(file_name)
            }
        }
    }

    /// Filter a raw listing into a [`FileSet`].
    pub fn filter(&self, listing: impl IntoIterator<Item = RawEntry>) -> Result<FileSet> {
        let listing: Vec<RawEntry> = listing.into_iter().collect();
        let symlinks: HashSet<&str> = listing
            .iter()
            .filter(|e| e.kind == EntryKind::Symlink)
            .map(|e| e.path.as_str())
            .collect();

        let mut files = FileSet::new();
        for entry in &listing {
            if entry.kind != EntryKind::File {
                continue;
            }
            let path = normalize(&entry.path);
            if path.is_empty() {
                continue;
            }
            let segments: Vec<&str> = path.split('/').collect();
            let dirs = &segments[..segments.len() - 1];
            if dirs.iter().any(|d| self.is_denied_dir(d)) {
                continue;
            }
            let under_symlink = (1..segments.len())
                .map(|n| segments[..n].join("/"))
                .any(|ancestor| symlinks.contains(ancestor.as_str()));
            if under_symlink {
                debug!(path = %path, "skipping path beneath a symlink");
                continue;
            }
            if !self.matches(&path) {
                continue;
            }
            files.insert(FileEntry::new(path, entry.size));
        }

        if files.is_empty() && self.globs.is_some() {
            return Err(ShuffleError::Configuration(
                "file patterns matched no files (check file_patterns for typos)".into(),
            ));
        }
        warn_portability(&files);
        Ok(files)
    }

    /// Walk `root` and filter the result.
    pub fn scan(&self, root: &Path) -> Result<FileSet> {
        let listing = self.walk(root)?;
        self.filter(listing)
    }

    /// Produce the raw listing for `root`, never following links and never
    /// entering denied directories.
    pub fn walk(&self, root: &Path) -> Result<Vec<RawEntry>> {
        // Surface permission problems on the root instead of an empty scan.
        std::fs::read_dir(root).map_err(|e| {
            ShuffleError::Configuration(format!("cannot read {}: {e}", root.display()))
        })?;

        let denied: Vec<String> = DENY_LIST
            .iter()
            .map(|s| s.to_string())
            .chain(self.extra_denied.iter().cloned())
            .collect();

        let mut builder = ignore::WalkBuilder::new(root);
        builder
            .standard_filters(false)
            .follow_links(false)
            .filter_entry(move |entry| {
                let is_dir = entry.file_type().map(|ft| ft.is_dir()).unwrap_or(false);
                if !is_dir || entry.depth() == 0 {
                    return true;
                }
                let name = entry.file_name().to_string_lossy();
                !(name.starts_with('.') || denied.iter().any(|d| d.as_str() == name.as_ref()))
            });

        let mut listing = Vec::new();
        let mut discovery_errors: u64 = 0;
        for result in builder.build() {
            let entry = match result {
                Ok(e) => e,
                Err(e) => {
                    discovery_errors += 1;
                    debug!(error = %e, "walk error");
                    continue;
                }
            };
            if entry.depth() == 0 {
                continue;
            }
            let rel = match entry.path().strip_prefix(root) {
                Ok(rel) => rel,
                Err(_) => continue,
            };
            // A lossy conversion would plan a path that does not exist on disk.
            let rel = match rel
                .components()
                .map(|c| c.as_os_str().to_str())
                .collect::<Option<Vec<_>>>()
            {
                Some(parts) => parts.join("/"),
                None => {
                    warn!(path = %entry.path().display(), "skipping path that is not valid UTF-8");
                    continue;
                }
            };

            let kind = if entry.path_is_symlink() {
                EntryKind::Symlink
            } else if entry.file_type().map(|ft| ft.is_dir()).unwrap_or(false) {
                EntryKind::Dir
            } else {
                EntryKind::File
            };
            let size = match kind {
                EntryKind::File => entry.metadata().map(|m| m.len()).unwrap_or(0),
                _ => 0,
            };
            listing.push(RawEntry {
                path: rel,
                kind,
                size,
            });
        }

        if discovery_errors > 0 {
            warn!(discovery_errors, root = %root.display(), "some entries could not be read during scan");
        }
        Ok(listing)
    }
}

fn normalize(path: &str) -> String {
    let path = path.replace('\\', "/");
    path.split('/')
        .filter(|s| !s.is_empty() && *s != ".")
        .collect::<Vec<_>>()
        .join("/")
}

/// Warn about paths that will misbehave on other platforms.
fn warn_portability(files: &FileSet) {
    let long: Vec<&str> = files.paths().filter(|p| p.len() > LONG_PATH_WARN).collect();
    if !long.is_empty() {
        warn!(
            count = long.len(),
            example = long[0],
            "paths longer than {LONG_PATH_WARN} characters may fail on Windows"
        );
    }

    let mut seen: HashMap<String, &str> = HashMap::new();
    let mut collisions = 0usize;
    for path in files.paths() {
        if let Some(first) = seen.insert(path.to_lowercase(), path) {
            collisions += 1;
            if collisions <= 3 {
                warn!(first, second = path, "case-insensitive path collision");
            }
        }
    }
    if collisions > 3 {
        warn!(collisions, "case-insensitive path collisions detected");
    }
}
