use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Author
// ---------------------------------------------------------------------------

/// A commit identity with its normalized sampling weight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Author {
    pub name: String,
    pub email: String,
    pub weight: f64,
}

impl Author {
    pub fn new(name: impl Into<String>, email: impl Into<String>, weight: f64) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
            weight,
        }
    }

    /// `Name <email>` as git prints it.
    pub fn signature(&self) -> String {
        format!("{} <{}>", self.name, self.email)
    }
}

// ---------------------------------------------------------------------------
// FileSet
// ---------------------------------------------------------------------------

/// One discovered file: repository-relative path (always `/`-separated) and
/// its size in bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub path: String,
    pub size: u64,
}

impl FileEntry {
    pub fn new(path: impl Into<String>, size: u64) -> Self {
        Self {
            path: path.into(),
            size,
        }
    }
}

/// Deduplicated set of files, kept in canonical (lexicographic) path order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileSet {
    entries: BTreeMap<String, u64>,
}

impl FileSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a file. Returns `false` if the path was already present.
    pub fn insert(&mut self, entry: FileEntry) -> bool {
        self.entries.insert(entry.path, entry.size).is_none()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    /// Entries in canonical order.
    pub fn iter(&self) -> impl Iterator<Item = FileEntry> + '_ {
        self.entries
            .iter()
            .map(|(path, size)| FileEntry::new(path.clone(), *size))
    }

    /// Paths in canonical order.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

impl FromIterator<FileEntry> for FileSet {
    fn from_iter<I: IntoIterator<Item = FileEntry>>(iter: I) -> Self {
        let mut set = FileSet::new();
        for entry in iter {
            set.insert(entry);
        }
        set
    }
}

// ---------------------------------------------------------------------------
// ScheduleSlot / CommitSpec
// ---------------------------------------------------------------------------

/// A planned timestamp and author, before files are assigned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleSlot {
    pub index: usize,
    pub timestamp: DateTime<Utc>,
    pub author: Author,
}

/// A slot joined with the files it commits. `files` is never empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitSpec {
    pub index: usize,
    pub timestamp: DateTime<Utc>,
    pub author: Author,
    pub files: Vec<String>,
    pub message: String,
}

impl CommitSpec {
    /// Build the commit message: a count headline followed by up to five
    /// bullet paths.
    pub fn message_for(files: &[String]) -> String {
        let noun = if files.len() == 1 { "file" } else { "files" };
        let mut msg = format!("Update {} {noun}", files.len());
        if !files.is_empty() {
            msg.push_str("\n\n");
            let listed: Vec<String> = files.iter().take(5).map(|f| format!("- {f}")).collect();
            msg.push_str(&listed.join("\n"));
            if files.len() > 5 {
                msg.push_str(&format!("\n...and {} more.", files.len() - 5));
            }
        }
        msg
    }
}
