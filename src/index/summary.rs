use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::IndexError;

/// Why one file contributed nothing to a build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileFailure {
    pub path: PathBuf,
    /// `io`, `language`, `timeout` or `syntax`.
    pub kind: String,
    pub message: String,
}

impl FileFailure {
    pub fn from_error(path: impl Into<PathBuf>, error: &IndexError) -> Self {
        let kind = match error {
            IndexError::Io { .. } => "io".to_string(),
            IndexError::Parse(parse) => parse.kind.to_string(),
            IndexError::Store(_) => "store".to_string(),
            IndexError::Config(_) => "config".to_string(),
        };
        let message = match error {
            IndexError::Io { source, .. } => source.to_string(),
            IndexError::Parse(parse) => parse.message.clone(),
            other => other.to_string(),
        };
        Self {
            path: path.into(),
            kind,
            message,
        }
    }
}

impl fmt::Display for FileFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]: {}", self.path.display(), self.kind, self.message)
    }
}

/// Statistics for one build run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BuildSummary {
    pub root: PathBuf,
    pub files_seen: usize,
    pub files_indexed: usize,
    pub files_unchanged: usize,
    pub literals_collected: usize,
    /// Literals dropped by the minimum-length filter.
    pub literals_filtered: usize,
    pub records_committed: usize,
    pub bytes_read: u64,
    pub elapsed: Duration,
    pub cancelled: bool,
    pub failures: Vec<FileFailure>,
}

impl BuildSummary {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    pub fn files_failed(&self) -> usize {
        self.failures.len()
    }

    /// Files whose outcome is known; less than `files_seen` after cancellation.
    pub fn files_processed(&self) -> usize {
        self.files_indexed + self.files_unchanged + self.failures.len()
    }

    pub fn files_per_second(&self) -> f64 {
        rate(self.files_processed() as f64, self.elapsed)
    }

    pub fn kilobytes_per_second(&self) -> f64 {
        rate(self.bytes_read as f64 / 1024.0, self.elapsed)
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && !self.cancelled
    }
}

fn rate(amount: f64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 {
        amount / secs
    } else {
        0.0
    }
}
