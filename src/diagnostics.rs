//! Diagnostics that outlive the run.
//!
//! Everything that went wrong for a specific track is logged through
//! `tracing` and also appended to `log.txt` in the destination directory, so
//! the user can inspect failures after the progress output is gone.

use chrono::Local;
use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

/// Name of the diagnostics file inside the destination directory.
pub const LOG_FILE_NAME: &str = "log.txt";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Diagnostic {
    /// The search backend itself failed for a query.
    SearchError { query: String, reason: String },
    /// No source matched the track after every query attempt.
    NotFound { query: String },
    /// The fetch backend failed or produced no file.
    DownloadError { track: String, reason: String },
    /// Tags could not be written in phase 2.
    TagError { track: String, reason: String },
    /// The rename kept failing or hit a fatal OS error.
    RenameFailed { track: String, reason: String },
    /// The post-rename consistency check could not run.
    ConsistencyCheck { track: String, reason: String },
    /// The verification sweep found a file it could not read or repair.
    Sweep { path: PathBuf, reason: String },
    /// The verification sweep removed an unreadable file.
    Discarded { path: PathBuf },
}

impl Diagnostic {
    /// Short stable label, used as line prefix.
    pub fn kind(&self) -> &'static str {
        match self {
            Diagnostic::SearchError { .. } => "SEARCH ERROR",
            Diagnostic::NotFound { .. } => "NOT FOUND",
            Diagnostic::DownloadError { .. } => "DOWNLOAD ERROR",
            Diagnostic::TagError { .. } => "TAG ERROR",
            Diagnostic::RenameFailed { .. } => "RENAME FAILED",
            Diagnostic::ConsistencyCheck { .. } => "CONSISTENCY",
            Diagnostic::Sweep { .. } => "VERIFY",
            Diagnostic::Discarded { .. } => "DISCARDED",
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] ", self.kind())?;
        match self {
            Diagnostic::SearchError { query, reason } => {
                write!(f, "Search failed for query '{}': {}", query, reason)
            }
            Diagnostic::NotFound { query } => write!(f, "Not found: {}", query),
            Diagnostic::DownloadError { track, reason } => {
                write!(f, "Download error for {}: {}", track, reason)
            }
            Diagnostic::TagError { track, reason } => {
                write!(f, "Error adding metadata for {}: {}", track, reason)
            }
            Diagnostic::RenameFailed { track, reason } => {
                write!(f, "Error renaming file for {}: {}", track, reason)
            }
            Diagnostic::ConsistencyCheck { track, reason } => {
                write!(f, "Post-rename check failed for {}: {}", track, reason)
            }
            Diagnostic::Sweep { path, reason } => {
                write!(f, "Error processing file {}: {}", path.display(), reason)
            }
            Diagnostic::Discarded { path } => {
                write!(f, "Removed file with unreadable tags: {}", path.display())
            }
        }
    }
}

/// Destination for diagnostics. Implementations must tolerate concurrent
/// appends from pipeline workers.
pub trait DiagnosticSink: Send + Sync {
    fn append(&self, diagnostic: &Diagnostic);
}

/// Log a diagnostic and hand it to the sink.
pub fn report(sink: &dyn DiagnosticSink, diagnostic: Diagnostic) {
    tracing::warn!("{}", diagnostic);
    sink.append(&diagnostic);
}

/// Appends timestamped lines to `<dir>/log.txt`.
#[derive(Debug)]
pub struct LogFile {
    path: PathBuf,
    lock: Mutex<()>,
}

impl LogFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join(LOG_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True when the log exists and holds at least one non-blank line.
    pub fn has_content(&self) -> bool {
        std::fs::read_to_string(&self.path)
            .map(|content| content.lines().any(|line| !line.trim().is_empty()))
            .unwrap_or(false)
    }

    fn write_line(&self, line: &str) -> std::io::Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "[{}] {}", Local::now().format("%Y-%m-%d %H:%M:%S"), line)
    }
}

impl DiagnosticSink for LogFile {
    fn append(&self, diagnostic: &Diagnostic) {
        if let Err(e) = self.write_line(&diagnostic.to_string()) {
            tracing::error!("Cannot write to {}: {}", self.path.display(), e);
        }
    }
}
