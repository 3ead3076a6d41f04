//! Final naming of fetched files.
//!
//! Several workers rename into the same directory at once. The existence
//! check and the rename happen under one mutex, so two workers can never pick
//! the same free name. Transient "file in use" errors are retried through the
//! configured [`RetryPolicy`].

use crate::diagnostics::{report, Diagnostic, DiagnosticSink};
use crate::models::{TrackDescriptor, OUTPUT_EXTENSION};
use crate::retry::{is_transient_lock, RetryError, RetryPolicy};
use crate::sanitize::sanitize;
use crate::tags::{TagError, TagStore};
use std::io;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RenameError {
    /// The file stayed locked for every attempt. The temp file is left in place.
    #[error("{path} still in use after {attempts} attempts")]
    Exhausted { path: PathBuf, attempts: u32 },

    #[error("renaming {path} failed: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Result of the post-rename consistency check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsistencyOutcome {
    /// File name already matches the stored title.
    Consistent(PathBuf),
    /// File was renamed to match the stored title.
    Renamed { from: PathBuf, to: PathBuf },
    /// Name differs from the title but the wanted name is taken; kept as is.
    Drifted { path: PathBuf, wanted: PathBuf },
}

impl ConsistencyOutcome {
    /// Where the file lives after the check.
    pub fn path(&self) -> &Path {
        match self {
            ConsistencyOutcome::Consistent(path) => path,
            ConsistencyOutcome::Renamed { to, .. } => to,
            ConsistencyOutcome::Drifted { path, .. } => path,
        }
    }
}

/// Stem used when a title sanitizes to nothing.
pub const UNTITLED_STEM: &str = "Unknown Track";

fn output_path(dir: &Path, stem: &str) -> PathBuf {
    dir.join(format!("{stem}.{OUTPUT_EXTENSION}"))
}

/// Sanitized file stem for a title, never empty. An empty stem would give the
/// hidden file `.mp3`, which has no extension and is invisible to the scanner.
pub fn title_stem(title: &str) -> String {
    let stem = sanitize(title);
    if stem.is_empty() {
        UNTITLED_STEM.to_string()
    } else {
        stem
    }
}

/// File move used by the namer.
pub type RenameFn = dyn Fn(&Path, &Path) -> io::Result<()> + Send + Sync;

/// Owns the "no two files share a final name" invariant for one run.
pub struct Namer {
    lock: Mutex<()>,
    retry: RetryPolicy,
    rename: Box<RenameFn>,
}

impl fmt::Debug for Namer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Namer").field("retry", &self.retry).finish_non_exhaustive()
    }
}

impl Namer {
    pub fn new(retry: RetryPolicy) -> Self {
        Self {
            lock: Mutex::new(()),
            retry,
            rename: Box::new(|from: &Path, to: &Path| std::fs::rename(from, to)),
        }
    }

    /// Replace the file move, e.g. to simulate a file held open elsewhere.
    pub fn with_rename<F>(mut self, rename: F) -> Self
    where
        F: Fn(&Path, &Path) -> io::Result<()> + Send + Sync + 'static,
    {
        self.rename = Box::new(rename);
        self
    }

    fn guard(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move `temp_path` to its canonical name in `dir`.
    ///
    /// Tries `<title>.mp3`, then `<title> - <artists>.mp3`, then
    /// `<title>-1.mp3`, `<title>-2.mp3`, ... The lock is released between
    /// retry attempts.
    pub fn finalize_name(
        &self,
        temp_path: &Path,
        track: &TrackDescriptor,
        dir: &Path,
    ) -> Result<PathBuf, RenameError> {
        let result = self.retry.run(
            |attempt| {
                let _guard = self.guard();
                let target = Self::free_target(track, dir);
                match (self.rename)(temp_path, &target) {
                    Ok(()) => Ok(target),
                    Err(e) => {
                        if is_transient_lock(&e) {
                            tracing::warn!(
                                "File in use, retrying rename for {} (attempt {}/{})",
                                target.display(),
                                attempt,
                                self.retry.max_attempts
                            );
                        }
                        Err(e)
                    }
                }
            },
            is_transient_lock,
        );

        match result {
            Ok(target) => Ok(target),
            Err(RetryError::Exhausted { attempts, .. }) => Err(RenameError::Exhausted {
                path: temp_path.to_path_buf(),
                attempts,
            }),
            Err(RetryError::Fatal(source)) => Err(RenameError::Io {
                path: temp_path.to_path_buf(),
                source,
            }),
        }
    }

    /// First free candidate name. Caller must hold the lock.
    fn free_target(track: &TrackDescriptor, dir: &Path) -> PathBuf {
        let stem = title_stem(&track.title);
        let primary = output_path(dir, &stem);
        if !primary.exists() {
            return primary;
        }

        let with_artist = output_path(dir, &sanitize(&format!("{} - {}", stem, track.artists)));
        if !with_artist.exists() {
            return with_artist;
        }

        // Numbered names reuse the sanitized stem as is.
        (1u64..)
            .map(|n| output_path(dir, &format!("{stem}-{n}")))
            .find(|candidate| !candidate.exists())
            .unwrap_or(primary)
    }

    /// Re-read the title tag of a renamed file and move it to the sanitized
    /// title when the two disagree.
    ///
    /// Cosmetic only: a taken target keeps the current name.
    pub fn check_consistency(
        &self,
        store: &dyn TagStore,
        path: &Path,
        track: &TrackDescriptor,
        dir: &Path,
    ) -> Result<ConsistencyOutcome, ConsistencyError> {
        let tags = store.read_tags(path)?;
        let wanted_stem = title_stem(tags.title_str().unwrap_or(&track.title));
        let current_stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();

        if wanted_stem == current_stem {
            return Ok(ConsistencyOutcome::Consistent(path.to_path_buf()));
        }

        let _guard = self.guard();
        let wanted = output_path(dir, &wanted_stem);
        if wanted.exists() {
            tracing::info!(
                "Post-rename target already exists: {}. Keeping {}",
                wanted.display(),
                path.display()
            );
            return Ok(ConsistencyOutcome::Drifted {
                path: path.to_path_buf(),
                wanted,
            });
        }

        (self.rename)(path, &wanted)?;
        tracing::info!("File renamed post-download to: {}", wanted.display());
        Ok(ConsistencyOutcome::Renamed {
            from: path.to_path_buf(),
            to: wanted,
        })
    }
}

impl Default for Namer {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

#[derive(Debug, Error)]
pub enum ConsistencyError {
    #[error(transparent)]
    Tags(#[from] TagError),
    #[error("rename failed: {0}")]
    Io(#[from] io::Error),
}

/// Phase-3 work for one item: final name, then the consistency check.
///
/// Returns the path the file ends up at, or the rename error. A failing
/// consistency check is reported but does not fail the item.
pub fn finalize_track(
    namer: &Namer,
    store: &dyn TagStore,
    diagnostics: &dyn DiagnosticSink,
    temp_path: &Path,
    track: &TrackDescriptor,
    dir: &Path,
) -> Result<(PathBuf, ConsistencyOutcome), RenameError> {
    let final_path = match namer.finalize_name(temp_path, track, dir) {
        Ok(path) => path,
        Err(e) => {
            report(
                diagnostics,
                Diagnostic::RenameFailed {
                    track: track.title.clone(),
                    reason: e.to_string(),
                },
            );
            return Err(e);
        }
    };

    let outcome = match namer.check_consistency(store, &final_path, track, dir) {
        Ok(outcome) => outcome,
        Err(e) => {
            report(
                diagnostics,
                Diagnostic::ConsistencyCheck {
                    track: track.title.clone(),
                    reason: e.to_string(),
                },
            );
            ConsistencyOutcome::Consistent(final_path.clone())
        }
    };
    tracing::info!("File for {} renamed to: {}", track.title, outcome.path().display());
    Ok((final_path, outcome))
}
