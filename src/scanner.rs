//! Existing-output scanner: decides by tags, not file names, whether a track
//! is already present in the destination directory.

use crate::models::{TrackDescriptor, OUTPUT_EXTENSION};
use crate::tags::TagStore;
use std::io;
use std::path::{Path, PathBuf};

/// True when `path` carries the output extension (case-insensitive).
pub fn has_output_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case(OUTPUT_EXTENSION))
        .unwrap_or(false)
}

/// Regular files in `dir` with the output extension, sorted by path.
pub fn output_files(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type().map(|t| t.is_file()).unwrap_or(false) && has_output_extension(&path)
        {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// True when some output file in `dir` is tagged with this track's key.
///
/// Unreadable files and files missing title or artist never match. A missing
/// or unlistable directory means "not satisfied".
pub fn is_satisfied(store: &dyn TagStore, track: &TrackDescriptor, dir: &Path) -> bool {
    let files = match output_files(dir) {
        Ok(files) => files,
        Err(e) => {
            tracing::debug!("Cannot list {}: {}", dir.display(), e);
            return false;
        }
    };

    let key = track.key();
    files.iter().any(|file| match store.read_tags(file) {
        Ok(tags) => tags.matches(&key),
        Err(_) => false,
    })
}
