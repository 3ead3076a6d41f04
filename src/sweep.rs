//! Phase 4: final verification sweep over the destination directory.

use crate::diagnostics::{report, Diagnostic, DiagnosticSink};
use crate::models::{TrackTags, UNKNOWN_ARTIST};
use crate::scanner::output_files;
use crate::tags::{TagError, TagStore};
use serde::Serialize;
use std::io;
use std::path::Path;

/// What to do with a file whose tag container cannot be opened.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UnreadablePolicy {
    /// Record the file in the diagnostics and leave it alone.
    #[default]
    Log,
    /// Remove the file and record that it was removed.
    Delete,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub checked: usize,
    pub repaired: usize,
    pub unreadable: usize,
    pub deleted: usize,
}

/// Fields to fill in so the file carries a title and an artist, or `None`
/// when nothing is missing.
fn missing_fields(tags: &TrackTags, stem: &str) -> Option<TrackTags> {
    let mut patch = TrackTags::default();
    if tags.title_str().is_none() {
        patch.title = Some(stem.to_string());
    }
    if tags.artist_str().is_none() {
        patch.artist = Some(UNKNOWN_ARTIST.to_string());
    }
    (patch.title.is_some() || patch.artist.is_some()).then_some(patch)
}

/// Give every output file in `dir` a non-empty title and artist.
///
/// Runs single-threaded after the worker phases. Each file is saved at most
/// once. Only listing the directory can fail the sweep.
pub fn verify_directory(
    dir: &Path,
    store: &dyn TagStore,
    policy: UnreadablePolicy,
    diagnostics: &dyn DiagnosticSink,
) -> io::Result<SweepReport> {
    let mut summary = SweepReport::default();

    for path in output_files(dir)? {
        summary.checked += 1;
        let tags = match store.read_tags(&path) {
            Ok(tags) => tags,
            Err(TagError::Unreadable { reason, .. }) => {
                summary.unreadable += 1;
                handle_unreadable(&path, reason, policy, diagnostics, &mut summary);
                continue;
            }
            Err(e) => {
                report(
                    diagnostics,
                    Diagnostic::Sweep {
                        path: path.clone(),
                        reason: e.to_string(),
                    },
                );
                continue;
            }
        };

        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let Some(patch) = missing_fields(&tags, &stem) else {
            continue;
        };

        match store.write_tags(&path, &patch) {
            Ok(()) => {
                summary.repaired += 1;
                tracing::info!("Metadata repaired for {}", path.display());
            }
            Err(e) => report(
                diagnostics,
                Diagnostic::Sweep {
                    path: path.clone(),
                    reason: e.to_string(),
                },
            ),
        }
    }

    Ok(summary)
}

fn handle_unreadable(
    path: &Path,
    reason: String,
    policy: UnreadablePolicy,
    diagnostics: &dyn DiagnosticSink,
    summary: &mut SweepReport,
) {
    match policy {
        UnreadablePolicy::Log => report(
            diagnostics,
            Diagnostic::Sweep {
                path: path.to_path_buf(),
                reason,
            },
        ),
        UnreadablePolicy::Delete => match std::fs::remove_file(path) {
            Ok(()) => {
                summary.deleted += 1;
                report(
                    diagnostics,
                    Diagnostic::Discarded {
                        path: path.to_path_buf(),
                    },
                );
            }
            Err(e) => report(
                diagnostics,
                Diagnostic::Sweep {
                    path: path.to_path_buf(),
                    reason: format!("{reason}; removal failed: {e}"),
                },
            ),
        },
    }
}
