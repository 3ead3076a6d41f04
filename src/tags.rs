//! Tag read/write primitives backed by `lofty`, and the phase-2 tag writer.

use crate::diagnostics::{report, Diagnostic, DiagnosticSink};
use crate::models::{TrackDescriptor, TrackTags};
use lofty::config::WriteOptions;
use lofty::file::{AudioFile, TaggedFileExt};
use lofty::prelude::Accessor;
use lofty::read_from_path;
use lofty::tag::{ItemKey, Tag};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TagError {
    /// The tag container could not be opened at all.
    #[error("cannot read tags from {path}: {reason}")]
    Unreadable { path: PathBuf, reason: String },

    #[error("cannot write tags to {path}: {reason}")]
    Write { path: PathBuf, reason: String },
}

/// Access to the title/artist/album/track-number fields of an audio file.
pub trait TagStore: Send + Sync {
    /// A readable container without a tag yields `TrackTags::default()`.
    fn read_tags(&self, path: &Path) -> Result<TrackTags, TagError>;

    /// Set every field that is `Some` in `tags`, leaving the rest untouched.
    fn write_tags(&self, path: &Path, tags: &TrackTags) -> Result<(), TagError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LoftyTagStore;

impl TagStore for LoftyTagStore {
    fn read_tags(&self, path: &Path) -> Result<TrackTags, TagError> {
        let tagged_file = read_from_path(path).map_err(|e| TagError::Unreadable {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let Some(tag) = tagged_file.primary_tag().or_else(|| tagged_file.first_tag()) else {
            return Ok(TrackTags::default());
        };

        Ok(TrackTags {
            title: tag.title().map(|value| value.into_owned()),
            artist: tag.artist().map(|value| value.into_owned()),
            album: tag.album().map(|value| value.into_owned()),
            track_number: tag.track(),
        })
    }

    fn write_tags(&self, path: &Path, tags: &TrackTags) -> Result<(), TagError> {
        let write_err = |reason: String| TagError::Write {
            path: path.to_path_buf(),
            reason,
        };

        let mut tagged_file = read_from_path(path).map_err(|e| TagError::Unreadable {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let tag_type = tagged_file.primary_tag_type();
        if tagged_file.tag(tag_type).is_none() {
            tagged_file.insert_tag(Tag::new(tag_type));
        }
        let tag = tagged_file
            .tag_mut(tag_type)
            .ok_or_else(|| write_err(format!("no writable tag available for {:?}", tag_type)))?;

        if let Some(title) = &tags.title {
            tag.set_title(title.clone());
        }
        if let Some(artist) = &tags.artist {
            tag.set_artist(artist.clone());
        }
        if let Some(album) = &tags.album {
            tag.set_album(album.clone());
        }
        if let Some(number) = tags.track_number {
            tag.remove_key(&ItemKey::TrackNumber);
            tag.insert_text(ItemKey::TrackNumber, number.to_string());
        }

        tagged_file
            .save_to_path(path, WriteOptions::default())
            .map_err(|e| write_err(e.to_string()))
    }
}

/// Write the descriptor's metadata onto a freshly fetched file.
///
/// On failure the file stays where it is so the verification sweep can still
/// give it usable tags.
pub fn tag_track(
    store: &dyn TagStore,
    diagnostics: &dyn DiagnosticSink,
    path: &Path,
    track: &TrackDescriptor,
) -> Result<(), TagError> {
    let tags = TrackTags::from_descriptor(track);
    match store.write_tags(path, &tags) {
        Ok(()) => {
            tracing::debug!("Metadata added for {} ({})", track, path.display());
            Ok(())
        }
        Err(e) => {
            report(
                diagnostics,
                Diagnostic::TagError {
                    track: track.title.clone(),
                    reason: e.to_string(),
                },
            );
            Err(e)
        }
    }
}
