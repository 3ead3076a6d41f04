//! Core data models for the download pipeline.
//!
//! Track descriptors coming out of the catalog, the normalized track key used
//! for deduplication, pending work items handed between phases, tag snapshots
//! and the per-run statistics.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

// ============================================================================
// Constants
// ============================================================================

/// Extension of every file the pipeline produces. Only MP3 is supported.
pub const OUTPUT_EXTENSION: &str = "mp3";

/// Artist written by the verification sweep when a file carries none.
pub const UNKNOWN_ARTIST: &str = "Unknown";

// ============================================================================
// Track Models
// ============================================================================

/// One track as enumerated by the catalog.
///
/// `artists` is the credited artist list already rendered as a single display
/// string ("Artist A, Artist B").
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrackDescriptor {
    pub title: String,
    pub artists: String,
    pub album: String,
    pub track_number: Option<u32>,
    pub year: Option<String>,
}

impl TrackDescriptor {
    pub fn new(title: impl Into<String>, artists: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            artists: artists.into(),
            album: String::new(),
            track_number: None,
            year: None,
        }
    }

    pub fn with_album(mut self, album: impl Into<String>) -> Self {
        self.album = album.into();
        self
    }

    pub fn with_track_number(mut self, track_number: u32) -> Self {
        self.track_number = Some(track_number);
        self
    }

    /// Logical identity of the track.
    pub fn key(&self) -> TrackKey {
        TrackKey::new(&self.title, &self.artists)
    }

    /// Primary search query: `"<title>" "<artists>"`.
    pub fn search_query(&self) -> String {
        format!("\"{}\" \"{}\"", self.title, self.artists)
    }
}

impl fmt::Display for TrackDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.title, self.artists)
    }
}

/// Normalized (title, artist) pair: trimmed and lowercased.
///
/// Two descriptors with equal keys are the same logical track, whatever their
/// album, number or year.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TrackKey {
    title: String,
    artist: String,
}

impl TrackKey {
    pub fn new(title: &str, artist: &str) -> Self {
        Self {
            title: title.trim().to_lowercase(),
            artist: artist.trim().to_lowercase(),
        }
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn artist(&self) -> &str {
        &self.artist
    }
}

impl fmt::Display for TrackKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.title, self.artist)
    }
}

/// A fetched file waiting for tagging and its final name.
/// Produced by phase 1, consumed by phase 3.
#[derive(Clone, Debug)]
pub struct PendingItem {
    pub track: TrackDescriptor,
    pub temp_path: PathBuf,
}

// ============================================================================
// Tag Models
// ============================================================================

/// Snapshot of the tag fields the pipeline cares about.
///
/// `None` means the field is absent from the container. Writers only touch
/// fields that are `Some`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackTags {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub track_number: Option<u32>,
}

impl TrackTags {
    pub fn from_descriptor(track: &TrackDescriptor) -> Self {
        Self {
            title: Some(track.title.clone()),
            artist: Some(track.artists.clone()),
            album: Some(track.album.clone()).filter(|album| !album.is_empty()),
            track_number: track.track_number,
        }
    }

    /// Title if present and not blank.
    pub fn title_str(&self) -> Option<&str> {
        non_blank(self.title.as_deref())
    }

    /// Artist if present and not blank.
    pub fn artist_str(&self) -> Option<&str> {
        non_blank(self.artist.as_deref())
    }

    /// True when both title and artist are set and normalize to `key`.
    pub fn matches(&self, key: &TrackKey) -> bool {
        match (self.title_str(), self.artist_str()) {
            (Some(title), Some(artist)) => TrackKey::new(title, artist) == *key,
            _ => false,
        }
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

// ============================================================================
// Statistics
// ============================================================================

/// Per-run counters, printed at the end of a run and optionally written as
/// JSON with `--stats`.
#[derive(Default, Debug, Clone, Serialize)]
pub struct RunStats {
    // Input
    pub total_tracks: usize,
    pub unique_tracks: usize,

    // Phase 1
    pub fetched: usize,
    pub skipped: usize,
    pub not_found: usize,
    pub download_errors: usize,

    // Phase 2
    pub tagged: usize,
    pub tag_errors: usize,

    // Phase 3
    pub renamed: usize,
    pub rename_failures: usize,
    pub drift_corrections: usize,

    // Phase 4
    pub sweep_checked: usize,
    pub sweep_repaired: usize,
    pub sweep_unreadable: usize,
    pub sweep_deleted: usize,

    // Worker panics caught by the orchestrator
    pub worker_panics: usize,

    pub elapsed_seconds: f64,
}

impl RunStats {
    /// Tracks that ended up with a final file, as a percentage of the
    /// tracks that were not skipped.
    pub fn success_rate(&self) -> f64 {
        let attempted = self.unique_tracks.saturating_sub(self.skipped);
        if attempted == 0 {
            100.0
        } else {
            100.0 * self.renamed as f64 / attempted as f64
        }
    }

    /// Count of items that failed somewhere and need the user's attention.
    pub fn failures(&self) -> usize {
        self.not_found + self.download_errors + self.rename_failures + self.worker_panics
    }

    /// Add another run's counters into this one (used by `update`).
    pub fn absorb(&mut self, other: &RunStats) {
        self.total_tracks += other.total_tracks;
        self.unique_tracks += other.unique_tracks;
        self.fetched += other.fetched;
        self.skipped += other.skipped;
        self.not_found += other.not_found;
        self.download_errors += other.download_errors;
        self.tagged += other.tagged;
        self.tag_errors += other.tag_errors;
        self.renamed += other.renamed;
        self.rename_failures += other.rename_failures;
        self.drift_corrections += other.drift_corrections;
        self.sweep_checked += other.sweep_checked;
        self.sweep_repaired += other.sweep_repaired;
        self.sweep_unreadable += other.sweep_unreadable;
        self.sweep_deleted += other.sweep_deleted;
        self.worker_panics += other.worker_panics;
        self.elapsed_seconds += other.elapsed_seconds;
    }

    /// Dump the counters at debug level.
    pub fn log_phase(&self, phase: &str) {
        if let Ok(json) = serde_json::to_string_pretty(self) {
            tracing::debug!("[STATS:{}]\n{}", phase, json);
        }
    }

    /// Write stats to a JSON file.
    pub fn write_to_file(&self, path: &std::path::Path) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_track_key_normalizes_case_and_whitespace() {
        let a = TrackDescriptor::new("  Hello World ", "ADELE");
        let b = TrackDescriptor::new("hello world", " adele ").with_album("25");
        assert_eq!(a.key(), b.key());
        assert_eq!(a.key().title(), "hello world");
        assert_eq!(a.key().artist(), "adele");
    }

    #[test]
    fn test_track_key_keeps_inner_whitespace() {
        assert_ne!(TrackKey::new("a b", "x"), TrackKey::new("ab", "x"));
    }

    #[test]
    fn test_search_query_quotes_both_parts() {
        let track = TrackDescriptor::new("Song", "A, B");
        assert_eq!(track.search_query(), "\"Song\" \"A, B\"");
    }

    #[test]
    fn test_tags_match_requires_both_fields() {
        let key = TrackKey::new("Song", "Artist");
        let full = TrackTags {
            title: Some(" song".into()),
            artist: Some("ARTIST ".into()),
            ..Default::default()
        };
        assert!(full.matches(&key));

        let no_artist = TrackTags {
            title: Some("Song".into()),
            artist: Some("   ".into()),
            ..Default::default()
        };
        assert!(!no_artist.matches(&key));
    }

    #[test]
    fn test_success_rate_ignores_skipped() {
        let stats = RunStats {
            unique_tracks: 10,
            skipped: 6,
            renamed: 2,
            ..Default::default()
        };
        assert!((stats.success_rate() - 50.0).abs() < f64::EPSILON);

        let all_skipped = RunStats {
            unique_tracks: 3,
            skipped: 3,
            ..Default::default()
        };
        assert!((all_skipped.success_rate() - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_absorb_sums_counters() {
        let mut total = RunStats {
            renamed: 2,
            not_found: 1,
            ..Default::default()
        };
        total.absorb(&RunStats {
            renamed: 3,
            download_errors: 1,
            elapsed_seconds: 1.5,
            ..Default::default()
        });
        assert_eq!(total.renamed, 5);
        assert_eq!(total.failures(), 2);
        assert!((total.elapsed_seconds - 1.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_write_stats_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.json");
        let stats = RunStats {
            fetched: 4,
            ..Default::default()
        };
        stats.write_to_file(&path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["fetched"], 4);
    }
}
