//! Phase-1 source acquisition.
//!
//! The fetcher turns a track descriptor into a raw MP3 under a random temp
//! name. It owns the dedup checks (in-flight tracker, existing output) and
//! delegates search and download to the backend traits.

use crate::diagnostics::{report, Diagnostic, DiagnosticSink};
use crate::models::{TrackDescriptor, OUTPUT_EXTENSION};
use crate::scanner::is_satisfied;
use crate::tags::TagStore;
use crate::tracker::DuplicateTracker;
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

/// Candidates requested per search query.
pub const DEFAULT_SEARCH_LIMIT: usize = 5;

// ============================================================================
// Errors
// ============================================================================

/// Failure of an external search/fetch program.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: String,
        stderr: String,
    },

    #[error("unexpected backend output: {0}")]
    InvalidOutput(String),
}

#[derive(Debug, Error)]
pub enum FetchError {
    /// Already present in the destination, or another worker owns the track.
    #[error("already present or in progress")]
    Skipped,

    #[error("no source found for {query}")]
    NotFound { query: String },

    #[error("download failed: {0}")]
    Download(String),
}

// ============================================================================
// Backend Traits
// ============================================================================

/// Output audio codec. The pipeline only produces MP3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Codec {
    #[default]
    Mp3,
}

impl Codec {
    pub fn extension(self) -> &'static str {
        match self {
            Codec::Mp3 => OUTPUT_EXTENSION,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Codec::Mp3 => "mp3",
        }
    }
}

/// Text query to candidate locators, best match first.
pub trait SearchBackend: Send + Sync {
    fn search(&self, query: &str, limit: usize) -> Result<Vec<String>, BackendError>;
}

/// Downloads a locator and transcodes it to `<target_stem>.<codec ext>`.
pub trait FetchBackend: Send + Sync {
    fn fetch_and_transcode(
        &self,
        locator: &str,
        target_stem: &Path,
        codec: Codec,
        quality: &str,
    ) -> Result<(), BackendError>;
}

/// Extra queries to try when the primary query yields no locator.
pub trait QueryStrategy: Send + Sync {
    fn fallback_queries(&self, query: &str) -> Vec<String>;
}

/// Retries once with ` lyrics` appended; lyric videos are often the only
/// unblocked upload of a track.
#[derive(Debug, Default, Clone, Copy)]
pub struct LyricsFallback;

impl QueryStrategy for LyricsFallback {
    fn fallback_queries(&self, query: &str) -> Vec<String> {
        vec![format!("{query} lyrics")]
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoFallback;

impl QueryStrategy for NoFallback {
    fn fallback_queries(&self, _query: &str) -> Vec<String> {
        Vec::new()
    }
}

// ============================================================================
// Fetcher
// ============================================================================

/// Everything one phase-1 worker needs, borrowed from the run context.
pub struct SourceFetcher<'a> {
    pub search: &'a dyn SearchBackend,
    pub fetch: &'a dyn FetchBackend,
    pub tags: &'a dyn TagStore,
    pub strategy: &'a dyn QueryStrategy,
    pub tracker: &'a DuplicateTracker,
    pub diagnostics: &'a dyn DiagnosticSink,
    pub quality: &'a str,
    pub search_limit: usize,
}

impl SourceFetcher<'_> {
    /// Fetch one track into a temp file inside `output_dir`.
    ///
    /// On success the track key stays claimed in the tracker; the caller
    /// releases it once the file's final name is settled.
    pub fn fetch(&self, track: &TrackDescriptor, output_dir: &Path) -> Result<PathBuf, FetchError> {
        let key = track.key();
        if self.tracker.contains(&key) || is_satisfied(self.tags, track, output_dir) {
            tracing::info!("Skipping, already exists or in processing: {}", track);
            return Err(FetchError::Skipped);
        }
        if !self.tracker.try_claim(&key) {
            tracing::info!("Skipping, claimed by another worker: {}", track);
            return Err(FetchError::Skipped);
        }

        let query = track.search_query();
        tracing::info!("Searching: {}", query);
        let Some(locator) = self.resolve(&query) else {
            report(self.diagnostics, Diagnostic::NotFound { query: query.clone() });
            self.tracker.release(&key);
            return Err(FetchError::NotFound { query });
        };

        tracing::info!("Downloading from: {}", locator);
        match self.download(&locator, output_dir) {
            Ok(path) => Ok(path),
            Err(reason) => {
                report(
                    self.diagnostics,
                    Diagnostic::DownloadError {
                        track: track.to_string(),
                        reason: reason.clone(),
                    },
                );
                self.tracker.release(&key);
                Err(FetchError::Download(reason))
            }
        }
    }

    /// First non-empty locator from the primary query, then each fallback.
    fn resolve(&self, query: &str) -> Option<String> {
        std::iter::once(query.to_string())
            .chain(self.strategy.fallback_queries(query))
            .find_map(|q| self.first_locator(&q))
    }

    fn first_locator(&self, query: &str) -> Option<String> {
        match self.search.search(query, self.search_limit) {
            Ok(candidates) => candidates.into_iter().find(|c| !c.trim().is_empty()),
            Err(e) => {
                report(
                    self.diagnostics,
                    Diagnostic::SearchError {
                        query: query.to_string(),
                        reason: e.to_string(),
                    },
                );
                None
            }
        }
    }

    fn download(&self, locator: &str, output_dir: &Path) -> Result<PathBuf, String> {
        let codec = Codec::Mp3;
        let stem = output_dir.join(Uuid::new_v4().simple().to_string());
        self.fetch
            .fetch_and_transcode(locator, &stem, codec, self.quality)
            .map_err(|e| e.to_string())?;

        let produced = stem.with_extension(codec.extension());
        if produced.is_file() {
            Ok(produced)
        } else {
            Err(format!("expected output {} was not produced", produced.display()))
        }
    }
}
