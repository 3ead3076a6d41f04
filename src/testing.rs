//! In-crate test doubles for the backend traits.
//!
//! `JsonTagStore` keeps tags as JSON inside the file itself, so tags travel
//! with the file through renames the same way ID3 frames do.

use crate::catalog::{CatalogError, CatalogResolver, Reference};
use crate::diagnostics::{Diagnostic, DiagnosticSink};
use crate::models::{TrackDescriptor, TrackTags};
use crate::source::{BackendError, Codec, FetchBackend, SearchBackend};
use crate::tags::{TagError, TagStore};
use rustc_hash::FxHashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

// ============================================================================
// Tags
// ============================================================================

/// Empty file = readable container without tags; non-JSON = unreadable.
#[derive(Debug, Default)]
pub struct JsonTagStore {
    writes: Mutex<Vec<PathBuf>>,
}

impl JsonTagStore {
    /// Number of saves performed on `path`.
    pub fn writes_for(&self, path: &Path) -> usize {
        self.writes
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.as_path() == path)
            .count()
    }
}

impl TagStore for JsonTagStore {
    fn read_tags(&self, path: &Path) -> Result<TrackTags, TagError> {
        let unreadable = |reason: String| TagError::Unreadable {
            path: path.to_path_buf(),
            reason,
        };
        let content = std::fs::read_to_string(path).map_err(|e| unreadable(e.to_string()))?;
        if content.trim().is_empty() {
            return Ok(TrackTags::default());
        }
        serde_json::from_str(&content).map_err(|e| unreadable(e.to_string()))
    }

    fn write_tags(&self, path: &Path, tags: &TrackTags) -> Result<(), TagError> {
        let mut merged = self.read_tags(path)?;
        if tags.title.is_some() {
            merged.title = tags.title.clone();
        }
        if tags.artist.is_some() {
            merged.artist = tags.artist.clone();
        }
        if tags.album.is_some() {
            merged.album = tags.album.clone();
        }
        if tags.track_number.is_some() {
            merged.track_number = tags.track_number;
        }

        let json = serde_json::to_string(&merged).map_err(|e| TagError::Write {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        std::fs::write(path, json).map_err(|e| TagError::Write {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        self.writes.lock().unwrap().push(path.to_path_buf());
        Ok(())
    }
}

// ============================================================================
// Diagnostics
// ============================================================================

#[derive(Debug, Default)]
pub struct MemorySink {
    entries: Mutex<Vec<Diagnostic>>,
}

impl MemorySink {
    pub fn all(&self) -> Vec<Diagnostic> {
        self.entries.lock().unwrap().clone()
    }

    pub fn count(&self, kind: &str) -> usize {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .filter(|d| d.kind() == kind)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().unwrap().is_empty()
    }
}

impl DiagnosticSink for MemorySink {
    fn append(&self, diagnostic: &Diagnostic) {
        self.entries.lock().unwrap().push(diagnostic.clone());
    }
}

// ============================================================================
// Search / Fetch
// ============================================================================

/// Answers from a query table; `fallback` answers every unknown query.
#[derive(Debug, Default)]
pub struct ScriptedSearch {
    answers: FxHashMap<String, Vec<String>>,
    fallback: Option<Vec<String>>,
    fail: bool,
    queries: Mutex<Vec<String>>,
}

impl ScriptedSearch {
    pub fn always(locator: &str) -> Self {
        Self {
            fallback: Some(vec![locator.to_string()]),
            ..Default::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn with(mut self, query: &str, locators: &[&str]) -> Self {
        self.answers.insert(
            query.to_string(),
            locators.iter().map(|l| l.to_string()).collect(),
        );
        self
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

impl SearchBackend for ScriptedSearch {
    fn search(&self, query: &str, limit: usize) -> Result<Vec<String>, BackendError> {
        self.queries.lock().unwrap().push(query.to_string());
        if self.fail {
            return Err(BackendError::InvalidOutput("scripted failure".into()));
        }
        let answer = self
            .answers
            .get(query)
            .or(self.fallback.as_ref())
            .cloned()
            .unwrap_or_default();
        Ok(answer.into_iter().take(limit).collect())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum FetchMode {
    #[default]
    Write,
    Silent,
    Fail,
}

/// Writes an empty `<stem>.mp3` per call and counts calls.
#[derive(Debug, Default)]
pub struct FakeFetch {
    mode: FetchMode,
    delay: Duration,
    calls: AtomicUsize,
    locators: Mutex<Vec<String>>,
}

impl FakeFetch {
    /// Succeeds without producing a file.
    pub fn silent() -> Self {
        Self {
            mode: FetchMode::Silent,
            ..Default::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            mode: FetchMode::Fail,
            ..Default::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn locators(&self) -> Vec<String> {
        self.locators.lock().unwrap().clone()
    }
}

impl FetchBackend for FakeFetch {
    fn fetch_and_transcode(
        &self,
        locator: &str,
        target_stem: &Path,
        codec: Codec,
        _quality: &str,
    ) -> Result<(), BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.locators.lock().unwrap().push(locator.to_string());
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        match self.mode {
            FetchMode::Write => {
                std::fs::write(target_stem.with_extension(codec.extension()), "").map_err(|e| {
                    BackendError::Spawn {
                        program: "fake".into(),
                        source: e,
                    }
                })
            }
            FetchMode::Silent => Ok(()),
            FetchMode::Fail => Err(BackendError::Failed {
                program: "fake".into(),
                status: "exit status: 1".into(),
                stderr: "ERROR: unavailable".into(),
            }),
        }
    }
}

// ============================================================================
// Catalog
// ============================================================================

/// Returns the same track list for every reference.
#[derive(Debug, Default)]
pub struct StaticCatalog {
    pub tracks: Vec<TrackDescriptor>,
}

impl CatalogResolver for StaticCatalog {
    fn resolve(&self, _reference: &Reference) -> Result<Vec<TrackDescriptor>, CatalogError> {
        Ok(self.tracks.clone())
    }
}
