//! Registry of track keys currently in flight within one run.
//!
//! A key is claimed when a worker starts fetching a track and released once
//! that track's naming outcome is final. The set lives only for the run; the
//! existing-output scanner handles dedup across runs.

use crate::models::TrackKey;
use rustc_hash::FxHashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
pub struct DuplicateTracker {
    in_flight: Mutex<FxHashSet<TrackKey>>,
}

impl DuplicateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn keys(&self) -> MutexGuard<'_, FxHashSet<TrackKey>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn contains(&self, key: &TrackKey) -> bool {
        self.keys().contains(key)
    }

    /// Atomically insert `key`. Returns false when another worker holds it.
    pub fn try_claim(&self, key: &TrackKey) -> bool {
        self.keys().insert(key.clone())
    }

    /// Returns false when the key was not held.
    pub fn release(&self, key: &TrackKey) -> bool {
        self.keys().remove(key)
    }

    pub fn len(&self) -> usize {
        self.keys().len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys().is_empty()
    }
}

/// Releases a claimed key when dropped, including on unwind.
pub struct ClaimGuard<'a> {
    tracker: &'a DuplicateTracker,
    key: TrackKey,
}

impl<'a> ClaimGuard<'a> {
    pub fn new(tracker: &'a DuplicateTracker, key: TrackKey) -> Self {
        Self { tracker, key }
    }
}

impl Drop for ClaimGuard<'_> {
    fn drop(&mut self) {
        self.tracker.release(&self.key);
    }
}
