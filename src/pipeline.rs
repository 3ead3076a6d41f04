//! Four-phase download pipeline.
//!
//! One rayon pool per run is shared by every phase. A phase spawns one task
//! per item inside a `scope`, so the end of the scope is the barrier before
//! the next phase. Workers send outcomes over a channel; a panicking worker
//! is counted and logged without taking the run down.

use crate::catalog::{CatalogResolver, Reference};
use crate::config::PipelineConfig;
use crate::diagnostics::DiagnosticSink;
use crate::models::{PendingItem, RunStats, TrackDescriptor};
use crate::namer::{finalize_track, ConsistencyOutcome, Namer};
use crate::progress::{format_duration, PhaseProgress};
use crate::source::{FetchBackend, FetchError, QueryStrategy, SearchBackend, SourceFetcher};
use crate::sweep::verify_directory;
use crate::tags::{tag_track, TagStore};
use crate::tracker::{ClaimGuard, DuplicateTracker};
use anyhow::{Context, Result};
use crossbeam_channel::unbounded;
use rayon::{ThreadPool, ThreadPoolBuilder};
use rustc_hash::FxHashSet;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::time::Instant;

// ============================================================================
// Wiring
// ============================================================================

/// The external collaborators a run talks to.
pub struct Backends {
    pub search: Box<dyn SearchBackend>,
    pub fetch: Box<dyn FetchBackend>,
    pub tags: Box<dyn TagStore>,
    pub queries: Box<dyn QueryStrategy>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    ExtractingReferences,
    Deduplicating,
    Phase1Fetch,
    Phase2Tag,
    Phase3Rename,
    Phase4Verify,
    Done,
}

impl PipelineState {
    pub fn label(self) -> &'static str {
        match self {
            PipelineState::ExtractingReferences => "Extracting references",
            PipelineState::Deduplicating => "Deduplicating",
            PipelineState::Phase1Fetch => "Phase 1: Fetching",
            PipelineState::Phase2Tag => "Phase 2: Tagging",
            PipelineState::Phase3Rename => "Phase 3: Renaming",
            PipelineState::Phase4Verify => "Phase 4: Verifying",
            PipelineState::Done => "Done",
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Keep the first descriptor per track key, preserving order.
pub fn dedup_tracks(tracks: Vec<TrackDescriptor>) -> Vec<TrackDescriptor> {
    let mut seen = FxHashSet::default();
    tracks
        .into_iter()
        .filter(|track| seen.insert(track.key()))
        .collect()
}

/// Per-run shared state, borrowed by every worker.
struct RunContext<'a> {
    backends: &'a Backends,
    config: &'a PipelineConfig,
    diagnostics: &'a dyn DiagnosticSink,
    tracker: DuplicateTracker,
    namer: Namer,
}

impl RunContext<'_> {
    fn fetcher(&self) -> SourceFetcher<'_> {
        SourceFetcher {
            search: self.backends.search.as_ref(),
            fetch: self.backends.fetch.as_ref(),
            tags: self.backends.tags.as_ref(),
            strategy: self.backends.queries.as_ref(),
            tracker: &self.tracker,
            diagnostics: self.diagnostics,
            quality: &self.config.quality,
            search_limit: self.config.search_limit,
        }
    }
}

/// Run `work` on every item in the pool and collect outcomes in completion
/// order. Returns the outcomes and the number of workers that panicked.
fn run_phase<I, R, F>(pool: &ThreadPool, progress: &PhaseProgress, items: Vec<I>, work: F) -> (Vec<R>, usize)
where
    I: Send,
    R: Send,
    F: Fn(I) -> R + Sync,
{
    let (tx, rx) = unbounded();
    pool.scope(|s| {
        for item in items {
            let tx = tx.clone();
            let work = &work;
            s.spawn(move |_| {
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| work(item)));
                progress.tick();
                let _ = tx.send(outcome.ok());
            });
        }
    });
    drop(tx);

    let mut results = Vec::new();
    let mut panics = 0;
    for outcome in rx {
        match outcome {
            Some(result) => results.push(result),
            None => {
                panics += 1;
                tracing::error!("A worker panicked; its item was abandoned");
            }
        }
    }
    (results, panics)
}

// ============================================================================
// Pipeline
// ============================================================================

pub struct Pipeline<'a> {
    backends: &'a Backends,
    config: &'a PipelineConfig,
    diagnostics: &'a dyn DiagnosticSink,
}

impl<'a> Pipeline<'a> {
    pub fn new(backends: &'a Backends, config: &'a PipelineConfig, diagnostics: &'a dyn DiagnosticSink) -> Self {
        Self {
            backends,
            config,
            diagnostics,
        }
    }

    /// Resolve `reference` through the catalog, then run the four phases.
    pub fn run_reference(
        &self,
        catalog: &dyn CatalogResolver,
        reference: &Reference,
        output_dir: &Path,
    ) -> Result<RunStats> {
        tracing::info!("{}: {}", PipelineState::ExtractingReferences, reference);
        let tracks = catalog
            .resolve(reference)
            .with_context(|| format!("Failed to resolve {}", reference))?;
        self.run(tracks, output_dir)
    }

    /// Download `tracks` into `output_dir`. Per-item failures end up in the
    /// diagnostics and the returned stats; only setup errors fail the run.
    pub fn run(&self, tracks: Vec<TrackDescriptor>, output_dir: &Path) -> Result<RunStats> {
        let start = Instant::now();
        std::fs::create_dir_all(output_dir)
            .with_context(|| format!("Failed to create {}", output_dir.display()))?;

        let pool = ThreadPoolBuilder::new()
            .num_threads(self.config.concurrency.max(1))
            .build()
            .context("Failed to build worker pool")?;

        let mut stats = RunStats {
            total_tracks: tracks.len(),
            ..Default::default()
        };

        tracing::debug!("{}", PipelineState::Deduplicating);
        let tracks = dedup_tracks(tracks);
        stats.unique_tracks = tracks.len();
        tracing::info!(
            "{} tracks ({} unique), saving to {}",
            stats.total_tracks,
            stats.unique_tracks,
            output_dir.display()
        );

        let ctx = RunContext {
            backends: self.backends,
            config: self.config,
            diagnostics: self.diagnostics,
            tracker: DuplicateTracker::new(),
            namer: Namer::new(self.config.retry.clone()),
        };

        let pending = Self::fetch_phase(&pool, &ctx, tracks, output_dir, &mut stats);
        stats.log_phase("fetch");
        Self::tag_phase(&pool, &ctx, &pending, &mut stats);
        stats.log_phase("tag");
        Self::rename_phase(&pool, &ctx, pending, output_dir, &mut stats);
        stats.log_phase("rename");
        self.verify_phase(output_dir, &mut stats);

        stats.elapsed_seconds = start.elapsed().as_secs_f64();
        tracing::info!(
            "{}: {} new files in {}",
            PipelineState::Done,
            stats.renamed,
            format_duration(start.elapsed())
        );
        Ok(stats)
    }

    fn fetch_phase(
        pool: &ThreadPool,
        ctx: &RunContext<'_>,
        tracks: Vec<TrackDescriptor>,
        output_dir: &Path,
        stats: &mut RunStats,
    ) -> Vec<PendingItem> {
        let progress = PhaseProgress::start(PipelineState::Phase1Fetch.label(), tracks.len());
        let fetcher = ctx.fetcher();
        let (outcomes, panics) = run_phase(pool, &progress, tracks, |track| {
            let result = fetcher.fetch(&track, output_dir);
            (track, result)
        });
        stats.worker_panics += panics;

        let mut pending = Vec::new();
        for (track, result) in outcomes {
            match result {
                Ok(temp_path) => {
                    tracing::info!("Downloaded: {} - Temp file: {}", track.title, temp_path.display());
                    stats.fetched += 1;
                    pending.push(PendingItem { track, temp_path });
                }
                Err(FetchError::Skipped) => stats.skipped += 1,
                Err(FetchError::NotFound { .. }) => stats.not_found += 1,
                Err(FetchError::Download(_)) => stats.download_errors += 1,
            }
        }
        progress.finish(format!(
            "{}: {} downloaded, {} skipped, {} failed",
            PipelineState::Phase1Fetch,
            stats.fetched,
            stats.skipped,
            stats.not_found + stats.download_errors
        ));
        pending
    }

    fn tag_phase(pool: &ThreadPool, ctx: &RunContext<'_>, pending: &[PendingItem], stats: &mut RunStats) {
        let progress = PhaseProgress::start(PipelineState::Phase2Tag.label(), pending.len());
        let store = ctx.backends.tags.as_ref();
        let items: Vec<&PendingItem> = pending.iter().collect();
        let (outcomes, panics) = run_phase(pool, &progress, items, |item| {
            tag_track(store, ctx.diagnostics, &item.temp_path, &item.track).is_ok()
        });
        stats.worker_panics += panics;
        let tagged = outcomes.iter().filter(|ok| **ok).count();
        stats.tagged += tagged;
        stats.tag_errors += outcomes.len() - tagged;
        progress.finish(format!(
            "{}: {} tagged, {} errors",
            PipelineState::Phase2Tag,
            stats.tagged,
            stats.tag_errors
        ));
    }

    fn rename_phase(
        pool: &ThreadPool,
        ctx: &RunContext<'_>,
        pending: Vec<PendingItem>,
        output_dir: &Path,
        stats: &mut RunStats,
    ) {
        let progress = PhaseProgress::start(PipelineState::Phase3Rename.label(), pending.len());
        let store = ctx.backends.tags.as_ref();
        let (outcomes, panics) = run_phase(pool, &progress, pending, |item| {
            // The key is released whatever the outcome, panics included.
            let _claim = ClaimGuard::new(&ctx.tracker, item.track.key());
            finalize_track(&ctx.namer, store, ctx.diagnostics, &item.temp_path, &item.track, output_dir)
        });
        stats.worker_panics += panics;

        for outcome in outcomes {
            match outcome {
                Ok((_, ConsistencyOutcome::Renamed { .. })) => {
                    stats.renamed += 1;
                    stats.drift_corrections += 1;
                }
                Ok(_) => stats.renamed += 1,
                Err(_) => stats.rename_failures += 1,
            }
        }
        progress.finish(format!(
            "{}: {} named, {} failed",
            PipelineState::Phase3Rename,
            stats.renamed,
            stats.rename_failures
        ));
    }

    fn verify_phase(&self, output_dir: &Path, stats: &mut RunStats) {
        tracing::info!("{}", PipelineState::Phase4Verify);
        match verify_directory(
            output_dir,
            self.backends.tags.as_ref(),
            self.config.unreadable,
            self.diagnostics,
        ) {
            Ok(report) => {
                stats.sweep_checked = report.checked;
                stats.sweep_repaired = report.repaired;
                stats.sweep_unreadable = report.unreadable;
                stats.sweep_deleted = report.deleted;
            }
            Err(e) => tracing::error!("Verification sweep failed for {}: {}", output_dir.display(), e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ReferenceKind;
    use crate::retry::RetryPolicy;
    use crate::scanner::output_files;
    use crate::source::LyricsFallback;
    use crate::testing::{FakeFetch, JsonTagStore, MemorySink, ScriptedSearch, StaticCatalog};
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::tempdir;

    /// Shares one `FakeFetch` between the pipeline and the test body.
    struct SharedFetch(Arc<FakeFetch>);

    impl FetchBackend for SharedFetch {
        fn fetch_and_transcode(
            &self,
            locator: &str,
            target_stem: &Path,
            codec: crate::source::Codec,
            quality: &str,
        ) -> Result<(), crate::source::BackendError> {
            self.0.fetch_and_transcode(locator, target_stem, codec, quality)
        }
    }

    fn backends(search: ScriptedSearch, fetch: Arc<FakeFetch>) -> Backends {
        Backends {
            search: Box::new(search),
            fetch: Box::new(SharedFetch(fetch)),
            tags: Box::new(JsonTagStore::default()),
            queries: Box::new(LyricsFallback),
        }
    }

    fn config() -> PipelineConfig {
        PipelineConfig::default().with_retry(RetryPolicy::new(5, Duration::ZERO))
    }

    fn three_tracks() -> Vec<TrackDescriptor> {
        vec![
            TrackDescriptor::new("First", "Artist").with_album("Album").with_track_number(1),
            TrackDescriptor::new("Second", "Artist").with_album("Album").with_track_number(2),
            TrackDescriptor::new(" second ", "ARTIST").with_album("Other"),
        ]
    }

    #[test]
    fn test_dedup_keeps_first_in_order() {
        let tracks = vec![
            TrackDescriptor::new("B", "x").with_album("first"),
            TrackDescriptor::new("A", "x"),
            TrackDescriptor::new(" b ", "X").with_album("second"),
            TrackDescriptor::new("C", "x"),
        ];
        let unique = dedup_tracks(tracks);
        let titles: Vec<&str> = unique.iter().map(|t| t.title.as_str()).collect();
        assert_eq!(titles, vec!["B", "A", "C"]);
        assert_eq!(unique[0].album, "first");
    }

    #[test]
    fn test_end_to_end_dedups_and_tags() {
        let dir = tempdir().unwrap();
        let fetch = Arc::new(FakeFetch::default());
        let backends = backends(ScriptedSearch::always("https://video/1"), fetch.clone());
        let config = config();
        let sink = MemorySink::default();

        let stats = Pipeline::new(&backends, &config, &sink)
            .run(three_tracks(), dir.path())
            .unwrap();

        assert_eq!(stats.total_tracks, 3);
        assert_eq!(stats.unique_tracks, 2);
        assert_eq!(stats.fetched, 2);
        assert_eq!(stats.renamed, 2);
        assert_eq!(fetch.calls(), 2);
        assert_eq!(sink.count("NOT FOUND"), 0);
        assert_eq!(sink.count("DOWNLOAD ERROR"), 0);

        let files = output_files(dir.path()).unwrap();
        let names: Vec<String> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["First.mp3".to_string(), "Second.mp3".to_string()]);

        let tags = backends.tags.read_tags(&dir.path().join("Second.mp3")).unwrap();
        assert_eq!(tags.title.as_deref(), Some("Second"));
        assert_eq!(tags.artist.as_deref(), Some("Artist"));
        assert_eq!(tags.album.as_deref(), Some("Album"));
        assert_eq!(tags.track_number, Some(2));
    }

    #[test]
    fn test_second_run_is_idempotent() {
        let dir = tempdir().unwrap();
        let fetch = Arc::new(FakeFetch::default());
        let backends = backends(ScriptedSearch::always("https://video/1"), fetch.clone());
        let config = config();
        let sink = MemorySink::default();
        let pipeline = Pipeline::new(&backends, &config, &sink);

        pipeline.run(three_tracks(), dir.path()).unwrap();
        let before = output_files(dir.path()).unwrap();

        let stats = pipeline.run(three_tracks(), dir.path()).unwrap();

        assert_eq!(stats.skipped, 2);
        assert_eq!(stats.fetched, 0);
        assert_eq!(fetch.calls(), 2);
        assert_eq!(output_files(dir.path()).unwrap(), before);
    }

    #[test]
    fn test_title_without_safe_characters_is_found_again() {
        let dir = tempdir().unwrap();
        let fetch = Arc::new(FakeFetch::default());
        let backends = backends(ScriptedSearch::always("https://video/1"), fetch.clone());
        let config = config();
        let sink = MemorySink::default();
        let pipeline = Pipeline::new(&backends, &config, &sink);
        let tracks = || vec![TrackDescriptor::new("?", "Artist")];

        let first = pipeline.run(tracks(), dir.path()).unwrap();
        assert_eq!(first.fetched, 1);
        assert_eq!(first.sweep_checked, 1);

        let second = pipeline.run(tracks(), dir.path()).unwrap();
        assert_eq!(second.skipped, 1);
        assert_eq!(second.fetched, 0);
        assert_eq!(fetch.calls(), 1);

        let files = output_files(dir.path()).unwrap();
        assert_eq!(files, vec![dir.path().join("Unknown Track.mp3")]);
    }

    #[test]
    fn test_not_found_does_not_abort_run() {
        let dir = tempdir().unwrap();
        let fetch = Arc::new(FakeFetch::default());
        let search = ScriptedSearch::default().with("\"Found\" \"Artist\"", &["https://video/9"]);
        let backends = backends(search, fetch.clone());
        let config = config();
        let sink = MemorySink::default();

        let stats = Pipeline::new(&backends, &config, &sink)
            .run(
                vec![
                    TrackDescriptor::new("Missing", "Artist"),
                    TrackDescriptor::new("Found", "Artist"),
                ],
                dir.path(),
            )
            .unwrap();

        assert_eq!(stats.not_found, 1);
        assert_eq!(stats.renamed, 1);
        assert_eq!(stats.failures(), 1);
        assert_eq!(sink.count("NOT FOUND"), 1);
        assert!(dir.path().join("Found.mp3").exists());
    }

    #[test]
    fn test_same_title_different_artists_collide_cleanly() {
        let dir = tempdir().unwrap();
        let fetch = Arc::new(FakeFetch::default());
        let backends = backends(ScriptedSearch::always("https://video/1"), fetch);
        let config = config().with_concurrency(3);
        let sink = MemorySink::default();

        let stats = Pipeline::new(&backends, &config, &sink)
            .run(
                vec![
                    TrackDescriptor::new("Intro", "A"),
                    TrackDescriptor::new("Intro", "B"),
                    TrackDescriptor::new("Intro", "C"),
                ],
                dir.path(),
            )
            .unwrap();

        assert_eq!(stats.renamed, 3);
        assert_eq!(output_files(dir.path()).unwrap().len(), 3);
        assert!(dir.path().join("Intro.mp3").exists());
        // Whichever file did not get "Intro.mp3" keeps its collision name:
        // the title tag "Intro" points at a taken name, so no drift rename.
        assert_eq!(stats.drift_corrections, 0);
    }

    #[test]
    fn test_run_reference_resolves_through_catalog() {
        let dir = tempdir().unwrap();
        let fetch = Arc::new(FakeFetch::default());
        let backends = backends(ScriptedSearch::always("https://video/1"), fetch);
        let config = config();
        let sink = MemorySink::default();
        let catalog = StaticCatalog {
            tracks: vec![TrackDescriptor::new("Only", "One")],
        };
        let reference = Reference::new(ReferenceKind::Track, "abc123");

        let stats = Pipeline::new(&backends, &config, &sink)
            .run_reference(&catalog, &reference, &dir.path().join("nested"))
            .unwrap();

        assert_eq!(stats.renamed, 1);
        assert!(dir.path().join("nested").join("Only.mp3").exists());
    }

    #[test]
    fn test_state_labels() {
        assert_eq!(PipelineState::Phase1Fetch.to_string(), "Phase 1: Fetching");
        assert_eq!(PipelineState::Phase4Verify.to_string(), "Phase 4: Verifying");
    }
}
