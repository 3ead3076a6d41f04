use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use spotify_dl::catalog::{CatalogError, CatalogResolver, Reference, ReferenceKind, SpotifyCatalog, SpotifyCredentials};
use spotify_dl::config::{PipelineConfig, DEFAULT_CONCURRENCY, DEFAULT_QUALITY};
use spotify_dl::diagnostics::LogFile;
use spotify_dl::models::{RunStats, TrackTags};
use spotify_dl::pipeline::{Backends, Pipeline};
use spotify_dl::progress::{format_duration, set_log_only};
use spotify_dl::safety::{check_tool, prepare_destination};
use spotify_dl::source::{LyricsFallback, NoFallback, QueryStrategy};
use spotify_dl::subscriptions::{Subscription, SubscriptionStore};
use spotify_dl::sweep::UnreadablePolicy;
use spotify_dl::tags::{LoftyTagStore, TagStore};
use spotify_dl::ytdlp::{self, YtDlp};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "spotify-dl")]
#[command(about = "Download Spotify playlists, albums and tracks as tagged MP3 files")]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Download a playlist, album or track
    Download(DownloadArgs),

    /// Re-run every playlist recorded by previous downloads
    Update(UpdateArgs),

    /// Write a track's catalog metadata onto an existing audio file
    Tag(TagArgs),
}

#[derive(Parser, Debug, Clone)]
struct CatalogArgs {
    #[arg(long, env = "SPOTIFY_CLIENT_ID", hide_env_values = true)]
    client_id: Option<String>,

    #[arg(long, env = "SPOTIFY_CLIENT_SECRET", hide_env_values = true)]
    client_secret: Option<String>,
}

#[derive(Parser, Debug, Clone)]
struct RunArgs {
    /// Number of worker threads shared by all phases
    #[arg(long, env = "MAX_THREADS", default_value_t = DEFAULT_CONCURRENCY)]
    workers: usize,

    /// Audio quality: bitrate in kbps, or a VBR level 0-10
    #[arg(long, env = "PREFERRED_QUALITY", default_value = DEFAULT_QUALITY)]
    quality: String,

    /// Delete files whose tags cannot be read instead of only logging them
    #[arg(long)]
    discard_unreadable: bool,

    /// Do not retry unmatched searches with " lyrics" appended
    #[arg(long)]
    no_lyrics_fallback: bool,

    /// Write run statistics as JSON to this path
    #[arg(long)]
    stats: Option<PathBuf>,

    /// Hide progress bars and print periodic progress lines instead
    #[arg(long)]
    log_only: bool,

    /// yt-dlp executable
    #[arg(long, env = "YTDLP_PATH", default_value = ytdlp::DEFAULT_PROGRAM)]
    ytdlp: String,

    /// Subscription file (default: ~/.spotify-dl/data.dat)
    #[arg(long, env = "SPOTIFY_DL_DATA")]
    data_file: Option<PathBuf>,

    #[command(flatten)]
    catalog: CatalogArgs,
}

#[derive(Parser, Debug)]
struct DownloadArgs {
    /// Spotify URL or URI of a playlist, album or track
    reference: String,

    /// Destination directory
    #[arg(default_value = "downloads")]
    dest: PathBuf,

    /// Do not record the playlist for `update`
    #[arg(long)]
    no_subscribe: bool,

    #[command(flatten)]
    run: RunArgs,
}

#[derive(Parser, Debug)]
struct UpdateArgs {
    #[command(flatten)]
    run: RunArgs,
}

#[derive(Parser, Debug)]
struct TagArgs {
    /// Audio file to tag
    file: PathBuf,

    /// Spotify URL or URI of the track
    reference: String,

    #[command(flatten)]
    catalog: CatalogArgs,
}

fn build_catalog(args: &CatalogArgs) -> Result<SpotifyCatalog> {
    let credentials = SpotifyCredentials::new(args.client_id.clone(), args.client_secret.clone())?;
    Ok(SpotifyCatalog::new(credentials)?)
}

fn build_backends(run: &RunArgs) -> Backends {
    let queries: Box<dyn QueryStrategy> = if run.no_lyrics_fallback {
        Box::new(NoFallback)
    } else {
        Box::new(LyricsFallback)
    };
    Backends {
        search: Box::new(YtDlp::new(run.ytdlp.clone())),
        fetch: Box::new(YtDlp::new(run.ytdlp.clone())),
        tags: Box::new(LoftyTagStore),
        queries,
    }
}

fn build_config(run: &RunArgs) -> PipelineConfig {
    let unreadable = if run.discard_unreadable {
        UnreadablePolicy::Delete
    } else {
        UnreadablePolicy::Log
    };
    PipelineConfig::default()
        .with_concurrency(run.workers)
        .with_quality(run.quality.clone())
        .with_unreadable(unreadable)
}

fn subscription_store(run: &RunArgs) -> Result<SubscriptionStore> {
    let path = match &run.data_file {
        Some(path) => path.clone(),
        None => SubscriptionStore::default_path()?,
    };
    Ok(SubscriptionStore::new(path))
}

fn preflight(run: &RunArgs, dest: &Path) -> Result<PathBuf> {
    check_tool("ffmpeg", "-version")?;
    check_tool(&run.ytdlp, "--version")?;
    prepare_destination(dest)?;
    Ok(std::fs::canonicalize(dest).unwrap_or_else(|_| dest.to_path_buf()))
}

fn print_summary(stats: &RunStats, dest: &Path) {
    println!("\n{:=<60}", "");
    println!("Download complete: {}", dest.display());
    println!("  Tracks:        {} ({} unique)", stats.total_tracks, stats.unique_tracks);
    println!("  New files:     {}", stats.renamed);
    println!("  Skipped:       {}", stats.skipped);
    println!("  Not found:     {}", stats.not_found);
    println!("  Failed:        {}", stats.download_errors + stats.rename_failures);
    println!("  Repaired tags: {}", stats.sweep_repaired);
    println!("  Success rate:  {:.1}%", stats.success_rate());
    println!(
        "  Elapsed:       {}",
        format_duration(Duration::from_secs_f64(stats.elapsed_seconds))
    );
    println!("{:=<60}", "");
}

/// Preflight, run the pipeline for one reference, report.
fn download_into(
    catalog: &dyn CatalogResolver,
    reference: &Reference,
    dest: &Path,
    run: &RunArgs,
) -> Result<(RunStats, PathBuf)> {
    let dest = preflight(run, dest)?;
    info!("The songs will be saved in: {}", dest.display());

    let backends = build_backends(run);
    let config = build_config(run);
    let log = LogFile::in_dir(&dest);
    let stats = Pipeline::new(&backends, &config, &log).run_reference(catalog, reference, &dest)?;

    print_summary(&stats, &dest);
    if log.has_content() {
        warn!(
            "Some tracks had problems, see {}. Re-run `spotify-dl update` or the same download to retry them.",
            log.path().display()
        );
    }
    Ok((stats, dest))
}

fn write_stats(run: &RunArgs, stats: &RunStats) -> Result<()> {
    if let Some(path) = &run.stats {
        stats
            .write_to_file(path)
            .with_context(|| format!("Failed to write stats to {}", path.display()))?;
        info!("Stats written to {}", path.display());
    }
    Ok(())
}

fn cmd_download(args: DownloadArgs) -> Result<()> {
    let reference = Reference::parse(&args.reference)?;
    let catalog = build_catalog(&args.run.catalog)?;

    let (stats, dest) = download_into(&catalog, &reference, &args.dest, &args.run)?;

    if reference.kind == ReferenceKind::Playlist && !args.no_subscribe {
        let store = subscription_store(&args.run)?;
        if store.add(&Subscription::new(reference, dest))? {
            info!("Playlist recorded in {} for `update`", store.path().display());
        }
    }
    write_stats(&args.run, &stats)
}

fn cmd_update(args: UpdateArgs) -> Result<()> {
    let store = subscription_store(&args.run)?;
    if !store.path().exists() {
        println!("No playlist has been downloaded yet.");
        return Ok(());
    }
    let entries = store.clean()?;
    if entries.is_empty() {
        println!("No subscribed playlist has an existing destination.");
        return Ok(());
    }

    let catalog = build_catalog(&args.run.catalog)?;
    let mut total = RunStats::default();
    for entry in &entries {
        info!("Updating {} in {}", entry.reference, entry.destination.display());
        match download_into(&catalog, &entry.reference, &entry.destination, &args.run) {
            Ok((stats, _)) => total.absorb(&stats),
            Err(e) => error!("Update of {} failed: {:#}", entry.reference, e),
        }
    }
    write_stats(&args.run, &total)
}

fn cmd_tag(args: TagArgs) -> Result<()> {
    if !args.file.is_file() {
        bail!("File not found: {}", args.file.display());
    }
    let reference = Reference::parse(&args.reference)?;
    if reference.kind != ReferenceKind::Track {
        return Err(CatalogError::WrongKind {
            expected: ReferenceKind::Track,
            actual: reference.kind,
        }
        .into());
    }

    let catalog = build_catalog(&args.catalog)?;
    let track = catalog
        .resolve(&reference)?
        .into_iter()
        .next()
        .with_context(|| format!("No track returned for {}", reference))?;

    LoftyTagStore.write_tags(&args.file, &TrackTags::from_descriptor(&track))?;
    println!("Metadata added to {}: {}", args.file.display(), track);
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.cmd {
        Command::Download(args) => {
            set_log_only(args.run.log_only);
            cmd_download(args)
        }
        Command::Update(args) => {
            set_log_only(args.run.log_only);
            cmd_update(args)
        }
        Command::Tag(args) => cmd_tag(args),
    }
}
