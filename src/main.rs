//! vidsift - find near-duplicate videos with perceptual fingerprints.
//!
//! Usage:
//!   vidsift scan [ROOTS]...   Fingerprint new and changed videos
//!   vidsift cluster           Group stored fingerprints into duplicates
//!   vidsift run [ROOTS]...    Scan, then cluster
//!   vidsift groups            Show duplicate groups from the last clustering
//!   vidsift --help            Show help

mod config;
mod logging;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use color_eyre::eyre::{Context, Result, bail};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use vidsift_analyze::{ClusterStats, DuplicateBucket, ReconcileStats};
use vidsift_core::{HashKind, PipelineError, VideoDescriptor};
use vidsift_media::FfmpegTool;
use vidsift_pipeline::{ClusterReport, DiscoveryReport, Pipeline, PipelineEvent, run_clustering};
use vidsift_store::{SqliteStore, StoreCounts, StoredGroup};

use crate::config::AppConfig;

#[derive(Parser)]
#[command(
    name = "vidsift",
    version,
    about = "Find near-duplicate videos",
    long_about = "vidsift fingerprints the videos under one or more directories, stores \
                  the fingerprints in a local database, and groups videos whose \
                  fingerprints are close enough to be the same footage.\n\n\
                  Run `vidsift run [ROOTS]...` to scan and cluster in one go."
)]
struct Cli {
    /// Configuration file (defaults to <config dir>/vidsift/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Database file, overriding the configuration
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// More logging (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Discover videos and fingerprint the new and changed ones
    Scan {
        #[command(flatten)]
        scan: ScanArgs,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Group every stored fingerprint into duplicate buckets
    Cluster {
        #[command(flatten)]
        cluster: ClusterArgs,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Scan, then cluster
    Run {
        #[command(flatten)]
        scan: ScanArgs,

        #[command(flatten)]
        cluster: ClusterArgs,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Show the duplicate groups recorded by the last clustering
    Groups {
        #[command(flatten)]
        output: OutputArgs,
    },
}

#[derive(Args)]
struct ScanArgs {
    /// Directories to scan
    #[arg(default_value = ".")]
    roots: Vec<PathBuf>,

    /// Fingerprint mode
    #[arg(short, long)]
    mode: Option<ModeArg>,

    /// Number of fingerprint workers
    #[arg(short, long)]
    workers: Option<usize>,

    /// Rows per database transaction
    #[arg(long)]
    batch_size: Option<usize>,

    /// Glob patterns to skip (repeatable)
    #[arg(short, long = "ignore")]
    ignore: Vec<String>,

    /// Include hidden files and directories
    #[arg(long)]
    include_hidden: bool,

    /// Follow symbolic links
    #[arg(short = 'L', long)]
    follow_symlinks: bool,

    /// Maximum directory depth
    #[arg(short = 'd', long)]
    max_depth: Option<u32>,

    /// Number of concurrent ffprobe calls
    #[arg(long)]
    probe_threads: Option<usize>,

    /// Hide the progress bar
    #[arg(long)]
    no_progress: bool,
}

#[derive(Args)]
struct ClusterArgs {
    /// Largest duration difference in seconds between duplicates
    #[arg(long)]
    max_duration_diff: Option<f64>,

    /// Largest symbol distance between duplicate hashes
    #[arg(long)]
    max_distance: Option<usize>,
}

#[derive(Args)]
struct OutputArgs {
    /// Maximum number of groups to show
    #[arg(short = 'n', long, default_value = "20")]
    top: usize,

    /// Output format
    #[arg(short, long, default_value = "text")]
    format: OutputFormat,
}

#[derive(Clone, Copy, Default, ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    /// One hash over a collage of frames
    Fast,
    /// One hash per second of footage
    Slow,
}

impl From<ModeArg> for HashKind {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Fast => HashKind::Fast,
            ModeArg::Slow => HashKind::Slow,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    logging::init(cli.verbose, cli.quiet);

    let mut config = AppConfig::load(cli.config.as_deref())?;
    if let Some(db) = cli.db {
        config.database = db;
    }

    match cli.command {
        Command::Scan { scan, output } => {
            apply_scan_args(&mut config, &scan);
            let report = discover(&config, scan.roots, scan.no_progress).await?;
            print_discovery(&report, output.format)?;
        }
        Command::Cluster { cluster, output } => {
            apply_cluster_args(&mut config, &cluster);
            let report = cluster_store(&config).await?;
            print_clusters(&report, &output)?;
        }
        Command::Run {
            scan,
            cluster,
            output,
        } => {
            apply_scan_args(&mut config, &scan);
            apply_cluster_args(&mut config, &cluster);
            let discovery = discover(&config, scan.roots, scan.no_progress).await?;
            let clusters = cluster_store(&config).await?;
            if let OutputFormat::Text = output.format {
                print_discovery(&discovery, output.format)?;
                print_clusters(&clusters, &output)?;
            } else {
                let summary = RunSummary {
                    discovery: DiscoverySummary::from(&discovery),
                    clusters: ClusterSummary::new(&clusters, output.top),
                };
                println!("{}", serde_json::to_string_pretty(&summary)?);
            }
        }
        Command::Groups { output } => {
            let store = open_store(&config.database)?;
            let counts = store.counts()?;
            let groups = store.duplicate_groups()?;
            print_groups(&groups, counts, &output)?;
        }
    }

    Ok(())
}

fn apply_scan_args(config: &mut AppConfig, args: &ScanArgs) {
    if let Some(mode) = args.mode {
        config.fingerprint.kind = mode.into();
    }
    if let Some(workers) = args.workers {
        config.orchestrator.workers = workers.max(1);
    }
    if let Some(batch_size) = args.batch_size {
        config.orchestrator.batch_size = batch_size.max(1);
    }
    if let Some(probe_threads) = args.probe_threads {
        config.scan.probe_threads = probe_threads;
    }
    if args.max_depth.is_some() {
        config.scan.max_depth = args.max_depth;
    }
    config.scan.ignore_patterns.extend(args.ignore.iter().cloned());
    config.scan.include_hidden |= args.include_hidden;
    config.scan.follow_symlinks |= args.follow_symlinks;
}

fn apply_cluster_args(config: &mut AppConfig, args: &ClusterArgs) {
    if let Some(diff) = args.max_duration_diff {
        config.cluster.max_duration_diff = diff;
    }
    if let Some(distance) = args.max_distance {
        config.cluster.max_hash_distance = distance;
    }
}

/// Open the database, creating its directory on first use.
fn open_store(path: &Path) -> Result<SqliteStore> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .wrap_err_with(|| format!("Failed to create {}", parent.display()))?;
    }
    SqliteStore::open(path).wrap_err_with(|| format!("Failed to open database {}", path.display()))
}

/// Cancel `token` on the first Ctrl-C.
fn cancel_on_interrupt(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, letting queued writes finish");
            token.cancel();
        }
    });
}

async fn discover(
    config: &AppConfig,
    roots: Vec<PathBuf>,
    no_progress: bool,
) -> Result<DiscoveryReport> {
    let mut canonical = Vec::with_capacity(roots.len());
    for root in roots {
        canonical.push(
            root.canonicalize()
                .wrap_err_with(|| format!("Invalid path {}", root.display()))?,
        );
    }
    eprintln!("Scanning {}...", display_roots(&canonical));
    let scan = config.scan.to_scan_config(canonical)?;
    let store = Arc::new(Mutex::new(open_store(&config.database)?));

    let cancel = CancellationToken::new();
    cancel_on_interrupt(cancel.clone());

    let tool = FfmpegTool::new(config.ffmpeg.clone()).with_cancellation(cancel.clone());
    let pipeline = Pipeline::new(scan, tool.clone(), tool)
        .with_fingerprint_config(config.fingerprint.clone())
        .with_orchestrator_config(config.orchestrator.clone())
        .with_cluster_config(config.cluster.clone())
        .with_cancellation(cancel);

    let bar = progress_bar(no_progress);
    let mut events = pipeline.start_discovery(store);

    let mut outcome = None;
    while let Some(event) = events.recv().await {
        match event {
            PipelineEvent::Scanning(update) => {
                bar.set_message(format!(
                    "found {} videos ({})",
                    update.videos_found,
                    format_size(update.bytes_found)
                ));
            }
            PipelineEvent::Progress(update) => {
                bar.set_length(update.total);
                bar.set_position(update.completed);
                if let Some(name) = update.current_path.as_deref().and_then(Path::file_name) {
                    bar.set_message(name.to_string_lossy().into_owned());
                }
            }
            PipelineEvent::Complete(result) => {
                outcome = Some(result);
                break;
            }
        }
    }
    bar.finish_and_clear();

    match outcome {
        Some(Ok(report)) => Ok(report),
        Some(Err(PipelineError::Cancelled)) => {
            bail!("Interrupted; fingerprints already queued were saved")
        }
        Some(Err(err)) => Err(err).wrap_err("Discovery failed"),
        None => bail!("Discovery task stopped without a result"),
    }
}

async fn cluster_store(config: &AppConfig) -> Result<ClusterReport> {
    let path = config.database.clone();
    let cluster = config.cluster.clone();
    eprintln!("Clustering fingerprints...");

    let (buckets, stats) = tokio::task::spawn_blocking(move || -> Result<_> {
        let mut store = open_store(&path)?;
        Ok(run_clustering(&mut store, &cluster)?)
    })
    .await
    .wrap_err("Clustering task failed")??;
    info!(buckets = buckets.len(), "Duplicate buckets recomputed");

    Ok(ClusterReport { buckets, stats })
}

fn progress_bar(hidden: bool) -> ProgressBar {
    if hidden {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(0);
    if let Ok(style) =
        ProgressStyle::with_template("[{elapsed_precise}] ▕{bar:40.blue}▏{pos}/{len} {wide_msg}")
    {
        bar.set_style(style.progress_chars("█▓▒░  "));
    }
    bar
}

fn display_roots(roots: &[PathBuf]) -> String {
    roots
        .iter()
        .map(|r| r.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Serialize)]
struct RunSummary {
    discovery: DiscoverySummary,
    clusters: ClusterSummary,
}

#[derive(Serialize)]
struct DiscoverySummary {
    videos: u64,
    total_size: u64,
    directories: u64,
    files_seen: u64,
    warnings: usize,
    probed: u64,
    corrupted: u64,
    reconcile: ReconcileStats,
    groups: u64,
    fingerprinted: u64,
    reused: u64,
    degenerate: u64,
    failed: u64,
    cancelled: u64,
    persisted_rows: u64,
    dropped_rows: u64,
    elapsed_secs: f64,
}

impl From<&DiscoveryReport> for DiscoverySummary {
    fn from(report: &DiscoveryReport) -> Self {
        Self {
            videos: report.scan.videos,
            total_size: report.scan.total_size,
            directories: report.scan.dirs,
            files_seen: report.scan.files_seen,
            warnings: report.warnings.len(),
            probed: report.probe.probed,
            corrupted: report.probe.corrupted,
            reconcile: report.reconcile.clone(),
            groups: report.fingerprint.groups,
            fingerprinted: report.fingerprint.fingerprinted,
            reused: report.fingerprint.reused,
            degenerate: report.fingerprint.degenerate,
            failed: report.fingerprint.failed,
            cancelled: report.fingerprint.cancelled,
            persisted_rows: report.fingerprint.writer.persisted_rows,
            dropped_rows: report.fingerprint.writer.dropped_rows,
            elapsed_secs: report.elapsed.as_secs_f64(),
        }
    }
}

#[derive(Serialize)]
struct ClusterSummary {
    stats: ClusterStats,
    group_count: usize,
    groups: Vec<GroupSummary>,
}

impl ClusterSummary {
    fn new(report: &ClusterReport, top: usize) -> Self {
        Self {
            stats: report.stats.clone(),
            group_count: report.buckets.len(),
            groups: largest_first(&report.buckets)
                .into_iter()
                .take(top)
                .map(GroupSummary::from_bucket)
                .collect(),
        }
    }
}

#[derive(Serialize)]
struct GroupSummary {
    bucket: i64,
    total_size: u64,
    videos: Vec<VideoSummary>,
}

impl GroupSummary {
    fn from_bucket(bucket: &DuplicateBucket) -> Self {
        Self {
            bucket: bucket.id,
            total_size: bucket.total_size(),
            videos: bucket.videos.iter().map(VideoSummary::from).collect(),
        }
    }

    fn from_stored(group: &StoredGroup) -> Self {
        Self {
            bucket: group.bucket,
            total_size: group.videos.iter().map(|v| v.size).sum(),
            videos: group.videos.iter().map(VideoSummary::from).collect(),
        }
    }
}

#[derive(Serialize)]
struct VideoSummary {
    path: PathBuf,
    size: u64,
    duration: Option<f64>,
    resolution: Option<String>,
    codec: Option<String>,
}

impl From<&VideoDescriptor> for VideoSummary {
    fn from(video: &VideoDescriptor) -> Self {
        Self {
            path: video.path.clone(),
            size: video.size,
            duration: video.duration(),
            resolution: video.media.as_ref().map(|m| format!("{}x{}", m.width, m.height)),
            codec: video.media.as_ref().map(|m| m.video_codec.to_string()),
        }
    }
}

fn largest_first(buckets: &[DuplicateBucket]) -> Vec<&DuplicateBucket> {
    let mut sorted: Vec<_> = buckets.iter().collect();
    sorted.sort_by(|a, b| b.total_size().cmp(&a.total_size()).then(a.id.cmp(&b.id)));
    sorted
}

fn print_discovery(report: &DiscoveryReport, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => {
            let fp = &report.fingerprint;
            println!();
            println!("{}", "─".repeat(60));
            println!(
                " {} videos - {}",
                report.scan.videos,
                format_size(report.scan.total_size)
            );
            println!(
                " {} files seen in {} directories",
                report.scan.files_seen, report.scan.dirs
            );
            println!(
                " {} probed, {} corrupted",
                report.probe.probed, report.probe.corrupted
            );
            println!(
                " {} unchanged, {} reused, {} new groups",
                report.reconcile.unchanged,
                report.reconcile.reused_by_inode + report.reconcile.reused_by_content,
                report.reconcile.new_groups
            );
            println!(
                " {} fingerprinted, {} featureless, {} failed",
                fp.fingerprinted, fp.degenerate, fp.failed
            );
            if fp.writer.dropped_rows > 0 {
                println!(" {} videos could not be saved", fp.writer.dropped_rows);
            }
            println!(" Finished in {:.2}s", report.elapsed.as_secs_f64());
            println!("{}", "─".repeat(60));

            if !report.warnings.is_empty() {
                println!();
                println!("{} warning(s) during scan", report.warnings.len());
            }
        }
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string_pretty(&DiscoverySummary::from(report))?
            );
        }
    }
    Ok(())
}

fn print_clusters(report: &ClusterReport, output: &OutputArgs) -> Result<()> {
    match output.format {
        OutputFormat::Text => {
            let groups: Vec<_> = largest_first(&report.buckets)
                .into_iter()
                .take(output.top)
                .map(GroupSummary::from_bucket)
                .collect();
            print_group_text(
                &groups,
                report.buckets.len(),
                &format!("{} fingerprints compared", report.stats.fingerprints),
            );
        }
        OutputFormat::Json => {
            let summary = ClusterSummary::new(report, output.top);
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
    }
    Ok(())
}

fn print_groups(groups: &[StoredGroup], counts: StoreCounts, output: &OutputArgs) -> Result<()> {
    let mut summaries: Vec<_> = groups.iter().map(GroupSummary::from_stored).collect();
    summaries.sort_by(|a, b| b.total_size.cmp(&a.total_size).then(a.bucket.cmp(&b.bucket)));
    let total = summaries.len();
    summaries.truncate(output.top);

    match output.format {
        OutputFormat::Text => print_group_text(
            &summaries,
            total,
            &format!(
                "{} videos, {} fingerprints in the database",
                counts.videos, counts.fingerprints
            ),
        ),
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&summaries)?);
        }
    }
    Ok(())
}

fn print_group_text(groups: &[GroupSummary], total: usize, context: &str) {
    println!();
    println!("{}", "─".repeat(70));
    println!(" Duplicate Video Report");
    println!(" {context}");
    println!("{}", "─".repeat(70));
    println!();

    if groups.is_empty() {
        println!(" No duplicate videos found.");
        return;
    }

    println!(" Found {total} duplicate groups");
    println!();
    for (i, group) in groups.iter().enumerate() {
        println!(
            " Group {} ({} videos, {} total)",
            i + 1,
            group.videos.len(),
            format_size(group.total_size)
        );
        for video in &group.videos {
            let duration = video
                .duration
                .map(|d| format!("{d:.1}s"))
                .unwrap_or_else(|| "?".to_string());
            println!(
                "   {} [{}, {}{}]",
                video.path.display(),
                format_size(video.size),
                duration,
                video
                    .resolution
                    .as_deref()
                    .map(|r| format!(", {r}"))
                    .unwrap_or_default()
            );
        }
        println!();
    }
}

fn format_size(bytes: u64) -> String {
    humansize::format_size(bytes, humansize::BINARY)
}
