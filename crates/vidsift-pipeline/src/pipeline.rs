//! End-to-end discovery and clustering runs.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use vidsift_analyze::{
    ClusterConfig, ClusterStats, DuplicateBucket, DuplicateClusterer, FingerprintConfig,
    FingerprintGenerator, ReconcileStats, Reconciler,
};
use vidsift_core::{
    FrameExtractor, MediaProbe, PipelineError, ScanConfig, ScanError, ScanWarning, StoreError,
    VideoDescriptor, VideoStore,
};
use vidsift_scan::{ProbeStage, ProbeStats, ScanOutcome, ScanProgress, ScanStats, VideoScanner};

use crate::EVENT_CHANNEL_SIZE;
use crate::config::OrchestratorConfig;
use crate::orchestrator::{FingerprintOrchestrator, OrchestratorReport};
use crate::progress::{FingerprintProgress, ProgressUpdate};
use crate::writer::lock_store;

pub use crate::writer::SharedStore;

/// Summary of one discovery run.
#[derive(Debug, Clone)]
pub struct DiscoveryReport {
    /// Enumeration counters.
    pub scan: ScanStats,
    /// Entries skipped during enumeration.
    pub warnings: Vec<ScanWarning>,
    /// Metadata probe counters.
    pub probe: ProbeStats,
    /// How discovered videos related to the store.
    pub reconcile: ReconcileStats,
    /// Fingerprinting and persistence counters.
    pub fingerprint: OrchestratorReport,
    /// Wall-clock duration of the whole run.
    pub elapsed: Duration,
}

/// Result of one clustering pass.
#[derive(Debug, Clone)]
pub struct ClusterReport {
    /// Duplicate buckets with at least two fingerprints.
    pub buckets: Vec<DuplicateBucket>,
    /// Clustering counters.
    pub stats: ClusterStats,
}

/// Event emitted by [`Pipeline::start_discovery`].
#[derive(Debug)]
pub enum PipelineEvent {
    /// Enumeration progress.
    Scanning(ScanProgress),
    /// Fingerprinting progress.
    Progress(ProgressUpdate),
    /// The run finished.
    Complete(Result<DiscoveryReport, PipelineError>),
}

/// Discovery and clustering over one set of roots.
pub struct Pipeline<P, E> {
    scan: ScanConfig,
    fingerprint: FingerprintConfig,
    orchestrator: OrchestratorConfig,
    cluster: ClusterConfig,
    probe: Arc<P>,
    extractor: Arc<E>,
    cancel: CancellationToken,
    scan_tx: broadcast::Sender<ScanProgress>,
    progress_tx: broadcast::Sender<ProgressUpdate>,
}

impl<P, E> Clone for Pipeline<P, E> {
    fn clone(&self) -> Self {
        Self {
            scan: self.scan.clone(),
            fingerprint: self.fingerprint.clone(),
            orchestrator: self.orchestrator.clone(),
            cluster: self.cluster.clone(),
            probe: Arc::clone(&self.probe),
            extractor: Arc::clone(&self.extractor),
            cancel: self.cancel.clone(),
            scan_tx: self.scan_tx.clone(),
            progress_tx: self.progress_tx.clone(),
        }
    }
}

impl<P, E> Pipeline<P, E>
where
    P: MediaProbe + 'static,
    E: FrameExtractor + 'static,
{
    /// Create a pipeline with default fingerprint, orchestrator and cluster settings.
    pub fn new(scan: ScanConfig, probe: P, extractor: E) -> Self {
        let (scan_tx, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        let (progress_tx, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        Self {
            scan,
            fingerprint: FingerprintConfig::default(),
            orchestrator: OrchestratorConfig::default(),
            cluster: ClusterConfig::default(),
            probe: Arc::new(probe),
            extractor: Arc::new(extractor),
            cancel: CancellationToken::new(),
            scan_tx,
            progress_tx,
        }
    }

    pub fn with_fingerprint_config(mut self, config: FingerprintConfig) -> Self {
        self.fingerprint = config;
        self
    }

    pub fn with_orchestrator_config(mut self, config: OrchestratorConfig) -> Self {
        self.orchestrator = config;
        self
    }

    pub fn with_cluster_config(mut self, config: ClusterConfig) -> Self {
        self.cluster = config;
        self
    }

    /// Observe `cancel` in every phase.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token that cancels this pipeline's runs.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Subscribe to fingerprinting progress of subsequent runs.
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressUpdate> {
        self.progress_tx.subscribe()
    }

    /// Subscribe to enumeration progress of subsequent runs.
    pub fn subscribe_scan(&self) -> broadcast::Receiver<ScanProgress> {
        self.scan_tx.subscribe()
    }

    /// Enumerate, probe, reconcile against `store`, then fingerprint and
    /// persist every group that needs it.
    pub async fn discover_and_fingerprint<S: VideoStore + 'static>(
        &self,
        store: SharedStore<S>,
    ) -> Result<DiscoveryReport, PipelineError> {
        let started = Instant::now();
        self.fingerprint
            .validate()
            .and_then(|()| self.orchestrator.validate())
            .map_err(|message| PipelineError::InvalidConfig { message })?;

        let known = blocking({
            let store = Arc::clone(&store);
            move || {
                let guard = lock_store(&store)?;
                guard.all_videos()
            }
        })
        .await?
        .map_err(|source| PipelineError::StoreUnreachable { source })?;
        info!(known = known.len(), roots = ?self.scan.roots, "Starting discovery");

        let config = self.scan.clone();
        let scanner = VideoScanner::with_sender(self.scan_tx.clone());
        let ScanOutcome {
            videos,
            warnings,
            stats: scan,
            roots,
            duration,
        } = blocking(move || scanner.scan(&config))
            .await?
            .map_err(interrupted)?;
        for warning in &warnings {
            warn!(path = %warning.path.display(), "{}", warning.message);
        }
        info!(videos = videos.len(), warnings = warnings.len(), ?duration, "Enumeration finished");
        if videos.is_empty() {
            return Err(PipelineError::NoInput { roots });
        }
        self.check_cancelled()?;

        let (mut videos, pending) = split_unchanged(videos, &known);
        let unchanged = videos.len() as u64;
        let probe = Arc::clone(&self.probe);
        let threads = self.scan.probe_threads;
        let cancel = self.cancel.clone();
        let (probed, mut probe_stats) =
            blocking(move || ProbeStage::new(probe, threads).run(pending, &cancel))
                .await?
                .map_err(interrupted)?;
        probe_stats.unchanged = unchanged;
        videos.extend(probed);
        info!(
            probed = probe_stats.probed,
            memo_hits = probe_stats.memo_hits,
            corrupted = probe_stats.corrupted,
            unchanged = probe_stats.unchanged,
            "Probing finished"
        );
        self.check_cancelled()?;

        let reconciliation = blocking(move || Reconciler::new().reconcile(videos, &known)).await?;
        let reconcile = reconciliation.stats.clone();
        info!(
            unchanged = reconcile.unchanged,
            reused_by_inode = reconcile.reused_by_inode,
            reused_by_content = reconcile.reused_by_content,
            new_groups = reconcile.new_groups,
            "Reconciliation finished"
        );
        self.check_cancelled()?;

        let groups = reconciliation.groups;
        let progress = Arc::new(FingerprintProgress::with_sender(
            groups.len() as u64,
            self.progress_tx.clone(),
        ));
        let generator =
            FingerprintGenerator::new(Arc::clone(&self.extractor), self.fingerprint.clone());
        let orchestrator = FingerprintOrchestrator::new(generator, store, self.orchestrator.clone());
        let fingerprint = orchestrator.run(groups, progress, &self.cancel).await?;
        self.check_cancelled()?;

        Ok(DiscoveryReport {
            scan,
            warnings,
            probe: probe_stats,
            reconcile,
            fingerprint,
            elapsed: started.elapsed(),
        })
    }

    /// Run discovery in the background, streaming progress then the result.
    pub fn start_discovery<S: VideoStore + 'static>(
        &self,
        store: SharedStore<S>,
    ) -> mpsc::Receiver<PipelineEvent> {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_SIZE);
        let pipeline = self.clone();
        let mut scanning = self.subscribe_scan();
        let mut progress = self.subscribe();

        tokio::spawn(async move {
            let run = pipeline.discover_and_fingerprint(store);
            tokio::pin!(run);

            let result = loop {
                tokio::select! {
                    biased;
                    update = scanning.recv() => {
                        if let Ok(update) = update {
                            let _ = tx.send(PipelineEvent::Scanning(update)).await;
                        }
                    }
                    update = progress.recv() => {
                        if let Ok(update) = update {
                            let _ = tx.send(PipelineEvent::Progress(update)).await;
                        }
                    }
                    result = &mut run => break result,
                }
            };

            while let Ok(update) = scanning.try_recv() {
                let _ = tx.send(PipelineEvent::Scanning(update)).await;
            }
            loop {
                match progress.try_recv() {
                    Ok(update) => {
                        let _ = tx.send(PipelineEvent::Progress(update)).await;
                    }
                    Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                    Err(_) => break,
                }
            }
            let _ = tx.send(PipelineEvent::Complete(result)).await;
        });

        rx
    }

    /// Recompute duplicate buckets over everything in `store`.
    pub async fn cluster<S: VideoStore + 'static>(
        &self,
        store: SharedStore<S>,
    ) -> Result<ClusterReport, PipelineError> {
        let config = self.cluster.clone();
        let (buckets, stats) = blocking(move || {
            let mut guard = lock_store(&store)?;
            run_clustering(&mut *guard, &config)
        })
        .await??;
        Ok(ClusterReport { buckets, stats })
    }

    fn check_cancelled(&self) -> Result<(), PipelineError> {
        if self.cancel.is_cancelled() {
            Err(PipelineError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Recompute buckets for every stored fingerprint, persist them, and return
/// the duplicate buckets joined to their videos.
pub fn run_clustering<S: VideoStore + ?Sized>(
    store: &mut S,
    config: &ClusterConfig,
) -> Result<(Vec<DuplicateBucket>, ClusterStats), StoreError> {
    let started = Instant::now();
    let mut fingerprints = store.all_fingerprints()?;
    let videos = store.all_videos()?;

    let clusterer = DuplicateClusterer::with_config(config.clone());
    let stats = clusterer.assign_buckets(&mut fingerprints);
    store.bulk_update_fingerprints(&fingerprints)?;
    let buckets = clusterer.collect_buckets(&fingerprints, &videos);

    info!(
        fingerprints = stats.fingerprints,
        buckets = buckets.len(),
        length_mismatches = stats.length_mismatches,
        elapsed = ?started.elapsed(),
        "Clustering finished"
    );
    Ok((buckets, stats))
}

/// Split scanned videos into unchanged known files, which take over the
/// stored metadata, and everything that still needs a probe.
fn split_unchanged(
    videos: Vec<VideoDescriptor>,
    known: &[VideoDescriptor],
) -> (Vec<VideoDescriptor>, Vec<VideoDescriptor>) {
    let known_by_path: HashMap<&Path, &VideoDescriptor> =
        known.iter().map(|k| (k.path(), k)).collect();

    let mut unchanged = Vec::new();
    let mut pending = Vec::new();
    for mut video in videos {
        match known_by_path.get(video.path()) {
            Some(stored)
                if !stored.corrupted && stored.media.is_some() && video.is_unchanged_from(stored) =>
            {
                video.media = stored.media.clone();
                unchanged.push(video);
            }
            _ => pending.push(video),
        }
    }
    (unchanged, pending)
}

/// Run blocking work on the blocking pool.
async fn blocking<T, F>(f: F) -> Result<T, PipelineError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| PipelineError::Task {
            message: e.to_string(),
        })
}

fn interrupted(err: ScanError) -> PipelineError {
    match err {
        ScanError::Interrupted => PipelineError::Cancelled,
        other => PipelineError::Scan(other),
    }
}
