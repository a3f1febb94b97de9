//! Concurrent fingerprinting of equivalence groups.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use vidsift_analyze::{EquivalenceGroup, FingerprintGenerator, FingerprintOutcome};
use vidsift_core::{
    FingerprintRef, FrameExtractor, PersistRecord, PipelineError, Thumbnail, VideoStore,
};

use crate::PERSIST_CHANNEL_SIZE;
use crate::config::OrchestratorConfig;
use crate::progress::FingerprintProgress;
use crate::writer::{BatchWriter, SharedStore, WriterReport};

/// Outcome counts of one fingerprinting run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrchestratorReport {
    /// Groups handed to the workers.
    pub groups: u64,
    /// Groups that got a new fingerprint.
    pub fingerprinted: u64,
    /// Groups persisted with a fingerprint reused from the store.
    pub reused: u64,
    /// Groups skipped because their fingerprint was featureless.
    pub degenerate: u64,
    /// Groups skipped because fingerprinting failed.
    pub failed: u64,
    /// Groups left unprocessed because of cancellation.
    pub cancelled: u64,
    /// Writer counters.
    pub writer: WriterReport,
}

impl OrchestratorReport {
    fn absorb(&mut self, tally: WorkerTally) {
        self.fingerprinted += tally.fingerprinted;
        self.reused += tally.reused;
        self.degenerate += tally.degenerate;
        self.failed += tally.failed;
        self.cancelled += tally.cancelled;
    }
}

#[derive(Debug, Default)]
struct WorkerTally {
    fingerprinted: u64,
    reused: u64,
    degenerate: u64,
    failed: u64,
    cancelled: u64,
}

/// Drives a fixed pool of fingerprint workers and one batching writer.
pub struct FingerprintOrchestrator<E, S> {
    generator: Arc<FingerprintGenerator<E>>,
    store: SharedStore<S>,
    config: OrchestratorConfig,
}

impl<E, S> FingerprintOrchestrator<E, S>
where
    E: FrameExtractor + 'static,
    S: VideoStore + 'static,
{
    /// Create an orchestrator.
    pub fn new(
        generator: FingerprintGenerator<E>,
        store: SharedStore<S>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            generator: Arc::new(generator),
            store,
            config,
        }
    }

    /// Fingerprint and persist every group.
    ///
    /// Completes once every worker has stopped and the writer has drained.
    /// Cancellation stops workers between groups; results already queued
    /// are still persisted.
    pub async fn run(
        &self,
        groups: Vec<EquivalenceGroup>,
        progress: Arc<FingerprintProgress>,
        cancel: &CancellationToken,
    ) -> Result<OrchestratorReport, PipelineError> {
        self.config
            .validate()
            .map_err(|message| PipelineError::InvalidConfig { message })?;

        let mut report = OrchestratorReport {
            groups: groups.len() as u64,
            ..OrchestratorReport::default()
        };
        info!(
            groups = report.groups,
            workers = self.config.workers,
            batch_size = self.config.batch_size,
            "Fingerprinting"
        );

        let (group_tx, group_rx) = mpsc::unbounded_channel();
        for group in groups {
            let _ = group_tx.send(group);
        }
        drop(group_tx);
        let group_rx = Arc::new(Mutex::new(group_rx));

        let (persist_tx, persist_rx) = mpsc::channel(PERSIST_CHANNEL_SIZE);
        let writer = BatchWriter::new(Arc::clone(&self.store), self.config.clone());
        let writer = tokio::spawn(writer.run(persist_rx, cancel.clone()));

        let mut workers = JoinSet::new();
        for id in 0..self.config.workers {
            let worker = Worker {
                id,
                generator: Arc::clone(&self.generator),
                groups: Arc::clone(&group_rx),
                persist: persist_tx.clone(),
                progress: Arc::clone(&progress),
                cancel: cancel.clone(),
            };
            workers.spawn(worker.run());
        }
        drop(persist_tx);

        let mut failure = None;
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(tally) => report.absorb(tally),
                Err(err) => {
                    error!("Fingerprint worker failed: {err}");
                    failure.get_or_insert(PipelineError::Task {
                        message: err.to_string(),
                    });
                }
            }
        }

        // Groups still queued were never pulled.
        report.cancelled += group_rx.lock().await.len() as u64;

        report.writer = writer.await.map_err(|e| PipelineError::Task {
            message: format!("writer: {e}"),
        })?;
        if let Some(err) = failure {
            return Err(err);
        }

        info!(
            fingerprinted = report.fingerprinted,
            reused = report.reused,
            degenerate = report.degenerate,
            failed = report.failed,
            persisted = report.writer.persisted_rows,
            dropped = report.writer.dropped_rows,
            "Fingerprinting finished"
        );
        Ok(report)
    }
}

struct Worker<E> {
    id: usize,
    generator: Arc<FingerprintGenerator<E>>,
    groups: Arc<Mutex<mpsc::UnboundedReceiver<EquivalenceGroup>>>,
    persist: mpsc::Sender<PersistRecord>,
    progress: Arc<FingerprintProgress>,
    cancel: CancellationToken,
}

impl<E: FrameExtractor + 'static> Worker<E> {
    async fn run(self) -> WorkerTally {
        let mut tally = WorkerTally::default();
        loop {
            if self.cancel.is_cancelled() {
                debug!(worker = self.id, "Worker cancelled");
                break;
            }
            let next = self.groups.lock().await.recv().await;
            let Some(group) = next else {
                break;
            };
            self.process(group, &mut tally).await;
        }
        tally
    }

    async fn process(&self, group: EquivalenceGroup, tally: &mut WorkerTally) {
        let path = group.canonical().path.clone();

        if let Some(fingerprint) = group.canonical().fingerprint.clone() {
            tally.reused += 1;
            self.persist(group, fingerprint, Arc::from(Vec::new())).await;
            self.tick(path);
            return;
        }

        let generator = Arc::clone(&self.generator);
        let canonical = group.canonical().clone();
        let cancel = self.cancel.clone();
        let outcome =
            tokio::task::spawn_blocking(move || generator.generate(&canonical, &cancel)).await;

        match outcome {
            Ok(Ok(FingerprintOutcome::Generated {
                fingerprint,
                thumbnails,
            })) => {
                tally.fingerprinted += 1;
                debug!(worker = self.id, path = %path.display(), members = group.len(), "Fingerprinted");
                self.persist(group, Arc::new(fingerprint), thumbnails.into())
                    .await;
            }
            Ok(Ok(FingerprintOutcome::Degenerate { value })) => {
                tally.degenerate += 1;
                warn!(path = %path.display(), %value, "Skipping featureless video");
            }
            Ok(Err(err)) if err.is_cancelled() => {
                tally.cancelled += 1;
                return;
            }
            Ok(Err(err)) => {
                tally.failed += 1;
                warn!(path = %path.display(), "Fingerprinting failed: {err}");
            }
            Err(err) => {
                tally.failed += 1;
                error!(path = %path.display(), "Fingerprint task failed: {err}");
            }
        }
        self.tick(path);
    }

    /// Queue one persistence task per member, all sharing `fingerprint`.
    async fn persist(
        &self,
        group: EquivalenceGroup,
        fingerprint: FingerprintRef,
        thumbnails: Arc<[Thumbnail]>,
    ) {
        for mut video in group.into_members() {
            video.fingerprint = Some(FingerprintRef::clone(&fingerprint));
            let record =
                PersistRecord::new(video, FingerprintRef::clone(&fingerprint), Arc::clone(&thumbnails));
            if self.persist.send(record).await.is_err() {
                error!(worker = self.id, "Writer stopped before the group was queued");
                return;
            }
        }
    }

    fn tick(&self, path: PathBuf) {
        self.progress.tick(Some(path));
    }
}
