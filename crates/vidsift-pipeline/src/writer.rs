//! Single batching writer between the workers and the store.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use vidsift_core::{PersistRecord, StoreError, VideoStore};

use crate::config::OrchestratorConfig;

/// Store handle shared by the writer and the pipeline phases.
pub type SharedStore<S> = Arc<Mutex<S>>;

/// Lock a shared store from blocking code.
pub(crate) fn lock_store<S>(store: &SharedStore<S>) -> Result<MutexGuard<'_, S>, StoreError> {
    store.lock().map_err(|_| StoreError::Unavailable {
        message: "store lock poisoned".to_string(),
    })
}

/// Counters for one writer run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriterReport {
    /// Rows the store accepted.
    pub persisted_rows: u64,
    /// Rows lost with a dropped batch.
    pub dropped_rows: u64,
    /// Batches committed.
    pub batches: u64,
    /// Batches dropped after a non-transient error or too many attempts.
    pub dropped_batches: u64,
    /// Flush attempts repeated because the store was busy.
    pub retries: u64,
}

/// Collects persistence tasks into batches and commits each in one transaction.
///
/// A batch is flushed once it reaches `batch_size` or when `flush_interval`
/// elapses, whichever comes first. The writer completes after every sender
/// is gone and the last partial batch is flushed.
pub struct BatchWriter<S> {
    store: SharedStore<S>,
    config: OrchestratorConfig,
    batch: Vec<PersistRecord>,
    report: WriterReport,
}

impl<S: VideoStore + 'static> BatchWriter<S> {
    /// Create a writer for `store`.
    pub fn new(store: SharedStore<S>, config: OrchestratorConfig) -> Self {
        let batch = Vec::with_capacity(config.batch_size);
        Self {
            store,
            config,
            batch,
            report: WriterReport::default(),
        }
    }

    /// Consume persistence tasks until every sender is dropped.
    ///
    /// Cancellation flushes the pending batch but keeps draining, so nothing
    /// a worker already queued is lost.
    pub async fn run(
        mut self,
        mut rx: mpsc::Receiver<PersistRecord>,
        cancel: CancellationToken,
    ) -> WriterReport {
        // `interval` panics on a zero period.
        let period = self.config.flush_interval.max(Duration::from_millis(1));
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        let mut cancelled = false;
        loop {
            tokio::select! {
                record = rx.recv() => match record {
                    Some(record) => {
                        self.batch.push(record);
                        if self.batch.len() >= self.config.batch_size {
                            self.flush().await;
                            ticker.reset();
                        }
                    }
                    None => break,
                },
                _ = ticker.tick() => {
                    if !self.batch.is_empty() {
                        debug!(rows = self.batch.len(), "Flush interval elapsed");
                        self.flush().await;
                    }
                }
                _ = cancel.cancelled(), if !cancelled => {
                    cancelled = true;
                    debug!(rows = self.batch.len(), "Writer cancelled, flushing and draining");
                    if !self.batch.is_empty() {
                        self.flush().await;
                    }
                }
            }
        }

        if !self.batch.is_empty() {
            self.flush().await;
        }
        debug!(report = ?self.report, "Writer finished");
        self.report
    }

    async fn flush(&mut self) {
        let records: Arc<[PersistRecord]> = std::mem::take(&mut self.batch).into();
        let rows = records.len() as u64;
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            let store = Arc::clone(&self.store);
            let batch = Arc::clone(&records);
            let result = tokio::task::spawn_blocking(move || {
                let mut guard = lock_store(&store)?;
                guard.create_videos_with_fingerprints(&batch)
            })
            .await;

            let err = match result {
                Ok(Ok(written)) => {
                    self.report.batches += 1;
                    self.report.persisted_rows += written as u64;
                    debug!(rows = written, attempt, "Batch committed");
                    return;
                }
                Ok(Err(err)) => err,
                Err(join) => StoreError::Query {
                    message: format!("store task failed: {join}"),
                },
            };

            if err.is_transient() && attempt < self.config.max_flush_attempts {
                let delay = self.config.retry_delay(attempt);
                warn!(attempt, ?delay, "Store busy, retrying batch: {err}");
                self.report.retries += 1;
                tokio::time::sleep(delay).await;
                continue;
            }

            error!(rows, attempts = attempt, "Dropping batch: {err}");
            for record in records.iter() {
                error!(path = %record.video.path.display(), "Video not persisted");
            }
            self.report.dropped_batches += 1;
            self.report.dropped_rows += rows;
            return;
        }
    }
}
