//! Fingerprinting progress reporting.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::broadcast;

/// Progress information during fingerprinting.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    /// Groups finished so far, in any outcome.
    pub completed: u64,
    /// Groups in this run.
    pub total: u64,
    /// Canonical path of the group that just finished.
    pub current_path: Option<PathBuf>,
}

impl ProgressUpdate {
    /// Fraction of groups finished, from 0.0 to 1.0.
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            self.completed as f64 / self.total as f64
        }
    }
}

/// Progress reporter for one fingerprinting run.
///
/// Each tick adds one finished group. Updates go out on a broadcast channel
/// and are dropped when nobody listens or a listener lags, so a tick never
/// waits on a subscriber.
#[derive(Debug)]
pub struct FingerprintProgress {
    completed: AtomicU64,
    total: u64,
    tx: broadcast::Sender<ProgressUpdate>,
}

impl FingerprintProgress {
    /// Create a reporter with its own channel.
    pub fn new(total: u64) -> Self {
        let (tx, _) = broadcast::channel(100);
        Self::with_sender(total, tx)
    }

    /// Create a reporter publishing on an existing channel.
    pub fn with_sender(total: u64, tx: broadcast::Sender<ProgressUpdate>) -> Self {
        Self {
            completed: AtomicU64::new(0),
            total,
            tx,
        }
    }

    /// Subscribe to progress updates.
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressUpdate> {
        self.tx.subscribe()
    }

    /// Record one finished group.
    pub fn tick(&self, current_path: Option<PathBuf>) -> ProgressUpdate {
        let completed = self.completed.fetch_add(1, Ordering::Relaxed) + 1;
        let update = ProgressUpdate {
            completed,
            total: self.total,
            current_path,
        };
        let _ = self.tx.send(update.clone());
        update
    }

    /// Groups finished so far.
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    /// Groups in this run.
    pub fn total(&self) -> u64 {
        self.total
    }
}
