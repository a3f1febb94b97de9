//! Bounded metadata probing.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use rayon::prelude::*;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use vidsift_core::{InodeInfo, MediaInfo, MediaProbe, ScanError, VideoDescriptor};

/// Counters for one probe pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeStats {
    /// Probe calls made.
    pub probed: u64,
    /// Descriptors answered from the inode memo.
    pub memo_hits: u64,
    /// Descriptors marked corrupted.
    pub corrupted: u64,
    /// Unchanged known files that kept their stored metadata.
    pub unchanged: u64,
}

/// Runs the probe collaborator over descriptors on a bounded rayon pool.
///
/// Hardlinked paths share one probe call through a memo keyed by inode.
pub struct ProbeStage<P> {
    probe: P,
    threads: usize,
    memo: Mutex<HashMap<InodeInfo, Option<MediaInfo>>>,
}

impl<P: MediaProbe> ProbeStage<P> {
    /// Create a stage running at most `threads` probes at once.
    pub fn new(probe: P, threads: usize) -> Self {
        Self {
            probe,
            threads: threads.max(1),
            memo: Mutex::new(HashMap::new()),
        }
    }

    /// Fill in `media` for every descriptor, marking failures as corrupted.
    ///
    /// Returns `ScanError::Interrupted` if `cancel` fires before all probes ran.
    pub fn run(
        &self,
        videos: Vec<VideoDescriptor>,
        cancel: &CancellationToken,
    ) -> Result<(Vec<VideoDescriptor>, ProbeStats), ScanError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.threads)
            .thread_name(|i| format!("vidsift-probe-{i}"))
            .build()
            .map_err(|e| ScanError::Other {
                message: format!("failed to build probe pool: {e}"),
            })?;

        let probed = AtomicU64::new(0);
        let memo_hits = AtomicU64::new(0);

        let videos: Vec<VideoDescriptor> = pool.install(|| {
            videos
                .into_par_iter()
                .map(|mut video| {
                    if cancel.is_cancelled() {
                        return video;
                    }
                    let (media, hit) = self.probe_once(&video);
                    if hit {
                        memo_hits.fetch_add(1, Ordering::Relaxed);
                    } else {
                        probed.fetch_add(1, Ordering::Relaxed);
                    }
                    match media {
                        Some(media) => video.media = Some(media),
                        None => video.corrupted = true,
                    }
                    video
                })
                .collect()
        });

        if cancel.is_cancelled() {
            return Err(ScanError::Interrupted);
        }

        let stats = ProbeStats {
            probed: probed.into_inner(),
            memo_hits: memo_hits.into_inner(),
            corrupted: videos.iter().filter(|v| v.corrupted).count() as u64,
            unchanged: 0,
        };
        debug!(?stats, "Probe pass finished");
        Ok((videos, stats))
    }

    /// Probe one descriptor, returning the result and whether it came from the memo.
    fn probe_once(&self, video: &VideoDescriptor) -> (Option<MediaInfo>, bool) {
        if let Some(cached) = self.lock_memo().get(&video.inode) {
            return (cached.clone(), true);
        }

        let media = match self.probe.probe(&video.path) {
            Ok(media) if media.duration.is_finite() && media.duration > 0.0 => Some(media),
            Ok(media) => {
                warn!(path = %video.path.display(), duration = media.duration, "Video has no usable duration");
                None
            }
            Err(err) if err.is_unreadable() => {
                warn!(path = %video.path.display(), "Corrupt video: {err}");
                None
            }
            Err(err) => {
                warn!(path = %video.path.display(), "Probe failed: {err}");
                None
            }
        };

        self.lock_memo().insert(video.inode, media.clone());
        (media, false)
    }

    fn lock_memo(&self) -> std::sync::MutexGuard<'_, HashMap<InodeInfo, Option<MediaInfo>>> {
        // A panicking probe cannot leave the map half-written.
        self.memo.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
