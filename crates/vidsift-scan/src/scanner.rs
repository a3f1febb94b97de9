//! JWalk-based video discovery.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[cfg(unix)]
use std::os::unix::fs::MetadataExt;

use compact_str::CompactString;
use globset::{Glob, GlobSet, GlobSetBuilder};
use jwalk::{Parallelism, WalkDir};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use vidsift_core::{InodeInfo, ScanConfig, ScanError, ScanWarning, VideoDescriptor, WarningKind};

use crate::inode::InodeTracker;
use crate::progress::ScanProgress;

/// Send a progress update every this many accepted videos.
const PROGRESS_EVERY: u64 = 256;

/// Counters collected during one scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanStats {
    /// Directories visited.
    pub dirs: u64,
    /// Regular files visited, video or not.
    pub files_seen: u64,
    /// Files accepted as video.
    pub videos: u64,
    /// Total size of accepted videos.
    pub total_size: u64,
    /// Files skipped because of their extension.
    pub skipped_extension: u64,
    /// Zero-byte video files skipped.
    pub skipped_empty: u64,
    /// Symbolic links skipped because links are not followed.
    pub skipped_symlinks: u64,
    /// Entries on another filesystem skipped.
    pub skipped_other_fs: u64,
    /// Accepted paths that reached an inode already seen in this scan.
    pub hardlinked: u64,
}

/// Result of one discovery pass.
#[derive(Debug)]
pub struct ScanOutcome {
    /// Accepted videos, in sorted walk order per root.
    pub videos: Vec<VideoDescriptor>,
    /// Non-fatal problems, one per skipped entry.
    pub warnings: Vec<ScanWarning>,
    /// Counters.
    pub stats: ScanStats,
    /// Canonical roots that were walked.
    pub roots: Vec<PathBuf>,
    /// Wall-clock duration.
    pub duration: Duration,
}

/// Discovers video files under one or more roots using jwalk.
pub struct VideoScanner {
    progress_tx: broadcast::Sender<ScanProgress>,
}

impl VideoScanner {
    /// Create a new scanner.
    pub fn new() -> Self {
        let (progress_tx, _) = broadcast::channel(100);
        Self { progress_tx }
    }

    /// Create a scanner that publishes progress on an existing channel.
    pub fn with_sender(progress_tx: broadcast::Sender<ScanProgress>) -> Self {
        Self { progress_tx }
    }

    /// Subscribe to scan progress updates.
    pub fn subscribe(&self) -> broadcast::Receiver<ScanProgress> {
        self.progress_tx.subscribe()
    }

    /// Walk every configured root and collect video descriptors.
    pub fn scan(&self, config: &ScanConfig) -> Result<ScanOutcome, ScanError> {
        let start = Instant::now();
        let ignore = build_ignore_set(&config.ignore_patterns)?;

        let mut roots = Vec::new();
        for root in config.non_overlapping_roots() {
            let root_path = root.canonicalize().map_err(|e| ScanError::io(&root, e))?;
            if !root_path.is_dir() {
                return Err(ScanError::NotADirectory { path: root_path });
            }
            roots.push(root_path);
        }
        // Canonicalizing can reveal overlap hidden behind symlinks.
        roots.sort();
        roots.dedup();

        let tracker = InodeTracker::new();
        let mut walk = WalkState {
            start,
            videos: Vec::new(),
            warnings: Vec::new(),
            stats: ScanStats::default(),
        };

        for root_path in &roots {
            info!(root = %root_path.display(), "Scanning for videos");
            self.walk_root(config, root_path, &ignore, &tracker, &mut walk)?;
        }

        walk.stats.hardlinked = tracker.repeated_paths();
        let duration = start.elapsed();
        let _ = self.progress_tx.send(walk.snapshot(PathBuf::new()));
        debug!(
            videos = walk.stats.videos,
            warnings = walk.warnings.len(),
            elapsed_ms = duration.as_millis() as u64,
            "Scan finished"
        );

        Ok(ScanOutcome {
            videos: walk.videos,
            warnings: walk.warnings,
            stats: walk.stats,
            roots,
            duration,
        })
    }

    fn walk_root(
        &self,
        config: &ScanConfig,
        root_path: &Path,
        ignore: &Arc<GlobSet>,
        tracker: &InodeTracker,
        walk: &mut WalkState,
    ) -> Result<(), ScanError> {
        let root_metadata =
            std::fs::metadata(root_path).map_err(|e| ScanError::io(root_path, e))?;
        let root_device = get_dev(&root_metadata);

        let parallelism = match config.threads {
            0 => Parallelism::RayonDefaultPool {
                busy_timeout: Duration::from_millis(100),
            },
            n => Parallelism::RayonNewPool(n),
        };

        let prune = Arc::clone(ignore);
        let filter = config.clone();
        let walker = WalkDir::new(root_path)
            .parallelism(parallelism)
            .sort(true)
            .skip_hidden(false)
            .follow_links(config.follow_symlinks)
            .max_depth(config.max_depth.map(|d| d as usize).unwrap_or(usize::MAX))
            .process_read_dir(move |_depth, _path, _state, children| {
                children.retain(|entry| {
                    entry
                        .as_ref()
                        .map(|e| {
                            let name = e.file_name();
                            !filter.should_skip_hidden(&name.to_string_lossy())
                                && !prune.is_match(Path::new(name))
                        })
                        .unwrap_or(true)
                });
            });

        for entry_result in walker {
            let entry = match entry_result {
                Ok(e) => e,
                Err(err) => {
                    let path = err.path().map(|p| p.to_path_buf()).unwrap_or_default();
                    warn!(path = %path.display(), "Skipping unreadable entry: {err}");
                    walk.warnings
                        .push(ScanWarning::new(path, err.to_string(), WarningKind::ReadError));
                    continue;
                }
            };

            let path = entry.path();
            let file_type = entry.file_type();

            if file_type.is_dir() {
                walk.stats.dirs += 1;
                continue;
            }

            if file_type.is_symlink() {
                // Only reached when links are not followed.
                if config.is_video(&path) {
                    let target = std::fs::read_link(&path)
                        .map(|p| p.to_string_lossy().to_string())
                        .unwrap_or_default();
                    if !path.exists() {
                        walk.warnings.push(ScanWarning::broken_symlink(&path, &target));
                    }
                    debug!(path = %path.display(), target, "Skipping symlinked video");
                    walk.stats.skipped_symlinks += 1;
                }
                continue;
            }

            if !file_type.is_file() {
                continue;
            }
            walk.stats.files_seen += 1;

            if !config.is_video(&path) {
                walk.stats.skipped_extension += 1;
                continue;
            }

            let metadata = match entry.metadata() {
                Ok(m) => m,
                Err(err) => {
                    walk.warnings.push(ScanWarning::new(
                        &path,
                        err.to_string(),
                        WarningKind::MetadataError,
                    ));
                    continue;
                }
            };

            if !config.cross_filesystems && get_dev(&metadata) != root_device {
                walk.stats.skipped_other_fs += 1;
                continue;
            }

            let size = metadata.len();
            if size == 0 {
                walk.stats.skipped_empty += 1;
                continue;
            }

            let inode = InodeInfo::new(get_ino(&metadata), get_dev(&metadata));
            tracker.track(inode);

            let modified = metadata.modified().unwrap_or(std::time::UNIX_EPOCH);
            let mut video = VideoDescriptor::new(&path, size, modified, inode);
            video.nlink = get_nlink(&metadata);
            if entry.path_is_symlink() {
                video.symlink_target = std::fs::read_link(&path)
                    .ok()
                    .map(|p| CompactString::new(p.to_string_lossy()));
            }

            walk.stats.videos += 1;
            walk.stats.total_size += size;
            walk.videos.push(video);

            if walk.stats.videos % PROGRESS_EVERY == 0 {
                let _ = self.progress_tx.send(walk.snapshot(path));
            }
        }

        Ok(())
    }
}

impl Default for VideoScanner {
    fn default() -> Self {
        Self::new()
    }
}

/// Mutable state threaded through the walk of every root.
struct WalkState {
    start: Instant,
    videos: Vec<VideoDescriptor>,
    warnings: Vec<ScanWarning>,
    stats: ScanStats,
}

impl WalkState {
    fn snapshot(&self, current_path: PathBuf) -> ScanProgress {
        ScanProgress {
            files_seen: self.stats.files_seen,
            videos_found: self.stats.videos,
            bytes_found: self.stats.total_size,
            current_path,
            errors_count: self.warnings.len() as u64,
            elapsed: self.start.elapsed(),
        }
    }
}

fn build_ignore_set(patterns: &[String]) -> Result<Arc<GlobSet>, ScanError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|e| ScanError::InvalidConfig {
            message: format!("invalid ignore pattern {pattern:?}: {e}"),
        })?;
        builder.add(glob);
    }
    builder
        .build()
        .map(Arc::new)
        .map_err(|e| ScanError::InvalidConfig {
            message: e.to_string(),
        })
}

// Cross-platform metadata helpers

/// Get the device ID from metadata.
#[cfg(unix)]
fn get_dev(metadata: &std::fs::Metadata) -> u64 {
    metadata.dev()
}

#[cfg(not(unix))]
fn get_dev(_metadata: &std::fs::Metadata) -> u64 {
    0
}

/// Get the inode number from metadata.
#[cfg(unix)]
fn get_ino(metadata: &std::fs::Metadata) -> u64 {
    metadata.ino()
}

#[cfg(not(unix))]
fn get_ino(_metadata: &std::fs::Metadata) -> u64 {
    0
}

/// Get the number of hard links from metadata.
#[cfg(unix)]
fn get_nlink(metadata: &std::fs::Metadata) -> u64 {
    metadata.nlink()
}

#[cfg(not(unix))]
fn get_nlink(_metadata: &std::fs::Metadata) -> u64 {
    1
}
