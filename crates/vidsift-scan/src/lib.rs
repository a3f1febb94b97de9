//! Video discovery for vidsift.
//!
//! This crate finds candidate video files and gathers everything the
//! reconciliation stage needs to know about them:
//!
//! - **Parallel traversal** via jwalk, consumed in sorted order
//! - **Progress updates** via broadcast channels
//! - **Hardlink detection** through an inode tracker
//! - **Streaming content digest** (XxHash64 seeded with the file size)
//! - **Bounded metadata probing** on a rayon pool, memoized per inode
//!
//! # Example
//!
//! ```rust,no_run
//! use vidsift_scan::{ScanConfig, VideoScanner};
//!
//! let config = ScanConfig::new("/path/to/videos");
//! let scanner = VideoScanner::new();
//! let outcome = scanner.scan(&config).unwrap();
//!
//! println!("Found {} videos", outcome.videos.len());
//! ```

mod hash;
mod inode;
mod probe;
mod progress;
mod scanner;

pub use hash::{ContentDigest, HASH_CHUNK_SIZE, StreamingDigest, content_hash};
pub use inode::InodeTracker;
pub use probe::{ProbeStage, ProbeStats};
pub use progress::ScanProgress;
pub use scanner::{ScanOutcome, ScanStats, VideoScanner};

// Re-export core types for convenience
pub use vidsift_core::{ScanConfig, ScanError, ScanWarning, VideoDescriptor, WarningKind};
