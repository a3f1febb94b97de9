//! Inode tracking for hardlink detection.

use dashmap::DashMap;
use vidsift_core::InodeInfo;

/// Counts how many discovered paths point at each (inode, device) pair.
#[derive(Debug, Default)]
pub struct InodeTracker {
    seen: DashMap<InodeInfo, u32>,
}

impl InodeTracker {
    /// Create a new inode tracker.
    pub fn new() -> Self {
        Self {
            seen: DashMap::new(),
        }
    }

    /// Track an inode. Returns `true` if this is the first time seeing it.
    pub fn track(&self, info: InodeInfo) -> bool {
        let mut count = self.seen.entry(info).or_insert(0);
        *count += 1;
        *count == 1
    }

    /// Check if an inode has been seen (without tracking).
    pub fn has_seen(&self, info: &InodeInfo) -> bool {
        self.seen.contains_key(info)
    }

    /// Number of paths that reached an already tracked inode.
    pub fn repeated_paths(&self) -> u64 {
        self.seen.iter().map(|e| u64::from(*e.value() - 1)).sum()
    }

    /// Get the number of unique inodes tracked.
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    /// Check if no inodes have been tracked.
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}
